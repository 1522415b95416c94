use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::adapter::DeliveryAdapter,
    config::Config,
    error::DeliveryError,
    models::{
        fcm::{FcmMessage, FcmNotification, FcmRequest, FcmResponse},
        notification::NotificationRequest,
    },
};

const FCM_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

/// Source of OAuth bearer tokens for the FCM API.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, DeliveryError>;
}

/// Application default credentials via `gcp_auth`.
pub struct GcpTokenSource {
    provider: Arc<dyn gcp_auth::TokenProvider>,
}

impl GcpTokenSource {
    pub async fn discover() -> Result<Self, DeliveryError> {
        let provider = gcp_auth::provider()
            .await
            .map_err(|e| DeliveryError::Authentication(e.to_string()))?;
        Ok(Self { provider })
    }
}

#[async_trait]
impl AccessTokenSource for GcpTokenSource {
    async fn access_token(&self) -> Result<String, DeliveryError> {
        let token = self
            .provider
            .token(&[FCM_SCOPE])
            .await
            .map_err(|e| DeliveryError::Authentication(e.to_string()))?;
        Ok(token.as_str().to_string())
    }
}

/// Fixed token, for emulators and tests.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, DeliveryError> {
        Ok(self.0.clone())
    }
}

pub struct FcmClient {
    http_client: Client,
    send_url: String,
    token_source: Arc<dyn AccessTokenSource>,
}

impl FcmClient {
    pub fn new(config: &Config, token_source: Arc<dyn AccessTokenSource>) -> Self {
        Self::with_base_url(&config.fcm_base_url, &config.fcm_project_id, token_source)
    }

    pub fn with_base_url(
        base_url: &str,
        fcm_project_id: &str,
        token_source: Arc<dyn AccessTokenSource>,
    ) -> Self {
        let send_url = format!(
            "{}/v1/projects/{}/messages:send",
            base_url.trim_end_matches('/'),
            fcm_project_id
        );

        info!(project_id = %fcm_project_id, "FCM client initialized");

        Self {
            http_client: Client::new(),
            send_url,
            token_source,
        }
    }
}

pub fn build_fcm_request(recipient_token: &str, request: &NotificationRequest) -> FcmRequest {
    let mut data: HashMap<String, String> = HashMap::new();

    for (key, value) in request.variables.meta.iter().chain(request.metadata.iter()) {
        data.insert(key.clone(), value.to_string());
    }

    data.insert("name".to_string(), request.variables.name.clone());
    data.insert("link".to_string(), request.variables.link.clone());
    data.insert("template_code".to_string(), request.template_code.clone());
    data.insert(
        "user_id".to_string(),
        request.user_id.map(|id| id.to_string()).unwrap_or_default(),
    );
    data.insert("request_id".to_string(), request.request_id.clone());

    FcmRequest {
        message: FcmMessage {
            token: recipient_token.to_string(),
            notification: FcmNotification {
                title: format!("Hello, {}!", request.variables.name),
                body: format!(
                    "You have a new update. Check it out here: {}",
                    request.variables.link
                ),
            },
            data,
        },
    }
}

#[async_trait]
impl DeliveryAdapter for FcmClient {
    async fn send(
        &self,
        recipient_token: &str,
        request: &NotificationRequest,
    ) -> Result<String, DeliveryError> {
        debug!(request_id = %request.request_id, "Sending FCM push notification");

        let payload = build_fcm_request(recipient_token, request);
        let bearer = self.token_source.access_token().await?;

        let response = self
            .http_client
            .post(&self.send_url)
            .bearer_auth(bearer)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status_code: status.as_u16(),
                body,
            });
        }

        let sent: FcmResponse = response.json().await?;

        info!(
            request_id = %request.request_id,
            provider_message_id = %sent.name,
            "FCM push notification sent successfully"
        );

        Ok(sent.name)
    }
}
