use async_trait::async_trait;

use crate::{error::DeliveryError, models::notification::NotificationRequest};

/// Hands a decoded request to a push provider.
///
/// Implementations make a single attempt; retries belong to the broker path.
#[async_trait]
pub trait DeliveryAdapter: Send + Sync {
    /// Returns the provider's message id on success.
    async fn send(
        &self,
        recipient_token: &str,
        request: &NotificationRequest,
    ) -> Result<String, DeliveryError>;
}
