use anyhow::{Result, anyhow};

use crate::models::notification::NotificationRequest;

const MAX_TOKEN_LENGTH: usize = 4096;

pub fn validate_push_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(anyhow!("Device token cannot be empty"));
    }

    if token.len() > MAX_TOKEN_LENGTH {
        return Err(anyhow!(
            "Device token too long (maximum {} characters)",
            MAX_TOKEN_LENGTH
        ));
    }

    if token.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(anyhow!("Device token contains invalid characters"));
    }

    Ok(())
}

/// Structural checks applied before a request is enqueued.
pub fn validate_request(request: &NotificationRequest) -> Result<()> {
    if request.request_id.trim().is_empty() {
        return Err(anyhow!("request_id cannot be empty"));
    }

    if let Some(token) = &request.token {
        validate_push_token(token)?;
    }

    Ok(())
}
