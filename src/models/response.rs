use serde::{Deserialize, Serialize};

pub const VALIDATION_FAILED: &str = "Validation failed";
pub const QUEUE_FAILED: &str = "Failed to queue notification";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedResponse {
    pub status: String,
    pub request_id: String,
}

impl QueuedResponse {
    pub fn queued(request_id: String) -> Self {
        Self {
            status: "queued".to_string(),
            request_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
