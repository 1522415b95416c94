use std::{
    collections::BTreeMap,
    fmt::{self, Display, Formatter},
};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Push,
    Email,
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            NotificationType::Push => write!(f, "push"),
            NotificationType::Email => write!(f, "email"),
        }
    }
}

/// Scalar value carried in free-form metadata maps.
///
/// Nested objects and arrays are refused when the body is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Display for MetadataValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::Bool(value) => write!(f, "{}", value),
            MetadataValue::Number(value) => write!(f, "{}", value),
            MetadataValue::Text(value) => f.write_str(value),
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserVariables {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub link: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub notification_type: NotificationType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<Uuid>,

    #[serde(default)]
    pub template_code: String,

    #[serde(default)]
    pub variables: UserVariables,

    pub request_id: String,

    /// Reserved. Accepted and carried through, never used for scheduling.
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl NotificationRequest {
    /// Request-supplied token if present, otherwise the configured default.
    pub fn recipient_token<'a>(&'a self, default_token: Option<&'a str>) -> Option<&'a str> {
        self.token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .or(default_token)
    }
}
