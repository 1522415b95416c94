pub mod fcm;
pub mod health;
pub mod metrics;
pub mod notification;
pub mod response;
pub mod retry;
pub mod validation;
