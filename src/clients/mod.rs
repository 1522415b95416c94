pub mod adapter;
pub mod fcm;
pub mod health;
pub mod publisher;
pub mod rbmq;
pub mod topology;
