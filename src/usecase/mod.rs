pub mod contracts;
pub mod device_tokens;
pub mod dispatch;
pub mod error;
pub mod fcm;
pub mod hub;
pub mod jwt;
pub mod notifications;
pub mod preferences;
pub mod sendgrid;
pub mod templates;
