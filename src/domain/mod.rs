pub mod device_token;
pub mod notification;
pub mod preferences;
