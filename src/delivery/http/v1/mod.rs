pub mod device_tokens;
pub mod internal;
pub mod middleware;
pub mod notifications;
pub mod preferences;
pub mod ws;
