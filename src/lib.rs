pub mod app;
pub mod config;
pub mod logger;
pub mod message;
pub mod notifier;
pub mod router;
pub mod source;
pub mod util;
pub mod webhook;
