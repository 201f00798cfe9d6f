// src/source/mod.rs

pub mod host;
pub mod scheduler;
pub mod webhook_source;

use async_trait::async_trait;
use source_plugin::RawConfig;

/// Start request for one plugin instance. `configs` and `sources` share the
/// binding order of the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginDispatchRequest {
    pub plugin: String,
    pub configs: Vec<RawConfig>,
    pub sources: Vec<String>,
}

/// An externally posted payload addressed to one started instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalDispatch {
    pub instance: PluginDispatchRequest,
    /// The source name the payload was posted to.
    pub source: String,
    pub payload: Vec<u8>,
}

/// Seam between scheduling and whatever actually runs plugin instances.
#[async_trait]
pub trait PluginDispatcher: Send + Sync {
    async fn dispatch(&self, request: PluginDispatchRequest) -> anyhow::Result<()>;

    async fn dispatch_external(&self, request: ExternalDispatch) -> anyhow::Result<()>;

    /// Whether instances of `plugin` take externally posted payloads.
    fn accepts_external(&self, plugin: &str) -> bool;
}
