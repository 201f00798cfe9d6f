use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::message::{Event, ExternalRequestInput, PluginMetadata, StreamInput};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("plugin `{0}` does not accept external requests")]
    Unsupported(String),
    #[error("event stream closed by host")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Implemented by every event source. The host decides how many instances
/// run and with which ordered configuration list; the plugin only turns
/// configuration into events.
#[async_trait]
pub trait SourcePlugin: Send + Sync + 'static {
    fn metadata(&self) -> PluginMetadata;

    /// Produce events for one instance until the stream ends or `out` is
    /// closed by the host.
    async fn stream(&self, input: StreamInput, out: mpsc::Sender<Event>) -> Result<(), PluginError>;

    /// Turn an externally posted payload into events.
    async fn handle_external_request(
        &self,
        _input: ExternalRequestInput,
    ) -> Result<Vec<Event>, PluginError> {
        Err(PluginError::Unsupported(self.metadata().name))
    }
}

/// Forward `event` to the host, mapping a closed channel to `PluginError::Closed`.
pub async fn emit(out: &mpsc::Sender<Event>, event: Event) -> Result<(), PluginError> {
    out.send(event).await.map_err(|_| PluginError::Closed)
}
