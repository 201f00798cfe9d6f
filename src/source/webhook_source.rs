use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use source_plugin::{
    Event, EventKind, ExternalRequestInput, PluginError, PluginMetadata, SourcePlugin, StreamInput,
};
use tokio::sync::mpsc;

pub const WEBHOOK_PLUGIN: &str = "webhook";

/// Built-in source that only produces events from posted payloads.
///
/// A JSON object with a string `message` becomes one event carrying that
/// message, plus optional `reason` and `kind`. Any other JSON value is
/// forwarded verbatim as the message text.
#[derive(Debug, Default, Clone)]
pub struct WebhookSource;

#[async_trait]
impl SourcePlugin for WebhookSource {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: WEBHOOK_PLUGIN.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: "Emits events for payloads posted to /sources/v1/{source}".to_string(),
            supports_external_requests: true,
        }
    }

    async fn stream(&self, _input: StreamInput, out: mpsc::Sender<Event>) -> Result<(), PluginError> {
        out.closed().await;
        Ok(())
    }

    async fn handle_external_request(
        &self,
        input: ExternalRequestInput,
    ) -> Result<Vec<Event>, PluginError> {
        let payload: Value = serde_json::from_slice(&input.payload)
            .map_err(|err| PluginError::InvalidPayload(err.to_string()))?;

        let mut event = Event {
            timestamp: Utc::now(),
            ..Event::default()
        };

        match payload.get("message").and_then(Value::as_str) {
            Some(message) => {
                event.messages = vec![message.to_string()];
                if let Some(reason) = payload.get("reason").and_then(Value::as_str) {
                    event.reason = reason.to_string();
                }
                if let Some(kind) = payload.get("kind").and_then(Value::as_str) {
                    event.kind = EventKind::from_str(kind)
                        .map_err(|_| PluginError::InvalidPayload(format!("unknown event kind `{kind}`")))?;
                }
            }
            None => event.messages = vec![payload.to_string()],
        }
        Ok(vec![event])
    }
}
