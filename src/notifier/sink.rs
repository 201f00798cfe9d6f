use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use crate::{
    message::GenericMessage,
    notifier::{Notifier, Sink},
};

/// Writes every message as a structured tracing event under target `sink`.
pub struct LogSink {
    name: String,
}

impl LogSink {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string() }
    }
}

#[async_trait]
impl Notifier for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, message: &GenericMessage, _channels: &[String]) -> anyhow::Result<()> {
        let body = serde_json::to_string(message)?;
        info!(target: "sink", sink = %self.name, id = %message.id, message = %body, "event");
        Ok(())
    }
}

impl Sink for LogSink {}

/// POSTs the JSON form of every message to a fixed URL.
pub struct WebhookSink {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookSink {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, message: &GenericMessage, _channels: &[String]) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .timeout(Duration::from_secs(10))
            .json(&json!({ "sink": self.name, "message": message }))
            .send()
            .await?
            .error_for_status()?;
        debug!(sink = %self.name, id = %message.id, "message forwarded");
        Ok(())
    }
}

impl Sink for WebhookSink {}
