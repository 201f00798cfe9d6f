use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    config::ChatConfig,
    message::GenericMessage,
    notifier::{Bot, Notifier},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Chat bot that posts to a platform's incoming-webhook URL, one request
/// per channel.
pub struct ChatBot {
    name: String,
    url: String,
    client: reqwest::Client,
    /// channel → notifications enabled
    notifications: DashMap<String, bool>,
}

impl ChatBot {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            client: reqwest::Client::new(),
            notifications: DashMap::new(),
        }
    }

    pub fn from_config(cfg: &ChatConfig) -> Self {
        let bot = Self::new(&cfg.name, &cfg.url);
        for channel in &cfg.channels {
            bot.notifications.insert(channel.name.clone(), channel.notifications);
        }
        bot
    }

    /// Toggle notifications for one channel, e.g. from a chat command.
    pub fn set_notifications(&self, channel: &str, enabled: bool) {
        info!(notifier = %self.name, channel, enabled, "notifications toggled");
        self.notifications.insert(channel.to_string(), enabled);
    }

    fn payload(channel: &str, message: &GenericMessage) -> Value {
        json!({
            "channel": channel,
            "text": message.to_plaintext(),
        })
    }
}

#[async_trait]
impl Notifier for ChatBot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send_message(&self, message: &GenericMessage, channels: &[String]) -> anyhow::Result<()> {
        for channel in channels {
            self.client
                .post(&self.url)
                .timeout(REQUEST_TIMEOUT)
                .json(&Self::payload(channel, message))
                .send()
                .await?
                .error_for_status()?;
            debug!(notifier = %self.name, channel = %channel, id = %message.id, "message posted");
        }
        Ok(())
    }
}

#[async_trait]
impl Bot for ChatBot {
    async fn notifications_enabled(&self, channel: &str) -> bool {
        self.notifications.get(channel).map(|v| *v).unwrap_or(false)
    }
}
