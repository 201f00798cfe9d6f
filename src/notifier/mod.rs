// src/notifier/mod.rs

pub mod chat;
pub mod dispatcher;
pub mod sink;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    config::{ChannelBinding, Config, SinkKind},
    message::GenericMessage,
    notifier::{
        chat::ChatBot,
        sink::{LogSink, WebhookSink},
    },
    source::scheduler::SourceBindingKey,
};

/// Anything that accepts rendered messages for a set of its own channels.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `message` to `channels`. Retries, if any, are the
    /// implementation's business.
    async fn send_message(&self, message: &GenericMessage, channels: &[String]) -> anyhow::Result<()>;
}

/// An interactive notifier whose channels can stop listening at runtime.
#[async_trait]
pub trait Bot: Notifier {
    async fn notifications_enabled(&self, channel: &str) -> bool;
}

/// A passive, fire-and-forget notifier.
pub trait Sink: Notifier {}

/// One delivery destination together with its bindings.
#[derive(Clone)]
pub enum NotifierTarget {
    Bot {
        bot: Arc<dyn Bot>,
        /// Per-channel bindings, channel names local to the bot.
        channels: Vec<ChannelBinding>,
    },
    Sink {
        sink: Arc<dyn Sink>,
        binding: ChannelBinding,
    },
}

impl NotifierTarget {
    pub fn name(&self) -> &str {
        match self {
            NotifierTarget::Bot { bot, .. } => bot.name(),
            NotifierTarget::Sink { sink, .. } => sink.name(),
        }
    }

    /// Channels of this target whose binding started `instance` and covers
    /// at least one qualified source. For a sink this is its own name.
    pub fn bound_channels(&self, instance: &SourceBindingKey, qualified: &[String]) -> Vec<String> {
        match self {
            NotifierTarget::Bot { channels, .. } => channels
                .iter()
                .filter(|ch| ch.receives(instance, qualified))
                .map(|ch| ch.channel.clone())
                .collect(),
            NotifierTarget::Sink { sink, binding } if binding.receives(instance, qualified) => {
                vec![sink.name().to_string()]
            }
            NotifierTarget::Sink { .. } => vec![],
        }
    }

    /// Send to `channels`, skipping bot channels that muted notifications.
    pub async fn deliver(&self, message: &GenericMessage, channels: &[String]) -> anyhow::Result<()> {
        match self {
            NotifierTarget::Bot { bot, .. } => {
                let mut listening = Vec::with_capacity(channels.len());
                for channel in channels {
                    if bot.notifications_enabled(channel).await {
                        listening.push(channel.clone());
                    } else {
                        debug!(notifier = %bot.name(), channel = %channel, "notifications disabled, skipping");
                    }
                }
                if listening.is_empty() {
                    return Ok(());
                }
                bot.send_message(message, &listening).await
            }
            NotifierTarget::Sink { sink, .. } => sink.send_message(message, channels).await,
        }
    }
}

/// Build one target per configured chat and sink.
pub fn targets_from_config(config: &Config) -> anyhow::Result<Vec<NotifierTarget>> {
    let communications = &config.communications;
    let mut targets = Vec::new();

    for chat in &communications.chats {
        let bot = ChatBot::from_config(chat);
        let channels = chat
            .channels
            .iter()
            .map(|ch| config.binding(ch.name.clone(), &ch.bindings.sources))
            .collect();
        targets.push(NotifierTarget::Bot { bot: Arc::new(bot), channels });
    }

    for sink in &communications.sinks {
        let notifier: Arc<dyn Sink> = match sink.kind {
            SinkKind::Log => Arc::new(LogSink::new(&sink.name)),
            SinkKind::Webhook => {
                let Some(url) = sink.url.as_deref() else {
                    anyhow::bail!("webhook sink `{}` has no url", sink.name);
                };
                Arc::new(WebhookSink::new(&sink.name, url))
            }
        };
        targets.push(NotifierTarget::Sink {
            sink: notifier,
            binding: config.binding(sink.name.clone(), &sink.bindings.sources),
        });
    }

    Ok(targets)
}
