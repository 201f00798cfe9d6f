// src/source/host.rs

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use source_plugin::{Event, ExternalRequestInput, SourcePlugin, StreamInput};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    router::SourceEvent,
    source::{scheduler::SourceBindingKey, ExternalDispatch, PluginDispatchRequest, PluginDispatcher},
};

const INSTANCE_BUFFER: usize = 64;

/// Runs in-process source plugins and forwards what they emit, tagged with
/// the emitting instance, into the routing loop. Forwarding never waits on
/// the router.
pub struct PluginHost {
    plugins: DashMap<String, Arc<dyn SourcePlugin>>,
    events: mpsc::UnboundedSender<SourceEvent>,
    cancel: CancellationToken,
    instances: Mutex<Vec<JoinHandle<()>>>,
}

impl PluginHost {
    pub fn new(events: mpsc::UnboundedSender<SourceEvent>, cancel: CancellationToken) -> Self {
        Self {
            plugins: DashMap::new(),
            events,
            cancel,
            instances: Mutex::new(vec![]),
        }
    }

    /// Register a plugin under its metadata name, replacing any previous one.
    pub fn register(&self, plugin: Arc<dyn SourcePlugin>) {
        let meta = plugin.metadata();
        if self.plugins.insert(meta.name.clone(), plugin).is_some() {
            warn!(plugin = %meta.name, "source plugin replaced");
        } else {
            debug!(plugin = %meta.name, version = %meta.version, "source plugin registered");
        }
    }

    pub fn plugin_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.iter().map(|kv| kv.key().clone()).collect();
        names.sort();
        names
    }

    fn plugin(&self, name: &str) -> Result<Arc<dyn SourcePlugin>> {
        self.plugins
            .get(name)
            .map(|p| p.value().clone())
            .ok_or_else(|| anyhow!("source plugin `{name}` is not registered"))
    }

    /// Cancel every running instance and wait for it to stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = std::mem::take(&mut *self.instances.lock().await);
        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "source instance ended abnormally");
            }
        }
    }

    fn forward(&self, instance: SourceBindingKey, sources: Vec<String>, events: Vec<Event>) -> Result<()> {
        for event in events {
            let source_event = SourceEvent {
                instance: instance.clone(),
                sources: sources.clone(),
                event,
            };
            self.events
                .send(source_event)
                .map_err(|_| anyhow!("event router is gone"))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PluginDispatcher for PluginHost {
    async fn dispatch(&self, request: PluginDispatchRequest) -> Result<()> {
        let plugin = self.plugin(&request.plugin)?;
        let instance = SourceBindingKey::new(&request.plugin, &request.sources);
        let PluginDispatchRequest { plugin: name, configs, sources } = request;
        let (tx, mut rx) = mpsc::channel::<Event>(INSTANCE_BUFFER);
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        let handle = tokio::spawn(async move {
            let input = StreamInput { configs, sources: sources.clone() };
            let stream = async {
                if let Err(err) = plugin.stream(input, tx).await {
                    error!(plugin = %name, sources = ?sources, error = %err, "source stream failed");
                }
            };
            let forward = async {
                while let Some(event) = rx.recv().await {
                    let source_event = SourceEvent {
                        instance: instance.clone(),
                        sources: sources.clone(),
                        event,
                    };
                    if events.send(source_event).is_err() {
                        break;
                    }
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => debug!(plugin = %name, sources = ?sources, "source instance cancelled"),
                _ = async { tokio::join!(stream, forward) } => info!(plugin = %name, sources = ?sources, "source stream ended"),
            }
        });

        self.instances.lock().await.push(handle);
        Ok(())
    }

    async fn dispatch_external(&self, request: ExternalDispatch) -> Result<()> {
        let ExternalDispatch { instance, source, payload } = request;
        let plugin = self.plugin(&instance.plugin)?;
        let key = SourceBindingKey::new(&instance.plugin, &instance.sources);
        let input = ExternalRequestInput {
            source: source.clone(),
            configs: instance.configs,
            payload,
        };
        let events = plugin.handle_external_request(input).await?;
        debug!(plugin = %key.plugin, source = %source, events = events.len(), "external request handled");
        self.forward(key, vec![source], events)
    }

    fn accepts_external(&self, plugin: &str) -> bool {
        self.plugins
            .get(plugin)
            .is_some_and(|p| p.metadata().supports_external_requests)
    }
}
