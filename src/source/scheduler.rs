// src/source/scheduler.rs

use std::{collections::BTreeMap, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::{Map, Value};
use source_plugin::RawConfig;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    config::{Config, SourceConfig},
    source::{PluginDispatchRequest, PluginDispatcher},
};

/// Identity of one plugin instance: the plugin plus its bound sources in
/// binding order. `[a, b]` and `[b, a]` are different instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceBindingKey {
    pub plugin: String,
    pub sources: Vec<String>,
}

impl SourceBindingKey {
    pub fn new(plugin: &str, sources: &[String]) -> Self {
        Self {
            plugin: plugin.to_string(),
            sources: sources.to_vec(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulingError {
    #[error("source `{0}` is not configured")]
    UnknownSource(String),
    #[error("cannot marshal config of plugin `{plugin}` for source `{source_name}`: {reason}")]
    Marshal {
        plugin: String,
        source_name: String,
        reason: String,
    },
    #[error("cannot start plugin `{plugin}`: {reason}")]
    Dispatch { plugin: String, reason: String },
}

/// Starts at most one instance per distinct [`SourceBindingKey`].
pub struct Scheduler {
    sources: BTreeMap<String, SourceConfig>,
    dispatcher: Arc<dyn PluginDispatcher>,
    started: DashMap<SourceBindingKey, PluginDispatchRequest>,
}

impl Scheduler {
    pub fn new(sources: BTreeMap<String, SourceConfig>, dispatcher: Arc<dyn PluginDispatcher>) -> Self {
        Self {
            sources,
            dispatcher,
            started: DashMap::new(),
        }
    }

    /// Start `plugin` for `sources` unless that exact ordered binding is
    /// already running. Returns whether a new instance was started.
    ///
    /// Check and mark happen under one map entry lock. A failed start
    /// releases the key again.
    pub async fn schedule(&self, plugin: &str, sources: &[String]) -> Result<bool, SchedulingError> {
        let key = SourceBindingKey::new(plugin, sources);

        let request = match self.started.entry(key.clone()) {
            Entry::Occupied(_) => {
                debug!(plugin, sources = ?sources, "instance already started");
                return Ok(false);
            }
            Entry::Vacant(slot) => {
                let request = self.build_request(plugin, sources)?;
                slot.insert(request.clone());
                request
            }
        };

        if let Err(err) = self.dispatcher.dispatch(request).await {
            self.started.remove(&key);
            return Err(SchedulingError::Dispatch {
                plugin: plugin.to_string(),
                reason: format!("{err:#}"),
            });
        }
        info!(plugin, sources = ?sources, "plugin instance started");
        Ok(true)
    }

    fn build_request(&self, plugin: &str, sources: &[String]) -> Result<PluginDispatchRequest, SchedulingError> {
        let configs = sources
            .iter()
            .map(|name| self.raw_config(plugin, name))
            .collect::<Result<Vec<RawConfig>, _>>()?;
        Ok(PluginDispatchRequest {
            plugin: plugin.to_string(),
            configs,
            sources: sources.to_vec(),
        })
    }

    /// The source's block for `plugin` in wire form. An absent block is an
    /// empty mapping; anything other than a mapping is rejected.
    fn raw_config(&self, plugin: &str, source_name: &str) -> Result<RawConfig, SchedulingError> {
        let source = self
            .sources
            .get(source_name)
            .ok_or_else(|| SchedulingError::UnknownSource(source_name.to_string()))?;
        let marshal_err = |reason: String| SchedulingError::Marshal {
            plugin: plugin.to_string(),
            source_name: source_name.to_string(),
            reason,
        };

        let value = match source.plugins.get(plugin).and_then(|p| p.config.clone()) {
            None | Some(Value::Null) => Value::Object(Map::new()),
            Some(v @ Value::Object(_)) => v,
            Some(other) => return Err(marshal_err(format!("expected a mapping, got `{other}`"))),
        };
        serde_yaml_bw::to_string(&value).map_err(|err| marshal_err(err.to_string()))
    }

    /// Schedule the instances every channel's bindings start, channel by
    /// channel in binding order. Returns the number of new instances.
    pub async fn schedule_all(&self, config: &Config) -> Result<usize, SchedulingError> {
        let mut started = 0;
        for binding in config.channel_bindings() {
            for source_name in binding.sources.iter().filter(|s| !self.sources.contains_key(*s)) {
                warn!(channel = %binding.channel, source = %source_name, "skipping unknown source");
            }
            for key in &binding.instances {
                if self.schedule(&key.plugin, &key.sources).await? {
                    started += 1;
                }
            }
        }
        info!(started, total = self.started.len(), "plugin instances scheduled");
        Ok(started)
    }

    /// Started instances whose bindings include `source_name`, sorted by key.
    pub fn instances_for_source(&self, source_name: &str) -> Vec<PluginDispatchRequest> {
        let mut found: Vec<(SourceBindingKey, PluginDispatchRequest)> = self
            .started
            .iter()
            .filter(|kv| kv.key().sources.iter().any(|s| s == source_name))
            .map(|kv| (kv.key().clone(), kv.value().clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found.into_iter().map(|(_, request)| request).collect()
    }

    pub fn started_count(&self) -> usize {
        self.started.len()
    }
}
