use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fs,
    path::{Path, PathBuf},
};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use source_plugin::EventKind;
use thiserror::Error;

use crate::{router::constraint::RegexConstraint, source::scheduler::SourceBindingKey};

pub const DEFAULT_WEBHOOK_ADDR: &str = "0.0.0.0:2115";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read {path}: {error}")]
    Io {
        path: PathBuf,
        #[source]
        error: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_yaml_bw::Error),
    #[error("plugin `{plugin}` of source `{source_name}` has an invalid config: {reason}")]
    InvalidPlugin {
        source_name: String,
        plugin: String,
        reason: String,
    },
}

/// The whole binding configuration of one generation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    pub settings: Settings,
    /// source name → source definition
    pub sources: BTreeMap<String, SourceConfig>,
    pub communications: Communications,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub json_logs: bool,
    pub webhook_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: None,
            json_logs: false,
            webhook_addr: DEFAULT_WEBHOOK_ADDR.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SourceConfig {
    pub display_name: String,
    /// plugin name → plugin block
    pub plugins: BTreeMap<String, PluginConfig>,
}

impl SourceConfig {
    pub fn enabled_plugins(&self) -> impl Iterator<Item = (&String, &PluginConfig)> {
        self.plugins.iter().filter(|(_, p)| p.enabled)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    pub enabled: bool,
    /// Opaque to the host except for Kubernetes-style blocks, see [`KubernetesConfig`].
    pub config: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Communications {
    pub chats: Vec<ChatConfig>,
    pub sinks: Vec<SinkConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChatConfig {
    pub name: String,
    /// Incoming-webhook URL of the chat platform.
    pub url: String,
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub notifications: bool,
    #[serde(default)]
    pub bindings: Bindings,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct Bindings {
    /// Bound source names. Order matters: it is the merge order of plugin configs.
    pub sources: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Log,
    Webhook,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct SinkConfig {
    pub name: String,
    #[serde(default)]
    pub kind: SinkKind,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub bindings: Bindings,
}

/// One channel (or sink) with its ordered source bindings and the plugin
/// instances those bindings start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelBinding {
    pub channel: String,
    pub sources: Vec<String>,
    pub instances: Vec<SourceBindingKey>,
}

impl ChannelBinding {
    /// Whether an event from `instance`, qualified for `qualified`, belongs
    /// on this channel. Instances started by other bindings never do, even
    /// when they share a source name.
    pub fn receives(&self, instance: &SourceBindingKey, qualified: &[String]) -> bool {
        self.instances.contains(instance) && self.sources.iter().any(|s| qualified.contains(s))
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml_bw::from_str(yaml)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|error| ConfigError::Io {
            path: path.to_path_buf(),
            error,
        })?;
        Self::from_yaml(&contents)
    }

    /// JSON schema of the whole document, pretty-printed.
    pub fn schema_json() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&schemars::schema_for!(Config))
    }

    /// Chat channels in declaration order, then sinks.
    pub fn channel_bindings(&self) -> Vec<ChannelBinding> {
        let chats = self.communications.chats.iter().flat_map(|chat| {
            chat.channels
                .iter()
                .map(move |ch| self.binding(format!("{}/{}", chat.name, ch.name), &ch.bindings.sources))
        });
        let sinks = self
            .communications
            .sinks
            .iter()
            .map(|sink| self.binding(sink.name.clone(), &sink.bindings.sources));
        chats.chain(sinks).collect()
    }

    pub fn binding(&self, channel: impl Into<String>, sources: &[String]) -> ChannelBinding {
        ChannelBinding {
            channel: channel.into(),
            sources: sources.to_vec(),
            instances: self.binding_keys(sources),
        }
    }

    /// Plugin instances one channel's `bound` sources start: per enabled
    /// plugin, the sources enabling it in binding order. Repeated and
    /// unknown sources are skipped. Keys come out sorted by plugin.
    pub fn binding_keys(&self, bound: &[String]) -> Vec<SourceBindingKey> {
        let mut groups: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        let mut seen = BTreeSet::new();

        for source_name in bound {
            if !seen.insert(source_name.as_str()) {
                continue;
            }
            let Some(source) = self.sources.get(source_name) else {
                continue;
            };
            for (plugin, _) in source.enabled_plugins() {
                groups.entry(plugin.as_str()).or_default().push(source_name.clone());
            }
        }

        groups
            .into_iter()
            .map(|(plugin, sources)| SourceBindingKey::new(plugin, &sources))
            .collect()
    }
}

/// Exact-match expectations on labels or annotations.
pub type ExpectedMap = HashMap<String, String>;

/// The part of a Kubernetes source plugin config the router understands.
/// Top-level fields are defaults for every resource entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct KubernetesConfig {
    pub namespaces: Option<RegexConstraint>,
    pub event: Option<KubernetesEvent>,
    pub annotations: Option<ExpectedMap>,
    pub labels: Option<ExpectedMap>,
    pub resources: Vec<ResourceConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(default)]
pub struct KubernetesEvent {
    pub reason: Option<RegexConstraint>,
    pub message: Option<RegexConstraint>,
    pub types: Vec<EventKind>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub name: Option<RegexConstraint>,
    #[serde(default)]
    pub namespaces: Option<RegexConstraint>,
    #[serde(default)]
    pub event: Option<KubernetesEvent>,
    #[serde(default)]
    pub annotations: Option<ExpectedMap>,
    #[serde(default)]
    pub labels: Option<ExpectedMap>,
    #[serde(default)]
    pub update_setting: Option<UpdateSetting>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(default)]
pub struct UpdateSetting {
    /// Field paths such as `spec.containers[*].image`.
    pub fields: Vec<String>,
    pub include_diff: bool,
}

impl UpdateSetting {
    pub fn is_actionable(&self) -> bool {
        self.fields.iter().any(|f| !f.trim().is_empty())
    }
}

impl KubernetesConfig {
    /// `Ok(None)` when the block is not Kubernetes-style (no `resources` key).
    pub fn from_plugin(
        source_name: &str,
        plugin: &str,
        cfg: &PluginConfig,
    ) -> Result<Option<Self>, ConfigError> {
        let Some(value) = cfg.config.as_ref() else {
            return Ok(None);
        };
        if value.get("resources").is_none() {
            return Ok(None);
        }
        serde_json::from_value(value.clone())
            .map(Some)
            .map_err(|err| ConfigError::InvalidPlugin {
                source_name: source_name.to_string(),
                plugin: plugin.to_string(),
                reason: err.to_string(),
            })
    }
}
