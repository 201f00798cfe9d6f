use std::collections::HashMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

/// What happened to the observed object.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    Serialize, Deserialize, JsonSchema, EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum EventKind {
    Create,
    Update,
    Delete,
    Error,
    Warning,
    /// Generic plugin events that are not tied to an object lifecycle.
    #[default]
    Info,
}

/// A single observed change, as produced by a source plugin.
///
/// Everything except `recommendations` and `warnings` is set once by the
/// producer. Those two lists are appended by enrichment before routing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
pub struct Event {
    /// e.g. `apps/v1/deployments`. Empty for events that carry no object.
    #[serde(default)]
    pub resource_type: String,
    pub kind: EventKind,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub messages: Vec<String>,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Current object state, used for update diffs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<Value>,
    /// Previous object state, only meaningful for updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_object: Option<Value>,
}

impl Event {
    pub fn new(resource_type: impl Into<String>, kind: EventKind) -> Self {
        Self {
            resource_type: resource_type.into(),
            kind,
            timestamp: Utc::now(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self.name = name.into();
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages = messages.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    pub fn with_objects(mut self, old: Option<Value>, new: Option<Value>) -> Self {
        self.old_object = old;
        self.object = new;
        self
    }

    /// Events without a resource type come from generic plugins and are
    /// routed by source binding only.
    pub fn is_resource_event(&self) -> bool {
        !self.resource_type.is_empty()
    }
}

/// One raw, already marshalled plugin configuration block.
pub type RawConfig = String;

/// Handed to a plugin when one of its instances is started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInput {
    /// Per-source configuration, in binding order.
    pub configs: Vec<RawConfig>,
    /// Source names the instance was started for, in binding order.
    pub sources: Vec<String>,
}

/// Handed to a plugin when an external request arrives for one of its
/// instances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalRequestInput {
    pub source: String,
    pub configs: Vec<RawConfig>,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct PluginMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether the plugin accepts externally posted payloads.
    pub supports_external_requests: bool,
}
