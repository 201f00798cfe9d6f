use std::collections::{BTreeMap, HashMap, HashSet};

use source_plugin::EventKind;
use tracing::{debug, warn};

use crate::{
    config::{ChannelBinding, Config, ConfigError, ExpectedMap, KubernetesConfig, SourceConfig, UpdateSetting},
    router::constraint::RegexConstraint,
};

/// Bucket key of the route table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey {
    pub resource_type: String,
    pub kind: EventKind,
}

impl RouteKey {
    pub fn new(resource_type: impl Into<String>, kind: EventKind) -> Self {
        Self { resource_type: resource_type.into(), kind }
    }
}

/// One source's subscription to one (resource-type, event-type) pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Route {
    pub source: String,
    pub reason: RegexConstraint,
    pub message: RegexConstraint,
    pub resource_name: RegexConstraint,
    pub namespace: RegexConstraint,
    pub labels: ExpectedMap,
    pub annotations: ExpectedMap,
    pub update_setting: Option<UpdateSetting>,
}

impl Route {
    pub fn for_source(source: impl Into<String>) -> Self {
        Self { source: source.into(), ..Self::default() }
    }
}

/// Immutable snapshot of every route of one configuration generation.
/// A reload builds a new table, it never patches this one.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    generation: u64,
    routes: HashMap<RouteKey, Vec<Route>>,
}

impl RouteTable {
    pub fn build(config: &Config, generation: u64) -> Result<Self, ConfigError> {
        Self::from_bindings(&config.channel_bindings(), &config.sources, generation)
    }

    /// Compile ordered channel bindings into buckets. A source bound by several
    /// channels is compiled once, at the position of its first binding.
    pub fn from_bindings(
        bindings: &[ChannelBinding],
        sources: &BTreeMap<String, SourceConfig>,
        generation: u64,
    ) -> Result<Self, ConfigError> {
        let mut table = RouteTable { generation, routes: HashMap::new() };
        let mut compiled: HashSet<&str> = HashSet::new();

        for binding in bindings {
            for source_name in &binding.sources {
                if !compiled.insert(source_name.as_str()) {
                    continue;
                }
                let Some(source) = sources.get(source_name) else {
                    warn!(channel = %binding.channel, source = %source_name, "channel is bound to an unknown source");
                    continue;
                };
                for (plugin, plugin_cfg) in source.enabled_plugins() {
                    if let Some(k8s) = KubernetesConfig::from_plugin(source_name, plugin, plugin_cfg)? {
                        table.add_source(source_name, &k8s);
                    }
                }
            }
        }

        debug!(generation, buckets = table.routes.len(), routes = table.len(), "route table built");
        Ok(table)
    }

    fn add_source(&mut self, source_name: &str, cfg: &KubernetesConfig) {
        let default_event = cfg.event.clone().unwrap_or_default();

        for resource in &cfg.resources {
            let event = resource.event.as_ref();
            let kinds = match event {
                Some(e) if !e.types.is_empty() => &e.types,
                _ => &default_event.types,
            };
            let pick = |own: Option<&RegexConstraint>, fallback: Option<&RegexConstraint>| {
                own.or(fallback).cloned().unwrap_or_default()
            };

            let route = Route {
                source: source_name.to_string(),
                reason: pick(event.and_then(|e| e.reason.as_ref()), default_event.reason.as_ref()),
                message: pick(event.and_then(|e| e.message.as_ref()), default_event.message.as_ref()),
                resource_name: resource.name.clone().unwrap_or_default(),
                namespace: pick(resource.namespaces.as_ref(), cfg.namespaces.as_ref()),
                labels: resource.labels.as_ref().or(cfg.labels.as_ref()).cloned().unwrap_or_default(),
                annotations: resource
                    .annotations
                    .as_ref()
                    .or(cfg.annotations.as_ref())
                    .cloned()
                    .unwrap_or_default(),
                update_setting: resource.update_setting.clone(),
            };

            for kind in kinds {
                self.insert(RouteKey::new(resource.resource_type.clone(), *kind), route.clone());
            }
        }
    }

    pub fn insert(&mut self, key: RouteKey, route: Route) {
        self.routes.entry(key).or_default().push(route);
    }

    pub fn routes(&self, resource_type: &str, kind: EventKind) -> &[Route] {
        self.routes
            .get(&RouteKey::new(resource_type, kind))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Total number of routes across all buckets.
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Buckets sorted by key, for diagnostics.
    pub fn buckets(&self) -> Vec<(&RouteKey, &[Route])> {
        let mut out: Vec<_> = self.routes.iter().map(|(k, v)| (k, v.as_slice())).collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }
}
