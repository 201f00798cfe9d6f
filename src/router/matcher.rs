use std::{collections::HashMap, fmt};

use source_plugin::Event;
use thiserror::Error;

use crate::{
    router::{
        constraint::{InvalidPattern, RegexCache},
        table::Route,
    },
    util::MultiError,
};

/// Matching axes, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Reason,
    Message,
    ResourceName,
    Namespace,
    Annotations,
    Labels,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::Reason => "reason",
            Axis::Message => "message",
            Axis::ResourceName => "resource name",
            Axis::Namespace => "namespace",
            Axis::Annotations => "annotations",
            Axis::Labels => "labels",
        };
        f.write_str(name)
    }
}

/// A route skipped because one of its patterns does not compile.
#[derive(Debug, Error)]
#[error("route of source `{source_name}` skipped on {axis}: {error}")]
pub struct ConstraintError {
    pub source_name: String,
    pub axis: Axis,
    #[source]
    pub error: InvalidPattern,
}

pub type MatchError = MultiError<ConstraintError>;

/// Qualified source names plus the routes skipped on the way.
/// A non-empty `error` never invalidates `sources`.
#[derive(Debug, Default)]
pub struct MatchOutcome {
    pub sources: Vec<String>,
    pub error: Option<MatchError>,
}

impl MatchOutcome {
    pub fn into_parts(self) -> (Vec<String>, Option<MatchError>) {
        (self.sources, self.error)
    }
}

/// Source names of every route in `routes` that `event` qualifies for,
/// de-duplicated in first-match order.
pub fn match_routes<'r, I>(event: &Event, routes: I, cache: &RegexCache) -> MatchOutcome
where
    I: IntoIterator<Item = &'r Route>,
{
    let (matched, error) = matching_routes(event, routes, cache);
    let mut sources: Vec<String> = Vec::with_capacity(matched.len());
    for route in matched {
        push_unique(&mut sources, &route.source);
    }
    MatchOutcome { sources, error }
}

/// Routes that pass every axis, plus the aggregated per-route errors.
pub(crate) fn matching_routes<'r, I>(
    event: &Event,
    routes: I,
    cache: &RegexCache,
) -> (Vec<&'r Route>, Option<MatchError>)
where
    I: IntoIterator<Item = &'r Route>,
{
    let mut matched = Vec::new();
    let mut errors = MatchError::new();

    for route in routes {
        match route_qualifies(event, route, cache) {
            Ok(true) => matched.push(route),
            Ok(false) => {}
            Err((axis, error)) => errors.push(ConstraintError {
                source_name: route.source.clone(),
                axis,
                error,
            }),
        }
    }

    (matched, errors.into_result())
}

fn route_qualifies(event: &Event, route: &Route, cache: &RegexCache) -> Result<bool, (Axis, InvalidPattern)> {
    let with_axis = |axis: Axis| move |err: InvalidPattern| (axis, err);

    if !route.reason.allows(&event.reason, cache).map_err(with_axis(Axis::Reason))? {
        return Ok(false);
    }
    if !route.message.allows_any(&event.messages, cache).map_err(with_axis(Axis::Message))? {
        return Ok(false);
    }
    if !route.resource_name.allows(&event.name, cache).map_err(with_axis(Axis::ResourceName))? {
        return Ok(false);
    }
    if !route.namespace.allows(&event.namespace, cache).map_err(with_axis(Axis::Namespace))? {
        return Ok(false);
    }
    Ok(contains_all(&event.annotations, &route.annotations) && contains_all(&event.labels, &route.labels))
}

/// Every expected key present with an equal value. Nothing expected passes.
fn contains_all(actual: &HashMap<String, String>, expected: &HashMap<String, String>) -> bool {
    expected.iter().all(|(k, v)| actual.get(k) == Some(v))
}

pub(crate) fn push_unique(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::constraint::RegexConstraint;
    use source_plugin::EventKind;

    fn event() -> Event {
        Event::new("v1/nodes", EventKind::Error).with_name("", "node-1")
    }

    #[test]
    fn reason_include_qualifies() {
        let cache = RegexCache::new();
        let route = Route {
            reason: RegexConstraint::including(["^NodeNotReady"]),
            ..Route::for_source("success")
        };
        let out = match_routes(&event().with_reason("NodeNotReady"), [&route], &cache);
        assert_eq!(out.sources, vec!["success"]);
        assert!(out.error.is_none());

        let out = match_routes(&event().with_reason("NodeReady"), [&route], &cache);
        assert!(out.sources.is_empty());
    }

    #[test]
    fn message_exclude_checked_per_line() {
        let cache = RegexCache::new();
        let route = Route {
            message: RegexConstraint::including([".*"]).excluding(["^Something.*"]),
            ..Route::for_source("s1")
        };
        let evt = event().with_messages(["Status one", "Second message", "Third"]);
        assert_eq!(match_routes(&evt, [&route], &cache).sources, vec!["s1"]);

        let evt = event().with_messages(["Something broke"]);
        assert!(match_routes(&evt, [&route], &cache).sources.is_empty());
    }

    #[test]
    fn undefined_axes_always_pass() {
        let cache = RegexCache::new();
        let route = Route::for_source("any");
        for evt in [
            Event::default(),
            event().with_reason("x").with_messages(["y"]).with_label("a", "b"),
        ] {
            assert_eq!(match_routes(&evt, [&route], &cache).sources, vec!["any"]);
        }
    }

    #[test]
    fn labels_need_exact_subset() {
        let cache = RegexCache::new();
        let mut route = Route::for_source("labels");
        route.labels.insert("my-label".into(), "my-value".into());

        let hit = event().with_label("my-label", "my-value").with_label("other", "x");
        assert_eq!(match_routes(&hit, [&route], &cache).sources, vec!["labels"]);

        let miss = event().with_label("other", "x");
        assert!(match_routes(&miss, [&route], &cache).sources.is_empty());

        let wrong_value = event().with_label("my-label", "nope");
        assert!(match_routes(&wrong_value, [&route], &cache).sources.is_empty());

        assert!(match_routes(&event(), [&route], &cache).sources.is_empty());
    }

    #[test]
    fn annotations_need_exact_subset() {
        let cache = RegexCache::new();
        let mut route = Route::for_source("ann");
        route.annotations.insert("kubecast/notify".into(), "true".into());
        let hit = event().with_annotation("kubecast/notify", "true");
        assert_eq!(match_routes(&hit, [&route], &cache).sources, vec!["ann"]);
        assert!(match_routes(&event(), [&route], &cache).sources.is_empty());
    }

    #[test]
    fn namespace_and_name_constraints() {
        let cache = RegexCache::new();
        let route = Route {
            namespace: RegexConstraint::including(["^prod-"]),
            resource_name: RegexConstraint::default().excluding(["^canary"]),
            ..Route::for_source("ns")
        };
        let ok = Event::new("v1/pods", EventKind::Create).with_name("prod-eu", "web-1");
        let canary = Event::new("v1/pods", EventKind::Create).with_name("prod-eu", "canary-1");
        let dev = Event::new("v1/pods", EventKind::Create).with_name("dev", "web-1");
        assert_eq!(match_routes(&ok, [&route], &cache).sources, vec!["ns"]);
        assert!(match_routes(&canary, [&route], &cache).sources.is_empty());
        assert!(match_routes(&dev, [&route], &cache).sources.is_empty());
    }

    #[test]
    fn invalid_pattern_skips_only_its_route() {
        let cache = RegexCache::new();
        let broken = Route {
            namespace: RegexConstraint::default().excluding(["[invalid"]),
            ..Route::for_source("broken")
        };
        let good = Route::for_source("good");

        let (sources, error) = match_routes(&event(), [&broken, &good], &cache).into_parts();
        assert_eq!(sources, vec!["good"]);
        let error = error.expect("aggregated error");
        assert_eq!(error.len(), 1);
        assert_eq!(error.errors()[0].source_name, "broken");
        assert_eq!(error.errors()[0].axis, Axis::Namespace);
    }

    #[test]
    fn failing_axis_short_circuits_later_patterns() {
        let cache = RegexCache::new();
        let route = Route {
            reason: RegexConstraint::including(["^Never$"]),
            namespace: RegexConstraint::including(["(broken"]),
            ..Route::for_source("short")
        };
        let out = match_routes(&event().with_reason("Other"), [&route], &cache);
        assert!(out.sources.is_empty());
        assert!(out.error.is_none());
    }

    #[test]
    fn duplicate_sources_reported_once() {
        let cache = RegexCache::new();
        let a = Route::for_source("dup");
        let b = Route::for_source("dup");
        assert_eq!(match_routes(&event(), [&a, &b], &cache).sources, vec!["dup"]);
    }
}
