use serde_json::Value;
use source_plugin::Event;

use crate::router::{
    constraint::RegexCache,
    diff::diff,
    matcher::{matching_routes, push_unique, MatchError},
    table::Route,
};

/// Result of qualifying an update event.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub sources: Vec<String>,
    /// Diff texts to attach to the outgoing message, de-duplicated.
    pub diffs: Vec<String>,
    pub error: Option<MatchError>,
}

/// Qualify an update event: ordinary matching first, then routes with an
/// actionable update setting only keep their source when a watched field
/// actually changed.
pub fn qualify_update<'r, I>(event: &Event, routes: I, cache: &RegexCache) -> UpdateOutcome
where
    I: IntoIterator<Item = &'r Route>,
{
    let (matched, error) = matching_routes(event, routes, cache);
    let null = Value::Null;
    let old = event.old_object.as_ref().unwrap_or(&null);
    let new = event.object.as_ref().unwrap_or(&null);

    let mut out = UpdateOutcome { error, ..UpdateOutcome::default() };
    for route in matched {
        let Some(setting) = route.update_setting.as_ref().filter(|s| s.is_actionable()) else {
            push_unique(&mut out.sources, &route.source);
            continue;
        };

        let text = diff(old, new, &setting.fields);
        if text.is_empty() {
            continue;
        }
        push_unique(&mut out.sources, &route.source);
        if setting.include_diff {
            push_unique(&mut out.diffs, &text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UpdateSetting;
    use serde_json::json;
    use source_plugin::EventKind;

    fn image_update(old: &str, new: &str) -> Event {
        let obj = |image: &str| json!({ "spec": { "containers": [{ "image": image }] } });
        Event::new("apps/v1/deployments", EventKind::Update)
            .with_name("default", "web")
            .with_objects(Some(obj(old)), Some(obj(new)))
    }

    fn route(include_diff: bool) -> Route {
        Route {
            update_setting: Some(UpdateSetting {
                fields: vec!["spec.containers[*].image".into()],
                include_diff,
            }),
            ..Route::for_source("deploys")
        }
    }

    #[test]
    fn qualifies_without_diff_text() {
        let out = qualify_update(&image_update("tomcat:9.0.34", "tomcat:8.0"), [&route(false)], &RegexCache::new());
        assert_eq!(out.sources, vec!["deploys"]);
        assert!(out.diffs.is_empty());
    }

    #[test]
    fn attaches_diff_text_when_requested() {
        let out = qualify_update(&image_update("tomcat:9.0.34", "tomcat:8.0"), [&route(true)], &RegexCache::new());
        assert_eq!(out.sources, vec!["deploys"]);
        assert_eq!(
            out.diffs,
            vec!["spec.containers[*].image:\n\t-: tomcat:9.0.34\n\t+: tomcat:8.0\n".to_string()]
        );
    }

    #[test]
    fn unwatched_change_is_dropped() {
        let out = qualify_update(&image_update("nginx", "nginx"), [&route(true)], &RegexCache::new());
        assert!(out.sources.is_empty());
        assert!(out.diffs.is_empty());
    }

    #[test]
    fn routes_without_setting_qualify_unconditionally() {
        let plain = Route::for_source("plain");
        let empty_fields = Route {
            update_setting: Some(UpdateSetting { fields: vec![], include_diff: true }),
            ..Route::for_source("empty")
        };
        let out = qualify_update(&image_update("a", "a"), [&plain, &empty_fields], &RegexCache::new());
        assert_eq!(out.sources, vec!["plain", "empty"]);
    }

    #[test]
    fn missing_old_state_means_no_diff() {
        let evt = Event::new("apps/v1/deployments", EventKind::Update).with_objects(None, None);
        let out = qualify_update(&evt, [&route(true)], &RegexCache::new());
        assert!(out.sources.is_empty());
    }
}
