use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use source_plugin::{Event, EventKind};
use uuid::Uuid;

/// Platform-neutral rendering of an event, handed to every notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenericMessage {
    pub id: Uuid,
    pub title: String,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub resource_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    pub lines: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub timestamp: DateTime<Utc>,
    /// Sources the event qualified for.
    pub sources: Vec<String>,
}

impl GenericMessage {
    pub fn from_event(event: &Event, sources: &[String]) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title(event),
            kind: event.kind,
            resource_type: event.resource_type.clone(),
            namespace: event.namespace.clone(),
            name: event.name.clone(),
            reason: event.reason.clone(),
            lines: event.messages.clone(),
            recommendations: event.recommendations.clone(),
            warnings: event.warnings.clone(),
            timestamp: event.timestamp,
            sources: sources.to_vec(),
        }
    }

    pub fn to_plaintext(&self) -> String {
        let mut out = self.title.clone();
        if !self.reason.is_empty() && !self.resource_type.is_empty() {
            out.push_str(&format!("\nReason: {}", self.reason));
        }
        for line in &self.lines {
            out.push('\n');
            out.push_str(line);
        }
        section(&mut out, "Recommendations", &self.recommendations);
        section(&mut out, "Warnings", &self.warnings);
        out.push_str(&format!("\n{}", self.timestamp.to_rfc3339()));
        out
    }
}

fn title(event: &Event) -> String {
    if !event.is_resource_event() {
        return match event.reason.is_empty() {
            true => event.kind.to_string(),
            false => event.reason.clone(),
        };
    }
    let object = match (event.namespace.is_empty(), event.name.is_empty()) {
        (_, true) => String::new(),
        (true, false) => format!(" {}", event.name),
        (false, false) => format!(" {}/{}", event.namespace, event.name),
    };
    format!("{} {}{}", event.kind, event.resource_type, object)
}

fn section(out: &mut String, header: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    out.push_str(&format!("\n{header}:"));
    for item in items {
        out.push_str(&format!("\n  - {item}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_event_title_and_text() {
        let mut evt = Event::new("v1/pods", EventKind::Error)
            .with_name("prod", "web-1")
            .with_reason("BackOff")
            .with_messages(["Back-off restarting failed container"]);
        evt.recommendations.push("Set resource limits".into());

        let msg = GenericMessage::from_event(&evt, &["errors".to_string()]);
        assert_eq!(msg.title, "error v1/pods prod/web-1");
        assert_eq!(msg.sources, vec!["errors"]);

        let text = msg.to_plaintext();
        assert!(text.starts_with("error v1/pods prod/web-1\nReason: BackOff\nBack-off restarting"));
        assert!(text.contains("Recommendations:\n  - Set resource limits"));
        assert!(!text.contains("Warnings:"));
    }

    #[test]
    fn plugin_event_uses_reason_as_title() {
        let evt = Event::default().with_reason("Build finished").with_messages(["ok"]);
        let msg = GenericMessage::from_event(&evt, &[]);
        assert_eq!(msg.title, "Build finished");

        let bare = GenericMessage::from_event(&Event::default(), &[]);
        assert_eq!(bare.title, "info");
    }

    #[test]
    fn cluster_scoped_objects_have_no_namespace() {
        let evt = Event::new("v1/nodes", EventKind::Warning).with_name("", "node-a");
        assert_eq!(GenericMessage::from_event(&evt, &[]).title, "warning v1/nodes node-a");
    }
}
