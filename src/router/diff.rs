//! Field-level diff of two object states, restricted to a list of field paths.
//!
//! Paths use a small JSONPath subset: dot separated keys, each optionally
//! followed by `[*]` (every array element) or `[n]` (one element), e.g.
//! `spec.containers[*].image` or `.metadata.labels`.

use serde_json::Value;

/// Concatenated per-field diff text; empty when none of `fields` changed.
///
/// Each changed field renders as `"<field>:\n\t-: <old>\n\t+: <new>\n"`.
pub fn diff(old: &Value, new: &Value, fields: &[String]) -> String {
    let mut out = String::new();
    for field in fields.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
        let before = render(&lookup(old, field));
        let after = render(&lookup(new, field));
        if before != after {
            out.push_str(&format!("{field}:\n\t-: {before}\n\t+: {after}\n"));
        }
    }
    out
}

#[derive(Debug, PartialEq)]
enum Index {
    All,
    At(usize),
}

fn parse_segment(segment: &str) -> (&str, Vec<Index>) {
    let (key, mut rest) = match segment.find('[') {
        Some(pos) => (&segment[..pos], &segment[pos..]),
        None => (segment, ""),
    };
    let mut indexes = Vec::new();
    while let Some(stripped) = rest.strip_prefix('[') {
        let Some(end) = stripped.find(']') else { break };
        let inner = stripped[..end].trim();
        if inner == "*" {
            indexes.push(Index::All);
        } else if let Ok(n) = inner.parse::<usize>() {
            indexes.push(Index::At(n));
        }
        rest = &stripped[end + 1..];
    }
    (key, indexes)
}

/// Every value the path reaches, in document order.
fn lookup<'v>(root: &'v Value, path: &str) -> Vec<&'v Value> {
    let mut current = vec![root];
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        let (key, indexes) = parse_segment(segment);
        let mut next: Vec<&Value> = current
            .into_iter()
            .filter_map(|v| if key.is_empty() { Some(v) } else { v.get(key) })
            .collect();
        for index in indexes {
            next = next
                .into_iter()
                .flat_map(|v| -> Vec<&Value> {
                    match (&index, v.as_array()) {
                        (Index::All, Some(items)) => items.iter().collect(),
                        (Index::At(n), Some(items)) => items.get(*n).into_iter().collect(),
                        _ => vec![],
                    }
                })
                .collect();
        }
        current = next;
    }
    current
}

fn render(values: &[&Value]) -> String {
    values
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deployment(image: &str, replicas: u32) -> Value {
        json!({
            "spec": {
                "replicas": replicas,
                "containers": [{ "name": "web", "image": image }]
            }
        })
    }

    #[test]
    fn image_change_renders_old_and_new() {
        let old = deployment("tomcat:9.0.34", 1);
        let new = deployment("tomcat:8.0", 1);
        let out = diff(&old, &new, &["spec.containers[*].image".to_string()]);
        assert_eq!(out, "spec.containers[*].image:\n\t-: tomcat:9.0.34\n\t+: tomcat:8.0\n");
    }

    #[test]
    fn unchanged_fields_produce_nothing() {
        let old = deployment("nginx", 1);
        let new = deployment("nginx", 3);
        assert_eq!(diff(&old, &new, &["spec.containers[*].image".to_string()]), "");
        assert_eq!(
            diff(&old, &new, &["spec.replicas".to_string()]),
            "spec.replicas:\n\t-: 1\n\t+: 3\n"
        );
    }

    #[test]
    fn multiple_elements_are_space_joined() {
        let old = json!({ "items": [{ "v": "a" }, { "v": "b" }] });
        let new = json!({ "items": [{ "v": "a" }, { "v": "c" }] });
        assert_eq!(
            diff(&old, &new, &[".items[*].v".to_string()]),
            ".items[*].v:\n\t-: a b\n\t+: a c\n"
        );
        assert_eq!(diff(&old, &new, &["items[0].v".to_string()]), "");
    }

    #[test]
    fn missing_paths_compare_equal() {
        let old = json!({});
        let new = json!({ "spec": {} });
        assert_eq!(diff(&old, &new, &["spec.nothing".to_string()]), "");
    }

    #[test]
    fn segment_parsing() {
        assert_eq!(parse_segment("containers[*]"), ("containers", vec![Index::All]));
        assert_eq!(parse_segment("ports[1]"), ("ports", vec![Index::At(1)]));
        assert_eq!(parse_segment("name"), ("name", vec![]));
    }
}
