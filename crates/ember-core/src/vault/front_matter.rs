//! YAML front matter
//!
//! Markdown notes in the vault open with a `---` fenced YAML block. Parsing
//! is lenient: a note without front matter, or with YAML that fails to
//! parse, still indexes under its filename.

use serde_yaml_ng::Value;

/// Parsed front matter fields the index cares about, plus the full key list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrontMatter {
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub aliases: Vec<String>,
    pub created: Option<String>,
    /// Every top-level key present in the block, sorted
    pub keys: Vec<String>,
}

/// Split a note into `(front_matter, body)`.
///
/// Returns `None` front matter when there is no leading fence or the YAML
/// does not parse as a mapping.
pub fn parse(content: &str) -> (Option<FrontMatter>, &str) {
    let Some(rest) = content.strip_prefix("---") else {
        return (None, content);
    };
    let Some(rest) = rest.strip_prefix('\n').or_else(|| rest.strip_prefix("\r\n")) else {
        return (None, content);
    };

    // Closing fence: a line that is exactly `---`.
    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let yaml = &rest[..offset];
            let body = &rest[offset + line.len()..];
            return match parse_yaml(yaml) {
                Some(front) => (Some(front), body),
                None => (None, content),
            };
        }
        offset += line.len();
    }
    (None, content)
}

fn parse_yaml(yaml: &str) -> Option<FrontMatter> {
    let value: Value = serde_yaml_ng::from_str(yaml).ok()?;
    let mapping = value.as_mapping()?;

    let mut front = FrontMatter::default();
    for (key, val) in mapping {
        let Some(key) = key.as_str() else { continue };
        front.keys.push(key.to_string());
        match key {
            "title" => front.title = scalar_string(val),
            "tags" => front.tags = string_list(val),
            "aliases" => front.aliases = string_list(val),
            "created" => front.created = scalar_string(val),
            _ => {}
        }
    }
    front.keys.sort();
    Some(front)
}

/// Render a scalar as a string; numbers and dates come through unquoted YAML.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accept both YAML sequences and comma-separated scalars for list fields.
fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Sequence(items) => items.iter().filter_map(scalar_string).collect(),
        Value::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Collapse a body into an index snippet of roughly `max_chars` characters.
pub fn snippet(body: &str, max_chars: usize) -> String {
    let collapsed: String = body
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        collapsed.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOTE: &str = "---\ntitle: JWT rotation\ntags: [security, jwt]\naliases:\n  - token rotation\ncreated: 2025-01-07T12:00:00Z\nsource: stm\n---\n\nRotate signing keys quarterly.\n";

    #[test]
    fn test_parse_full_front_matter() {
        let (front, body) = parse(NOTE);
        let front = front.unwrap();
        assert_eq!(front.title.as_deref(), Some("JWT rotation"));
        assert_eq!(front.tags, vec!["security", "jwt"]);
        assert_eq!(front.aliases, vec!["token rotation"]);
        assert_eq!(front.created.as_deref(), Some("2025-01-07T12:00:00Z"));
        assert_eq!(
            front.keys,
            vec!["aliases", "created", "source", "tags", "title"]
        );
        assert_eq!(body.trim(), "Rotate signing keys quarterly.");
    }

    #[test]
    fn test_no_front_matter() {
        let (front, body) = parse("plain note body");
        assert!(front.is_none());
        assert_eq!(body, "plain note body");
    }

    #[test]
    fn test_unclosed_fence_is_body() {
        let content = "---\ntitle: dangling\nno closing fence";
        let (front, body) = parse(content);
        assert!(front.is_none());
        assert_eq!(body, content);
    }

    #[test]
    fn test_invalid_yaml_falls_back() {
        let content = "---\n: [unbalanced\n---\nbody";
        let (front, body) = parse(content);
        assert!(front.is_none());
        assert_eq!(body, content);
    }

    #[test]
    fn test_comma_separated_tags() {
        let (front, _) = parse("---\ntags: security, jwt\n---\nbody");
        assert_eq!(front.unwrap().tags, vec!["security", "jwt"]);
    }

    #[test]
    fn test_snippet_collapses_and_truncates() {
        assert_eq!(snippet("a\n  b\t c", 100), "a b c");
        let long = "word ".repeat(100);
        assert_eq!(snippet(&long, 20).chars().count(), 20);
    }
}
