//! Promotion
//!
//! Copies a proven record into the long-term vault as a markdown note and
//! rewrites the STM record as a redirect pointer:
//!
//! 1. Build the note body: YAML front matter, content, a Relations section
//! 2. Reserve a slugged filename, suffixing on collision
//! 3. Write to a sibling `.tmp`, fsync, rename into place
//! 4. Only then mutate the STM record (`status = promoted` plus pointers)
//!
//! Dry-run returns the proposed filename and body without touching disk.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::memory::{MemoryRecord, Relation};

/// Collision suffixes tried before giving up with `Conflict`.
const MAX_FILENAME_ATTEMPTS: u32 = 20;

/// Longest slug emitted, in characters.
const MAX_SLUG_CHARS: usize = 60;

/// Words of content used when a record has no better title.
const TITLE_WORDS: usize = 6;

// ============================================================================
// OUTPUT TYPES
// ============================================================================

/// A promotion that was committed to the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionOutcome {
    /// Vault-relative path of the written note
    pub written_path: String,
    /// The STM record id, now a redirect pointer
    pub stm_id: String,
}

/// A dry-run promotion: what would be written, and where.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionPreview {
    /// Vault-relative path the note would take (ignoring collisions)
    pub proposed_path: String,
    /// Full note body
    pub body: String,
    pub stm_id: String,
}

// ============================================================================
// NOTE BODY
// ============================================================================

#[derive(Serialize)]
struct NoteFrontMatter<'a> {
    id: &'a str,
    created: String,
    promoted_from: &'static str,
    tags: &'a [String],
    #[serde(skip_serializing_if = "skip_empty")]
    aliases: &'a [String],
    source_mem_ids: Vec<&'a str>,
}

fn skip_empty(slice: &&[String]) -> bool {
    slice.is_empty()
}

/// Render the markdown body for a promoted record.
///
/// `relations` should be the record's outgoing edges; they land in a
/// trailing Relations section by target id.
pub fn build_note_body(record: &MemoryRecord, relations: &[Relation]) -> Result<String> {
    let created = DateTime::<Utc>::from_timestamp(record.created_at, 0)
        .ok_or_else(|| EngineError::Invalid(format!("created_at {} out of range", record.created_at)))?;

    let front = NoteFrontMatter {
        id: &record.id,
        created: created.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        promoted_from: "stm",
        tags: &record.tags,
        aliases: &record.entities,
        source_mem_ids: vec![record.id.as_str()],
    };
    let yaml = serde_yaml_ng::to_string(&front)
        .map_err(|e| EngineError::Invalid(format!("front matter: {e}")))?;

    let mut body = String::new();
    body.push_str("---\n");
    body.push_str(&yaml);
    body.push_str("---\n\n");
    body.push_str(record.content.trim_end());
    body.push('\n');

    if !relations.is_empty() {
        body.push_str("\n## Relations\n");
        let mut ordered: Vec<&Relation> = relations.iter().collect();
        ordered.sort_by(|a, b| (&a.to_id, &a.id).cmp(&(&b.to_id, &b.id)));
        for relation in ordered {
            body.push_str(&format!("- {} → {}\n", relation.relation_type, relation.to_id));
        }
    }
    Ok(body)
}

// ============================================================================
// FILENAMES
// ============================================================================

/// Reduce text to a URL-safe slug.
pub fn slugify(text: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for c in text.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
        if slug.chars().count() >= MAX_SLUG_CHARS {
            break;
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() { "memory".to_string() } else { slug }
}

/// The slug for a record: its leading words of content.
pub fn record_slug(record: &MemoryRecord) -> String {
    let title: String = record
        .content
        .split_whitespace()
        .take(TITLE_WORDS)
        .collect::<Vec<_>>()
        .join(" ");
    slugify(&title)
}

/// Short id fragment used to keep filenames unique across similar content.
pub fn short_id(id: &str) -> &str {
    let hex = id.strip_prefix("m-").unwrap_or(id);
    &hex[..hex.len().min(8)]
}

/// The filename a record would take with no collision handling.
pub fn proposed_filename(record: &MemoryRecord) -> String {
    format!("{}-{}.md", record_slug(record), short_id(&record.id))
}

/// Pick a non-existing filename under `dir`, appending `-2`, `-3`, … on
/// collision.
pub fn reserve_filename(dir: &Path, record: &MemoryRecord) -> Result<String> {
    let slug = record_slug(record);
    let short = short_id(&record.id);
    for attempt in 1..=MAX_FILENAME_ATTEMPTS {
        let name = if attempt == 1 {
            format!("{slug}-{short}.md")
        } else {
            format!("{slug}-{short}-{attempt}.md")
        };
        if !dir.join(&name).exists() {
            return Ok(name);
        }
    }
    Err(EngineError::Conflict(format!(
        "no free filename for slug {slug:?} after {MAX_FILENAME_ATTEMPTS} attempts"
    )))
}

// ============================================================================
// ATOMIC WRITE
// ============================================================================

/// Write `body` to `path` via a sibling `.tmp` file: write, fsync, rename.
/// A partial `.tmp` is unlinked on failure, best-effort.
pub fn write_note_atomic(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("md.tmp");

    let write = (|| -> Result<()> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&tmp)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, path)?;
        if let Some(parent) = path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    })();

    if write.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    write
}

// ============================================================================
// REDIRECT POINTER
// ============================================================================

/// The STM mutation recorded after the note is durable on disk.
pub fn mark_promoted(record: &mut MemoryRecord, written_path: &str, now: i64) {
    record.status = crate::memory::MemoryStatus::Promoted;
    record.promoted_at = Some(now);
    record.promoted_to = Some(written_path.to_string());
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{RelationKind, SaveInput};
    use tempfile::TempDir;

    fn record(content: &str) -> MemoryRecord {
        MemoryRecord::new(
            SaveInput {
                content: content.to_string(),
                tags: vec!["preferences".into(), "typescript".into()],
                ..Default::default()
            },
            1_736_251_200,
        )
        .unwrap()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("I prefer TypeScript!"), "i-prefer-typescript");
        assert_eq!(slugify("  --- "), "memory");
        assert_eq!(slugify("Çatal höyük maps"), "atal-h-y-k-maps");
        assert!(slugify(&"long ".repeat(50)).chars().count() <= MAX_SLUG_CHARS);
    }

    #[test]
    fn test_proposed_filename_uses_leading_words() {
        let record = record("I prefer TypeScript over JavaScript for all new projects");
        let name = proposed_filename(&record);
        assert!(name.starts_with("i-prefer-typescript-over-javascript-for-"));
        assert!(name.ends_with(".md"));
        assert!(name.contains(short_id(&record.id)));
    }

    #[test]
    fn test_note_body_front_matter_and_relations() {
        let record = record("I prefer TypeScript over JavaScript.");
        let relation =
            Relation::new(&record.id, "m-4ac0ffee", RelationKind::References, 1.0, 0).unwrap();
        let body = build_note_body(&record, &[relation]).unwrap();

        assert!(body.starts_with("---\n"));
        assert!(body.contains(&format!("id: {}", record.id)));
        assert!(body.contains("2025-01-07T12:00:00"));
        assert!(body.contains("promoted_from: stm"));
        assert!(body.contains("- preferences"));
        assert!(body.contains("I prefer TypeScript over JavaScript."));
        assert!(body.contains("## Relations"));
        assert!(body.contains("- references → m-4ac0ffee"));

        // The body must round-trip through the vault parser.
        let (front, parsed_body) = crate::vault::parse_front_matter(&body);
        let front = front.unwrap();
        assert_eq!(front.tags, vec!["preferences", "typescript"]);
        assert!(parsed_body.contains("I prefer TypeScript"));
    }

    #[test]
    fn test_note_body_without_relations_has_no_section() {
        let record = record("standalone fact");
        let body = build_note_body(&record, &[]).unwrap();
        assert!(!body.contains("## Relations"));
    }

    #[test]
    fn test_reserve_filename_suffixes_on_collision() {
        let dir = TempDir::new().unwrap();
        let record = record("duplicate content");
        let first = reserve_filename(dir.path(), &record).unwrap();
        fs::write(dir.path().join(&first), "x").unwrap();

        let second = reserve_filename(dir.path(), &record).unwrap();
        assert_ne!(first, second);
        assert!(second.ends_with("-2.md"));
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes").join("fact.md");
        write_note_atomic(&path, "body\n").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "body\n");
        assert!(!path.with_extension("md.tmp").exists());
    }

    #[test]
    fn test_mark_promoted_satisfies_invariants() {
        let mut rec = record("fact");
        mark_promoted(&mut rec, "memories/fact-abc123.md", 1_736_300_000);
        rec.validate().unwrap();
        assert_eq!(rec.promoted_at, Some(1_736_300_000));
    }
}
