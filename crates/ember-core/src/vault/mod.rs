//! LTM vault index
//!
//! The long-term store is a directory of markdown notes owned by the user.
//! This module maintains a rebuildable JSONL projection of it:
//!
//! - Recursive scan for `*.md`, skipping dot-entries
//! - YAML front matter parsed into typed fields plus a body snippet
//! - `(mtime_ns, size)` change detection so refreshes only re-read changes
//! - Deleted files tombstoned out of the projection

mod front_matter;

pub use front_matter::{FrontMatter, parse as parse_front_matter, snippet};

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};

/// Characters kept from the note body in the index.
const SNIPPET_CHARS: usize = 200;

fn poisoned() -> EngineError {
    EngineError::Io(std::io::Error::other("ltm index lock poisoned"))
}

// ============================================================================
// INDEX ENTRY
// ============================================================================

/// One indexed note. The markdown file on disk is the source of truth; this
/// is a cache line keyed by vault-relative path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEntry {
    /// Vault-relative path with forward slashes
    pub path: String,
    /// Front-matter title, or the file stem
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    /// File mtime in nanoseconds since epoch
    pub mtime_ns: i64,
    /// File size in bytes
    pub size: u64,
    /// Top-level front-matter keys, sorted
    #[serde(default)]
    pub front_matter_keys: Vec<String>,
    /// Whitespace-collapsed body prefix
    #[serde(default)]
    pub content_snippet: String,
    /// Unknown fields carried through for forward compatibility
    #[serde(flatten)]
    pub extra: std::collections::BTreeMap<String, Value>,
}

/// Outcome of one refresh pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshReport {
    /// Markdown files seen on disk
    pub scanned: usize,
    /// Entries re-read and re-indexed
    pub updated: usize,
    /// Entries unchanged by `(mtime_ns, size)`
    pub unchanged: usize,
    /// Entries tombstoned because their file vanished
    pub removed: usize,
    /// Notes whose front matter failed to parse (indexed by filename)
    pub parse_errors: usize,
    /// Wall-clock duration
    pub duration_ms: u64,
}

// ============================================================================
// LTM INDEX
// ============================================================================

/// Incrementally maintained projection of the vault.
pub struct LtmIndex {
    vault_root: PathBuf,
    index_path: PathBuf,
    entries: RwLock<Arc<HashMap<String, NoteEntry>>>,
    writer: Mutex<File>,
}

impl LtmIndex {
    /// Open the index projection at `index_path` for the vault at
    /// `vault_root`, replaying the existing index file.
    pub fn open(vault_root: impl Into<PathBuf>, index_path: impl Into<PathBuf>) -> Result<Self> {
        let index_path: PathBuf = index_path.into();
        let mut entries: HashMap<String, NoteEntry> = HashMap::new();

        if index_path.exists() {
            let data = fs::read_to_string(&index_path)?;
            for line in data.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(value) = serde_json::from_str::<Value>(line) else {
                    tracing::warn!(path = %index_path.display(), "skipping malformed index line");
                    continue;
                };
                let tombstone = value
                    .get("_tomb")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if tombstone {
                    if let Some(path) = value.get("path").and_then(Value::as_str) {
                        entries.remove(path);
                    }
                    continue;
                }
                match serde_json::from_value::<NoteEntry>(value) {
                    Ok(entry) => {
                        entries.insert(entry.path.clone(), entry);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "skipping unparseable index entry");
                    }
                }
            }
        }

        let writer = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&index_path, fs::Permissions::from_mode(0o600));
        }

        Ok(Self {
            vault_root: vault_root.into(),
            index_path,
            entries: RwLock::new(Arc::new(entries)),
            writer: Mutex::new(writer),
        })
    }

    /// Vault directory this index projects.
    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// Current immutable view of the index.
    pub fn snapshot(&self) -> Arc<HashMap<String, NoteEntry>> {
        self.entries
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    /// Number of indexed notes.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk the vault and fold changes into the projection.
    ///
    /// The scan and parse phase runs without any lock; the commit phase
    /// appends all changed lines in one fsync'd write and swaps the map.
    pub fn refresh(&self, cancel: &CancelToken) -> Result<RefreshReport> {
        let started = Instant::now();
        let mut report = RefreshReport::default();
        let snapshot = self.snapshot();

        let mut found: HashMap<String, NoteEntry> = HashMap::new();
        let mut changed: Vec<NoteEntry> = Vec::new();

        if self.vault_root.is_dir() {
            let mut stack = vec![self.vault_root.clone()];
            while let Some(dir) = stack.pop() {
                for entry in fs::read_dir(&dir)? {
                    cancel.check()?;
                    let entry = entry?;
                    let name = entry.file_name();
                    if name.to_string_lossy().starts_with('.') {
                        continue;
                    }
                    let path = entry.path();
                    if path.is_dir() {
                        stack.push(path);
                        continue;
                    }
                    if path.extension().and_then(|e| e.to_str()) != Some("md") {
                        continue;
                    }

                    report.scanned += 1;
                    let rel = relative_path(&self.vault_root, &path);
                    let meta = entry.metadata()?;
                    let mtime_ns = mtime_nanos(&meta);
                    let size = meta.len();

                    if let Some(existing) = snapshot.get(&rel) {
                        if existing.mtime_ns == mtime_ns && existing.size == size {
                            report.unchanged += 1;
                            found.insert(rel, existing.clone());
                            continue;
                        }
                    }

                    let note = index_note(&path, &rel, mtime_ns, size, &mut report);
                    found.insert(rel, note.clone());
                    changed.push(note);
                    report.updated += 1;
                }
            }
        }

        let removed: Vec<String> = snapshot
            .keys()
            .filter(|path| !found.contains_key(*path))
            .cloned()
            .collect();
        report.removed = removed.len();

        if !changed.is_empty() || !removed.is_empty() {
            let mut chunk: Vec<u8> = Vec::new();
            for entry in &changed {
                chunk.extend_from_slice(&serde_json::to_vec(entry)?);
                chunk.push(b'\n');
            }
            for path in &removed {
                chunk.extend_from_slice(&serde_json::to_vec(&serde_json::json!({
                    "path": path,
                    "_tomb": true,
                }))?);
                chunk.push(b'\n');
            }

            let mut writer = self.writer.lock().map_err(|_| poisoned())?;
            writer.write_all(&chunk)?;
            writer.flush()?;
            writer.sync_all()?;

            let mut guard = self.entries.write().map_err(|_| poisoned())?;
            *guard = Arc::new(found);
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            scanned = report.scanned,
            updated = report.updated,
            removed = report.removed,
            "ltm refresh finished"
        );
        Ok(report)
    }

    /// Index file path (for stats output).
    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn mtime_nanos(meta: &fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

fn index_note(
    path: &Path,
    rel: &str,
    mtime_ns: i64,
    size: u64,
    report: &mut RefreshReport,
) -> NoteEntry {
    let contents = fs::read_to_string(path).unwrap_or_default();
    let (front, body) = parse_front_matter(&contents);
    if front.is_none() && contents.starts_with("---") {
        report.parse_errors += 1;
    }
    let front = front.unwrap_or_default();

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| rel.to_string());

    NoteEntry {
        path: rel.to_string(),
        title: front.title.unwrap_or(stem),
        tags: front.tags,
        aliases: front.aliases,
        mtime_ns,
        size,
        front_matter_keys: front.keys,
        content_snippet: snippet(body, SNIPPET_CHARS),
        extra: Default::default(),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_note(vault: &Path, rel: &str, contents: &str) {
        let path = vault.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    fn open_index(dir: &TempDir) -> LtmIndex {
        LtmIndex::open(dir.path().join("vault"), dir.path().join("ltm_index.jsonl")).unwrap()
    }

    #[test]
    fn test_scan_indexes_notes_with_front_matter() {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        write_note(
            &vault,
            "notes/jwt.md",
            "---\ntitle: JWT rotation\ntags: [security]\n---\n\nRotate signing keys quarterly.\n",
        );
        write_note(&vault, "plain.md", "No front matter here.\n");

        let index = open_index(&dir);
        let report = index.refresh(&CancelToken::new()).unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.updated, 2);

        let snapshot = index.snapshot();
        let jwt = &snapshot["notes/jwt.md"];
        assert_eq!(jwt.title, "JWT rotation");
        assert_eq!(jwt.tags, vec!["security"]);
        assert!(jwt.content_snippet.contains("Rotate signing keys"));

        let plain = &snapshot["plain.md"];
        assert_eq!(plain.title, "plain");
    }

    #[test]
    fn test_dot_entries_skipped() {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        write_note(&vault, ".obsidian/workspace.md", "internal");
        write_note(&vault, ".hidden.md", "hidden");
        write_note(&vault, "visible.md", "visible");

        let index = open_index(&dir);
        let report = index.refresh(&CancelToken::new()).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_unchanged_files_skipped_on_second_pass() {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        write_note(&vault, "a.md", "alpha");

        let index = open_index(&dir);
        index.refresh(&CancelToken::new()).unwrap();
        let second = index.refresh(&CancelToken::new()).unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.updated, 0);
    }

    #[test]
    fn test_deleted_files_tombstoned_and_survive_reload() {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        write_note(&vault, "a.md", "alpha");
        write_note(&vault, "b.md", "beta");

        {
            let index = open_index(&dir);
            index.refresh(&CancelToken::new()).unwrap();
            assert_eq!(index.len(), 2);

            fs::remove_file(vault.join("a.md")).unwrap();
            let report = index.refresh(&CancelToken::new()).unwrap();
            assert_eq!(report.removed, 1);
            assert_eq!(index.len(), 1);
        }

        // Reload replays the tombstone from the projection file.
        let index = open_index(&dir);
        assert_eq!(index.len(), 1);
        assert!(index.snapshot().contains_key("b.md"));
    }

    #[test]
    fn test_missing_vault_is_empty_not_fatal() {
        let dir = TempDir::new().unwrap();
        let index = open_index(&dir);
        let report = index.refresh(&CancelToken::new()).unwrap();
        assert_eq!(report.scanned, 0);
        assert!(index.is_empty());
    }

    #[test]
    fn test_cancellation_mid_scan() {
        let dir = TempDir::new().unwrap();
        let vault = dir.path().join("vault");
        write_note(&vault, "a.md", "alpha");
        let index = open_index(&dir);
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(index.refresh(&cancel).is_err());
    }
}
