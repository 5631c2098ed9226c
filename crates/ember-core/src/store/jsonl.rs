//! Append-only JSONL persistence
//!
//! Two line files under the storage root:
//! - `memories.jsonl` - memory records and their tombstones
//! - `relations.jsonl` - relation records and their tombstones
//!
//! Every write path appends, flushes, and fsyncs before the in-memory index
//! is swapped, so readers never observe state that could be lost. On load,
//! an unterminated trailing line is truncated away (crash recovery) and
//! malformed complete lines are logged, counted, and skipped.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::memory::{MemoryRecord, MemoryStatus, Relation};

use super::index::{MemoryFilter, MemoryListing, StoreIndex};
use super::lockfile::Lockfile;

const MEMORIES_FILE: &str = "memories.jsonl";
const RELATIONS_FILE: &str = "relations.jsonl";

fn poisoned() -> EngineError {
    EngineError::Io(std::io::Error::other("store lock poisoned"))
}

// ============================================================================
// OPTIONS & STATS
// ============================================================================

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Directory holding the line files and the lockfile.
    pub root: PathBuf,
    /// Tombstone ratio above which compaction is recommended.
    pub compaction_tombstone_ratio: f64,
}

impl StoreOptions {
    /// Options with the default compaction heuristic.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            compaction_tombstone_ratio: 0.3,
        }
    }
}

/// Snapshot of store health, fed into `stats()` and the compaction trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    /// Live records with status `active`
    pub active_count: usize,
    /// Live records with status `promoted`
    pub promoted_count: usize,
    /// Live records with status `archived`
    pub archived_count: usize,
    /// Live relations
    pub relation_count: usize,
    /// Lines ever appended to `memories.jsonl` (including superseded)
    pub total_lines: u64,
    /// Tombstone lines in `memories.jsonl`
    pub tombstone_count: u64,
    /// Size of `memories.jsonl` in bytes
    pub file_size_bytes: u64,
    /// Size of `relations.jsonl` in bytes
    pub relation_file_size_bytes: u64,
    /// Malformed lines skipped during load, both files
    pub corrupt_lines: u64,
    /// Byte offset of the first malformed line seen, if any
    pub first_corrupt_offset: Option<u64>,
    /// Whether the compaction heuristic fired
    pub compaction_recommended: bool,
}

/// Report returned by `compact()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactionReport {
    /// Lines dropped from `memories.jsonl`
    pub memory_lines_dropped: u64,
    /// Lines dropped from `relations.jsonl`
    pub relation_lines_dropped: u64,
    /// Wall-clock duration of the rewrite
    pub duration_ms: u64,
}

// ============================================================================
// WRITE BATCH
// ============================================================================

/// A compound mutation committed as one unit under the writer mutex.
///
/// Used by consolidation: the merged record, its provenance relations, and
/// the source tombstones either all commit or none do.
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub memory_puts: Vec<MemoryRecord>,
    pub memory_tombstones: Vec<String>,
    pub relation_puts: Vec<Relation>,
    pub relation_tombstones: Vec<String>,
}

impl WriteBatch {
    /// Whether the batch mutates anything.
    pub fn is_empty(&self) -> bool {
        self.memory_puts.is_empty()
            && self.memory_tombstones.is_empty()
            && self.relation_puts.is_empty()
            && self.relation_tombstones.is_empty()
    }
}

// ============================================================================
// TOMBSTONES
// ============================================================================

#[derive(Serialize)]
struct TombstoneLine<'a> {
    id: &'a str,
    #[serde(rename = "_tomb")]
    tomb: bool,
    deleted_at: i64,
}

fn tombstone_line(id: &str, deleted_at: i64) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(&TombstoneLine {
        id,
        tomb: true,
        deleted_at,
    })
    .unwrap_or_default();
    bytes.push(b'\n');
    bytes
}

fn record_line<T: Serialize>(record: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(record)?;
    bytes.push(b'\n');
    Ok(bytes)
}

// ============================================================================
// FILE STATE
// ============================================================================

/// Append handle plus line accounting for one JSONL file.
#[derive(Debug)]
struct FileState {
    path: PathBuf,
    file: File,
    total_lines: u64,
    tombstone_lines: u64,
    bytes: u64,
    corrupt_lines: u64,
    first_corrupt_offset: Option<u64>,
}

impl FileState {
    fn append(&mut self, line: &[u8], is_tombstone: bool) -> Result<()> {
        self.file.write_all(line)?;
        self.file.flush()?;
        self.file.sync_all()?;
        self.total_lines += 1;
        if is_tombstone {
            self.tombstone_lines += 1;
        }
        self.bytes += line.len() as u64;
        Ok(())
    }
}

struct WriterState {
    memories: FileState,
    relations: FileState,
}

// ============================================================================
// JSONL STORE
// ============================================================================

/// The append-only store for memories and relations.
///
/// One writer at a time, guarded by a mutex. Readers clone an `Arc` to the
/// current index snapshot and are never blocked by writes.
pub struct JsonlStore {
    options: StoreOptions,
    writer: Mutex<WriterState>,
    index: RwLock<Arc<StoreIndex>>,
    _lock: Lockfile,
}

impl JsonlStore {
    /// Open (or create) the store under `options.root`.
    ///
    /// Streams both files to rebuild the index, truncating an unterminated
    /// trailing line and skipping malformed ones.
    pub fn open(options: StoreOptions) -> Result<Self> {
        fs::create_dir_all(&options.root)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&options.root, fs::Permissions::from_mode(0o700));
        }
        let lock = Lockfile::acquire(&options.root)?;

        let mut index = StoreIndex::default();
        let memories = load_file(
            &options.root.join(MEMORIES_FILE),
            &mut index,
            LineKind::Memory,
        )?;
        let relations = load_file(
            &options.root.join(RELATIONS_FILE),
            &mut index,
            LineKind::Relation,
        )?;

        // One directory fsync after any recovery work, so renames and
        // truncations performed above are durable.
        sync_dir(&options.root);

        Ok(Self {
            options,
            writer: Mutex::new(WriterState {
                memories,
                relations,
            }),
            index: RwLock::new(Arc::new(index)),
            _lock: lock,
        })
    }

    /// Storage root directory.
    pub fn root(&self) -> &Path {
        &self.options.root
    }

    /// Current immutable index snapshot.
    pub fn snapshot(&self) -> Arc<StoreIndex> {
        self.index
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_default()
    }

    fn swap_index(&self, next: StoreIndex) -> Result<()> {
        let mut guard = self.index.write().map_err(|_| poisoned())?;
        *guard = Arc::new(next);
        Ok(())
    }

    // ========== memories ==========

    /// Append `record`, superseding any earlier line with the same id.
    pub fn put_memory(&self, record: MemoryRecord) -> Result<String> {
        record.validate()?;
        let line = record_line(&record)?;
        let id = record.id.clone();

        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        writer.memories.append(&line, false)?;

        let mut next = (*self.snapshot()).clone();
        next.insert_memory(record, line.len() as u64);
        self.swap_index(next)?;
        Ok(id)
    }

    /// Latest non-tombstoned record for `id`.
    pub fn get_memory(&self, id: &str) -> Option<MemoryRecord> {
        self.snapshot().get_memory(id).cloned()
    }

    /// Tombstone `id` and cascade-tombstone every relation touching it.
    ///
    /// Tombstoning an unknown id is a no-op; returns whether a live record
    /// was removed.
    pub fn delete_memory(&self, id: &str, now: i64) -> Result<bool> {
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        let snapshot = self.snapshot();
        if snapshot.get_memory(id).is_none() {
            return Ok(false);
        }
        let cascade: Vec<String> = snapshot
            .relations_of(id)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();

        writer.memories.append(&tombstone_line(id, now), true)?;
        for rel_id in &cascade {
            writer.relations.append(&tombstone_line(rel_id, now), true)?;
        }

        let mut next = (*self.snapshot()).clone();
        next.remove_memory(id);
        for rel_id in &cascade {
            next.remove_relation(rel_id);
        }
        self.swap_index(next)?;
        Ok(true)
    }

    /// Records matching `filter`, as a restartable listing over one snapshot.
    pub fn list_memories(&self, filter: &MemoryFilter) -> MemoryListing {
        let snapshot = self.snapshot();
        let ids = snapshot.filter_ids(filter);
        MemoryListing::new(snapshot, ids)
    }

    // ========== relations ==========

    /// Append `relation`, superseding any earlier line with the same id.
    pub fn put_relation(&self, relation: Relation) -> Result<String> {
        relation.validate()?;
        let line = record_line(&relation)?;
        let id = relation.id.clone();

        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        writer.relations.append(&line, false)?;

        let mut next = (*self.snapshot()).clone();
        next.insert_relation(relation);
        self.swap_index(next)?;
        Ok(id)
    }

    /// Latest non-tombstoned relation for `id`.
    pub fn get_relation(&self, id: &str) -> Option<Relation> {
        self.snapshot().get_relation(id).cloned()
    }

    /// Tombstone a relation. Unknown ids are a no-op.
    pub fn delete_relation(&self, id: &str, now: i64) -> Result<bool> {
        if self.snapshot().get_relation(id).is_none() {
            return Ok(false);
        }
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        writer.relations.append(&tombstone_line(id, now), true)?;

        let mut next = (*self.snapshot()).clone();
        next.remove_relation(id);
        self.swap_index(next)?;
        Ok(true)
    }

    // ========== batches ==========

    /// Commit a compound mutation as one unit.
    ///
    /// All lines are serialized up front; each file then receives its whole
    /// chunk in a single fsync'd write, and the index is swapped exactly
    /// once, after both files are durable.
    pub fn apply_batch(&self, batch: WriteBatch, now: i64) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        for record in &batch.memory_puts {
            record.validate()?;
        }
        for relation in &batch.relation_puts {
            relation.validate()?;
        }

        let mut mem_chunk: Vec<u8> = Vec::new();
        let mut mem_lines: Vec<(String, u64, bool)> = Vec::new();
        for record in &batch.memory_puts {
            let line = record_line(record)?;
            mem_lines.push((record.id.clone(), line.len() as u64, false));
            mem_chunk.extend_from_slice(&line);
        }
        for id in &batch.memory_tombstones {
            let line = tombstone_line(id, now);
            mem_lines.push((id.clone(), line.len() as u64, true));
            mem_chunk.extend_from_slice(&line);
        }

        let mut rel_chunk: Vec<u8> = Vec::new();
        let mut rel_tombs = 0u64;
        for relation in &batch.relation_puts {
            rel_chunk.extend_from_slice(&record_line(relation)?);
        }
        for id in &batch.relation_tombstones {
            rel_chunk.extend_from_slice(&tombstone_line(id, now));
            rel_tombs += 1;
        }

        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        if !mem_chunk.is_empty() {
            writer.memories.file.write_all(&mem_chunk)?;
            writer.memories.file.flush()?;
            writer.memories.file.sync_all()?;
            writer.memories.total_lines += mem_lines.len() as u64;
            writer.memories.tombstone_lines +=
                mem_lines.iter().filter(|(_, _, t)| *t).count() as u64;
            writer.memories.bytes += mem_chunk.len() as u64;
        }
        if !rel_chunk.is_empty() {
            writer.relations.file.write_all(&rel_chunk)?;
            writer.relations.file.flush()?;
            writer.relations.file.sync_all()?;
            writer.relations.total_lines +=
                (batch.relation_puts.len() + batch.relation_tombstones.len()) as u64;
            writer.relations.tombstone_lines += rel_tombs;
            writer.relations.bytes += rel_chunk.len() as u64;
        }

        let mut next = (*self.snapshot()).clone();
        for (record, (_, len, _)) in batch.memory_puts.iter().zip(&mem_lines) {
            next.insert_memory(record.clone(), *len);
        }
        for id in &batch.memory_tombstones {
            next.remove_memory(id);
        }
        for relation in batch.relation_puts {
            next.insert_relation(relation);
        }
        for id in &batch.relation_tombstones {
            next.remove_relation(id);
        }
        self.swap_index(next)?;
        Ok(())
    }

    // ========== compaction ==========

    /// Rewrite both files keeping only the latest non-tombstoned line per
    /// id. Holds the writer mutex for the duration; readers stay on their
    /// snapshots throughout.
    pub fn compact(&self) -> Result<CompactionReport> {
        let started = Instant::now();
        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        let snapshot = self.snapshot();

        let mut next = StoreIndex::default();

        // memories.jsonl: stable created_at order keeps rewrites diffable
        let mut records: Vec<&MemoryRecord> = snapshot.iter_memories().collect();
        records.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        let mut mem_bytes = 0u64;
        {
            let tmp = writer.memories.path.with_extension("jsonl.tmp");
            let mut out = File::create(&tmp)?;
            for record in &records {
                let line = record_line(record)?;
                out.write_all(&line)?;
                next.insert_memory((*record).clone(), line.len() as u64);
                mem_bytes += line.len() as u64;
            }
            out.sync_all()?;
            fs::rename(&tmp, &writer.memories.path)?;
        }

        let mut relations: Vec<&Relation> = snapshot.iter_relations().collect();
        relations.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        let mut rel_bytes = 0u64;
        {
            let tmp = writer.relations.path.with_extension("jsonl.tmp");
            let mut out = File::create(&tmp)?;
            for relation in &relations {
                let line = record_line(relation)?;
                out.write_all(&line)?;
                next.insert_relation((*relation).clone());
                rel_bytes += line.len() as u64;
            }
            out.sync_all()?;
            fs::rename(&tmp, &writer.relations.path)?;
        }

        sync_dir(&self.options.root);
        set_file_mode(&writer.memories.path);
        set_file_mode(&writer.relations.path);

        let report = CompactionReport {
            memory_lines_dropped: writer.memories.total_lines - records.len() as u64,
            relation_lines_dropped: writer.relations.total_lines - relations.len() as u64,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        // Reopen append handles against the renamed files and reset counts.
        writer.memories.file = open_append(&writer.memories.path)?;
        writer.memories.total_lines = records.len() as u64;
        writer.memories.tombstone_lines = 0;
        writer.memories.bytes = mem_bytes;
        writer.memories.corrupt_lines = 0;
        writer.memories.first_corrupt_offset = None;
        writer.relations.file = open_append(&writer.relations.path)?;
        writer.relations.total_lines = relations.len() as u64;
        writer.relations.tombstone_lines = 0;
        writer.relations.bytes = rel_bytes;
        writer.relations.corrupt_lines = 0;
        writer.relations.first_corrupt_offset = None;

        self.swap_index(next)?;

        tracing::info!(
            dropped = report.memory_lines_dropped + report.relation_lines_dropped,
            duration_ms = report.duration_ms,
            "compaction finished"
        );
        Ok(report)
    }

    // ========== stats ==========

    /// Store health snapshot, including the compaction recommendation.
    pub fn stats(&self) -> StoreStats {
        let snapshot = self.snapshot();
        let (total_lines, tombstones, mem_bytes, rel_bytes, corrupt, first_corrupt) =
            match self.writer.lock() {
                Ok(writer) => (
                    writer.memories.total_lines,
                    writer.memories.tombstone_lines,
                    writer.memories.bytes,
                    writer.relations.bytes,
                    writer.memories.corrupt_lines + writer.relations.corrupt_lines,
                    writer.memories.first_corrupt_offset,
                ),
                Err(_) => (0, 0, 0, 0, 0, None),
            };

        let tombstone_ratio = if total_lines > 0 {
            tombstones as f64 / total_lines as f64
        } else {
            0.0
        };
        let live_bytes = snapshot.live_memory_bytes();
        let oversized = live_bytes > 0 && mem_bytes > 10 * live_bytes;

        StoreStats {
            active_count: snapshot.count_by_status(MemoryStatus::Active),
            promoted_count: snapshot.count_by_status(MemoryStatus::Promoted),
            archived_count: snapshot.count_by_status(MemoryStatus::Archived),
            relation_count: snapshot.relation_count(),
            total_lines,
            tombstone_count: tombstones,
            file_size_bytes: mem_bytes,
            relation_file_size_bytes: rel_bytes,
            corrupt_lines: corrupt,
            first_corrupt_offset: first_corrupt,
            compaction_recommended: tombstone_ratio > self.options.compaction_tombstone_ratio
                || oversized,
        }
    }
}

// ============================================================================
// LOADING & RECOVERY
// ============================================================================

#[derive(Clone, Copy, PartialEq)]
enum LineKind {
    Memory,
    Relation,
}

fn open_append(path: &Path) -> Result<File> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    set_file_mode(path);
    Ok(file)
}

fn set_file_mode(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }
}

fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

/// Stream one JSONL file into the index, truncating a torn trailing line
/// and skipping malformed ones.
fn load_file(path: &Path, index: &mut StoreIndex, kind: LineKind) -> Result<FileState> {
    let mut state = FileState {
        path: path.to_path_buf(),
        file: open_append(path)?,
        total_lines: 0,
        tombstone_lines: 0,
        bytes: 0,
        corrupt_lines: 0,
        first_corrupt_offset: None,
    };

    let data = fs::read(path)?;
    let complete_len = match data.iter().rposition(|&b| b == b'\n') {
        Some(pos) => pos + 1,
        None => 0,
    };
    if complete_len < data.len() {
        // Torn write from a crash between append and fsync.
        tracing::warn!(
            path = %path.display(),
            dropped_bytes = data.len() - complete_len,
            "truncating unterminated trailing line"
        );
        drop(state.file);
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(complete_len as u64)?;
        file.sync_all()?;
        state.file = open_append(path)?;
    }

    let mut offset: u64 = 0;
    for line in data[..complete_len].split_inclusive(|&b| b == b'\n') {
        let line_len = line.len() as u64;
        let trimmed = &line[..line.len() - 1];
        if trimmed.is_empty() {
            offset += line_len;
            continue;
        }
        state.total_lines += 1;
        state.bytes += line_len;

        match parse_line(trimmed, kind) {
            Ok(ParsedLine::Tombstone { id }) => {
                state.tombstone_lines += 1;
                match kind {
                    LineKind::Memory => {
                        index.remove_memory(&id);
                    }
                    LineKind::Relation => {
                        index.remove_relation(&id);
                    }
                }
            }
            Ok(ParsedLine::Memory(record)) => {
                index.insert_memory(record, line_len);
            }
            Ok(ParsedLine::Relation(relation)) => {
                index.insert_relation(relation);
            }
            Err(reason) => {
                tracing::warn!(
                    path = %path.display(),
                    offset,
                    %reason,
                    "skipping malformed line"
                );
                state.corrupt_lines += 1;
                if state.first_corrupt_offset.is_none() {
                    state.first_corrupt_offset = Some(offset);
                }
            }
        }
        offset += line_len;
    }

    Ok(state)
}

enum ParsedLine {
    Tombstone { id: String },
    Memory(MemoryRecord),
    Relation(Relation),
}

fn parse_line(bytes: &[u8], kind: LineKind) -> std::result::Result<ParsedLine, String> {
    let value: Value = serde_json::from_slice(bytes).map_err(|e| e.to_string())?;
    let is_tomb = value
        .get("_tomb")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if is_tomb {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| "tombstone without id".to_string())?;
        return Ok(ParsedLine::Tombstone { id: id.to_string() });
    }
    match kind {
        LineKind::Memory => serde_json::from_value::<MemoryRecord>(value)
            .map(ParsedLine::Memory)
            .map_err(|e| e.to_string()),
        LineKind::Relation => serde_json::from_value::<Relation>(value)
            .map(ParsedLine::Relation)
            .map_err(|e| e.to_string()),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{RelationKind, SaveInput};
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> JsonlStore {
        JsonlStore::open(StoreOptions::new(dir.path())).unwrap()
    }

    fn save(store: &JsonlStore, content: &str, now: i64) -> MemoryRecord {
        let record = MemoryRecord::new(
            SaveInput {
                content: content.to_string(),
                tags: vec!["test".into()],
                ..Default::default()
            },
            now,
        )
        .unwrap();
        store.put_memory(record.clone()).unwrap();
        record
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let record = save(&store, "hello", 100);

        let loaded = store.get_memory(&record.id).unwrap();
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_reload_preserves_unknown_fields() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = open_store(&dir);
            let mut record = MemoryRecord::new(
                SaveInput {
                    content: "x".into(),
                    ..Default::default()
                },
                5,
            )
            .unwrap();
            record
                .extra
                .insert("shard".into(), Value::String("legacy-7".into()));
            id = record.id.clone();
            store.put_memory(record).unwrap();
        }
        let store = open_store(&dir);
        let loaded = store.get_memory(&id).unwrap();
        assert_eq!(loaded.extra["shard"], "legacy-7");
    }

    #[test]
    fn test_supersede_last_line_wins() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = open_store(&dir);
            let mut record = save(&store, "v1", 10);
            id = record.id.clone();
            record.content = "v2".into();
            store.put_memory(record).unwrap();
        }
        let store = open_store(&dir);
        assert_eq!(store.get_memory(&id).unwrap().content, "v2");
        assert_eq!(store.stats().total_lines, 2);
        assert_eq!(store.stats().active_count, 1);
    }

    #[test]
    fn test_tombstone_suppresses_and_survives_reload() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = open_store(&dir);
            id = save(&store, "doomed", 10).id;
            assert!(store.delete_memory(&id, 20).unwrap());
            assert!(store.get_memory(&id).is_none());
            // no-op on a missing id
            assert!(!store.delete_memory(&id, 21).unwrap());
        }
        let store = open_store(&dir);
        assert!(store.get_memory(&id).is_none());
    }

    #[test]
    fn test_cascade_deletes_relations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save(&store, "a", 1);
        let b = save(&store, "b", 2);
        let rel = Relation::new(&a.id, &b.id, RelationKind::Related, 0.5, 3).unwrap();
        let rel_id = store.put_relation(rel).unwrap();

        store.delete_memory(&a.id, 4).unwrap();
        assert!(store.get_relation(&rel_id).is_none());
    }

    #[test]
    fn test_corrupt_line_skipped_and_reported() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = open_store(&dir);
            id = save(&store, "good", 1).id;
        }
        // Wedge garbage between two valid lines.
        let path = dir.path().join(MEMORIES_FILE);
        let mut contents = fs::read_to_string(&path).unwrap();
        let good_len = contents.len() as u64;
        contents.push_str("{not json at all\n");
        fs::write(&path, contents).unwrap();

        let store = open_store(&dir);
        assert!(store.get_memory(&id).is_some());
        let stats = store.stats();
        assert_eq!(stats.corrupt_lines, 1);
        assert_eq!(stats.first_corrupt_offset, Some(good_len));
    }

    #[test]
    fn test_torn_trailing_line_truncated() {
        let dir = TempDir::new().unwrap();
        let id;
        {
            let store = open_store(&dir);
            id = save(&store, "survivor", 1).id;
        }
        let path = dir.path().join(MEMORIES_FILE);
        let mut bytes = fs::read(&path).unwrap();
        let full_len = bytes.len();
        bytes.extend_from_slice(br#"{"id":"m-torn","content":"half"#);
        fs::write(&path, &bytes).unwrap();

        let store = open_store(&dir);
        assert!(store.get_memory(&id).is_some());
        assert_eq!(store.stats().corrupt_lines, 0);
        drop(store);
        assert_eq!(fs::read(&path).unwrap().len(), full_len);
    }

    #[test]
    fn test_compaction_drops_dead_lines() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut keep = save(&store, "keep v1", 1);
        let dead = save(&store, "dead", 2);
        keep.content = "keep v2".into();
        store.put_memory(keep.clone()).unwrap();
        store.delete_memory(&dead.id, 3).unwrap();

        // 2 initial puts + 1 supersede + 1 tombstone, 1 live record
        assert_eq!(store.stats().total_lines, 4);

        let report = store.compact().unwrap();
        assert_eq!(report.memory_lines_dropped, 3);

        let stats = store.stats();
        assert_eq!(stats.total_lines, 1);
        assert_eq!(stats.tombstone_count, 0);
        assert_eq!(store.get_memory(&keep.id).unwrap().content, "keep v2");

        // appends after compaction land in the rewritten file
        let after = save(&store, "post-compact", 9);
        drop(store);
        let store = open_store(&dir);
        assert!(store.get_memory(&after.id).is_some());
        assert!(store.get_memory(&keep.id).is_some());
    }

    #[test]
    fn test_compaction_recommendation_by_tombstone_ratio() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut doomed = Vec::new();
        for i in 0..4 {
            doomed.push(save(&store, &format!("m{i}"), i).id);
        }
        assert!(!store.stats().compaction_recommended);
        for id in &doomed[..3] {
            store.delete_memory(id, 10).unwrap();
        }
        // 7 lines, 3 tombstones => ratio > 0.3
        assert!(store.stats().compaction_recommended);
        store.compact().unwrap();
        assert!(!store.stats().compaction_recommended);
    }

    #[test]
    fn test_batch_commits_as_unit() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let a = save(&store, "src a", 1);
        let b = save(&store, "src b", 2);

        let merged = MemoryRecord::new(
            SaveInput {
                content: "merged".into(),
                ..Default::default()
            },
            3,
        )
        .unwrap();
        let rel_a =
            Relation::new(&merged.id, &a.id, RelationKind::ConsolidatedFrom, 1.0, 3).unwrap();
        let rel_b =
            Relation::new(&merged.id, &b.id, RelationKind::ConsolidatedFrom, 1.0, 3).unwrap();

        store
            .apply_batch(
                WriteBatch {
                    memory_puts: vec![merged.clone()],
                    memory_tombstones: vec![a.id.clone(), b.id.clone()],
                    relation_puts: vec![rel_a, rel_b],
                    relation_tombstones: vec![],
                },
                3,
            )
            .unwrap();

        assert!(store.get_memory(&a.id).is_none());
        assert!(store.get_memory(&b.id).is_none());
        assert!(store.get_memory(&merged.id).is_some());
        assert_eq!(store.snapshot().relations_from(&merged.id).len(), 2);

        // invalid batch touches nothing
        let mut bad = MemoryRecord::new(
            SaveInput {
                content: "bad".into(),
                ..Default::default()
            },
            4,
        )
        .unwrap();
        bad.strength = 9.0;
        let before = store.stats();
        let err = store.apply_batch(
            WriteBatch {
                memory_puts: vec![bad],
                memory_tombstones: vec![merged.id.clone()],
                ..Default::default()
            },
            4,
        );
        assert!(err.is_err());
        assert!(store.get_memory(&merged.id).is_some());
        assert_eq!(store.stats().total_lines, before.total_lines);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_open_refused_while_foreign_pid_holds_lock() {
        let dir = TempDir::new().unwrap();
        // pid 1 is always live
        fs::write(dir.path().join(".lock"), "1\n").unwrap();
        let store = JsonlStore::open(StoreOptions::new(dir.path()));
        assert!(matches!(store, Err(EngineError::Locked { .. })));
    }
}
