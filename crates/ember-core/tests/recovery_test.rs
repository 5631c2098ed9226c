//! Crash-consistency and forward-compatibility tests: damage the line files
//! between engine sessions and verify recovery.

use std::fs;
use std::sync::Arc;

use ember_core::prelude::*;
use ember_core::{Embedder, EmbedUnavailable, ManualClock, ResultKind};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000;

fn open_engine(dir: &TempDir) -> MemoryEngine {
    MemoryEngine::open_with(
        EngineConfig {
            storage_root: Some(dir.path().join("storage")),
            vault_root: Some(dir.path().join("vault")),
            ..Default::default()
        },
        Arc::new(ManualClock::at(T0)),
        None,
    )
    .unwrap()
}

fn save(engine: &MemoryEngine, content: &str) -> MemoryRecord {
    engine
        .save_memory(
            SaveInput {
                content: content.to_string(),
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap()
}

#[test]
fn test_partial_trailing_line_truncated_on_restart() {
    let dir = TempDir::new().unwrap();
    let (id_a, id_b);
    {
        let engine = open_engine(&dir);
        id_a = save(&engine, "first record").id;
        id_b = save(&engine, "second record").id;
    }

    // Simulate a crash between write and fsync: a torn line with no LF.
    let path = dir.path().join("storage/memories.jsonl");
    let mut bytes = fs::read(&path).unwrap();
    bytes.extend_from_slice(br#"{"id":"m-torn","content":"interrupted mid-wri"#);
    fs::write(&path, &bytes).unwrap();

    let engine = open_engine(&dir);
    assert!(engine.get_memory(&id_a).is_ok());
    assert!(engine.get_memory(&id_b).is_ok());
    let stats = engine.stats();
    assert_eq!(stats.store.corrupt_lines, 0);
    assert_eq!(stats.store.active_count, 2);
    assert!(engine.get_memory("m-torn").is_err());
}

#[test]
fn test_malformed_interior_line_skipped_and_surfaced() {
    let dir = TempDir::new().unwrap();
    let id;
    {
        let engine = open_engine(&dir);
        id = save(&engine, "good record").id;
    }

    let path = dir.path().join("storage/memories.jsonl");
    let mut contents = fs::read_to_string(&path).unwrap();
    contents.push_str("!!! not json !!!\n");
    fs::write(&path, contents).unwrap();
    {
        let engine = open_engine(&dir);
        // Engine keeps running; the bad line is counted with its offset.
        assert!(engine.get_memory(&id).is_ok());
        let stats = engine.stats();
        assert_eq!(stats.store.corrupt_lines, 1);
        assert!(stats.store.first_corrupt_offset.is_some());

        // Compaction rewrites the file without the garbage.
        engine.compact().unwrap();
    }
    let engine = open_engine(&dir);
    assert_eq!(engine.stats().store.corrupt_lines, 0);
    assert!(engine.get_memory(&id).is_ok());
}

#[test]
fn test_unknown_fields_survive_engine_round_trips() {
    let dir = TempDir::new().unwrap();
    let id;
    {
        let engine = open_engine(&dir);
        id = save(&engine, "carries foreign fields").id;
    }

    // A foreign writer annotates the record with a field we do not model.
    let path = dir.path().join("storage/memories.jsonl");
    let contents = fs::read_to_string(&path).unwrap();
    let mut value: serde_json::Value = serde_json::from_str(contents.lines().last().unwrap()).unwrap();
    value["review_cohort"] = serde_json::json!("pilot-7");
    fs::write(&path, format!("{}\n", value)).unwrap();

    {
        let engine = open_engine(&dir);
        let record = engine.get_memory(&id).unwrap();
        assert_eq!(record.extra["review_cohort"], "pilot-7");

        // Touch rewrites the line; compaction rewrites the file. The field
        // must survive both.
        engine.touch_memory(&id, false, &CancelToken::new()).unwrap();
        engine.compact().unwrap();
    }
    let engine = open_engine(&dir);
    let record = engine.get_memory(&id).unwrap();
    assert_eq!(record.extra["review_cohort"], "pilot-7");
    assert_eq!(record.use_count, 2);
}

#[test]
fn test_tombstones_survive_compaction_and_restart() {
    let dir = TempDir::new().unwrap();
    let (keep, gone);
    {
        let engine = open_engine(&dir);
        keep = save(&engine, "kept").id;
        gone = save(&engine, "deleted").id;
        engine.delete_memory(&gone, &CancelToken::new()).unwrap();
        engine.compact().unwrap();
    }
    let engine = open_engine(&dir);
    assert!(engine.get_memory(&keep).is_ok());
    assert!(engine.get_memory(&gone).is_err());
    assert_eq!(engine.stats().store.tombstone_count, 0);
}

// ============================================================================
// EMBEDDER SEAM
// ============================================================================

/// Toy embedder: direction encodes which of two topics a text mentions.
struct TopicEmbedder;

impl Embedder for TopicEmbedder {
    fn embed(
        &self,
        text: &str,
        _cancel: &CancelToken,
    ) -> std::result::Result<Vec<f32>, EmbedUnavailable> {
        let lower = text.to_lowercase();
        let db = lower.contains("database") as i32 as f32;
        let ui = lower.contains("frontend") as i32 as f32;
        if db == 0.0 && ui == 0.0 {
            return Ok(vec![0.5, 0.5]);
        }
        Ok(vec![db, ui])
    }
}

/// Embedder that always fails, to exercise lexical fallback.
struct DownEmbedder;

impl Embedder for DownEmbedder {
    fn embed(
        &self,
        _text: &str,
        _cancel: &CancelToken,
    ) -> std::result::Result<Vec<f32>, EmbedUnavailable> {
        Err(EmbedUnavailable::Failed("circuit open".into()))
    }
}

#[test]
fn test_semantic_ranking_with_embedder() {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::open_with(
        EngineConfig {
            storage_root: Some(dir.path().join("storage")),
            ..Default::default()
        },
        Arc::new(ManualClock::at(T0)),
        Some(Arc::new(TopicEmbedder)),
    )
    .unwrap();

    let db = save(&engine, "tune the database connection pool");
    let _ui = save(&engine, "align the frontend header spacing");

    let hits = engine
        .search_unified(
            &SearchRequest {
                query: Some("database latency".into()),
                limit: 2,
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();

    let stm: Vec<_> = hits
        .iter()
        .filter(|hit| hit.kind == ResultKind::Stm)
        .collect();
    assert_eq!(stm[0].memory.as_ref().unwrap().id, db.id);
}

#[test]
fn test_search_degrades_when_embedder_fails() {
    let dir = TempDir::new().unwrap();
    let engine = MemoryEngine::open_with(
        EngineConfig {
            storage_root: Some(dir.path().join("storage")),
            ..Default::default()
        },
        Arc::new(ManualClock::at(T0)),
        Some(Arc::new(DownEmbedder)),
    )
    .unwrap();

    let record = save(&engine, "lexical fallback still finds this");
    let hits = engine
        .search_unified(
            &SearchRequest {
                query: Some("fallback".into()),
                ..Default::default()
            },
            &CancelToken::new(),
        )
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.as_ref().unwrap().id, record.id);
}
