//! Memory engine
//!
//! The top-level service object. Owns the JSONL store, the vault projection,
//! the scorer, and the optional embedder, and exposes the operation surface
//! as typed methods:
//!
//! `save_memory`, `search_memory`, `search_unified`, `touch_memory`,
//! `observe_memory_usage`, `gc`, `promote_memory`, `cluster_memories`,
//! `consolidate_memories`, `read_graph`, `open_memories`, `create_relation`,
//! `stats`, `compact`, `refresh_ltm`.
//!
//! One writer gate serializes every mutation of the store and the vault
//! projection. Reads run against immutable snapshots and never block.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::clock::{SharedClock, SystemClock};
use crate::cluster::{Cluster, ClusterOptions, SimilarityStrategy, cluster_records};
use crate::config::EngineConfig;
use crate::consolidate::{ConsolidationProposal, MergeStrategy, propose};
use crate::decay::Scorer;
use crate::embeddings::Embedder;
use crate::error::{EngineError, Result};
use crate::maintenance::{
    GcOptions, GcReport, MaintenanceHandle, MaintenanceReport, spawn_scheduler,
};
use crate::memory::{
    MemoryRecord, MemoryStatus, ObservationEvent, Relation, RelationKind, SaveInput,
};
use crate::promote::{
    PromotionOutcome, PromotionPreview, build_note_body, mark_promoted, proposed_filename,
    reserve_filename, write_note_atomic,
};
use crate::review::{Reinforcement, ReviewScorer, apply_observation, apply_touch};
use crate::search::{EmbeddingCache, SearchContext, SearchHit, SearchRequest, SearchSources};
use crate::store::{
    CompactionReport, JsonlStore, MemoryFilter, MemoryListing, StoreOptions, WriteBatch,
};
use crate::vault::{LtmIndex, NoteEntry, RefreshReport};

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Result of a touch or observe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TouchOutcome {
    /// Score immediately before the event
    pub old_score: f64,
    /// Score immediately after the event
    pub new_score: f64,
    /// Strength change detail
    pub reinforcement: Reinforcement,
    /// The mutated record
    pub record: MemoryRecord,
}

/// Request for `open_memories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OpenRequest {
    /// Record ids to open
    pub ids: Vec<String>,
    /// Whether opening counts as a recall (touch)
    pub touch: bool,
}

impl Default for OpenRequest {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            touch: true,
        }
    }
}

/// Response for `open_memories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenOutcome {
    pub records: Vec<MemoryRecord>,
    /// Ids that were absent or tombstoned
    pub missing: Vec<String>,
}

/// Request for `read_graph`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphRequest {
    /// Seed record ids; empty seeds with the top-scored active records
    pub seed_ids: Vec<String>,
    /// Seed count when auto-seeding, and cap on neighbor expansion
    pub limit: usize,
}

impl Default for GraphRequest {
    fn default() -> Self {
        Self {
            seed_ids: Vec::new(),
            limit: 10,
        }
    }
}

/// Which end of a relation a listing keys on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationDirection {
    From,
    To,
    #[default]
    Either,
}

/// Bounded subgraph for host-side display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphView {
    pub memories: Vec<MemoryRecord>,
    pub relations: Vec<Relation>,
}

/// Request for `promote_memory`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromoteRequest {
    /// Explicit record id; `None` auto-detects candidates
    pub id: Option<String>,
    /// Build previews without touching the vault or the store
    pub dry_run: bool,
}

/// Response for `promote_memory`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionReport {
    /// Committed promotions (empty under dry-run)
    pub promoted: Vec<PromotionOutcome>,
    /// Previews (dry-run only)
    pub previews: Vec<PromotionPreview>,
}

/// How `consolidate_memories` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsolidateMode {
    /// Build the proposal only
    #[default]
    Preview,
    /// Commit the merge atomically
    Apply,
}

/// Request for `consolidate_memories`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsolidateRequest {
    /// A cluster id from the latest `cluster_memories` run
    pub cluster_id: Option<String>,
    /// Explicit member ids (used when `cluster_id` is absent)
    pub member_ids: Vec<String>,
    /// Cohesion for the strength formula; defaults to the review floor
    pub cohesion: Option<f64>,
    pub mode: ConsolidateMode,
    pub strategy: MergeStrategy,
    /// Host-generated merged content for the LLM-backed strategies
    pub merged_content: Option<String>,
}

/// Response for `consolidate_memories`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidateOutcome {
    pub proposal: ConsolidationProposal,
    /// The committed merged record (apply mode only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged: Option<MemoryRecord>,
}

/// Engine-wide stats snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    /// Store counters and the compaction recommendation
    pub store: crate::store::StoreStats,
    /// Indexed vault notes
    pub ltm_note_count: usize,
    /// Resolved decay model name
    pub decay_model: String,
    /// Score computations that clamped their elapsed time
    pub score_clamp_count: u64,
    pub last_gc_epoch: Option<i64>,
    pub last_compaction_epoch: Option<i64>,
    pub last_ltm_refresh_epoch: Option<i64>,
}

#[derive(Debug, Default)]
struct MaintenanceTimes {
    last_gc: Option<i64>,
    last_compaction: Option<i64>,
    last_refresh: Option<i64>,
}

// ============================================================================
// ENGINE
// ============================================================================

/// The temporal memory engine.
///
/// All methods take `&self`; the engine is `Send + Sync` and intended to be
/// shared behind an `Arc`.
pub struct MemoryEngine {
    config: EngineConfig,
    clock: SharedClock,
    store: JsonlStore,
    ltm: Option<LtmIndex>,
    scorer: Scorer,
    review: ReviewScorer,
    embedder: Option<Arc<dyn Embedder>>,
    embedding_cache: EmbeddingCache,
    clusters: Mutex<HashMap<String, Cluster>>,
    times: Mutex<MaintenanceTimes>,
    // Single writer gate across store and vault-projection mutations.
    write_gate: Mutex<()>,
}

impl MemoryEngine {
    /// Open the engine with the system clock and no embedder.
    pub fn open(config: EngineConfig) -> Result<Self> {
        Self::open_with(config, Arc::new(SystemClock), None)
    }

    /// Open the engine with an explicit clock and optional embedder.
    pub fn open_with(
        config: EngineConfig,
        clock: SharedClock,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        config.validate()?;

        let storage_root = match &config.storage_root {
            Some(root) => root.clone(),
            None => default_storage_root()?,
        };
        let store = JsonlStore::open(StoreOptions {
            root: storage_root.clone(),
            compaction_tombstone_ratio: config.compaction_tombstone_ratio,
        })?;

        let ltm = match &config.vault_root {
            Some(vault) => Some(LtmIndex::open(
                vault.clone(),
                storage_root.join("ltm_index.jsonl"),
            )?),
            None => None,
        };

        Ok(Self {
            scorer: Scorer::new(&config),
            review: ReviewScorer::new(&config),
            config,
            clock,
            store,
            ltm,
            embedder,
            embedding_cache: EmbeddingCache::default(),
            clusters: Mutex::new(HashMap::new()),
            times: Mutex::new(MaintenanceTimes::default()),
            write_gate: Mutex::new(()),
        })
    }

    /// The resolved configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The scorer (scores, forget/promote decisions).
    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    fn now(&self) -> i64 {
        self.clock.now_epoch()
    }

    fn gate(&self) -> Result<std::sync::MutexGuard<'_, ()>> {
        self.write_gate
            .lock()
            .map_err(|_| EngineError::Io(std::io::Error::other("writer gate poisoned")))
    }

    fn note_snapshot(&self) -> Arc<HashMap<String, NoteEntry>> {
        self.ltm
            .as_ref()
            .map(|ltm| ltm.snapshot())
            .unwrap_or_default()
    }

    // ========================================================================
    // WRITE PATH
    // ========================================================================

    /// Validate and persist a new memory record.
    ///
    /// When an embedder is configured and the input carries no vector, the
    /// content is embedded before the write (outside the writer gate);
    /// embedding failures degrade to storing without a vector.
    pub fn save_memory(&self, mut input: SaveInput, cancel: &CancelToken) -> Result<MemoryRecord> {
        cancel.check()?;
        if input.embed.is_none() {
            if let Some(embedder) = &self.embedder {
                match embedder.embed(&input.content, cancel) {
                    Ok(vector) => input.embed = Some(vector),
                    Err(e) => {
                        tracing::warn!(error = %e, "saving without embedding");
                    }
                }
            }
        }
        let record = MemoryRecord::new(input, self.now())?;

        cancel.check()?;
        let _gate = self.gate()?;
        self.store.put_memory(record.clone())?;
        Ok(record)
    }

    /// Fetch one record by id.
    pub fn get_memory(&self, id: &str) -> Result<MemoryRecord> {
        self.store
            .get_memory(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    /// Tombstone a record (cascading its relations). Returns `NotFound` for
    /// unknown ids.
    pub fn delete_memory(&self, id: &str, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;
        let _gate = self.gate()?;
        if !self.store.delete_memory(id, self.now())? {
            return Err(EngineError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// Lazy listing of records matching `filter`, over one snapshot.
    ///
    /// `min_score` drops records scoring below the bound at the current
    /// time; the listing stays restartable because it captures the ids once.
    pub fn list_memories(&self, filter: &MemoryFilter, min_score: Option<f64>) -> MemoryListing {
        let listing = self.store.list_memories(filter);
        match min_score {
            None => listing,
            Some(min) => {
                let now = self.now();
                let ids: Vec<String> = listing
                    .iter()
                    .filter(|record| self.scorer.score(record, now) >= min)
                    .map(|record| record.id.clone())
                    .collect();
                listing.with_ids(ids)
            }
        }
    }

    // ========================================================================
    // REINFORCEMENT
    // ========================================================================

    /// Record a recall: freshen `last_used`, bump `use_count`, optionally
    /// boost strength.
    pub fn touch_memory(&self, id: &str, boost: bool, cancel: &CancelToken) -> Result<TouchOutcome> {
        cancel.check()?;
        let _gate = self.gate()?;
        let mut record = self
            .store
            .get_memory(id)
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;

        let now = self.now();
        let old_score = self.scorer.score(&record, now);
        let reinforcement = apply_touch(&mut record, now, boost, &self.config);
        let new_score = self.scorer.score(&record, now);
        self.store.put_memory(record.clone())?;

        Ok(TouchOutcome {
            old_score,
            new_score,
            reinforcement,
            record,
        })
    }

    /// Record a usage observation, applying the cross-domain boost when the
    /// context barely overlaps the record's tags.
    pub fn observe_memory_usage(
        &self,
        event: &ObservationEvent,
        cancel: &CancelToken,
    ) -> Result<TouchOutcome> {
        cancel.check()?;
        let _gate = self.gate()?;
        let mut record = self
            .store
            .get_memory(&event.memory_id)
            .ok_or_else(|| EngineError::NotFound(event.memory_id.clone()))?;

        let old_score = self.scorer.score(&record, event.observed_at);
        let reinforcement = apply_observation(&mut record, event, &self.config);
        let new_score = self.scorer.score(&record, event.observed_at);
        self.store.put_memory(record.clone())?;

        Ok(TouchOutcome {
            old_score,
            new_score,
            reinforcement,
            record,
        })
    }

    /// Open records by id, counting each successful open as a recall unless
    /// the request opts out.
    pub fn open_memories(&self, request: &OpenRequest, cancel: &CancelToken) -> Result<OpenOutcome> {
        let mut records = Vec::new();
        let mut missing = Vec::new();
        for id in &request.ids {
            cancel.check()?;
            if request.touch {
                match self.touch_memory(id, false, cancel) {
                    Ok(outcome) => records.push(outcome.record),
                    Err(EngineError::NotFound(id)) => missing.push(id),
                    Err(e) => return Err(e),
                }
            } else {
                match self.store.get_memory(id) {
                    Some(record) => records.push(record),
                    None => missing.push(id.clone()),
                }
            }
        }
        Ok(OpenOutcome { records, missing })
    }

    // ========================================================================
    // RELATIONS & GRAPH
    // ========================================================================

    /// Create a directed relation between two existing records.
    pub fn create_relation(
        &self,
        from_id: &str,
        to_id: &str,
        relation_type: RelationKind,
        strength: f64,
        cancel: &CancelToken,
    ) -> Result<Relation> {
        cancel.check()?;
        let _gate = self.gate()?;
        let snapshot = self.store.snapshot();
        for endpoint in [from_id, to_id] {
            if snapshot.get_memory(endpoint).is_none() {
                return Err(EngineError::NotFound(endpoint.to_string()));
            }
        }
        let relation = Relation::new(from_id, to_id, relation_type, strength, self.now())?;
        self.store.put_relation(relation.clone())?;
        Ok(relation)
    }

    /// List relations touching `memory_id` in the requested direction.
    pub fn list_relations(
        &self,
        memory_id: &str,
        direction: RelationDirection,
    ) -> Result<Vec<Relation>> {
        let snapshot = self.store.snapshot();
        if snapshot.get_memory(memory_id).is_none() {
            return Err(EngineError::NotFound(memory_id.to_string()));
        }
        let mut relations: Vec<Relation> = snapshot
            .iter_relations()
            .filter(|r| match direction {
                RelationDirection::From => r.from_id == memory_id,
                RelationDirection::To => r.to_id == memory_id,
                RelationDirection::Either => r.references(memory_id),
            })
            .cloned()
            .collect();
        relations.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(relations)
    }

    /// A bounded subgraph around the seeds (or the top-scored records).
    pub fn read_graph(&self, request: &GraphRequest, cancel: &CancelToken) -> Result<GraphView> {
        let snapshot = self.store.snapshot();
        let now = self.now();
        let limit = request.limit.max(1);

        let seed_ids: Vec<String> = if request.seed_ids.is_empty() {
            let mut scored: Vec<(f64, String)> = Vec::new();
            for record in snapshot.iter_memories() {
                cancel.check()?;
                if record.is_active() {
                    scored.push((self.scorer.score(record, now), record.id.clone()));
                }
            }
            scored.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.1.cmp(&b.1))
            });
            scored.into_iter().take(limit).map(|(_, id)| id).collect()
        } else {
            for id in &request.seed_ids {
                if snapshot.get_memory(id).is_none() {
                    return Err(EngineError::NotFound(id.clone()));
                }
            }
            request.seed_ids.clone()
        };

        let mut included: HashSet<String> = seed_ids.iter().cloned().collect();
        let mut relations: Vec<Relation> = Vec::new();
        for id in &seed_ids {
            cancel.check()?;
            for relation in snapshot.relations_of(id) {
                relations.push(relation.clone());
                included.insert(relation.from_id.clone());
                included.insert(relation.to_id.clone());
            }
        }
        relations.sort_by(|a, b| a.id.cmp(&b.id));
        relations.dedup_by(|a, b| a.id == b.id);

        let mut memories: Vec<MemoryRecord> = included
            .iter()
            .filter_map(|id| snapshot.get_memory(id).cloned())
            .collect();
        memories.sort_by(|a, b| a.id.cmp(&b.id));

        Ok(GraphView {
            memories,
            relations,
        })
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Search the short-term store only.
    pub fn search_memory(
        &self,
        request: &SearchRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchHit>> {
        let request = SearchRequest {
            sources: SearchSources::Stm,
            ..request.clone()
        };
        self.search_unified(&request, cancel)
    }

    /// Search both stores with review blending and redirect dedup.
    pub fn search_unified(
        &self,
        request: &SearchRequest,
        cancel: &CancelToken,
    ) -> Result<Vec<SearchHit>> {
        let ctx = SearchContext {
            store: self.store.snapshot(),
            notes: self.note_snapshot(),
            scorer: &self.scorer,
            review: &self.review,
            embedder: self.embedder.as_deref(),
            embedding_cache: &self.embedding_cache,
            ltm_weight: self.config.ltm_source_weight,
            now: self.now(),
        };
        crate::search::search(&ctx, request, cancel)
    }

    // ========================================================================
    // CLUSTERING & CONSOLIDATION
    // ========================================================================

    /// Cluster the active records for consolidation review. The returned
    /// cluster ids stay resolvable until the next clustering run.
    pub fn cluster_memories(
        &self,
        strategy: SimilarityStrategy,
        cancel: &CancelToken,
    ) -> Result<Vec<Cluster>> {
        let records = self.store.list_memories(&MemoryFilter::active()).to_vec();
        let options = ClusterOptions::from_config(&self.config, strategy);
        let clusters = cluster_records(&records, &options, cancel)?;

        let mut cache = self
            .clusters
            .lock()
            .map_err(|_| EngineError::Io(std::io::Error::other("cluster cache poisoned")))?;
        cache.clear();
        for cluster in &clusters {
            cache.insert(cluster.id.clone(), cluster.clone());
        }
        Ok(clusters)
    }

    /// Preview or apply the consolidation of a cluster into one record.
    ///
    /// Apply commits the merged record, its `consolidated_from` provenance
    /// relations, the sources' tombstones, and the cascade of the sources'
    /// other relations as a single batch.
    pub fn consolidate_memories(
        &self,
        request: &ConsolidateRequest,
        cancel: &CancelToken,
    ) -> Result<ConsolidateOutcome> {
        cancel.check()?;
        let (member_ids, cohesion) = self.resolve_cluster(request)?;

        let snapshot = self.store.snapshot();
        let mut sources = Vec::with_capacity(member_ids.len());
        for id in &member_ids {
            let record = snapshot
                .get_memory(id)
                .ok_or_else(|| EngineError::NotFound(id.clone()))?;
            if !record.is_active() {
                return Err(EngineError::Invalid(format!(
                    "source {id} is {} and cannot be consolidated",
                    record.status
                )));
            }
            sources.push(record.clone());
        }

        let proposal = propose(
            &sources,
            cohesion,
            request.strategy,
            request.merged_content.clone(),
        )?;

        if request.mode == ConsolidateMode::Preview {
            return Ok(ConsolidateOutcome {
                proposal,
                merged: None,
            });
        }

        cancel.check()?;
        let now = self.now();
        let merged = proposal.build_record()?;

        let mut relation_puts = Vec::with_capacity(sources.len());
        for source in &sources {
            relation_puts.push(Relation::new(
                &merged.id,
                &source.id,
                RelationKind::ConsolidatedFrom,
                1.0,
                now,
            )?);
        }
        // Pre-existing edges of the sources cascade with them; the new
        // provenance edges are exempt because they record history.
        let mut relation_tombstones: Vec<String> = Vec::new();
        for source in &sources {
            for relation in snapshot.relations_of(&source.id) {
                relation_tombstones.push(relation.id.clone());
            }
        }
        relation_tombstones.sort();
        relation_tombstones.dedup();

        let _gate = self.gate()?;
        self.store.apply_batch(
            WriteBatch {
                memory_puts: vec![merged.clone()],
                memory_tombstones: member_ids,
                relation_puts,
                relation_tombstones,
            },
            now,
        )?;

        if let Some(cluster_id) = &request.cluster_id {
            if let Ok(mut cache) = self.clusters.lock() {
                cache.remove(cluster_id);
            }
        }

        Ok(ConsolidateOutcome {
            proposal,
            merged: Some(merged),
        })
    }

    fn resolve_cluster(&self, request: &ConsolidateRequest) -> Result<(Vec<String>, f64)> {
        if let Some(cluster_id) = &request.cluster_id {
            let cache = self
                .clusters
                .lock()
                .map_err(|_| EngineError::Io(std::io::Error::other("cluster cache poisoned")))?;
            let cluster = cache
                .get(cluster_id)
                .ok_or_else(|| EngineError::NotFound(format!("cluster {cluster_id}")))?;
            return Ok((
                cluster.member_ids.clone(),
                request.cohesion.unwrap_or(cluster.cohesion),
            ));
        }
        if request.member_ids.len() < 2 {
            return Err(EngineError::Invalid(
                "consolidation needs a cluster id or at least two member ids".into(),
            ));
        }
        Ok((request.member_ids.clone(), request.cohesion.unwrap_or(0.75)))
    }

    // ========================================================================
    // PROMOTION
    // ========================================================================

    /// Promote one record (or every auto-detected candidate) into the vault.
    pub fn promote_memory(
        &self,
        request: &PromoteRequest,
        cancel: &CancelToken,
    ) -> Result<PromotionReport> {
        let now = self.now();
        let candidates: Vec<MemoryRecord> = match &request.id {
            Some(id) => {
                let record = self.get_memory(id)?;
                if record.status != MemoryStatus::Active {
                    return Err(EngineError::Invalid(format!(
                        "record {id} is {} and cannot be promoted",
                        record.status
                    )));
                }
                vec![record]
            }
            None => {
                let mut found = Vec::new();
                for record in self.store.list_memories(&MemoryFilter::active()).iter() {
                    cancel.check()?;
                    if self.scorer.should_promote(record, now) {
                        found.push(record.clone());
                    }
                }
                found
            }
        };

        let mut report = PromotionReport::default();
        if candidates.is_empty() {
            return Ok(report);
        }

        let ltm = self
            .ltm
            .as_ref()
            .ok_or_else(|| EngineError::Invalid("no vault configured for promotion".into()))?;
        let promotion_dir = ltm.vault_root().join(&self.config.promotion_subdir);
        let snapshot = self.store.snapshot();

        for mut record in candidates {
            cancel.check()?;
            let outgoing: Vec<Relation> = snapshot
                .relations_from(&record.id)
                .into_iter()
                .cloned()
                .collect();
            let body = build_note_body(&record, &outgoing)?;

            if request.dry_run {
                report.previews.push(PromotionPreview {
                    proposed_path: format!(
                        "{}/{}",
                        self.config.promotion_subdir,
                        proposed_filename(&record)
                    ),
                    body,
                    stm_id: record.id.clone(),
                });
                continue;
            }

            let filename = reserve_filename(&promotion_dir, &record)?;
            let written_path = format!("{}/{}", self.config.promotion_subdir, filename);
            write_note_atomic(&promotion_dir.join(&filename), &body)?;

            // The note is durable; only now is the STM side mutated.
            let _gate = self.gate()?;
            mark_promoted(&mut record, &written_path, now);
            self.store.put_memory(record.clone())?;

            report.promoted.push(PromotionOutcome {
                written_path,
                stm_id: record.id,
            });
        }
        Ok(report)
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Sweep active records below the forget threshold.
    pub fn gc(&self, options: GcOptions, cancel: &CancelToken) -> Result<GcReport> {
        let started = std::time::Instant::now();
        let now = self.now();
        let snapshot = self.store.snapshot();

        let mut report = GcReport {
            dry_run: options.dry_run,
            ..Default::default()
        };

        let mut doomed: Vec<MemoryRecord> = Vec::new();
        for record in snapshot.iter_memories() {
            cancel.check()?;
            if !record.is_active() {
                continue;
            }
            report.scanned += 1;
            if self.scorer.should_forget(record, now) {
                doomed.push(record.clone());
            } else if record.strength >= self.config.pinned_strength_floor
                && self.scorer.score(record, now) < self.config.forget_threshold
            {
                report.pinned_spared += 1;
            }
        }

        doomed.sort_by(|a, b| a.id.cmp(&b.id));
        report.affected_ids = doomed.iter().map(|r| r.id.clone()).collect();
        if options.archive_instead {
            report.archived = doomed.len();
        } else {
            report.forgotten = doomed.len();
        }

        if !options.dry_run && !doomed.is_empty() {
            let _gate = self.gate()?;
            if options.archive_instead {
                let puts = doomed
                    .into_iter()
                    .map(|mut record| {
                        record.status = MemoryStatus::Archived;
                        record
                    })
                    .collect();
                self.store.apply_batch(
                    WriteBatch {
                        memory_puts: puts,
                        ..Default::default()
                    },
                    now,
                )?;
            } else {
                let mut relation_tombstones: Vec<String> = Vec::new();
                for record in &doomed {
                    for relation in snapshot.relations_of(&record.id) {
                        relation_tombstones.push(relation.id.clone());
                    }
                }
                relation_tombstones.sort();
                relation_tombstones.dedup();
                self.store.apply_batch(
                    WriteBatch {
                        memory_tombstones: report.affected_ids.clone(),
                        relation_tombstones,
                        ..Default::default()
                    },
                    now,
                )?;
            }
            if let Ok(mut times) = self.times.lock() {
                times.last_gc = Some(now);
            }
        }

        report.duration_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(
            scanned = report.scanned,
            removed = report.forgotten + report.archived,
            spared = report.pinned_spared,
            dry_run = report.dry_run,
            "gc sweep finished"
        );
        Ok(report)
    }

    /// Rewrite the line files, dropping superseded and tombstoned lines.
    pub fn compact(&self) -> Result<CompactionReport> {
        let _gate = self.gate()?;
        let report = self.store.compact()?;
        if let Ok(mut times) = self.times.lock() {
            times.last_compaction = Some(self.now());
        }
        Ok(report)
    }

    /// Re-scan the vault into the projection.
    pub fn refresh_ltm(&self, cancel: &CancelToken) -> Result<RefreshReport> {
        let ltm = self
            .ltm
            .as_ref()
            .ok_or_else(|| EngineError::Invalid("no vault configured".into()))?;
        // Scan and parse run lock-free; only the projection append inside
        // refresh takes the index's writer lock.
        let report = ltm.refresh(cancel)?;
        if let Ok(mut times) = self.times.lock() {
            times.last_refresh = Some(self.now());
        }
        Ok(report)
    }

    /// One full maintenance pass: GC, compaction when recommended, vault
    /// refresh.
    pub fn run_maintenance(&self, cancel: &CancelToken) -> Result<MaintenanceReport> {
        let gc = self.gc(GcOptions::default(), cancel)?;
        let compaction = if self.store.stats().compaction_recommended {
            Some(self.compact()?)
        } else {
            None
        };
        let ltm_refresh = match &self.ltm {
            Some(_) => Some(self.refresh_ltm(cancel)?),
            None => None,
        };
        Ok(MaintenanceReport {
            gc,
            compaction,
            ltm_refresh,
        })
    }

    /// Start the background maintenance thread on the configured cadence.
    pub fn start_maintenance(engine: Arc<Self>) -> MaintenanceHandle {
        let interval = Duration::from_secs(engine.config.maintenance_interval_secs.max(1));
        spawn_scheduler(interval, move || {
            if let Err(e) = engine.run_maintenance(&CancelToken::new()) {
                tracing::warn!(error = %e, "scheduled maintenance failed");
            }
        })
    }

    /// Engine-wide stats snapshot.
    pub fn stats(&self) -> EngineStats {
        let times = self
            .times
            .lock()
            .map(|t| (t.last_gc, t.last_compaction, t.last_refresh))
            .unwrap_or((None, None, None));
        EngineStats {
            store: self.store.stats(),
            ltm_note_count: self.ltm.as_ref().map_or(0, LtmIndex::len),
            decay_model: self.config.decay_model.to_string(),
            score_clamp_count: self.scorer.clamp_count(),
            last_gc_epoch: times.0,
            last_compaction_epoch: times.1,
            last_ltm_refresh_epoch: times.2,
        }
    }
}

fn default_storage_root() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("dev", "ember", "ember")
        .ok_or_else(|| EngineError::Invalid("could not determine a data directory".into()))?;
    Ok(dirs.data_dir().to_path_buf())
}
