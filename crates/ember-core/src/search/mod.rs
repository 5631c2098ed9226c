//! Unified search
//!
//! One query surface over both stores:
//!
//! 1. STM candidates come from the index (status, tags, time window) and are
//!    scored with the decay model
//! 2. LTM candidates come from the vault projection (tag intersection plus
//!    lexical match over title, aliases, and snippet)
//! 3. With an embedder present, ranking is cosine similarity against the
//!    query with a per-source weight; otherwise STM ranks by score and LTM
//!    by recency
//! 4. A slice of the top-k is reserved for review candidates decaying
//!    through the danger zone
//! 5. Promoted STM records suppress their LTM counterpart

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::config::SECONDS_PER_DAY;
use crate::decay::Scorer;
use crate::embeddings::{Embedder, cosine_similarity};
use crate::error::Result;
use crate::memory::{MemoryRecord, MemoryStatus};
use crate::review::ReviewScorer;
use crate::store::{MemoryFilter, StoreIndex, TagMatch};
use crate::vault::NoteEntry;

/// Queries the host repeats are embedded once.
const QUERY_CACHE_SIZE: usize = 100;

// ============================================================================
// REQUEST & RESULT TYPES
// ============================================================================

/// Which stores a search consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchSources {
    Stm,
    Ltm,
    #[default]
    Both,
}

/// A unified search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchRequest {
    /// Free-text query; empty means "rank everything"
    pub query: Option<String>,
    /// Tag filter (hierarchical, ANY/ALL)
    pub tags: Vec<String>,
    pub tag_match: TagMatch,
    /// Inclusive `created_at` window
    pub created_after: Option<i64>,
    pub created_before: Option<i64>,
    /// Drop STM results scoring below this
    pub min_score: Option<f64>,
    /// Maximum results returned
    pub limit: usize,
    pub sources: SearchSources,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: None,
            tags: Vec::new(),
            tag_match: TagMatch::Any,
            created_after: None,
            created_before: None,
            min_score: None,
            limit: 10,
            sources: SearchSources::Both,
        }
    }
}

/// Where a hit came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultKind {
    Stm,
    Ltm,
    /// Blended in from the review queue, worth revisiting
    Review,
}

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub kind: ResultKind,
    /// Decay score for STM hits, rank value for LTM hits
    pub score: f64,
    /// Present for `stm` and `review` hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryRecord>,
    /// Present for `ltm` hits
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<NoteEntry>,
}

impl SearchHit {
    fn sort_key(&self) -> &str {
        self.memory
            .as_ref()
            .map(|m| m.id.as_str())
            .or_else(|| self.note.as_ref().map(|n| n.path.as_str()))
            .unwrap_or_default()
    }
}

// Internal carrier: hits sort on `rank` but report `score`.
struct RankedHit {
    rank: f64,
    hit: SearchHit,
}

// ============================================================================
// QUERY EMBEDDING CACHE
// ============================================================================

/// LRU of text embeddings so repeated queries and unchanged snippets skip
/// the embedder.
pub struct EmbeddingCache {
    cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }
}

impl EmbeddingCache {
    /// Embed through the cache. Failures return `None`; ranking degrades to
    /// lexical.
    fn embed(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        cancel: &CancelToken,
    ) -> Option<Vec<f32>> {
        if let Ok(mut cache) = self.cache.lock() {
            if let Some(hit) = cache.get(text) {
                return Some(hit.clone());
            }
        }
        match embedder.embed(text, cancel) {
            Ok(vector) => {
                if let Ok(mut cache) = self.cache.lock() {
                    cache.put(text.to_string(), vector.clone());
                }
                Some(vector)
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding unavailable, falling back to lexical rank");
                None
            }
        }
    }
}

// ============================================================================
// SEARCH
// ============================================================================

/// Everything a search pass needs, borrowed from the engine.
pub struct SearchContext<'a> {
    pub store: Arc<StoreIndex>,
    pub notes: Arc<HashMap<String, NoteEntry>>,
    pub scorer: &'a Scorer,
    pub review: &'a ReviewScorer,
    pub embedder: Option<&'a dyn Embedder>,
    pub embedding_cache: &'a EmbeddingCache,
    pub ltm_weight: f64,
    pub now: i64,
}

/// Run a unified search. Results reflect one consistent snapshot of both
/// indices; the cancellation token is checked once per candidate.
pub fn search(
    ctx: &SearchContext<'_>,
    request: &SearchRequest,
    cancel: &CancelToken,
) -> Result<Vec<SearchHit>> {
    let k = request.limit.max(1);
    let query = request
        .query
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty());
    let query_vec = match (query, ctx.embedder) {
        (Some(q), Some(embedder)) => ctx.embedding_cache.embed(embedder, q, cancel),
        _ => None,
    };

    let mut hits: Vec<RankedHit> = Vec::new();
    let mut suppressed_paths: Vec<String> = Vec::new();

    // ========== STM candidates ==========
    if request.sources != SearchSources::Ltm {
        for status in [MemoryStatus::Active, MemoryStatus::Promoted] {
            let filter = MemoryFilter {
                status: Some(status),
                tags: request.tags.clone(),
                tag_match: request.tag_match,
                created_after: request.created_after,
                created_before: request.created_before,
            };
            for id in ctx.store.filter_ids(&filter) {
                cancel.check()?;
                let Some(record) = ctx.store.get_memory(&id) else {
                    continue;
                };
                let score = ctx.scorer.score(record, ctx.now);
                if request.min_score.is_some_and(|min| score < min) {
                    continue;
                }
                let rank = match (&query_vec, query) {
                    (Some(qv), _) => match &record.embed {
                        Some(embed) => f64::from(cosine_similarity(qv, embed)),
                        None => score,
                    },
                    (None, Some(q)) => {
                        if !lexical_match_memory(record, q) {
                            continue;
                        }
                        score
                    }
                    (None, None) => score,
                };
                if let Some(path) = &record.promoted_to {
                    suppressed_paths.push(path.clone());
                }
                hits.push(RankedHit {
                    rank,
                    hit: SearchHit {
                        kind: ResultKind::Stm,
                        score,
                        memory: Some(record.clone()),
                        note: None,
                    },
                });
            }
        }
    }

    // ========== LTM candidates ==========
    if request.sources != SearchSources::Stm {
        for note in ctx.notes.values() {
            cancel.check()?;
            if suppressed_paths.iter().any(|p| p == &note.path) {
                continue;
            }
            if !request.tags.is_empty() && !note_tag_intersects(note, &request.tags) {
                continue;
            }
            if let Some(q) = query {
                if !lexical_match_note(note, q) {
                    continue;
                }
            }
            let rank = match &query_vec {
                Some(qv) => ctx
                    .embedder
                    .and_then(|e| ctx.embedding_cache.embed(e, &note.content_snippet, cancel))
                    .map(|nv| f64::from(cosine_similarity(qv, &nv)) * ctx.ltm_weight)
                    .unwrap_or(0.0),
                None => {
                    // No embeddings: newer notes outrank older ones, scaled
                    // under the source weight so STM stays preferred.
                    let age_days =
                        ((ctx.now as f64) - (note.mtime_ns as f64 / 1e9)) / SECONDS_PER_DAY;
                    ctx.ltm_weight / (1.0 + age_days.max(0.0))
                }
            };
            hits.push(RankedHit {
                rank,
                hit: SearchHit {
                    kind: ResultKind::Ltm,
                    score: rank,
                    memory: None,
                    note: Some(note.clone()),
                },
            });
        }
    }

    // Highest rank first; ties break on id so ordering is stable.
    hits.sort_by(|a, b| {
        b.rank
            .partial_cmp(&a.rank)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.hit.sort_key().cmp(b.hit.sort_key()))
    });

    // ========== review blending ==========
    let review_hits = review_candidates(ctx, &hits, cancel)?;
    let n_blend = review_hits.len().min(ctx.review.blend_slots(k));
    let n_base = hits.len().min(k.saturating_sub(n_blend));

    let mut out: Vec<SearchHit> = hits.into_iter().take(n_base).map(|r| r.hit).collect();
    out.extend(review_hits.into_iter().take(n_blend));
    Ok(out)
}

/// Active records in the review danger zone, best priority first, skipping
/// anything already in `hits`.
fn review_candidates(
    ctx: &SearchContext<'_>,
    hits: &[RankedHit],
    cancel: &CancelToken,
) -> Result<Vec<SearchHit>> {
    let mut candidates: Vec<(f64, SearchHit)> = Vec::new();
    for record in ctx.store.iter_memories() {
        cancel.check()?;
        if !record.is_active() {
            continue;
        }
        if hits
            .iter()
            .any(|h| h.hit.memory.as_ref().is_some_and(|m| m.id == record.id))
        {
            continue;
        }
        let score = ctx.scorer.score(record, ctx.now);
        let priority = ctx.review.priority(score, record.last_used, ctx.now);
        if priority > 0.0 {
            candidates.push((
                priority,
                SearchHit {
                    kind: ResultKind::Review,
                    score,
                    memory: Some(record.clone()),
                    note: None,
                },
            ));
        }
    }
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.sort_key().cmp(b.1.sort_key()))
    });
    Ok(candidates.into_iter().map(|(_, hit)| hit).collect())
}

// ============================================================================
// LEXICAL MATCHING
// ============================================================================

fn lexical_match_memory(record: &MemoryRecord, query: &str) -> bool {
    let q = query.to_lowercase();
    record.content.to_lowercase().contains(&q)
        || record.tags.iter().any(|t| t.to_lowercase().contains(&q))
        || record
            .entities
            .iter()
            .any(|e| e.to_lowercase().contains(&q))
}

fn lexical_match_note(note: &NoteEntry, query: &str) -> bool {
    let q = query.to_lowercase();
    note.title.to_lowercase().contains(&q)
        || note.aliases.iter().any(|a| a.to_lowercase().contains(&q))
        || note.content_snippet.to_lowercase().contains(&q)
}

fn note_tag_intersects(note: &NoteEntry, tags: &[String]) -> bool {
    tags.iter().any(|filter| {
        note.tags
            .iter()
            .any(|t| t == filter || (t.starts_with(filter) && t[filter.len()..].starts_with('/')))
    })
}
