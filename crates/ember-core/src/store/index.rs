//! In-memory index over the JSONL store
//!
//! A [`StoreIndex`] is an immutable snapshot: the writer clones the current
//! snapshot, mutates the clone, and swaps it in behind an `Arc`. Readers keep
//! iterating their own snapshot untouched, which is what makes listings
//! restartable.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::memory::{MemoryRecord, MemoryStatus, Relation};

// ============================================================================
// FILTERS
// ============================================================================

/// How a multi-tag filter combines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMatch {
    /// At least one filter tag must match
    #[default]
    Any,
    /// Every filter tag must match
    All,
}

/// Index-level filter for memory listings.
///
/// Tag filters match hierarchically: filter tag `project` matches record tags
/// `project` and `project/ember`.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct MemoryFilter {
    /// Restrict to one lifecycle status
    pub status: Option<MemoryStatus>,
    /// Tag filter; empty means no tag restriction
    #[serde(default)]
    pub tags: Vec<String>,
    /// ANY/ALL combination of the tag filter
    #[serde(default)]
    pub tag_match: TagMatch,
    /// Inclusive lower bound on `created_at`
    pub created_after: Option<i64>,
    /// Inclusive upper bound on `created_at`
    pub created_before: Option<i64>,
}

impl MemoryFilter {
    /// Filter on active records only.
    pub fn active() -> Self {
        Self {
            status: Some(MemoryStatus::Active),
            ..Default::default()
        }
    }

    fn window_contains(&self, created_at: i64) -> bool {
        self.created_after.is_none_or(|t| created_at >= t)
            && self.created_before.is_none_or(|t| created_at <= t)
    }
}

/// True when record tag `tag` matches filter tag `filter` (exact or child).
fn tag_matches(tag: &str, filter: &str) -> bool {
    tag == filter || (tag.len() > filter.len() && tag.starts_with(filter) && tag.as_bytes()[filter.len()] == b'/')
}

// ============================================================================
// STORE INDEX
// ============================================================================

/// Immutable index snapshot: id lookup, inverted tag index, status sets, and
/// time-ordered views.
#[derive(Debug, Clone, Default)]
pub struct StoreIndex {
    memories: HashMap<String, MemoryRecord>,
    mem_line_bytes: HashMap<String, u64>,
    relations: HashMap<String, Relation>,
    tag_index: BTreeMap<String, BTreeSet<String>>,
    status_index: HashMap<MemoryStatus, BTreeSet<String>>,
    by_created: BTreeSet<(i64, String)>,
    by_last_used: BTreeSet<(i64, String)>,
}

impl StoreIndex {
    /// Latest non-tombstoned record for `id`.
    pub fn get_memory(&self, id: &str) -> Option<&MemoryRecord> {
        self.memories.get(id)
    }

    /// Latest non-tombstoned relation for `id`.
    pub fn get_relation(&self, id: &str) -> Option<&Relation> {
        self.relations.get(id)
    }

    /// Number of indexed (live) memory records.
    pub fn memory_count(&self) -> usize {
        self.memories.len()
    }

    /// Number of indexed (live) relations.
    pub fn relation_count(&self) -> usize {
        self.relations.len()
    }

    /// Per-status record count.
    pub fn count_by_status(&self, status: MemoryStatus) -> usize {
        self.status_index.get(&status).map_or(0, BTreeSet::len)
    }

    /// Total serialized bytes of all live memory lines.
    pub fn live_memory_bytes(&self) -> u64 {
        self.mem_line_bytes.values().sum()
    }

    /// Iterate every live record, unordered.
    pub fn iter_memories(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.memories.values()
    }

    /// Iterate every live relation, unordered.
    pub fn iter_relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// All relations touching `memory_id` on either end.
    pub fn relations_of(&self, memory_id: &str) -> Vec<&Relation> {
        self.relations
            .values()
            .filter(|r| r.references(memory_id))
            .collect()
    }

    /// Relations whose source is `memory_id`.
    pub fn relations_from(&self, memory_id: &str) -> Vec<&Relation> {
        self.relations
            .values()
            .filter(|r| r.from_id == memory_id)
            .collect()
    }

    // ========== mutation (writer-side only) ==========

    /// Insert or supersede a record. Earlier index entries for the same id
    /// are replaced wholesale.
    pub(crate) fn insert_memory(&mut self, record: MemoryRecord, line_bytes: u64) {
        self.remove_memory(&record.id);
        let id = record.id.clone();
        for tag in &record.tags {
            self.tag_index.entry(tag.clone()).or_default().insert(id.clone());
        }
        self.status_index.entry(record.status).or_default().insert(id.clone());
        self.by_created.insert((record.created_at, id.clone()));
        self.by_last_used.insert((record.last_used, id.clone()));
        self.mem_line_bytes.insert(id.clone(), line_bytes);
        self.memories.insert(id, record);
    }

    /// Drop a record and all of its secondary-index entries.
    pub(crate) fn remove_memory(&mut self, id: &str) -> Option<MemoryRecord> {
        let record = self.memories.remove(id)?;
        self.mem_line_bytes.remove(id);
        for tag in &record.tags {
            if let Some(ids) = self.tag_index.get_mut(tag) {
                ids.remove(id);
                if ids.is_empty() {
                    self.tag_index.remove(tag);
                }
            }
        }
        if let Some(ids) = self.status_index.get_mut(&record.status) {
            ids.remove(id);
        }
        self.by_created.remove(&(record.created_at, id.to_string()));
        self.by_last_used.remove(&(record.last_used, id.to_string()));
        Some(record)
    }

    pub(crate) fn insert_relation(&mut self, relation: Relation) {
        self.relations.insert(relation.id.clone(), relation);
    }

    pub(crate) fn remove_relation(&mut self, id: &str) -> Option<Relation> {
        self.relations.remove(id)
    }

    // ========== queries ==========

    /// Ids matching `filter`, cheapest candidate set first, then narrowed.
    /// Results are ordered by `created_at` ascending, id as tie-break.
    pub fn filter_ids(&self, filter: &MemoryFilter) -> Vec<String> {
        // Start from the narrowest available candidate set.
        let candidates: Vec<&String> = if !filter.tags.is_empty() {
            let mut sets: Vec<BTreeSet<&String>> = Vec::with_capacity(filter.tags.len());
            for tag in &filter.tags {
                sets.push(self.ids_with_tag(tag));
            }
            match filter.tag_match {
                TagMatch::Any => {
                    let mut union: BTreeSet<&String> = BTreeSet::new();
                    for set in sets {
                        union.extend(set);
                    }
                    union.into_iter().collect()
                }
                TagMatch::All => {
                    let mut iter = sets.into_iter();
                    let mut acc = iter.next().unwrap_or_default();
                    for set in iter {
                        acc = acc.intersection(&set).copied().collect();
                    }
                    acc.into_iter().collect()
                }
            }
        } else if let Some(status) = filter.status {
            self.status_index
                .get(&status)
                .map(|ids| ids.iter().collect())
                .unwrap_or_default()
        } else {
            self.memories.keys().collect()
        };

        let mut matched: Vec<(i64, String)> = candidates
            .into_iter()
            .filter_map(|id| self.memories.get(id))
            .filter(|m| filter.status.is_none_or(|s| m.status == s))
            .filter(|m| filter.window_contains(m.created_at))
            .map(|m| (m.created_at, m.id.clone()))
            .collect();
        matched.sort();
        matched.into_iter().map(|(_, id)| id).collect()
    }

    /// Ids carrying `tag` or any hierarchical child of it.
    fn ids_with_tag(&self, tag: &str) -> BTreeSet<&String> {
        let mut out: BTreeSet<&String> = BTreeSet::new();
        // Exact tag plus the `tag/...` child range of the BTreeMap.
        for (indexed, ids) in self.tag_index.range(tag.to_string()..) {
            if !tag_matches(indexed, tag) {
                if !indexed.starts_with(tag) {
                    break;
                }
                continue;
            }
            out.extend(ids);
        }
        out
    }
}

// ============================================================================
// LISTINGS
// ============================================================================

/// A finite, restartable listing over one index snapshot.
///
/// The snapshot is immutable for the listing's lifetime, so iterating twice
/// yields the same records in the same order.
#[derive(Debug, Clone)]
pub struct MemoryListing {
    snapshot: Arc<StoreIndex>,
    ids: Arc<Vec<String>>,
}

impl MemoryListing {
    pub(crate) fn new(snapshot: Arc<StoreIndex>, ids: Vec<String>) -> Self {
        Self {
            snapshot,
            ids: Arc::new(ids),
        }
    }

    /// The same snapshot narrowed to `ids`.
    pub(crate) fn with_ids(&self, ids: Vec<String>) -> Self {
        Self {
            snapshot: Arc::clone(&self.snapshot),
            ids: Arc::new(ids),
        }
    }

    /// Number of records in the listing.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the listing is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Lazily iterate the records.
    pub fn iter(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.ids
            .iter()
            .filter_map(|id| self.snapshot.get_memory(id))
    }

    /// Collect owned copies of the records.
    pub fn to_vec(&self) -> Vec<MemoryRecord> {
        self.iter().cloned().collect()
    }
}

// ============================================================================
// TESTS
// ============================================================================
