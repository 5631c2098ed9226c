//! Consolidation
//!
//! Merges a cluster of near-duplicate records into one, preserving
//! provenance. Preview builds a proposal without side effects; apply commits
//! the merged record, its `consolidated_from` relations, and the source
//! tombstones as one write batch.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::memory::{MemoryRecord, SaveInput, normalize_content};

/// Merged strength never exceeds the record range.
const MAX_STRENGTH: f64 = 2.0;

// ============================================================================
// STRATEGY & PROPOSAL TYPES
// ============================================================================

/// How merged content is produced.
///
/// Only `deduplicate_and_merge` is computed in-engine. The LLM-backed
/// strategies are identifiers for the host: it generates the merged text and
/// passes it back through `merged_content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Sentence-split, dedupe by normalized equality, join in time order
    #[default]
    DeduplicateAndMerge,
    /// Host-side summarization; merged content must be supplied
    Summarize,
    /// Host-side question/answer extraction; merged content must be supplied
    QaExtract,
}

/// Preview of a consolidation: everything `apply` would commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsolidationProposal {
    /// Body of the merged record
    pub merged_content: String,
    /// Union of source tags, sorted
    pub merged_tags: Vec<String>,
    /// Union of source entities, sorted
    pub merged_entities: Vec<String>,
    /// Strength of the merged record
    pub new_strength: f64,
    /// `created_at` carried from the oldest source
    pub earliest_created_at: i64,
    /// `last_used` carried from the freshest source
    pub latest_last_used: i64,
    /// Summed use counts of the sources
    pub merged_use_count: u32,
    /// Source record ids in timestamp order
    pub provenance: Vec<String>,
    /// Sentences kept in the merged body
    pub retained: Vec<String>,
    /// Duplicate sentences dropped during the merge
    pub discarded: Vec<String>,
}

impl ConsolidationProposal {
    /// Materialize the merged record this proposal describes.
    pub fn build_record(&self) -> Result<MemoryRecord> {
        let mut record = MemoryRecord::new(
            SaveInput {
                content: self.merged_content.clone(),
                tags: self.merged_tags.clone(),
                entities: self.merged_entities.clone(),
                strength: Some(self.new_strength),
                ..Default::default()
            },
            self.earliest_created_at,
        )?;
        record.last_used = self.latest_last_used;
        record.use_count = self.merged_use_count;
        record.validate()?;
        Ok(record)
    }
}

// ============================================================================
// PROPOSAL CONSTRUCTION
// ============================================================================

/// Build a consolidation proposal for `sources`.
///
/// `sources` must be non-empty; order does not matter, the proposal works in
/// timestamp order. For the host-side strategies `merged_content` is
/// required and used verbatim.
pub fn propose(
    sources: &[MemoryRecord],
    cohesion: f64,
    strategy: MergeStrategy,
    merged_content: Option<String>,
) -> Result<ConsolidationProposal> {
    if sources.len() < 2 {
        return Err(EngineError::Invalid(
            "consolidation needs at least two sources".into(),
        ));
    }

    let mut ordered: Vec<&MemoryRecord> = sources.iter().collect();
    ordered.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

    let (content, retained, discarded) = match strategy {
        MergeStrategy::DeduplicateAndMerge => deduplicate_and_merge(&ordered),
        MergeStrategy::Summarize | MergeStrategy::QaExtract => {
            let content = merged_content.ok_or_else(|| {
                EngineError::Invalid(format!(
                    "strategy {strategy:?} requires host-generated merged content"
                ))
            })?;
            (content, Vec::new(), Vec::new())
        }
    };

    let max_strength = ordered
        .iter()
        .map(|r| r.strength)
        .fold(f64::NEG_INFINITY, f64::max);
    // Tighter clusters produce stronger merged records.
    let new_strength = (max_strength * (1.0 + (cohesion - 0.75) / 0.5)).clamp(0.0, MAX_STRENGTH);

    let mut merged_tags: Vec<String> = Vec::new();
    let mut merged_entities: Vec<String> = Vec::new();
    for record in &ordered {
        for tag in &record.tags {
            if !merged_tags.contains(tag) {
                merged_tags.push(tag.clone());
            }
        }
        for entity in &record.entities {
            if !merged_entities.contains(entity) {
                merged_entities.push(entity.clone());
            }
        }
    }
    merged_tags.sort();
    merged_entities.sort();

    Ok(ConsolidationProposal {
        merged_content: content,
        merged_tags,
        merged_entities,
        new_strength,
        earliest_created_at: ordered.first().map(|r| r.created_at).unwrap_or_default(),
        latest_last_used: ordered.iter().map(|r| r.last_used).max().unwrap_or_default(),
        merged_use_count: ordered
            .iter()
            .fold(0u32, |acc, r| acc.saturating_add(r.use_count)),
        provenance: ordered.iter().map(|r| r.id.clone()).collect(),
        retained,
        discarded,
    })
}

/// Sentence-split each source, drop sentences already seen (by normalized
/// equality), and join the survivors with blank lines in timestamp order.
fn deduplicate_and_merge(ordered: &[&MemoryRecord]) -> (String, Vec<String>, Vec<String>) {
    let mut seen: Vec<String> = Vec::new();
    let mut retained: Vec<String> = Vec::new();
    let mut discarded: Vec<String> = Vec::new();

    for record in ordered {
        for sentence in split_sentences(&record.content) {
            let normalized = normalize_content(&sentence);
            if normalized.is_empty() {
                continue;
            }
            if seen.contains(&normalized) {
                discarded.push(sentence);
            } else {
                seen.push(normalized);
                retained.push(sentence);
            }
        }
    }

    (retained.join("\n\n"), retained, discarded)
}

/// Split text into sentences at terminal punctuation or line breaks,
/// keeping the terminator with its sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        match c {
            '.' | '!' | '?' => {
                current.push(c);
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
            '\n' => {
                let trimmed = current.trim();
                if !trimmed.is_empty() {
                    sentences.push(trimmed.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

// ============================================================================
// TESTS
// ============================================================================
