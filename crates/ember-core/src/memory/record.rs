//! Memory record - the fundamental unit of short-term memory
//!
//! Each record carries:
//! - Content, tags, and entities
//! - Access history driving the decay score
//! - Lifecycle status (active / promoted / archived / deleted)
//! - An untyped `extra` map so unknown fields survive read/write cycles

use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{EngineError, Result};

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Mint a memory id: `m-` followed by a hyphen-free UUID v4.
pub fn new_memory_id() -> String {
    format!("m-{}", Uuid::new_v4().simple())
}

/// Mint a relation id: `r-` followed by a hyphen-free UUID v4.
pub fn new_relation_id() -> String {
    format!("r-{}", Uuid::new_v4().simple())
}

// ============================================================================
// STATUS
// ============================================================================

/// Lifecycle status of a memory record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    /// Live record, scored and eligible for GC/promotion
    #[default]
    Active,
    /// Copied into the long-term vault; kept as a redirect pointer
    Promoted,
    /// Parked by GC instead of deletion; excluded from search and sweeps
    Archived,
    /// Soft-deleted (the on-disk line is a tombstone)
    Deleted,
}

impl MemoryStatus {
    /// String name as stored on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryStatus::Active => "active",
            MemoryStatus::Promoted => "promoted",
            MemoryStatus::Archived => "archived",
            MemoryStatus::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for MemoryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MemoryStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(MemoryStatus::Active),
            "promoted" => Ok(MemoryStatus::Promoted),
            "archived" => Ok(MemoryStatus::Archived),
            "deleted" => Ok(MemoryStatus::Deleted),
            _ => Err(format!("Unknown status: {s}")),
        }
    }
}

// ============================================================================
// MEMORY RECORD
// ============================================================================

/// A short-term memory record.
///
/// Serialized as one JSON object per line in `memories.jsonl`. Field order is
/// irrelevant; unknown fields land in `extra` and are written back verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Stable, URL-safe identifier assigned at creation
    pub id: String,
    /// User-visible body
    pub content: String,
    /// Short categorization tags; slashes enable hierarchy
    #[serde(default)]
    pub tags: Vec<String>,
    /// Named things referenced by the content
    #[serde(default)]
    pub entities: Vec<String>,
    /// Free-form provenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form provenance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Creation time, epoch seconds; immutable
    pub created_at: i64,
    /// Last touch/observe time, epoch seconds
    pub last_used: i64,
    /// Number of touches/observations
    pub use_count: u32,
    /// Importance multiplier in [0, 2]
    pub strength: f64,
    /// Lifecycle status
    #[serde(default)]
    pub status: MemoryStatus,
    /// Set when the record was promoted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_at: Option<i64>,
    /// Vault-relative path of the promoted note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promoted_to: Option<String>,
    /// Opaque embedding vector produced by the host's embedder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Vec<f32>>,
    /// Unknown fields carried through for forward compatibility
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl MemoryRecord {
    /// Build a fresh active record from validated input.
    pub fn new(input: SaveInput, now: i64) -> Result<Self> {
        let record = Self {
            id: new_memory_id(),
            content: input.content,
            tags: input.tags,
            entities: input.entities,
            source: input.source,
            context: input.context,
            created_at: now,
            last_used: now,
            use_count: 1,
            strength: input.strength.unwrap_or(1.0),
            status: MemoryStatus::Active,
            promoted_at: None,
            promoted_to: None,
            embed: input.embed,
            extra: BTreeMap::new(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Enforce the record invariants. Called before every write.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(EngineError::Invalid("empty id".into()));
        }
        if self.content.trim().is_empty() {
            return Err(EngineError::Invalid("empty content".into()));
        }
        if !(0.0..=2.0).contains(&self.strength) {
            return Err(EngineError::Invalid(format!(
                "strength {} out of [0, 2]",
                self.strength
            )));
        }
        if self.last_used < self.created_at {
            return Err(EngineError::Invalid(format!(
                "last_used {} precedes created_at {}",
                self.last_used, self.created_at
            )));
        }
        for tag in &self.tags {
            validate_tag(tag)?;
        }
        if self.status == MemoryStatus::Promoted
            && (self.promoted_at.is_none() || self.promoted_to.is_none())
        {
            return Err(EngineError::Invalid(
                "promoted record missing promoted_at/promoted_to".into(),
            ));
        }
        Ok(())
    }

    /// Whether the record participates in scoring and lifecycle sweeps.
    pub fn is_active(&self) -> bool {
        self.status == MemoryStatus::Active
    }

    /// Content normalized for hashing and duplicate detection.
    pub fn normalized_content(&self) -> String {
        normalize_content(&self.content)
    }

    /// Stable in-process hash of the normalized content.
    pub fn content_hash(&self) -> u64 {
        content_hash(&self.content)
    }
}

// ============================================================================
// SAVE INPUT
// ============================================================================

/// Input for creating a new memory.
///
/// Uses `deny_unknown_fields`: unknown keys on *input* are rejected, while
/// unknown keys on *stored* records are preserved.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveInput {
    /// The content to remember
    pub content: String,
    /// Categorization tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Named entities referenced by the content
    #[serde(default)]
    pub entities: Vec<String>,
    /// Provenance
    #[serde(default)]
    pub source: Option<String>,
    /// Provenance
    #[serde(default)]
    pub context: Option<String>,
    /// Initial strength; defaults to 1.0
    #[serde(default)]
    pub strength: Option<f64>,
    /// Pre-computed embedding vector
    #[serde(default)]
    pub embed: Option<Vec<f32>>,
}

// ============================================================================
// RELATIONS
// ============================================================================

/// Kind of directed edge between two memory records.
///
/// Unrecognized kinds round-trip through [`RelationKind::Other`] so foreign
/// writers can extend the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationKind {
    Related,
    Causes,
    Supports,
    Contradicts,
    HasDecision,
    ConsolidatedFrom,
    References,
    Other(String),
}

impl RelationKind {
    /// Wire name of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            RelationKind::Related => "related",
            RelationKind::Causes => "causes",
            RelationKind::Supports => "supports",
            RelationKind::Contradicts => "contradicts",
            RelationKind::HasDecision => "has_decision",
            RelationKind::ConsolidatedFrom => "consolidated_from",
            RelationKind::References => "references",
            RelationKind::Other(s) => s,
        }
    }
}

impl From<String> for RelationKind {
    fn from(s: String) -> Self {
        match s.as_str() {
            "related" => RelationKind::Related,
            "causes" => RelationKind::Causes,
            "supports" => RelationKind::Supports,
            "contradicts" => RelationKind::Contradicts,
            "has_decision" => RelationKind::HasDecision,
            "consolidated_from" => RelationKind::ConsolidatedFrom,
            "references" => RelationKind::References,
            _ => RelationKind::Other(s),
        }
    }
}

impl From<RelationKind> for String {
    fn from(kind: RelationKind) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A directed edge between two memory records.
///
/// Lifetime is bounded by its endpoints: deleting either record cascades a
/// tombstone onto the relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    /// Stable identifier
    pub id: String,
    /// Source memory id
    pub from_id: String,
    /// Target memory id
    pub to_id: String,
    /// Edge kind
    pub relation_type: RelationKind,
    /// Edge weight in [0, 1]
    pub strength: f64,
    /// Creation time, epoch seconds
    pub created_at: i64,
    /// Optional free-form payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Unknown fields carried through for forward compatibility
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Relation {
    /// Build a validated relation between two ids.
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relation_type: RelationKind,
        strength: f64,
        now: i64,
    ) -> Result<Self> {
        let relation = Self {
            id: new_relation_id(),
            from_id: from_id.into(),
            to_id: to_id.into(),
            relation_type,
            strength,
            created_at: now,
            metadata: None,
            extra: BTreeMap::new(),
        };
        relation.validate()?;
        Ok(relation)
    }

    /// Enforce relation invariants.
    pub fn validate(&self) -> Result<()> {
        if self.from_id.is_empty() || self.to_id.is_empty() {
            return Err(EngineError::Invalid("relation endpoint missing".into()));
        }
        if self.from_id == self.to_id {
            return Err(EngineError::Invalid("relation endpoints identical".into()));
        }
        if !(0.0..=1.0).contains(&self.strength) {
            return Err(EngineError::Invalid(format!(
                "relation strength {} out of [0, 1]",
                self.strength
            )));
        }
        Ok(())
    }

    /// Whether the relation touches `memory_id` on either end.
    pub fn references(&self, memory_id: &str) -> bool {
        self.from_id == memory_id || self.to_id == memory_id
    }
}

// ============================================================================
// OBSERVATION EVENTS
// ============================================================================

/// Ephemeral record of a memory being used in some context.
///
/// Owned by the caller until applied; never persisted itself, but applying it
/// mutates the referenced record (touch + possible cross-domain boost).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationEvent {
    /// The memory that was used
    pub memory_id: String,
    /// When it was used, epoch seconds
    pub observed_at: i64,
    /// Tags describing the context of use
    #[serde(default)]
    pub context_tags: Vec<String>,
}

// ============================================================================
// NORMALIZATION & VALIDATION HELPERS
// ============================================================================

/// Lowercase and collapse all whitespace runs to single spaces.
pub fn normalize_content(content: &str) -> String {
    content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable in-process hash of normalized content.
///
/// Not persisted; used only for exact-duplicate grouping within one process.
pub fn content_hash(content: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    normalize_content(content).hash(&mut hasher);
    hasher.finish()
}

/// Tags are restricted to `[a-zA-Z0-9_\-/]+`.
pub fn validate_tag(tag: &str) -> Result<()> {
    if tag.is_empty() {
        return Err(EngineError::Invalid("empty tag".into()));
    }
    if let Some(bad) = tag
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/')))
    {
        return Err(EngineError::Invalid(format!(
            "tag {tag:?} contains disallowed character {bad:?}"
        )));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_input() -> SaveInput {
        SaveInput {
            content: "I prefer TypeScript".to_string(),
            tags: vec!["preferences".into(), "typescript".into()],
            ..Default::default()
        }
    }

    #[test]
    fn test_new_record_defaults() {
        let record = MemoryRecord::new(sample_input(), 1_736_275_200).unwrap();
        assert!(record.id.starts_with("m-"));
        assert_eq!(record.use_count, 1);
        assert_eq!(record.strength, 1.0);
        assert_eq!(record.status, MemoryStatus::Active);
        assert_eq!(record.created_at, record.last_used);
    }

    #[test]
    fn test_strength_range_enforced() {
        let input = SaveInput {
            strength: Some(2.5),
            ..sample_input()
        };
        assert!(MemoryRecord::new(input, 0).is_err());
    }

    #[test]
    fn test_tag_charset() {
        validate_tag("project/ember-core_v2").unwrap();
        assert!(validate_tag("no spaces").is_err());
        assert!(validate_tag("émoji").is_err());
        assert!(validate_tag("").is_err());
    }

    #[test]
    fn test_promoted_requires_pointer_fields() {
        let mut record = MemoryRecord::new(sample_input(), 0).unwrap();
        record.status = MemoryStatus::Promoted;
        assert!(record.validate().is_err());

        record.promoted_at = Some(10);
        record.promoted_to = Some("memories/i-prefer-typescript-5f3a.md".into());
        record.validate().unwrap();
    }

    #[test]
    fn test_unknown_fields_roundtrip() {
        let line = r#"{"id":"m-1","content":"x","created_at":1,"last_used":1,"use_count":1,"strength":1.0,"status":"active","shard":"legacy-7"}"#;
        let record: MemoryRecord = serde_json::from_str(line).unwrap();
        assert_eq!(record.extra["shard"], "legacy-7");

        let out = serde_json::to_string(&record).unwrap();
        assert!(out.contains("\"shard\":\"legacy-7\""));
    }

    #[test]
    fn test_normalize_content() {
        assert_eq!(
            normalize_content("  I  Prefer\n\tTypeScript "),
            "i prefer typescript"
        );
        assert_eq!(
            content_hash("I PREFER typescript"),
            content_hash("i prefer\ttypescript")
        );
    }

    #[test]
    fn test_relation_kind_roundtrip() {
        let kind: RelationKind = serde_json::from_str("\"consolidated_from\"").unwrap();
        assert_eq!(kind, RelationKind::ConsolidatedFrom);

        let foreign: RelationKind = serde_json::from_str("\"blamed_on\"").unwrap();
        assert_eq!(foreign, RelationKind::Other("blamed_on".into()));
        assert_eq!(serde_json::to_string(&foreign).unwrap(), "\"blamed_on\"");
    }

    #[test]
    fn test_relation_validation() {
        assert!(Relation::new("m-1", "m-1", RelationKind::Related, 0.5, 0).is_err());
        assert!(Relation::new("m-1", "m-2", RelationKind::Related, 1.5, 0).is_err());
        let rel = Relation::new("m-1", "m-2", RelationKind::Causes, 1.0, 7).unwrap();
        assert!(rel.references("m-1"));
        assert!(rel.references("m-2"));
        assert!(!rel.references("m-3"));
    }
}
