//! # Ember Core
//!
//! Temporal memory engine for AI assistants. Short-lived memories live in an
//! append-only, human-readable JSONL store; every record carries a
//! time-decaying relevance score, is reinforced on use, and either fades out
//! of the store or proves itself and is promoted into a durable markdown
//! vault.
//!
//! - **Decay scoring**: exponential, power-law, or two-component forgetting
//!   curves over access history
//! - **Reinforcement**: touch and observe events, with a cross-domain boost
//!   when a memory is reused in an unfamiliar context
//! - **Review queue**: memories decaying through the danger zone are blended
//!   into search results before they fade
//! - **Clustering & consolidation**: near-duplicate detection (MinHash or
//!   embeddings) and atomic merge with provenance relations
//! - **Promotion**: atomic markdown notes with YAML front matter in a user
//!   vault, indexed incrementally
//! - **Maintenance**: GC sweeps, JSONL compaction, background scheduling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ember_core::{CancelToken, EngineConfig, MemoryEngine, SaveInput};
//!
//! # fn main() -> ember_core::Result<()> {
//! let engine = MemoryEngine::open(EngineConfig {
//!     storage_root: Some("/tmp/ember".into()),
//!     ..Default::default()
//! })?;
//!
//! let cancel = CancelToken::new();
//! let record = engine.save_memory(
//!     SaveInput {
//!         content: "I prefer TypeScript for new projects".to_string(),
//!         tags: vec!["preferences".into(), "typescript".into()],
//!         ..Default::default()
//!     },
//!     &cancel,
//! )?;
//!
//! // Recalling a memory reinforces it
//! let outcome = engine.touch_memory(&record.id, false, &cancel)?;
//! assert!(outcome.new_score >= outcome.old_score);
//! # Ok(())
//! # }
//! ```
//!
//! The engine consumes a clock, a filesystem, and optionally an opaque
//! embedding function. The transport exposing these operations to a host is
//! deliberately out of scope.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod cancel;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod consolidate;
pub mod decay;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod maintenance;
pub mod memory;
pub mod promote;
pub mod review;
pub mod search;
pub mod store;
pub mod vault;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Engine & context
pub use cancel::CancelToken;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{DecayModelKind, EngineConfig};
pub use engine::{
    ConsolidateMode, ConsolidateOutcome, ConsolidateRequest, EngineStats, GraphRequest, GraphView,
    MemoryEngine, OpenOutcome, OpenRequest, PromoteRequest, PromotionReport, RelationDirection,
    TouchOutcome,
};
pub use error::{EngineError, Result};

// Record model
pub use memory::{
    MemoryRecord, MemoryStatus, ObservationEvent, Relation, RelationKind, SaveInput,
};

// Storage layer
pub use store::{
    CompactionReport, JsonlStore, MemoryFilter, MemoryListing, StoreOptions, StoreStats, TagMatch,
    WriteBatch,
};

// Decay & scoring
pub use decay::{DecayModel, Scorer};

// Reinforcement & review
pub use review::{Reinforcement, ReviewScorer};

// Clustering & consolidation
pub use cluster::{Cluster, ClusterClass, ClusterOptions, SimilarityStrategy};
pub use consolidate::{ConsolidationProposal, MergeStrategy};

// Vault & search
pub use search::{ResultKind, SearchHit, SearchRequest, SearchSources};
pub use vault::{FrontMatter, LtmIndex, NoteEntry, RefreshReport};

// Promotion
pub use promote::{PromotionOutcome, PromotionPreview};

// Maintenance
pub use maintenance::{GcOptions, GcReport, MaintenanceHandle, MaintenanceReport};

// Embeddings seam
pub use embeddings::{Embedder, EmbedUnavailable, cosine_similarity};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        CancelToken, Cluster, ConsolidateMode, ConsolidateRequest, EngineConfig, EngineError,
        EngineStats, GcOptions, MemoryEngine, MemoryFilter, MemoryRecord, MemoryStatus,
        ObservationEvent, PromoteRequest, Relation, RelationKind, Result, SaveInput, SearchHit,
        SearchRequest, SimilarityStrategy,
    };
}
