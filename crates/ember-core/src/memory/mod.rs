//! Memory module - core record types
//!
//! Typed entities for the short-term store:
//! - [`MemoryRecord`] with lifecycle status and reinforcement state
//! - [`Relation`] edges between records
//! - [`ObservationEvent`] inputs from the host
//! - Input/validation types for the save path

mod record;

pub use record::{
    MemoryRecord, MemoryStatus, ObservationEvent, Relation, RelationKind, SaveInput,
    content_hash, new_memory_id, new_relation_id, normalize_content, validate_tag,
};
