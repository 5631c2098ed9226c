//! JSONL store
//!
//! Append-only persistence for memories and relations:
//! - One JSON object per line, LF-terminated, unknown fields preserved
//! - Tombstone lines suppress earlier lines with the same id
//! - In-memory index snapshots swapped atomically after each mutation
//! - Periodic compaction rewrites each file keeping only live lines
//! - A pid lockfile keeps a second process off the same storage root

mod index;
mod jsonl;
mod lockfile;

pub use index::{MemoryFilter, MemoryListing, StoreIndex, TagMatch};
pub use jsonl::{CompactionReport, JsonlStore, StoreOptions, StoreStats, WriteBatch};
pub use lockfile::Lockfile;
