//! Compressed, checksummed snapshots of project and run state.
//!
//! Each snapshot is one JSON document (optionally gzipped) whose `state`
//! field is covered by a SHA-256 checksum, recomputed and verified on
//! every read. Milestones are pinned: excluded from pruning and protected
//! from deletion without `--force`.

/// The snapshot store.
pub mod manager;
/// Snapshot records and their wire shapes.
pub mod types;

pub use manager::{SnapshotManager, MAX_CAPTURED_ARTIFACTS};
pub use types::{
    ProjectState, RunSummary, SnapshotMetadata, SnapshotRecord, SnapshotRetention, SnapshotState,
    SnapshotType, SnapshotValidation,
};
