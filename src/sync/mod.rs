//! Time-series synchronization of annotation edits.
//!
//! A mutation made on one image is replayed, by identity, on every image
//! captured after it. See [`SyncEngine::propagate`].

mod engine;
mod operation;
mod report;

pub use engine::{OffsetEstimator, SyncEngine};
pub use operation::{MovePolicy, SyncOperation, SyncRequest, TargetScope};
pub use report::{FailedImage, SyncOutcome, SyncReport, TargetOutcome};
