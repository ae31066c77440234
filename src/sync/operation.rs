//! Operations that can be propagated through a time series.

use serde::{Deserialize, Serialize};

use crate::model::{AnnotationIdentity, AnnotationRecord, ImageId, ImageInfo, OperationKind, Point};

/// A mutation applied on the source image, carrying the post-mutation record.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOperation {
    /// A record was placed.
    Add { record: AnnotationRecord },
    /// A record was moved from `previous`.
    Move {
        record: AnnotationRecord,
        previous: Point,
        /// Also copy the record's directions to the target.
        with_directions: bool,
    },
    /// A record was removed.
    Delete { record: AnnotationRecord },
    /// A record's direction list changed.
    EditDirection { record: AnnotationRecord },
}

impl SyncOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            SyncOperation::Add { .. } => OperationKind::Add,
            SyncOperation::Move { .. } => OperationKind::Move,
            SyncOperation::Delete { .. } => OperationKind::Delete,
            SyncOperation::EditDirection { .. } => OperationKind::EditDirection,
        }
    }

    pub fn record(&self) -> &AnnotationRecord {
        match self {
            SyncOperation::Add { record }
            | SyncOperation::Move { record, .. }
            | SyncOperation::Delete { record }
            | SyncOperation::EditDirection { record } => record,
        }
    }

    pub fn identity(&self) -> AnnotationIdentity {
        self.record().identity()
    }
}

/// Which later images a propagation may touch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TargetScope {
    /// Every image strictly after the source.
    #[default]
    Later,
    /// Only these images, and only those strictly after the source.
    Images(Vec<ImageId>),
}

/// One propagation job.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncRequest {
    pub operation: SyncOperation,
    pub source: ImageInfo,
    pub scope: TargetScope,
}

impl SyncRequest {
    pub fn new(operation: SyncOperation, source: ImageInfo) -> Self {
        Self {
            operation,
            source,
            scope: TargetScope::Later,
        }
    }

    pub fn with_scope(mut self, scope: TargetScope) -> Self {
        self.scope = scope;
        self
    }
}

/// What a `Move` does on a target image that has no matching record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovePolicy {
    /// Leave the target alone.
    #[default]
    Skip,
    /// Materialize the record on the target.
    Create,
}

impl MovePolicy {
    /// Get the display name for this policy.
    pub fn name(&self) -> &'static str {
        match self {
            MovePolicy::Skip => "skip",
            MovePolicy::Create => "create",
        }
    }
}
