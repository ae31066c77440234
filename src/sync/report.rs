//! Structured results of propagation runs.

use std::fmt;

use crate::error::SyncError;
use crate::model::{AnnotationIdentity, ImageId, OperationKind};

/// A target image that could not be updated.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedImage {
    pub image: ImageId,
    pub error: SyncError,
}

/// Per-target result that is not a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetOutcome {
    /// The target was changed and saved.
    Applied,
    /// The target already reflected the operation, or had nothing to change.
    Unchanged,
    /// The target was deliberately left alone (policy or scope).
    Skipped,
}

/// Summary of one propagation run.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub operation: OperationKind,
    pub identity: AnnotationIdentity,
    pub source: ImageId,
    /// Targets that were changed, in series order.
    pub applied: Vec<ImageId>,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: Vec<FailedImage>,
    /// Why the run short-circuited, if it did.
    pub message: Option<String>,
    /// Synchronization was disabled while the run was in progress.
    pub cancelled: bool,
}

impl SyncReport {
    pub fn new(operation: OperationKind, identity: AnnotationIdentity, source: ImageId) -> Self {
        Self {
            operation,
            identity,
            source,
            applied: Vec::new(),
            unchanged: 0,
            skipped: 0,
            failed: Vec::new(),
            message: None,
            cancelled: false,
        }
    }

    /// A run that stopped on a precondition.
    pub fn short_circuit(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Number of targets that were changed.
    pub fn synced(&self) -> usize {
        self.applied.len()
    }

    /// Whether a precondition stopped the run.
    pub fn is_short_circuit(&self) -> bool {
        self.message.is_some()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }

    /// Failures that need user review.
    pub fn conflicts(&self) -> impl Iterator<Item = &FailedImage> {
        self.failed.iter().filter(|f| f.error.is_conflict())
    }

    /// Failure entry for a given image, if any.
    pub fn failure_for(&self, image: &str) -> Option<&SyncError> {
        self.failed
            .iter()
            .find(|f| f.image == image)
            .map(|f| &f.error)
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            return write!(
                f,
                "{} {} from {}: not synced ({})",
                self.operation.name(),
                self.identity,
                self.source,
                message
            );
        }
        write!(
            f,
            "{} {} from {}: {} synced, {} unchanged, {} skipped, {} failed",
            self.operation.name(),
            self.identity,
            self.source,
            self.synced(),
            self.unchanged,
            self.skipped,
            self.failed.len()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}

/// Result of [`SyncEngine::propagate`](crate::sync::SyncEngine::propagate).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// The run finished; the report is also published as an event.
    Completed(SyncReport),
    /// Another run was in flight. The request will run after it and its
    /// report will only be published as an event.
    Queued { position: usize },
}

impl SyncOutcome {
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Queued { .. } => None,
        }
    }

    pub fn into_report(self) -> Option<SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            SyncOutcome::Queued { .. } => None,
        }
    }

    /// Number of targets changed, zero when queued.
    pub fn synced(&self) -> usize {
        self.report().map_or(0, SyncReport::synced)
    }

    /// Images the run changed. Empty when queued or short-circuited.
    pub fn applied_images(&self) -> Vec<ImageId> {
        self.report()
            .map(|r| r.applied.clone())
            .unwrap_or_default()
    }
}
