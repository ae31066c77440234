//! Error types for the keypoint engine.
//!
//! Per-image propagation problems are values ([`SyncError`]) collected into a
//! [`SyncReport`](crate::sync::SyncReport); they never abort sibling targets.
//! The remaining enums are returned from the operation that failed.

use thiserror::Error;

use crate::model::{AnnotationIdentity, ImageId, LocalId, SeriesKey};

/// Errors raised by the external storage and listing collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No blob exists for the image. The engine treats this as an empty list.
    #[error("No stored annotations for image '{0}'")]
    NotFound(ImageId),

    /// Reading or writing the backing storage failed
    #[error("Storage I/O failed for image '{image}': {message}")]
    Io {
        /// Image whose blob was being accessed
        image: ImageId,
        /// Description of the failure
        message: String,
    },

    /// A stored blob could not be decoded or encoded
    #[error("Invalid annotation record: {message}")]
    InvalidRecord {
        /// Description of the decoding error
        message: String,
    },

    /// The image selector refused or failed to display an image
    #[error("Image selection failed for '{image}': {message}")]
    Selection {
        /// Image that was requested
        image: ImageId,
        /// Description of the failure
        message: String,
    },
}

impl StoreError {
    /// Create an I/O error for an image.
    pub fn io(image: impl Into<ImageId>, message: impl Into<String>) -> Self {
        Self::Io {
            image: image.into(),
            message: message.into(),
        }
    }

    /// Create an invalid record error with a message.
    pub fn invalid_record(message: impl Into<String>) -> Self {
        Self::InvalidRecord {
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::invalid_record(err.to_string())
    }
}

/// A record was given more directions than it can hold.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Record holds at most {max} direction(s), got {got}")]
pub struct DirectionLimitError {
    /// The record's `max_directions`
    pub max: u8,
    /// The number of directions that was offered
    pub got: usize,
}

/// Outcome of propagating to one target image that did not succeed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Saving (or loading) the target's record list failed
    #[error("Persistence failure on '{image}': {source}")]
    PersistenceFailure {
        /// Target image
        image: ImageId,
        /// Underlying storage error
        source: StoreError,
    },

    /// An add found a divergent record with the same identity
    #[error("Conflict on '{image}': {identity} already exists with different content")]
    ConflictDetected {
        /// Target image
        image: ImageId,
        /// Identity that collided
        identity: AnnotationIdentity,
        /// Local id of the record left untouched on the target
        existing: LocalId,
    },

    /// The target holds more than one record with the same identity
    #[error("Integrity violation on '{image}': {count} records share {identity}")]
    IntegrityViolation {
        /// Target image
        image: ImageId,
        /// Duplicated identity
        identity: AnnotationIdentity,
        /// How many records carry it
        count: usize,
    },

    /// The propagated directions do not fit the target record
    #[error("Direction limit on '{image}' for {identity}: {limit}")]
    DirectionLimit {
        /// Target image
        image: ImageId,
        /// Identity of the target record
        identity: AnnotationIdentity,
        /// The violated bound
        limit: DirectionLimitError,
    },
}

impl SyncError {
    /// The target image this failure belongs to.
    pub fn image(&self) -> &str {
        match self {
            SyncError::PersistenceFailure { image, .. }
            | SyncError::ConflictDetected { image, .. }
            | SyncError::IntegrityViolation { image, .. }
            | SyncError::DirectionLimit { image, .. } => image,
        }
    }

    /// Whether this failure needs user review rather than a retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SyncError::ConflictDetected { .. } | SyncError::IntegrityViolation { .. }
        )
    }
}

/// Rejected mode or sub-session transitions. State is left unchanged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModeError {
    /// The requested mode name is not known
    #[error("Invalid mode transition: unknown mode '{0}'")]
    UnknownMode(String),

    /// The requested direction count is outside `[1, max]`
    #[error("Invalid mode transition: direction count {requested} outside [1, {max}]")]
    CountOutOfRange {
        /// Requested count
        requested: i64,
        /// The record's `max_directions`
        max: u8,
    },

    /// The operation is not valid in the current phase
    #[error("Invalid mode transition: cannot {action} while {phase}")]
    WrongPhase {
        /// What was attempted
        action: &'static str,
        /// The phase the state machine was in
        phase: &'static str,
    },

    /// Multi-direction entry on a record that holds a single direction
    #[error("Invalid mode transition: {0} holds a single direction")]
    NotMultiDirection(AnnotationIdentity),

    /// A mode that needs an open image was entered without one
    #[error("Invalid mode transition: no image is open")]
    NoImageOpen,

    /// The series' image set changed since the traversal was entered
    #[error("Traversal invalidated: time series {0} changed")]
    SeriesChanged(SeriesKey),

    /// A multi-direction click past the record's bound
    #[error("Invalid mode transition: {0}")]
    DirectionLimit(#[from] DirectionLimitError),

    /// The traversal failed to load data or switch images
    #[error("Traversal aborted: {0}")]
    Store(#[from] StoreError),

    /// The edit that was routed through the editor failed
    #[error("Traversal edit failed: {0}")]
    Edit(#[from] EditorError),
}

impl ModeError {
    /// Create a wrong-phase error.
    pub fn wrong_phase(action: &'static str, phase: &'static str) -> Self {
        Self::WrongPhase { action, phase }
    }
}

/// Errors from local edits on the open image.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditorError {
    /// No image is open in the editor
    #[error("No image is open")]
    NoImageOpen,

    /// The image is not part of any known time series
    #[error("Image '{0}' is not part of the current time series")]
    UnknownImage(ImageId),

    /// No record with this identity exists on the open image
    #[error("No record {0} on the open image")]
    UnknownRecord(AnnotationIdentity),

    /// Another record on the open image already carries this identity
    #[error("Record {0} already exists on the open image")]
    DuplicateIdentity(AnnotationIdentity),

    /// Orders start at 1
    #[error("Order must be at least 1")]
    InvalidOrder,

    /// The record is still being propagated from an earlier edit
    #[error("Record {0} is being synchronized")]
    RecordBusy(AnnotationIdentity),

    /// Too many directions for the record
    #[error(transparent)]
    DirectionLimit(#[from] DirectionLimitError),

    /// Loading the image failed
    #[error("Failed to load annotations: {0}")]
    Store(#[from] StoreError),
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        /// Version found in the file
        file_version: u32,
        /// Newest version this build understands
        supported_version: u32,
    },

    /// A setting holds a value outside its allowed range
    #[error("Invalid setting '{field}': {message}")]
    InvalidSetting {
        /// Name of the offending setting
        field: &'static str,
        /// Why it was rejected
        message: String,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
