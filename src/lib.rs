//! kpsync - Keypoint Synchronization Engine
//!
//! Keeps keypoint annotations consistent across the capture-ordered images of
//! a plant (a time series) and drives guided assignment of keypoint
//! directions. Storage, image listing and image display are injected through
//! [`AnnotationStore`], [`TimeSeriesProvider`] and [`ImageSelector`].

mod config;
mod constants;
mod direction;
mod editor;
mod error;
mod events;
mod model;
mod series;
mod store;
mod sync;
mod undo;
mod workbench;

#[cfg(test)]
mod tests;

pub use config::{
    CONFIG_VERSION, DirectionSettings, EngineConfig, HistorySettings, LogLevel, SyncSettings,
};
pub use constants::{
    ANGLE_EPSILON, DEFAULT_MAX_DIRECTIONS, DEFAULT_MAX_HISTORY, KEYPOINT_HIT_RADIUS,
    LEGACY_ORIGIN_DISTANCE, POSITION_EPSILON,
};
pub use direction::{
    AssignmentMode, ControllerState, CrossSectionalPlan, Cursor, DirectionAssignmentController,
    ExitReason, HeadlessSelector, ImageSelector, Interruption, InterruptionEffect,
    LongitudinalQueue, MultiDirectionSession, MultiPhase, MultiStep, Occurrence, OrderGroup,
    Progress, SelectReason, TraversalStep,
};
pub use editor::{AnnotationEditor, EditOutcome, LocalOutcome};
pub use error::{
    ConfigError, DirectionLimitError, EditorError, ModeError, StoreError, SyncError,
};
pub use events::{DirectionEvent, EngineEvent, EventBus, EventLog, SyncEvent};
pub use model::{
    AnnotationIdentity, AnnotationKind, AnnotationRecord, Direction, ImageId, ImageInfo,
    LegacyDirection, LocalId, OperationKind, Point, RecordOrigin, SeriesKey, decode_records,
    directions_match, encode_records, find_by_identity, next_local_id, normalize_angle,
    normalize_directions,
};
pub use series::{ImageCatalog, TimeSeriesIndex, TimeSeriesProvider};
pub use store::{AnnotationStore, MemoryStore, blob_key, load_or_empty};
pub use sync::{
    FailedImage, MovePolicy, OffsetEstimator, SyncEngine, SyncOperation, SyncOutcome, SyncReport,
    SyncRequest, TargetOutcome, TargetScope,
};
pub use undo::{Command, UndoConfig, UndoStack};
pub use workbench::{ClickOutcome, Workbench};
