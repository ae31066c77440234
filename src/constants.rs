//! Global constants for the keypoint engine

/// Hit radius for keypoint selection (in image pixels).
pub const KEYPOINT_HIT_RADIUS: f32 = 10.0;

/// Positions closer than this are considered identical when comparing
/// a propagated record against an existing one.
pub const POSITION_EPSILON: f32 = 1e-3;

/// Angles (degrees) closer than this are considered identical.
pub const ANGLE_EPSILON: f32 = 1e-3;

/// Number of directions a keypoint may hold unless configured otherwise.
pub const DEFAULT_MAX_DIRECTIONS: u8 = 1;

/// Distance from the anchor at which a synthetic click origin is placed
/// when a legacy record only stored a bare angle.
pub const LEGACY_ORIGIN_DISTANCE: f32 = 50.0;

/// Default number of undoable commands kept per image.
pub const DEFAULT_MAX_HISTORY: usize = 100;
