//! Keypoint annotation records and their cross-image identity.
//!
//! A record's `local_id` is only meaningful on the image that stores it.
//! Across the images of a time series, records are matched exclusively by
//! [`AnnotationIdentity`], the `(order, kind)` pair.

use std::fmt;

use serde::{Deserialize, Serialize};
use web_time::{SystemTime, UNIX_EPOCH};

use crate::constants::{ANGLE_EPSILON, KEYPOINT_HIT_RADIUS, POSITION_EPSILON};
use crate::error::DirectionLimitError;

/// Per-image identifier for a record. Never compared across images.
pub type LocalId = u64;

// ============================================================================
// Geometry
// ============================================================================

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Calculate distance to another point.
    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Translate this point by an offset.
    pub fn offset_by(&self, offset: Point) -> Point {
        Point::new(self.x + offset.x, self.y + offset.y)
    }

    /// Angle in degrees from this point towards `target`, in `[0, 360)`.
    pub fn angle_to(&self, target: &Point) -> f32 {
        normalize_angle((target.y - self.y).atan2(target.x - self.x).to_degrees())
    }

    /// Point at `distance` from this one along `angle` degrees.
    pub fn project(&self, angle: f32, distance: f32) -> Point {
        let rad = angle.to_radians();
        Point::new(
            self.x + rad.cos() * distance,
            self.y + rad.sin() * distance,
        )
    }

    /// Equality within [`POSITION_EPSILON`].
    pub fn approx_eq(&self, other: &Point) -> bool {
        (self.x - other.x).abs() <= POSITION_EPSILON && (self.y - other.y).abs() <= POSITION_EPSILON
    }
}

/// Wrap an angle in degrees into `[0, 360)`.
pub fn normalize_angle(degrees: f32) -> f32 {
    let wrapped = degrees.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

// ============================================================================
// Identity
// ============================================================================

/// Keypoint type. Custom types carry the id of a user-defined type.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationKind {
    #[default]
    Regular,
    Custom(String),
}

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnnotationKind::Regular => write!(f, "regular"),
            AnnotationKind::Custom(id) => write!(f, "custom:{}", id),
        }
    }
}

/// The stable cross-image identity of a keypoint.
///
/// Ordered by `order` first, so sorting a list of identities yields the
/// traversal order used by the direction assignment modes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnnotationIdentity {
    pub order: u32,
    pub kind: AnnotationKind,
}

impl AnnotationIdentity {
    pub fn new(order: u32, kind: AnnotationKind) -> Self {
        Self { order, kind }
    }

    pub fn regular(order: u32) -> Self {
        Self::new(order, AnnotationKind::Regular)
    }

    pub fn custom(order: u32, type_id: impl Into<String>) -> Self {
        Self::new(order, AnnotationKind::Custom(type_id.into()))
    }
}

impl fmt::Display for AnnotationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} ({})", self.order, self.kind)
    }
}

// ============================================================================
// Directions
// ============================================================================

/// One direction of a keypoint: an angle plus the click that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Direction {
    /// Degrees in `[0, 360)`, measured from the keypoint position.
    pub angle: f32,
    /// Where the user clicked to set this direction.
    pub origin: Point,
}

impl Direction {
    /// Direction from `anchor` towards a click position.
    pub fn from_click(anchor: Point, click: Point) -> Self {
        Self {
            angle: anchor.angle_to(&click),
            origin: click,
        }
    }

    /// Equality within the angle and position tolerances.
    pub fn approx_eq(&self, other: &Direction) -> bool {
        (self.angle - other.angle).abs() <= ANGLE_EPSILON && self.origin.approx_eq(&other.origin)
    }
}

/// Compare two direction lists element-wise within tolerance.
pub fn directions_match(a: &[Direction], b: &[Direction]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.approx_eq(y))
}

// ============================================================================
// Record
// ============================================================================

/// The mutation kinds that can be applied to a record and propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Add,
    Move,
    Delete,
    EditDirection,
}

impl OperationKind {
    /// Get the display name for this operation.
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Add => "add",
            OperationKind::Move => "move",
            OperationKind::Delete => "delete",
            OperationKind::EditDirection => "edit-direction",
        }
    }
}

/// Which path created a record. Only used for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    #[default]
    User,
    Propagated(OperationKind),
}

/// A single keypoint on one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    /// Identifier unique within the owning image only.
    pub local_id: LocalId,
    /// Positive order number, half of the cross-image identity.
    pub order: u32,
    /// Keypoint type, the other half of the identity.
    pub kind: AnnotationKind,
    /// Position in image coordinates.
    pub position: Point,
    directions: Vec<Direction>,
    max_directions: u8,
    /// Creation time in unix milliseconds.
    pub created_at: u64,
    /// Last modification time in unix milliseconds.
    pub modified_at: u64,
    /// Path that created this record.
    #[serde(default)]
    pub origin: RecordOrigin,
}

impl AnnotationRecord {
    /// Create a record without directions. Used for user-placed and
    /// propagated records alike.
    pub fn new(
        local_id: LocalId,
        identity: AnnotationIdentity,
        position: Point,
        max_directions: u8,
        origin: RecordOrigin,
    ) -> Self {
        let now = now_millis();
        Self {
            local_id,
            order: identity.order,
            kind: identity.kind,
            position,
            directions: Vec::new(),
            max_directions: max_directions.max(1),
            created_at: now,
            modified_at: now,
            origin,
        }
    }

    /// Copy of this record for another image, with a fresh local id.
    pub fn propagated_copy(&self, local_id: LocalId, position: Point, op: OperationKind) -> Self {
        let mut copy = Self::new(
            local_id,
            self.identity(),
            position,
            self.max_directions,
            RecordOrigin::Propagated(op),
        );
        copy.directions = self.directions.clone();
        copy
    }

    /// Rebuild a record from stored parts, widening `max_directions` when
    /// the stored list is already longer.
    pub(crate) fn from_parts(
        local_id: LocalId,
        identity: AnnotationIdentity,
        position: Point,
        directions: Vec<Direction>,
        max_directions: u8,
        timestamps: (u64, u64),
        origin: RecordOrigin,
    ) -> Self {
        let needed = u8::try_from(directions.len()).unwrap_or(u8::MAX);
        Self {
            local_id,
            order: identity.order,
            kind: identity.kind,
            position,
            directions,
            max_directions: max_directions.max(needed).max(1),
            created_at: timestamps.0,
            modified_at: timestamps.1,
            origin,
        }
    }

    /// The record's cross-image identity.
    pub fn identity(&self) -> AnnotationIdentity {
        AnnotationIdentity::new(self.order, self.kind.clone())
    }

    /// Whether this record carries the given identity.
    pub fn has_identity(&self, identity: &AnnotationIdentity) -> bool {
        self.order == identity.order && self.kind == identity.kind
    }

    pub fn directions(&self) -> &[Direction] {
        &self.directions
    }

    pub fn max_directions(&self) -> u8 {
        self.max_directions
    }

    /// Whether the record can hold more than one direction.
    pub fn is_multi_direction(&self) -> bool {
        self.max_directions > 1
    }

    /// Whether no direction has been assigned yet.
    pub fn lacks_direction(&self) -> bool {
        self.directions.is_empty()
    }

    /// Replace the direction list, enforcing `max_directions`.
    pub fn set_directions(&mut self, directions: Vec<Direction>) -> Result<(), DirectionLimitError> {
        if directions.len() > usize::from(self.max_directions) {
            return Err(DirectionLimitError {
                max: self.max_directions,
                got: directions.len(),
            });
        }
        self.directions = directions;
        self.touch();
        Ok(())
    }

    /// Move the record.
    pub fn set_position(&mut self, position: Point) {
        self.position = position;
        self.touch();
    }

    /// Update the modification timestamp.
    pub fn touch(&mut self) {
        self.modified_at = now_millis().max(self.modified_at);
    }

    /// Whether position and directions match another record within tolerance.
    pub fn same_content(&self, position: &Point, directions: &[Direction]) -> bool {
        self.position.approx_eq(position) && directions_match(&self.directions, directions)
    }

    /// Check if a point is within the selection radius of this keypoint.
    pub fn contains_point(&self, point: &Point) -> bool {
        self.position.distance_to(point) < KEYPOINT_HIT_RADIUS
    }
}

/// Current wall-clock time in unix milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

/// Find every record on an image carrying `identity`.
pub fn find_by_identity<'a>(
    records: &'a [AnnotationRecord],
    identity: &AnnotationIdentity,
) -> Vec<(usize, &'a AnnotationRecord)> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.has_identity(identity))
        .collect()
}

/// Next free local id on an image.
pub fn next_local_id(records: &[AnnotationRecord]) -> LocalId {
    records.iter().map(|r| r.local_id).max().map_or(1, |id| id + 1)
}

// ============================================================================
// Tests
// ============================================================================
