//! Decoding of stored annotation blobs, including older direction formats.
//!
//! Older records stored a single `direction` that was either a bare angle in
//! degrees, the words `left`/`right`, or a single direction object. They are
//! normalized into the `directions` list once, here, so nothing downstream
//! has to know about them.

use serde::Deserialize;

use super::annotation::{
    AnnotationIdentity, AnnotationKind, AnnotationRecord, Direction, LocalId, Point,
    RecordOrigin, normalize_angle,
};
use crate::constants::{DEFAULT_MAX_DIRECTIONS, LEGACY_ORIGIN_DISTANCE};
use crate::error::StoreError;

/// A direction value as found in older blobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum LegacyDirection {
    /// Bare angle in degrees.
    Angle(f32),
    /// `"left"` or `"right"`.
    Symbolic(String),
    /// A single direction object.
    Single(Direction),
    /// Already a list.
    List(Vec<Direction>),
}

/// Normalize a legacy direction value into the list shape.
///
/// Bare angles get a synthetic click origin `origin_distance` pixels away
/// from the anchor along the angle. `left` is 180 degrees, `right` is 0.
pub fn normalize_directions(
    anchor: Point,
    legacy: LegacyDirection,
    origin_distance: f32,
) -> Result<Vec<Direction>, StoreError> {
    let from_angle = |angle: f32| {
        let angle = normalize_angle(angle);
        Direction {
            angle,
            origin: anchor.project(angle, origin_distance),
        }
    };

    match legacy {
        LegacyDirection::Angle(angle) => {
            if !angle.is_finite() {
                return Err(StoreError::invalid_record(format!(
                    "non-finite direction angle {}",
                    angle
                )));
            }
            Ok(vec![from_angle(angle)])
        }
        LegacyDirection::Symbolic(word) => match word.trim().to_ascii_lowercase().as_str() {
            "left" | "l" => Ok(vec![from_angle(180.0)]),
            "right" | "r" => Ok(vec![from_angle(0.0)]),
            "" | "none" => Ok(Vec::new()),
            other => Err(StoreError::invalid_record(format!(
                "unknown symbolic direction '{}'",
                other
            ))),
        },
        LegacyDirection::Single(dir) => Ok(vec![Direction {
            angle: normalize_angle(dir.angle),
            origin: dir.origin,
        }]),
        LegacyDirection::List(dirs) => Ok(dirs
            .into_iter()
            .map(|d| Direction {
                angle: normalize_angle(d.angle),
                origin: d.origin,
            })
            .collect()),
    }
}

/// On-disk shape of a record, tolerant of every known older layout.
#[derive(Debug, Deserialize)]
struct StoredRecord {
    #[serde(default, alias = "localId", alias = "id")]
    local_id: Option<LocalId>,
    order: u32,
    #[serde(default)]
    kind: Option<AnnotationKind>,
    #[serde(default, alias = "customTypeId", alias = "custom_type")]
    custom_type_id: Option<String>,
    #[serde(default)]
    position: Option<Point>,
    #[serde(default)]
    x: Option<f32>,
    #[serde(default)]
    y: Option<f32>,
    #[serde(default)]
    directions: Option<Vec<Direction>>,
    #[serde(default)]
    direction: Option<LegacyDirection>,
    #[serde(default, alias = "maxDirections")]
    max_directions: Option<u8>,
    #[serde(default, alias = "createdAt")]
    created_at: Option<u64>,
    #[serde(default, alias = "modifiedAt")]
    modified_at: Option<u64>,
    #[serde(default)]
    origin: RecordOrigin,
}

impl StoredRecord {
    fn into_record(self, fallback_id: LocalId) -> Result<AnnotationRecord, StoreError> {
        let position = match (self.position, self.x, self.y) {
            (Some(p), _, _) => p,
            (None, Some(x), Some(y)) => Point::new(x, y),
            _ => {
                return Err(StoreError::invalid_record(format!(
                    "record with order {} has no position",
                    self.order
                )));
            }
        };
        if self.order == 0 {
            return Err(StoreError::invalid_record("order must be at least 1"));
        }

        let kind = match (self.kind, self.custom_type_id) {
            (Some(kind), _) => kind,
            (None, Some(type_id)) => AnnotationKind::Custom(type_id),
            (None, None) => AnnotationKind::Regular,
        };

        let directions = match (self.directions, self.direction) {
            (Some(list), _) => normalize_directions(
                position,
                LegacyDirection::List(list),
                LEGACY_ORIGIN_DISTANCE,
            )?,
            (None, Some(legacy)) => normalize_directions(position, legacy, LEGACY_ORIGIN_DISTANCE)?,
            (None, None) => Vec::new(),
        };

        let created = self.created_at.unwrap_or_default();
        let modified = self.modified_at.unwrap_or(created);

        Ok(AnnotationRecord::from_parts(
            self.local_id.unwrap_or(fallback_id),
            AnnotationIdentity::new(self.order, kind),
            position,
            directions,
            self.max_directions.unwrap_or(DEFAULT_MAX_DIRECTIONS),
            (created, modified),
            self.origin,
        ))
    }
}

/// Decode a stored blob into records, migrating older layouts.
///
/// Records without a local id receive fresh ids above the highest stored one.
pub fn decode_records(json: &str) -> Result<Vec<AnnotationRecord>, StoreError> {
    if json.trim().is_empty() {
        return Ok(Vec::new());
    }
    let stored: Vec<StoredRecord> = serde_json::from_str(json)?;
    let mut next_id = stored
        .iter()
        .filter_map(|r| r.local_id)
        .max()
        .map_or(1, |id| id + 1);

    stored
        .into_iter()
        .map(|raw| {
            let fallback = next_id;
            if raw.local_id.is_none() {
                next_id += 1;
            }
            raw.into_record(fallback)
        })
        .collect()
}

/// Encode records in the current layout.
pub fn encode_records(records: &[AnnotationRecord]) -> Result<String, StoreError> {
    Ok(serde_json::to_string(records)?)
}
