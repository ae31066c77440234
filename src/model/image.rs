//! Image metadata and time-series keys.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of an image (its filename in the blob store).
pub type ImageId = String;

/// One captured image of a plant from a fixed view angle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: ImageId,
    pub plant_id: String,
    pub view_angle: String,
    /// Capture time in unix milliseconds.
    pub capture_time: i64,
}

impl ImageInfo {
    pub fn new(
        id: impl Into<ImageId>,
        plant_id: impl Into<String>,
        view_angle: impl Into<String>,
        capture_time: i64,
    ) -> Self {
        Self {
            id: id.into(),
            plant_id: plant_id.into(),
            view_angle: view_angle.into(),
            capture_time,
        }
    }

    /// Key of the time series this image belongs to.
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(&self.plant_id, &self.view_angle)
    }

    /// Whether this image belongs to the given series.
    pub fn in_series(&self, key: &SeriesKey) -> bool {
        self.plant_id == key.plant_id && self.view_angle == key.view_angle
    }

    /// Total capture order: capture time, ties broken by lexical id.
    pub fn capture_order(&self, other: &ImageInfo) -> Ordering {
        self.capture_time
            .cmp(&other.capture_time)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// `(plant, view angle)` pair identifying a time series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub plant_id: String,
    pub view_angle: String,
}

impl SeriesKey {
    pub fn new(plant_id: impl Into<String>, view_angle: impl Into<String>) -> Self {
        Self {
            plant_id: plant_id.into(),
            view_angle: view_angle.into(),
        }
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.plant_id, self.view_angle)
    }
}
