//! Capture-time ordering of a plant's images.
//!
//! A [`TimeSeriesIndex`] is a snapshot: it never reorders itself. Sessions
//! that hold one compare [`TimeSeriesIndex::fingerprint`] against a fresh
//! listing to notice that the underlying image set changed.

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::model::{ImageInfo, SeriesKey};

/// Lists the images of a plant/view-angle pair.
///
/// Implemented by the surrounding dataset code; [`ImageCatalog`] is the
/// in-memory version.
pub trait TimeSeriesProvider {
    /// All images of the series, in any order. Empty when the series is unknown.
    fn time_series(&self, key: &SeriesKey) -> Vec<ImageInfo>;
}

/// Ordered images of one time series.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesIndex {
    key: SeriesKey,
    images: Vec<ImageInfo>,
}

impl TimeSeriesIndex {
    /// Build an index from an unordered listing. Images of other series are
    /// dropped, duplicates by id are removed.
    pub fn new(key: SeriesKey, images: impl IntoIterator<Item = ImageInfo>) -> Self {
        let mut images: Vec<ImageInfo> = images
            .into_iter()
            .filter(|img| img.in_series(&key))
            .collect();
        images.sort_by(|a, b| a.capture_order(b));
        images.dedup_by(|a, b| a.id == b.id);
        Self { key, images }
    }

    /// Fetch and index a series from a provider.
    pub fn load(provider: &impl TimeSeriesProvider, key: &SeriesKey) -> Option<Self> {
        let index = Self::new(key.clone(), provider.time_series(key));
        if index.is_empty() {
            log::debug!("No time series found for {}", key);
            None
        } else {
            Some(index)
        }
    }

    pub fn key(&self) -> &SeriesKey {
        &self.key
    }

    pub fn images(&self) -> &[ImageInfo] {
        &self.images
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&ImageInfo> {
        self.images.get(position)
    }

    /// Series position of an image.
    pub fn position_of(&self, image_id: &str) -> Option<usize> {
        self.images.iter().position(|img| img.id == image_id)
    }

    /// Images strictly after `position`.
    pub fn after(&self, position: usize) -> &[ImageInfo] {
        self.images.get(position + 1..).unwrap_or(&[])
    }

    /// Images strictly after the given image. Empty when it is not in the series.
    pub fn images_after(&self, image_id: &str) -> &[ImageInfo] {
        match self.position_of(image_id) {
            Some(pos) => self.after(pos),
            None => &[],
        }
    }

    /// Image following `image_id`, wrapping around.
    pub fn next(&self, image_id: &str) -> Option<&ImageInfo> {
        let pos = self.position_of(image_id)?;
        self.images.get((pos + 1) % self.images.len())
    }

    /// Image preceding `image_id`, wrapping around.
    pub fn prev(&self, image_id: &str) -> Option<&ImageInfo> {
        let pos = self.position_of(image_id)?;
        let prev = if pos == 0 { self.images.len() - 1 } else { pos - 1 };
        self.images.get(prev)
    }

    /// Get progress string like "3/15".
    pub fn progress(&self, image_id: &str) -> String {
        match self.position_of(image_id) {
            Some(pos) => format!("{}/{}", pos + 1, self.images.len()),
            None => format!("?/{}", self.images.len()),
        }
    }

    /// Hash over the ordered image ids and capture times.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.key.hash(&mut hasher);
        for img in &self.images {
            img.id.hash(&mut hasher);
            img.capture_time.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Whether a fresh listing still matches this snapshot.
    pub fn matches_listing(&self, listing: impl IntoIterator<Item = ImageInfo>) -> bool {
        Self::new(self.key.clone(), listing).fingerprint() == self.fingerprint()
    }
}

/// In-memory image listing for every series.
#[derive(Debug, Default)]
pub struct ImageCatalog {
    images: RefCell<Vec<ImageInfo>>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(images: impl IntoIterator<Item = ImageInfo>) -> Self {
        Self {
            images: RefCell::new(images.into_iter().collect()),
        }
    }

    /// Register an image, replacing one with the same id.
    pub fn insert(&self, image: ImageInfo) {
        let mut images = self.images.borrow_mut();
        images.retain(|img| img.id != image.id);
        images.push(image);
    }

    /// Remove an image by id.
    pub fn remove(&self, image_id: &str) -> Option<ImageInfo> {
        let mut images = self.images.borrow_mut();
        let pos = images.iter().position(|img| img.id == image_id)?;
        Some(images.remove(pos))
    }

    /// Look up an image by id.
    pub fn find(&self, image_id: &str) -> Option<ImageInfo> {
        self.images
            .borrow()
            .iter()
            .find(|img| img.id == image_id)
            .cloned()
    }
}

impl TimeSeriesProvider for ImageCatalog {
    fn time_series(&self, key: &SeriesKey) -> Vec<ImageInfo> {
        self.images
            .borrow()
            .iter()
            .filter(|img| img.in_series(key))
            .cloned()
            .collect()
    }
}

impl<T: TimeSeriesProvider + ?Sized> TimeSeriesProvider for &T {
    fn time_series(&self, key: &SeriesKey) -> Vec<ImageInfo> {
        (**self).time_series(key)
    }
}

impl<T: TimeSeriesProvider + ?Sized> TimeSeriesProvider for std::rc::Rc<T> {
    fn time_series(&self, key: &SeriesKey) -> Vec<ImageInfo> {
        (**self).time_series(key)
    }
}
