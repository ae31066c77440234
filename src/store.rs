//! Persistence boundary for annotation records.
//!
//! The engine only talks to storage through [`AnnotationStore`]. A missing
//! blob and an empty list mean the same thing: the image has no records.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;

use crate::error::StoreError;
use crate::model::{AnnotationRecord, ImageInfo, decode_records, encode_records};

/// Asynchronous access to the records stored for an image.
pub trait AnnotationStore {
    /// Load the records of an image. `Ok(None)` when nothing is stored.
    fn load(
        &self,
        image: &ImageInfo,
    ) -> impl Future<Output = Result<Option<Vec<AnnotationRecord>>, StoreError>>;

    /// Replace the stored records of an image.
    fn save(
        &self,
        image: &ImageInfo,
        records: &[AnnotationRecord],
    ) -> impl Future<Output = Result<(), StoreError>>;
}

impl<T: AnnotationStore> AnnotationStore for Rc<T> {
    fn load(
        &self,
        image: &ImageInfo,
    ) -> impl Future<Output = Result<Option<Vec<AnnotationRecord>>, StoreError>> {
        (**self).load(image)
    }

    fn save(
        &self,
        image: &ImageInfo,
        records: &[AnnotationRecord],
    ) -> impl Future<Output = Result<(), StoreError>> {
        (**self).save(image, records)
    }
}

/// Load an image's records, treating "not found" as an empty list.
pub async fn load_or_empty(
    store: &impl AnnotationStore,
    image: &ImageInfo,
) -> Result<Vec<AnnotationRecord>, StoreError> {
    match store.load(image).await {
        Ok(records) => Ok(records.unwrap_or_default()),
        Err(StoreError::NotFound(_)) => Ok(Vec::new()),
        Err(e) => Err(e),
    }
}

/// Blob key of an image: `plant/view/filename`.
pub fn blob_key(image: &ImageInfo) -> String {
    format!("{}/{}/{}", image.plant_id, image.view_angle, image.id)
}

/// In-memory key-value store holding JSON blobs.
///
/// Blobs go through the same decoder as persisted data, so older direction
/// layouts inserted with [`MemoryStore::insert_blob`] are migrated on load.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: RefCell<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw JSON blob for an image.
    pub fn insert_blob(&self, image: &ImageInfo, json: impl Into<String>) {
        self.blobs.borrow_mut().insert(blob_key(image), json.into());
    }

    /// Store records for an image synchronously.
    pub fn insert(&self, image: &ImageInfo, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        let json = encode_records(records)?;
        self.insert_blob(image, json);
        Ok(())
    }

    /// Decode the records of an image synchronously. Empty when nothing is stored.
    pub fn records(&self, image: &ImageInfo) -> Result<Vec<AnnotationRecord>, StoreError> {
        match self.blobs.borrow().get(&blob_key(image)) {
            Some(json) => decode_records(json),
            None => Ok(Vec::new()),
        }
    }

    /// Whether a blob exists for the image.
    pub fn contains(&self, image: &ImageInfo) -> bool {
        self.blobs.borrow().contains_key(&blob_key(image))
    }

    /// Drop the blob of an image.
    pub fn remove(&self, image: &ImageInfo) -> bool {
        self.blobs.borrow_mut().remove(&blob_key(image)).is_some()
    }
}

impl AnnotationStore for MemoryStore {
    async fn load(&self, image: &ImageInfo) -> Result<Option<Vec<AnnotationRecord>>, StoreError> {
        let blob = self.blobs.borrow().get(&blob_key(image)).cloned();
        blob.map(|json| decode_records(&json)).transpose()
    }

    async fn save(&self, image: &ImageInfo, records: &[AnnotationRecord]) -> Result<(), StoreError> {
        log::trace!("Saving {} record(s) for {}", records.len(), blob_key(image));
        self.insert(image, records)
    }
}
