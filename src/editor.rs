//! The mutation path for the open image.
//!
//! Every edit is applied to the local record list first, then the image is
//! saved, then the edit is handed to the [`SyncEngine`]. Save and propagation
//! failures are reported in the [`EditOutcome`]; they never undo the local
//! edit. Bulk clears and record replacement are local only.

use std::cell::RefCell;
use std::collections::HashSet;

use crate::error::{EditorError, StoreError};
use crate::model::{
    AnnotationIdentity, AnnotationKind, AnnotationRecord, Direction, ImageId, ImageInfo, Point,
    RecordOrigin, next_local_id,
};
use crate::series::TimeSeriesProvider;
use crate::store::{AnnotationStore, load_or_empty};
use crate::sync::{SyncEngine, SyncOperation, SyncOutcome, SyncRequest, TargetScope};

/// Result of a synchronized edit.
#[derive(Debug, Clone, PartialEq)]
pub struct EditOutcome {
    /// The record after the edit (before it, for deletes).
    pub record: AnnotationRecord,
    /// Whether the open image was saved.
    pub saved: Result<(), StoreError>,
    /// Propagation result.
    pub sync: SyncOutcome,
}

impl EditOutcome {
    /// Images the propagation changed.
    pub fn synced_to(&self) -> Vec<ImageId> {
        self.sync.applied_images()
    }
}

/// Result of a local-only edit.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalOutcome {
    /// The records the image held before the edit.
    pub previous: Vec<AnnotationRecord>,
    pub saved: Result<(), StoreError>,
}

#[derive(Debug, Clone)]
struct OpenImage {
    info: ImageInfo,
    records: Vec<AnnotationRecord>,
    /// Unsaved directions shown for one record.
    preview: Option<(AnnotationIdentity, Vec<Direction>)>,
    /// The last save failed.
    dirty: bool,
}

impl OpenImage {
    fn position(&self, identity: &AnnotationIdentity) -> Option<usize> {
        self.records.iter().position(|r| r.has_identity(identity))
    }

    fn find_mut(&mut self, identity: &AnnotationIdentity) -> Result<&mut AnnotationRecord, EditorError> {
        self.records
            .iter_mut()
            .find(|r| r.has_identity(identity))
            .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))
    }

    fn displayed(&self) -> Vec<AnnotationRecord> {
        let mut records = self.records.clone();
        if let Some((identity, directions)) = &self.preview
            && let Some(record) = records.iter_mut().find(|r| r.has_identity(identity))
            && let Err(e) = record.set_directions(directions.clone())
        {
            log::warn!("Dropping direction preview for {}: {}", identity, e);
        }
        records
    }
}

/// Marks a record as in flight until dropped.
struct BusyRecord<'a> {
    busy: &'a RefCell<HashSet<AnnotationIdentity>>,
    identity: AnnotationIdentity,
}

impl<'a> BusyRecord<'a> {
    fn claim(
        busy: &'a RefCell<HashSet<AnnotationIdentity>>,
        identity: &AnnotationIdentity,
    ) -> Result<Self, EditorError> {
        if !busy.borrow_mut().insert(identity.clone()) {
            return Err(EditorError::RecordBusy(identity.clone()));
        }
        Ok(Self {
            busy,
            identity: identity.clone(),
        })
    }
}

impl Drop for BusyRecord<'_> {
    fn drop(&mut self) {
        self.busy.borrow_mut().remove(&self.identity);
    }
}

/// Edits the records of one open image and synchronizes them.
pub struct AnnotationEditor<S, P> {
    engine: SyncEngine<S, P>,
    max_directions: u8,
    open: RefCell<Option<OpenImage>>,
    busy: RefCell<HashSet<AnnotationIdentity>>,
}

impl<S: AnnotationStore, P: TimeSeriesProvider> AnnotationEditor<S, P> {
    pub fn new(engine: SyncEngine<S, P>) -> Self {
        Self {
            engine,
            max_directions: crate::constants::DEFAULT_MAX_DIRECTIONS,
            open: RefCell::new(None),
            busy: RefCell::new(HashSet::new()),
        }
    }

    /// Direction capacity given to newly placed records.
    pub fn with_max_directions(mut self, max_directions: u8) -> Self {
        self.max_directions = max_directions.max(1);
        self
    }

    pub fn engine(&self) -> &SyncEngine<S, P> {
        &self.engine
    }

    pub fn store(&self) -> &S {
        self.engine.store()
    }

    pub fn max_directions(&self) -> u8 {
        self.max_directions
    }

    // ------------------------------------------------------------------------
    // Open image
    // ------------------------------------------------------------------------

    /// Load an image's records and make it the open image.
    ///
    /// A previous image with a failed save is flushed first; if that fails
    /// again its changes are dropped with a warning.
    pub async fn open_image(&self, image: ImageInfo) -> Result<(), EditorError> {
        if self.is_dirty()
            && let Err(e) = self.save_open().await
        {
            log::warn!("Dropping unsaved changes while switching image: {}", e);
        }

        let records = load_or_empty(self.engine.store(), &image).await?;
        log::debug!("Opened {} with {} record(s)", image.id, records.len());
        *self.open.borrow_mut() = Some(OpenImage {
            info: image,
            records,
            preview: None,
            dirty: false,
        });
        Ok(())
    }

    /// Flush pending changes and close the open image.
    pub async fn close(&self) -> Result<(), EditorError> {
        self.flush().await?;
        self.open.borrow_mut().take();
        Ok(())
    }

    /// Close the open image without saving or synchronizing anything.
    pub fn discard(&self) -> Option<ImageInfo> {
        let open = self.open.borrow_mut().take()?;
        if open.dirty || open.preview.is_some() {
            log::debug!("Discarding unsaved changes on {}", open.info.id);
        }
        Some(open.info)
    }

    /// Retry a failed save of the open image.
    pub async fn flush(&self) -> Result<(), EditorError> {
        if self.is_dirty() {
            self.save_open().await?;
        }
        Ok(())
    }

    pub fn current_image(&self) -> Option<ImageInfo> {
        self.open.borrow().as_ref().map(|o| o.info.clone())
    }

    pub fn is_open(&self) -> bool {
        self.open.borrow().is_some()
    }

    /// Whether the last save of the open image failed.
    pub fn is_dirty(&self) -> bool {
        self.open.borrow().as_ref().is_some_and(|o| o.dirty)
    }

    /// Records of the open image as displayed, preview included.
    pub fn records(&self) -> Vec<AnnotationRecord> {
        self.open
            .borrow()
            .as_ref()
            .map(OpenImage::displayed)
            .unwrap_or_default()
    }

    /// One record of the open image as displayed.
    pub fn record(&self, identity: &AnnotationIdentity) -> Option<AnnotationRecord> {
        self.records().into_iter().find(|r| r.has_identity(identity))
    }

    /// The record nearest to `point` within the hit radius.
    pub fn hit_test(&self, point: Point) -> Option<AnnotationIdentity> {
        let open = self.open.borrow();
        open.as_ref()?
            .records
            .iter()
            .filter(|r| r.contains_point(&point))
            .min_by(|a, b| {
                a.position
                    .distance_to(&point)
                    .total_cmp(&b.position.distance_to(&point))
            })
            .map(AnnotationRecord::identity)
    }

    /// First unused order for a kind on the open image.
    pub fn next_order(&self, kind: &AnnotationKind) -> u32 {
        self.open
            .borrow()
            .as_ref()
            .and_then(|o| o.records.iter().filter(|r| &r.kind == kind).map(|r| r.order).max())
            .map_or(1, |order| order + 1)
    }

    /// Whether a record is currently being propagated.
    pub fn is_busy(&self, identity: &AnnotationIdentity) -> bool {
        self.busy.borrow().contains(identity)
    }

    // ------------------------------------------------------------------------
    // Synchronized edits
    // ------------------------------------------------------------------------

    /// Place a keypoint with the next free order of `kind`.
    pub async fn place(&self, kind: AnnotationKind, position: Point) -> Result<EditOutcome, EditorError> {
        let identity = AnnotationIdentity::new(self.next_order(&kind), kind);
        self.add(identity, position, TargetScope::Later).await
    }

    /// Add a record with the default direction capacity.
    pub async fn add(
        &self,
        identity: AnnotationIdentity,
        position: Point,
        scope: TargetScope,
    ) -> Result<EditOutcome, EditorError> {
        self.add_with_capacity(identity, position, self.max_directions, scope)
            .await
    }

    /// Add a record that can hold up to `max_directions` directions.
    pub async fn add_with_capacity(
        &self,
        identity: AnnotationIdentity,
        position: Point,
        max_directions: u8,
        scope: TargetScope,
    ) -> Result<EditOutcome, EditorError> {
        if identity.order == 0 {
            return Err(EditorError::InvalidOrder);
        }
        let busy = BusyRecord::claim(&self.busy, &identity)?;
        let (image, record) = self.mutate(|open| {
            if open.position(&identity).is_some() {
                return Err(EditorError::DuplicateIdentity(identity.clone()));
            }
            let record = AnnotationRecord::new(
                next_local_id(&open.records),
                identity.clone(),
                position,
                max_directions,
                RecordOrigin::User,
            );
            open.records.push(record.clone());
            Ok((open.info.clone(), record))
        })?;
        log::debug!(
            "Added {} at ({:.1}, {:.1}) on {}",
            identity,
            position.x,
            position.y,
            image.id
        );
        Ok(self
            .commit(image, SyncOperation::Add { record }, scope, busy)
            .await)
    }

    /// Put a previously removed record back, keeping its content.
    pub async fn restore(
        &self,
        record: AnnotationRecord,
        scope: TargetScope,
    ) -> Result<EditOutcome, EditorError> {
        let identity = record.identity();
        let busy = BusyRecord::claim(&self.busy, &identity)?;
        let (image, record) = self.mutate(|open| {
            if open.position(&identity).is_some() {
                return Err(EditorError::DuplicateIdentity(identity.clone()));
            }
            let mut record = record;
            if open.records.iter().any(|r| r.local_id == record.local_id) {
                record.local_id = next_local_id(&open.records);
            }
            record.touch();
            open.records.push(record.clone());
            Ok((open.info.clone(), record))
        })?;
        log::debug!("Restored {} on {}", identity, image.id);
        Ok(self
            .commit(image, SyncOperation::Add { record }, scope, busy)
            .await)
    }

    /// Move a record. With `with_directions`, click origins move along and
    /// the directions are propagated too.
    pub async fn move_to(
        &self,
        identity: &AnnotationIdentity,
        position: Point,
        with_directions: bool,
        scope: TargetScope,
    ) -> Result<EditOutcome, EditorError> {
        let busy = BusyRecord::claim(&self.busy, identity)?;
        let (image, record, previous) = self.mutate(|open| {
            let record = open.find_mut(identity)?;
            let previous = record.position;
            if with_directions {
                let delta = Point::new(position.x - previous.x, position.y - previous.y);
                let shifted = record
                    .directions()
                    .iter()
                    .map(|d| Direction {
                        angle: d.angle,
                        origin: d.origin.offset_by(delta),
                    })
                    .collect();
                record.set_directions(shifted)?;
            }
            record.set_position(position);
            let record = record.clone();
            Ok((open.info.clone(), record, previous))
        })?;
        log::debug!(
            "Moved {} ({:.1}, {:.1}) -> ({:.1}, {:.1}) on {}",
            identity,
            previous.x,
            previous.y,
            position.x,
            position.y,
            image.id
        );
        let operation = SyncOperation::Move {
            record,
            previous,
            with_directions,
        };
        Ok(self.commit(image, operation, scope, busy).await)
    }

    /// Remove a record.
    pub async fn delete(
        &self,
        identity: &AnnotationIdentity,
        scope: TargetScope,
    ) -> Result<EditOutcome, EditorError> {
        let busy = BusyRecord::claim(&self.busy, identity)?;
        let (image, record) = self.mutate(|open| {
            let index = open
                .position(identity)
                .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))?;
            if open.preview.as_ref().is_some_and(|(id, _)| id == identity) {
                open.preview = None;
            }
            Ok((open.info.clone(), open.records.remove(index)))
        })?;
        log::debug!("Deleted {} on {}", identity, image.id);
        Ok(self
            .commit(image, SyncOperation::Delete { record }, scope, busy)
            .await)
    }

    /// Replace a record's direction list.
    pub async fn set_directions(
        &self,
        identity: &AnnotationIdentity,
        directions: Vec<Direction>,
        scope: TargetScope,
    ) -> Result<EditOutcome, EditorError> {
        let busy = BusyRecord::claim(&self.busy, identity)?;
        let (image, record) = self.mutate(|open| {
            let record = open.find_mut(identity)?;
            record.set_directions(directions)?;
            let record = record.clone();
            if open.preview.as_ref().is_some_and(|(id, _)| id == identity) {
                open.preview = None;
            }
            Ok((open.info.clone(), record))
        })?;
        log::debug!(
            "Set {} direction(s) on {} ({})",
            record.directions().len(),
            identity,
            image.id
        );
        Ok(self
            .commit(image, SyncOperation::EditDirection { record }, scope, busy)
            .await)
    }

    // ------------------------------------------------------------------------
    // Local-only edits
    // ------------------------------------------------------------------------

    /// Show directions on a record without saving or synchronizing them.
    pub fn preview_directions(
        &self,
        identity: &AnnotationIdentity,
        directions: Vec<Direction>,
    ) -> Result<(), EditorError> {
        self.mutate(|open| {
            let index = open
                .position(identity)
                .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))?;
            let max = open.records[index].max_directions();
            if directions.len() > usize::from(max) {
                return Err(crate::error::DirectionLimitError {
                    max,
                    got: directions.len(),
                }
                .into());
            }
            open.preview = Some((identity.clone(), directions));
            Ok(())
        })
    }

    /// Drop any direction preview, showing the stored directions again.
    pub fn clear_preview(&self) {
        if let Some(open) = self.open.borrow_mut().as_mut() {
            open.preview = None;
        }
    }

    /// Remove every record of the open image. Not propagated.
    pub async fn clear_image(&self) -> Result<LocalOutcome, EditorError> {
        let previous = self.mutate(|open| {
            open.preview = None;
            Ok(std::mem::take(&mut open.records))
        })?;
        log::info!("Cleared {} record(s) from the open image", previous.len());
        let saved = self.save_open().await;
        Ok(LocalOutcome { previous, saved })
    }

    /// Replace the open image's records wholesale. Not propagated.
    pub async fn replace_records(
        &self,
        records: Vec<AnnotationRecord>,
    ) -> Result<LocalOutcome, EditorError> {
        let mut seen = HashSet::new();
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.identity())) {
            return Err(EditorError::DuplicateIdentity(dup.identity()));
        }
        let previous = self.mutate(|open| {
            open.preview = None;
            Ok(std::mem::replace(&mut open.records, records))
        })?;
        let saved = self.save_open().await;
        Ok(LocalOutcome { previous, saved })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn mutate<T>(
        &self,
        edit: impl FnOnce(&mut OpenImage) -> Result<T, EditorError>,
    ) -> Result<T, EditorError> {
        let mut open = self.open.borrow_mut();
        let open = open.as_mut().ok_or(EditorError::NoImageOpen)?;
        edit(open)
    }

    async fn save_open(&self) -> Result<(), StoreError> {
        let snapshot = {
            let open = self.open.borrow();
            open.as_ref().map(|o| (o.info.clone(), o.records.clone()))
        };
        let Some((image, records)) = snapshot else {
            return Ok(());
        };

        let result = self.engine.store().save(&image, &records).await;
        if let Some(open) = self.open.borrow_mut().as_mut()
            && open.info.id == image.id
        {
            open.dirty = result.is_err();
        }
        if let Err(e) = &result {
            log::warn!("Failed to save annotations for {}: {}", image.id, e);
        }
        result
    }

    async fn commit(
        &self,
        image: ImageInfo,
        operation: SyncOperation,
        scope: TargetScope,
        _busy: BusyRecord<'_>,
    ) -> EditOutcome {
        let saved = self.save_open().await;
        let record = operation.record().clone();
        let request = SyncRequest::new(operation, image).with_scope(scope);
        let sync = self.engine.propagate(request).await;
        EditOutcome {
            record,
            saved,
            sync,
        }
    }
}
