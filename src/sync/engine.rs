//! Forward propagation of single-image mutations.
//!
//! The engine owns its enable flag, its in-flight flag and its FIFO queue, so
//! independent sessions never share state. Runs are serialized: a request
//! made while another run is in flight is queued and executed by that run
//! before it releases the guard.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use super::operation::{MovePolicy, SyncOperation, SyncRequest, TargetScope};
use super::report::{FailedImage, SyncOutcome, SyncReport, TargetOutcome};
use crate::config::SyncSettings;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::model::{AnnotationRecord, ImageInfo, OperationKind, Point, find_by_identity, next_local_id};
use crate::series::{TimeSeriesIndex, TimeSeriesProvider};
use crate::store::{AnnotationStore, load_or_empty};

/// Estimates how a position on one image maps onto another image of the
/// same series (e.g. by feature matching). Returns the offset to add.
pub trait OffsetEstimator {
    fn estimate(&self, source: &ImageInfo, target: &ImageInfo, position: Point) -> Option<Point>;
}

impl<F> OffsetEstimator for F
where
    F: Fn(&ImageInfo, &ImageInfo, Point) -> Option<Point>,
{
    fn estimate(&self, source: &ImageInfo, target: &ImageInfo, position: Point) -> Option<Point> {
        self(source, target, position)
    }
}

/// Clears the in-flight flag even when a run's future is dropped midway.
struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn engage(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Propagates add/move/delete/direction edits to later images of a series.
pub struct SyncEngine<S, P> {
    store: S,
    series: P,
    move_policy: MovePolicy,
    estimator: Option<Box<dyn OffsetEstimator>>,
    calibrate: bool,
    enabled: Cell<bool>,
    syncing: Cell<bool>,
    queue: RefCell<VecDeque<SyncRequest>>,
    events: Rc<EventBus>,
}

impl<S: AnnotationStore, P: TimeSeriesProvider> SyncEngine<S, P> {
    /// Create an enabled engine with the default `Skip` move policy.
    pub fn new(store: S, series: P) -> Self {
        Self {
            store,
            series,
            move_policy: MovePolicy::default(),
            estimator: None,
            calibrate: true,
            enabled: Cell::new(true),
            syncing: Cell::new(false),
            queue: RefCell::new(VecDeque::new()),
            events: Rc::new(EventBus::new()),
        }
    }

    /// Create an engine configured from settings.
    pub fn with_settings(store: S, series: P, settings: &SyncSettings) -> Self {
        let engine = Self::new(store, series).with_move_policy(settings.move_policy);
        engine.enabled.set(settings.enabled);
        Self {
            calibrate: settings.calibrate_positions,
            ..engine
        }
    }

    pub fn with_move_policy(mut self, policy: MovePolicy) -> Self {
        self.move_policy = policy;
        self
    }

    /// Install the position calibration helper used for created records.
    pub fn with_offset_estimator(mut self, estimator: impl OffsetEstimator + 'static) -> Self {
        self.estimator = Some(Box::new(estimator));
        self
    }

    /// Publish on a shared bus instead of a private one.
    pub fn with_events(mut self, events: Rc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn series_provider(&self) -> &P {
        &self.series
    }

    pub fn move_policy(&self) -> MovePolicy {
        self.move_policy
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Gate all propagation. Disabling stops a running propagation before
    /// its next target; local edits are unaffected.
    pub fn set_enabled(&self, enabled: bool) {
        if self.enabled.replace(enabled) != enabled {
            log::debug!("Synchronization enabled = {}", enabled);
        }
    }

    /// Whether a propagation run is in flight.
    pub fn is_syncing(&self) -> bool {
        self.syncing.get()
    }

    /// Number of requests waiting behind the run in flight.
    pub fn queued(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Current ordered series of an image, if it belongs to one.
    pub fn series_for(&self, image: &ImageInfo) -> Option<TimeSeriesIndex> {
        TimeSeriesIndex::load(&self.series, &image.series_key())
    }

    /// Propagate a mutation to later images of the source's time series.
    ///
    /// Never fails for per-image problems; they are collected in the report.
    pub async fn propagate(&self, request: SyncRequest) -> SyncOutcome {
        if !self.enabled.get() {
            log::debug!(
                "Synchronization disabled, not propagating {} of {}",
                request.operation.kind().name(),
                request.operation.record().identity()
            );
            return SyncOutcome::Completed(Self::empty_report(&request).short_circuit("disabled"));
        }

        if self.syncing.get() {
            let position = {
                let mut queue = self.queue.borrow_mut();
                queue.push_back(request);
                queue.len()
            };
            log::debug!("Propagation in flight, queued request at position {}", position);
            self.events.emit(SyncEvent::Queued { position });
            return SyncOutcome::Queued { position };
        }

        let _in_flight = InFlight::engage(&self.syncing);

        // Requests left behind by an abandoned run still go first
        let leftover = self.queue.borrow().len();
        if leftover > 0 {
            log::debug!("Draining {} request(s) left by an abandoned run", leftover);
            self.drain_queue().await;
        }

        let report = self.run(&request).await;
        self.publish(&report);
        self.drain_queue().await;

        SyncOutcome::Completed(report)
    }

    async fn drain_queue(&self) {
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(next) = next else { break };
            let queued_report = if self.enabled.get() {
                self.run(&next).await
            } else {
                Self::empty_report(&next).short_circuit("disabled")
            };
            self.publish(&queued_report);
        }
    }

    fn empty_report(request: &SyncRequest) -> SyncReport {
        SyncReport::new(
            request.operation.kind(),
            request.operation.identity(),
            request.source.id.clone(),
        )
    }

    fn publish(&self, report: &SyncReport) {
        if report.has_failures() {
            log::warn!("{}", report);
        } else {
            log::debug!("{}", report);
        }
        self.events.emit(SyncEvent::Completed(report.clone()));
    }

    async fn run(&self, request: &SyncRequest) -> SyncReport {
        let mut report = Self::empty_report(request);

        let Some(index) = self.series_for(&request.source) else {
            return report.short_circuit("no time series");
        };
        let Some(source_pos) = index.position_of(&request.source.id) else {
            return report.short_circuit("source image not in time series");
        };

        let targets: Vec<&ImageInfo> = match &request.scope {
            TargetScope::Later => index.after(source_pos).iter().collect(),
            TargetScope::Images(ids) => {
                let mut picked = Vec::new();
                for id in ids {
                    match index.position_of(id) {
                        Some(pos) if pos > source_pos => {
                            if let Some(img) = index.get(pos) {
                                picked.push(img);
                            }
                        }
                        _ => {
                            log::debug!("Target {} is not after {}, skipping", id, request.source.id);
                            report.skipped += 1;
                        }
                    }
                }
                picked
            }
        };

        log::debug!(
            "Propagating {} of {} from {} to {} image(s)",
            request.operation.kind().name(),
            report.identity,
            request.source.id,
            targets.len()
        );

        for target in targets {
            if !self.enabled.get() {
                log::info!("Synchronization disabled mid-run, stopping before {}", target.id);
                report.cancelled = true;
                break;
            }
            match self
                .apply_to_target(&request.operation, &request.source, target)
                .await
            {
                Ok(TargetOutcome::Applied) => report.applied.push(target.id.clone()),
                Ok(TargetOutcome::Unchanged) => report.unchanged += 1,
                Ok(TargetOutcome::Skipped) => report.skipped += 1,
                Err(error) => report.failed.push(FailedImage {
                    image: target.id.clone(),
                    error,
                }),
            }
        }

        report
    }

    /// Position a propagated record should take on `target`.
    fn target_position(&self, source: &ImageInfo, target: &ImageInfo, position: Point) -> Point {
        if !self.calibrate {
            return position;
        }
        match &self.estimator {
            Some(estimator) => estimator
                .estimate(source, target, position)
                .map_or(position, |offset| position.offset_by(offset)),
            None => position,
        }
    }

    async fn apply_to_target(
        &self,
        operation: &SyncOperation,
        source: &ImageInfo,
        target: &ImageInfo,
    ) -> Result<TargetOutcome, SyncError> {
        let persistence = |source| SyncError::PersistenceFailure {
            image: target.id.clone(),
            source,
        };

        let mut records = load_or_empty(&self.store, target)
            .await
            .map_err(persistence)?;

        let record = operation.record();
        let identity = record.identity();
        let existing = {
            let matches = find_by_identity(&records, &identity);
            if matches.len() > 1 {
                return Err(SyncError::IntegrityViolation {
                    image: target.id.clone(),
                    identity,
                    count: matches.len(),
                });
            }
            matches.first().map(|(i, _)| *i)
        };

        match (operation, existing) {
            (SyncOperation::Add { .. }, Some(i)) => {
                let expected = self.target_position(source, target, record.position);
                if records[i].same_content(&expected, record.directions()) {
                    log::trace!("{} already present on {}", identity, target.id);
                    return Ok(TargetOutcome::Unchanged);
                }
                log::warn!(
                    "Conflict: {} already exists on {} with different content",
                    identity,
                    target.id
                );
                return Err(SyncError::ConflictDetected {
                    image: target.id.clone(),
                    identity,
                    existing: records[i].local_id,
                });
            }
            (SyncOperation::Add { .. }, None) => {
                let created = self.create_on(&records, record, source, target, OperationKind::Add);
                records.push(created);
            }
            (
                SyncOperation::Move {
                    previous,
                    with_directions,
                    ..
                },
                Some(i),
            ) => {
                let position = self.target_position(source, target, record.position);
                let target_record = &mut records[i];
                let position_same = target_record.position.approx_eq(&position);
                let directions_same = !*with_directions
                    || crate::model::directions_match(target_record.directions(), record.directions());
                if position_same && directions_same {
                    return Ok(TargetOutcome::Unchanged);
                }
                log::trace!(
                    "Moving {} on {} ({:.1},{:.1}) -> ({:.1},{:.1}), source was at ({:.1},{:.1})",
                    identity,
                    target.id,
                    target_record.position.x,
                    target_record.position.y,
                    position.x,
                    position.y,
                    previous.x,
                    previous.y
                );
                if *with_directions && !directions_same {
                    target_record
                        .set_directions(record.directions().to_vec())
                        .map_err(|limit| SyncError::DirectionLimit {
                            image: target.id.clone(),
                            identity: identity.clone(),
                            limit,
                        })?;
                }
                target_record.set_position(position);
            }
            (SyncOperation::Move { .. }, None) => match self.move_policy {
                MovePolicy::Skip => {
                    log::trace!("{} not on {}, move skipped", identity, target.id);
                    return Ok(TargetOutcome::Skipped);
                }
                MovePolicy::Create => {
                    let created =
                        self.create_on(&records, record, source, target, OperationKind::Move);
                    records.push(created);
                }
            },
            (SyncOperation::Delete { .. }, Some(i)) => {
                records.remove(i);
            }
            (SyncOperation::Delete { .. }, None) => return Ok(TargetOutcome::Unchanged),
            (SyncOperation::EditDirection { .. }, Some(i)) => {
                let target_record = &mut records[i];
                if crate::model::directions_match(target_record.directions(), record.directions()) {
                    return Ok(TargetOutcome::Unchanged);
                }
                target_record
                    .set_directions(record.directions().to_vec())
                    .map_err(|limit| SyncError::DirectionLimit {
                        image: target.id.clone(),
                        identity: identity.clone(),
                        limit,
                    })?;
            }
            (SyncOperation::EditDirection { .. }, None) => return Ok(TargetOutcome::Unchanged),
        }

        self.store
            .save(target, &records)
            .await
            .map_err(persistence)?;
        Ok(TargetOutcome::Applied)
    }

    fn create_on(
        &self,
        records: &[AnnotationRecord],
        record: &AnnotationRecord,
        source: &ImageInfo,
        target: &ImageInfo,
        op: OperationKind,
    ) -> AnnotationRecord {
        let position = self.target_position(source, target, record.position);
        log::trace!("Creating {} on {} via {}", record.identity(), target.id, op.name());
        record.propagated_copy(next_local_id(records), position, op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnnotationIdentity, Direction, RecordOrigin, SeriesKey};
    use crate::series::ImageCatalog;
    use crate::store::MemoryStore;

    fn images() -> Vec<ImageInfo> {
        (1..=3)
            .map(|i| ImageInfo::new(format!("I{}", i), "p", "side", i64::from(i) * 100))
            .collect()
    }

    fn engine() -> SyncEngine<MemoryStore, ImageCatalog> {
        SyncEngine::new(MemoryStore::new(), ImageCatalog::with_images(images()))
    }

    fn keypoint(order: u32, x: f32, y: f32) -> AnnotationRecord {
        AnnotationRecord::new(
            1,
            AnnotationIdentity::regular(order),
            Point::new(x, y),
            1,
            RecordOrigin::User,
        )
    }

    #[test]
    fn test_disabled_short_circuits() {
        let engine = engine();
        engine.set_enabled(false);
        let request = SyncRequest::new(
            SyncOperation::Add {
                record: keypoint(5, 10.0, 10.0),
            },
            images()[0].clone(),
        );
        let outcome = pollster::block_on(engine.propagate(request));
        let report = outcome.report().unwrap();
        assert_eq!(report.synced(), 0);
        assert_eq!(report.message.as_deref(), Some("disabled"));
        assert!(!engine.store().contains(&images()[1]));
    }

    #[test]
    fn test_missing_series_short_circuits() {
        let engine = engine();
        let stray = ImageInfo::new("X", "other", "side", 0);
        let request = SyncRequest::new(
            SyncOperation::Delete {
                record: keypoint(1, 0.0, 0.0),
            },
            stray,
        );
        let report = pollster::block_on(engine.propagate(request)).into_report().unwrap();
        assert_eq!(report.message.as_deref(), Some("no time series"));
        assert!(engine.series_for(&ImageInfo::new("X", "other", "side", 0)).is_none());
        assert!(
            engine
                .series_for(&images()[0])
                .is_some_and(|s| s.key() == &SeriesKey::new("p", "side"))
        );
    }

    #[test]
    fn test_move_skips_missing_by_default() {
        let engine = engine();
        let mut moved = keypoint(2, 50.0, 50.0);
        moved.local_id = 3;
        let request = SyncRequest::new(
            SyncOperation::Move {
                record: moved,
                previous: Point::new(10.0, 10.0),
                with_directions: false,
            },
            images()[0].clone(),
        );
        let report = pollster::block_on(engine.propagate(request)).into_report().unwrap();
        assert_eq!(report.synced(), 0);
        assert_eq!(report.skipped, 2);
        assert!(engine.store().records(&images()[1]).unwrap().is_empty());
    }

    #[test]
    fn test_move_create_policy_materializes() {
        let engine = engine().with_move_policy(MovePolicy::Create);
        let request = SyncRequest::new(
            SyncOperation::Move {
                record: keypoint(2, 50.0, 50.0),
                previous: Point::new(10.0, 10.0),
                with_directions: false,
            },
            images()[0].clone(),
        );
        let report = pollster::block_on(engine.propagate(request)).into_report().unwrap();
        assert_eq!(report.synced(), 2);
        let created = engine.store().records(&images()[2]).unwrap();
        assert_eq!(created[0].origin, RecordOrigin::Propagated(OperationKind::Move));
    }

    #[test]
    fn test_offset_estimator_shifts_created_records() {
        let engine = engine().with_offset_estimator(
            |_: &ImageInfo, target: &ImageInfo, _: Point| {
                (target.id == "I3").then(|| Point::new(5.0, -5.0))
            },
        );
        let request = SyncRequest::new(
            SyncOperation::Add {
                record: keypoint(1, 10.0, 10.0),
            },
            images()[0].clone(),
        );
        pollster::block_on(engine.propagate(request.clone()));
        let i2 = engine.store().records(&images()[1]).unwrap();
        let i3 = engine.store().records(&images()[2]).unwrap();
        assert_eq!(i2[0].position, Point::new(10.0, 10.0));
        assert_eq!(i3[0].position, Point::new(15.0, 5.0));

        // Calibrated copies are recognized on retry rather than reported as conflicts
        let retry = pollster::block_on(engine.propagate(request)).into_report().unwrap();
        assert!(retry.failed.is_empty());
        assert_eq!(retry.unchanged, 2);
    }

    #[test]
    fn test_edit_direction_respects_target_bound() {
        let engine = engine();
        engine.store().insert(&images()[1], &[keypoint(4, 0.0, 0.0)]).unwrap();

        let mut source = AnnotationRecord::new(
            1,
            AnnotationIdentity::regular(4),
            Point::new(0.0, 0.0),
            2,
            RecordOrigin::User,
        );
        let dir = Direction::from_click(source.position, Point::new(1.0, 0.0));
        source.set_directions(vec![dir, dir]).unwrap();

        let request = SyncRequest::new(
            SyncOperation::EditDirection { record: source },
            images()[0].clone(),
        );
        let report = pollster::block_on(engine.propagate(request)).into_report().unwrap();
        assert!(matches!(
            report.failure_for("I2"),
            Some(SyncError::DirectionLimit { .. })
        ));
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn test_duplicate_identity_on_target_is_integrity_violation() {
        let engine = engine();
        let mut twin = keypoint(7, 1.0, 1.0);
        twin.local_id = 2;
        engine
            .store()
            .insert(&images()[1], &[keypoint(7, 0.0, 0.0), twin])
            .unwrap();
        let request = SyncRequest::new(
            SyncOperation::Delete {
                record: keypoint(7, 0.0, 0.0),
            },
            images()[0].clone(),
        );
        let report = pollster::block_on(engine.propagate(request)).into_report().unwrap();
        assert!(matches!(
            report.failure_for("I2"),
            Some(SyncError::IntegrityViolation { count: 2, .. })
        ));
        assert_eq!(engine.store().records(&images()[1]).unwrap().len(), 2);
    }
}
