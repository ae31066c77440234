//! Multi-direction sessions, undo/redo and configuration through the workbench.

use std::rc::Rc;

use super::support::{TestStore, catalog, init_logging, record, series};
use crate::config::EngineConfig;
use crate::direction::{AssignmentMode, HeadlessSelector, MultiPhase};
use crate::error::{EditorError, ModeError, SyncError};
use crate::events::{DirectionEvent, EventLog};
use crate::model::{AnnotationIdentity, AnnotationRecord, ImageInfo, OperationKind, Point, RecordOrigin, SeriesKey};
use crate::series::ImageCatalog;
use crate::workbench::{ClickOutcome, Workbench};

type Bench = Workbench<Rc<TestStore>, Rc<ImageCatalog>, HeadlessSelector>;

fn bench_with(config: &EngineConfig, store: Rc<TestStore>, images: &[ImageInfo]) -> (Bench, EventLog) {
    init_logging();
    let mut bench = Workbench::new(store, catalog(images), HeadlessSelector::new(), config);
    let log = bench.events().recorder();
    pollster::block_on(bench.open_series(&SeriesKey::new("p1", "side"))).unwrap();
    (bench, log)
}

fn multi_config(max: u8) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.directions.default_max_directions = max;
    config
}

fn direction_reports(log: &EventLog) -> usize {
    log.sync_reports()
        .iter()
        .filter(|r| r.operation == OperationKind::EditDirection)
        .count()
}

#[test]
fn test_multi_direction_is_pushed_once() {
    let images = series(3);
    let store = Rc::new(TestStore::new());
    let (mut bench, log) = bench_with(&multi_config(3), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(0.0, 0.0)).await.unwrap();
        assert_eq!(bench.select_at(Point::new(2.0, 2.0)), Some(id.clone()));

        assert_eq!(bench.secondary_trigger(None).await.unwrap(), MultiPhase::CountSelection);
        assert_eq!(bench.scroll(5).unwrap(), 3);
        assert_eq!(bench.secondary_trigger(None).await.unwrap(), MultiPhase::Collecting);
        // Confirming twice is a phase error
        assert!(matches!(
            bench.secondary_trigger(None).await,
            Err(ModeError::WrongPhase { .. })
        ));

        for (i, click) in [Point::new(10.0, 0.0), Point::new(0.0, 10.0)].into_iter().enumerate() {
            let outcome = bench.primary_click(click).await.unwrap();
            assert_eq!(
                outcome,
                ClickOutcome::MultiCollected {
                    collected: i + 1,
                    target_count: 3
                }
            );
        }
        // Intermediate clicks are only previewed
        assert_eq!(bench.editor().record(&id).unwrap().directions().len(), 2);
        assert!(store.record(&images[0], &id).unwrap().lacks_direction());
        assert_eq!(direction_reports(&log), 0);

        let outcome = bench.primary_click(Point::new(-10.0, 0.0)).await.unwrap();
        let ClickOutcome::MultiCompleted(edit) = outcome else {
            panic!("third click should finish the session");
        };
        assert_eq!(edit.synced_to(), vec!["I2".to_string(), "I3".to_string()]);
    });

    assert_eq!(direction_reports(&log), 1);
    assert!(bench.multi_session().is_none());
    for image in &images {
        assert_eq!(store.record(image, &id).unwrap().directions().len(), 3);
    }
    assert_eq!(
        bench.history().undo_description().as_deref(),
        Some("Set 3 direction(s) on #1 (regular)")
    );
}

#[test]
fn test_interrupted_multi_direction_restores_record() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    let (mut bench, log) = bench_with(&multi_config(2), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(0.0, 0.0)).await.unwrap();
        bench.secondary_trigger(Some(id.clone())).await.unwrap();
        bench.set_direction_count(2).unwrap();
        bench.secondary_trigger(None).await.unwrap();
        bench.primary_click(Point::new(5.0, 5.0)).await.unwrap();
        assert_eq!(bench.editor().record(&id).unwrap().directions().len(), 1);

        bench.next_image().await.unwrap();
        bench.prev_image().await.unwrap();
    });

    assert!(bench.multi_session().is_none());
    assert!(bench.editor().record(&id).unwrap().lacks_direction());
    assert_eq!(direction_reports(&log), 0);
    assert!(log.direction_events().iter().any(|e| matches!(
        e,
        DirectionEvent::MultiFinished {
            completed: false,
            ..
        }
    )));
}

#[test]
fn test_interrupted_multi_direction_keeps_existing_direction() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    let id = AnnotationIdentity::regular(1);
    let mut existing = AnnotationRecord::new(1, id.clone(), Point::new(0.0, 0.0), 3, RecordOrigin::User);
    existing
        .set_directions(vec![crate::model::Direction::from_click(
            Point::new(0.0, 0.0),
            Point::new(10.0, 0.0),
        )])
        .unwrap();
    store.insert(&images[0], &[existing]);
    let (mut bench, log) = bench_with(&multi_config(3), store.clone(), &images);

    pollster::block_on(async {
        assert_eq!(
            bench.secondary_trigger(Some(id.clone())).await.unwrap(),
            MultiPhase::CountSelection
        );
        bench.set_direction_count(3).unwrap();
        assert_eq!(bench.secondary_trigger(None).await.unwrap(), MultiPhase::Collecting);
        let outcome = bench.primary_click(Point::new(0.0, 10.0)).await.unwrap();
        assert_eq!(
            outcome,
            ClickOutcome::MultiCollected {
                collected: 2,
                target_count: 3
            }
        );
        assert_eq!(bench.editor().record(&id).unwrap().directions().len(), 2);

        bench.next_image().await.unwrap();
        bench.prev_image().await.unwrap();
    });

    assert!(bench.multi_session().is_none());
    for restored in [bench.editor().record(&id).unwrap(), store.record(&images[0], &id).unwrap()] {
        assert_eq!(restored.directions().len(), 1);
        assert!(restored.directions()[0].angle.abs() < 0.01);
    }
    assert_eq!(direction_reports(&log), 0);
}

#[test]
fn test_multi_direction_requires_capacity_and_valid_count() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(0.0, 0.0)).await.unwrap();
        assert_eq!(
            bench.secondary_trigger(Some(id.clone())).await.unwrap_err(),
            ModeError::NotMultiDirection(id.clone())
        );

        bench
            .add_keypoint(AnnotationIdentity::regular(7), Point::new(40.0, 40.0), Some(3))
            .await
            .unwrap();
        bench
            .secondary_trigger(Some(AnnotationIdentity::regular(7)))
            .await
            .unwrap();
    });
    assert_eq!(
        bench.set_direction_count(4),
        Err(ModeError::CountOutOfRange { requested: 4, max: 3 })
    );
    assert_eq!(bench.multi_session().map(|s| s.target_count()), Some(1));
    // Clicks during count selection never land
    assert!(matches!(
        pollster::block_on(bench.primary_click(Point::new(1.0, 1.0))),
        Err(ModeError::WrongPhase { .. })
    ));
}

#[test]
fn test_direction_bound_is_enforced_locally_and_on_targets() {
    let images = series(3);
    let store = Rc::new(TestStore::new());
    // I2 holds the same identity with room for one direction only
    store.insert(&images[1], &[record(1, 0.0, 0.0)]);
    let (mut bench, _log) = bench_with(&multi_config(3), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(0.0, 0.0)).await.unwrap();
        let dirs = vec![
            crate::model::Direction::from_click(Point::new(0.0, 0.0), Point::new(1.0, 0.0)),
            crate::model::Direction::from_click(Point::new(0.0, 0.0), Point::new(0.0, 1.0)),
        ];
        let edit = bench.set_directions(&id, dirs.clone()).await.unwrap();
        let report = edit.sync.report().unwrap();
        assert!(matches!(
            report.failure_for("I2"),
            Some(SyncError::DirectionLimit { .. })
        ));
        assert_eq!(report.applied, vec!["I3".to_string()]);

        let too_many = vec![dirs[0]; 4];
        assert!(matches!(
            bench.set_directions(&id, too_many).await,
            Err(EditorError::DirectionLimit(_))
        ));
    });
    assert!(store.record(&images[1], &id).unwrap().lacks_direction());
    assert_eq!(store.record(&images[2], &id).unwrap().directions().len(), 2);
}

#[test]
fn test_undo_and_redo_only_reach_synced_images() {
    let images = series(3);
    let store = Rc::new(TestStore::new());
    // A divergent record on I2 makes the add conflict there
    store.insert(&images[1], &[record(1, 99.0, 99.0)]);
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        let placed = bench.place_keypoint(Point::new(10.0, 10.0)).await.unwrap();
        assert_eq!(placed.synced_to(), vec!["I3".to_string()]);

        assert_eq!(bench.undo().await.unwrap().as_deref(), Some("Add keypoint #1 (regular)"));
        assert!(bench.editor().record(&id).is_none());
        assert!(store.record(&images[2], &id).is_none());
        assert_eq!(store.record(&images[1], &id).unwrap().position, Point::new(99.0, 99.0));

        assert!(bench.redo().await.unwrap().is_some());
        assert!(bench.editor().record(&id).is_some());
        assert!(store.record(&images[2], &id).is_some());
        assert_eq!(store.record(&images[1], &id).unwrap().position, Point::new(99.0, 99.0));
    });
}

#[test]
fn test_undo_move_restores_every_synced_image() {
    let images = series(3);
    let store = Rc::new(TestStore::new());
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(10.0, 10.0)).await.unwrap();
        bench.move_keypoint(&id, Point::new(40.0, 10.0)).await.unwrap();
        assert_eq!(store.record(&images[2], &id).unwrap().position, Point::new(40.0, 10.0));

        bench.undo().await.unwrap();
    });
    for image in &images {
        assert_eq!(store.record(image, &id).unwrap().position, Point::new(10.0, 10.0));
    }
    assert_eq!(bench.history().redo_count(), 1);
}

#[test]
fn test_clear_image_is_undoable_and_local() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(10.0, 10.0)).await.unwrap();
        bench.place_keypoint(Point::new(30.0, 10.0)).await.unwrap();
        let cleared = bench.clear_image().await.unwrap();
        assert_eq!(cleared.previous.len(), 2);
        assert!(store.records(&images[0]).is_empty());
        assert_eq!(store.records(&images[1]).len(), 2);

        bench.undo().await.unwrap();
    });
    assert_eq!(store.records(&images[0]).len(), 2);
}

#[test]
fn test_history_does_not_cross_images() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(10.0, 10.0)).await.unwrap();
        assert!(bench.history().can_undo());
        bench.navigate_to("I2").await.unwrap();
        assert!(!bench.history().can_undo());
        assert_eq!(bench.undo().await.unwrap(), None);
    });
    assert_eq!(store.records(&images[1]).len(), 1);
}

#[test]
fn test_delete_through_workbench_propagates() {
    let images = series(3);
    let store = Rc::new(TestStore::new());
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.place_keypoint(Point::new(10.0, 10.0)).await.unwrap();
        bench.select(Some(id.clone()));
        let deleted = bench.delete_keypoint(&id).await.unwrap();
        assert_eq!(deleted.synced_to(), vec!["I2".to_string(), "I3".to_string()]);
    });
    assert!(bench.selected().is_none());
    for image in &images {
        assert!(store.record(image, &id).is_none());
    }
}

#[test]
fn test_sync_toggle_and_custom_kinds() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);
    bench.set_annotation_kind(crate::model::AnnotationKind::Custom("leaf".into()));
    bench.set_sync_enabled(false);
    assert!(!bench.is_sync_enabled());

    let placed = pollster::block_on(bench.place_keypoint(Point::new(1.0, 1.0))).unwrap();
    assert_eq!(placed.record.identity(), AnnotationIdentity::custom(1, "leaf"));
    assert!(placed.synced_to().is_empty());
    assert!(store.records(&images[1]).is_empty());
    assert_eq!(bench.progress_label().as_deref(), Some("1/2"));
}

#[test]
fn test_config_drives_engine_settings() {
    let json = r#"{
        "version": 1,
        "sync": { "enabled": false, "move_policy": "create" },
        "directions": { "default_max_directions": 2 }
    }"#;
    let config = EngineConfig::from_json(json).unwrap();
    let images = series(2);
    let store = Rc::new(TestStore::new());
    store.insert(&images[0], &[record(1, 0.0, 0.0)]);
    let (mut bench, _log) = bench_with(&config, store.clone(), &images);
    assert!(!bench.is_sync_enabled());
    assert_eq!(bench.editor().max_directions(), 2);

    bench.set_sync_enabled(true);
    pollster::block_on(bench.move_keypoint(&AnnotationIdentity::regular(1), Point::new(5.0, 5.0)))
        .unwrap();
    let created: Vec<AnnotationRecord> = store.records(&images[1]);
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].origin, RecordOrigin::Propagated(OperationKind::Move));
}

#[test]
fn test_traversal_click_is_undoable() {
    let images = series(2);
    let store = Rc::new(TestStore::new());
    store.insert(&images[0], &[record(1, 0.0, 0.0)]);
    let (mut bench, _log) = bench_with(&EngineConfig::default(), store.clone(), &images);
    let id = AnnotationIdentity::regular(1);

    pollster::block_on(async {
        bench.enter_mode(AssignmentMode::Longitudinal).await.unwrap();
        bench.primary_click(Point::new(0.0, 10.0)).await.unwrap();
        assert!(!store.record(&images[0], &id).unwrap().lacks_direction());
        bench.undo().await.unwrap();
    });
    assert!(store.record(&images[0], &id).unwrap().lacks_direction());
}
