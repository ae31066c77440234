//! State machine driving the automated direction traversals.
//!
//! The controller never writes records itself: every direction goes through
//! [`AnnotationEditor::set_directions`] and is synchronized like a manual
//! edit. Image switches it needs are requested from the injected
//! [`ImageSelector`] with [`SelectReason::Traversal`].

use std::rc::Rc;

use super::cross_sectional::{CrossSectionalPlan, Cursor};
use super::longitudinal::LongitudinalQueue;
use super::mode::{
    AssignmentMode, ControllerState, ExitReason, Interruption, InterruptionEffect, Progress,
};
use super::selector::{ImageSelector, SelectReason};
use crate::editor::{AnnotationEditor, EditOutcome};
use crate::error::{EditorError, ModeError};
use crate::events::{DirectionEvent, EventBus};
use crate::model::{AnnotationIdentity, AnnotationRecord, Direction, ImageInfo, Point};
use crate::series::TimeSeriesProvider;
use crate::store::{AnnotationStore, load_or_empty};
use crate::sync::TargetScope;

#[derive(Debug)]
enum Session {
    Longitudinal(LongitudinalQueue),
    CrossSectional(CrossSectionalPlan),
}

impl Session {
    fn mode(&self) -> AssignmentMode {
        match self {
            Session::Longitudinal(_) => AssignmentMode::Longitudinal,
            Session::CrossSectional(_) => AssignmentMode::CrossSectional,
        }
    }

    fn progress(&self) -> Progress {
        match self {
            Session::Longitudinal(queue) => queue.progress(),
            Session::CrossSectional(plan) => plan.progress(),
        }
    }
}

/// Result of a direction set during a traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct TraversalStep {
    pub edit: EditOutcome,
    pub progress: Progress,
    /// The traversal finished with this step.
    pub completed: bool,
}

/// Drives longitudinal and cross-sectional direction assignment.
pub struct DirectionAssignmentController<Sel> {
    selector: Sel,
    events: Rc<EventBus>,
    state: ControllerState,
    session: Option<Session>,
}

impl<Sel: ImageSelector> DirectionAssignmentController<Sel> {
    pub fn new(selector: Sel, events: Rc<EventBus>) -> Self {
        Self {
            selector,
            events,
            state: ControllerState::Idle,
            session: None,
        }
    }

    pub fn selector(&self) -> &Sel {
        &self.selector
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// Mode of the active traversal.
    pub fn mode(&self) -> Option<AssignmentMode> {
        self.session.as_ref().map(Session::mode)
    }

    pub fn is_active(&self) -> bool {
        self.state == ControllerState::Active
    }

    /// Whether a cross-sectional traversal is paused.
    pub fn is_paused(&self) -> bool {
        matches!(&self.session, Some(Session::CrossSectional(plan)) if plan.is_paused())
    }

    pub fn progress(&self) -> Option<Progress> {
        self.session.as_ref().map(Session::progress)
    }

    /// Cross-sectional cursor, if that mode is active.
    pub fn cursor(&self) -> Option<Cursor> {
        match &self.session {
            Some(Session::CrossSectional(plan)) => Some(plan.cursor()),
            _ => None,
        }
    }

    /// The record awaiting a click and its image. `None` while paused.
    pub fn selection(&self) -> Option<(ImageInfo, AnnotationIdentity)> {
        match self.session.as_ref()? {
            Session::Longitudinal(queue) => queue
                .head()
                .map(|identity| (queue.image().clone(), identity.clone())),
            Session::CrossSectional(plan) if !plan.is_paused() => plan
                .current()
                .map(|occ| (occ.image.clone(), occ.identity.clone())),
            Session::CrossSectional(_) => None,
        }
    }

    fn phase_name(&self) -> &'static str {
        if self.is_paused() {
            "paused"
        } else {
            self.state.name()
        }
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Enter a mode by name, e.g. from a settings string.
    pub async fn enter_named<S, P>(
        &mut self,
        name: &str,
        editor: &AnnotationEditor<S, P>,
    ) -> Result<Progress, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        let mode = name.parse::<AssignmentMode>()?;
        self.enter(mode, editor).await
    }

    /// Start a traversal from the editor's open image.
    ///
    /// Entering the other mode while one is active fully exits it first.
    /// Entering the active mode again is rejected.
    pub async fn enter<S, P>(
        &mut self,
        mode: AssignmentMode,
        editor: &AnnotationEditor<S, P>,
    ) -> Result<Progress, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        if self.mode() == Some(mode) {
            return Err(ModeError::wrong_phase("enter the active mode", self.phase_name()));
        }
        let image = editor.current_image().ok_or(ModeError::NoImageOpen)?;

        let session = match mode {
            AssignmentMode::Longitudinal => {
                Session::Longitudinal(LongitudinalQueue::from_records(image, &editor.records()))
            }
            AssignmentMode::CrossSectional => {
                Session::CrossSectional(Self::build_plan(editor, &image).await?)
            }
        };

        if self.session.is_some() {
            self.exit(ExitReason::ModeReplaced);
        }

        let progress = session.progress();
        log::info!("Entered {} direction assignment ({} pending)", mode, progress.total());
        self.session = Some(session);
        self.state = ControllerState::Active;
        self.events.emit(DirectionEvent::Entered { mode, progress });
        self.settle(editor).await
    }

    async fn build_plan<S, P>(
        editor: &AnnotationEditor<S, P>,
        image: &ImageInfo,
    ) -> Result<CrossSectionalPlan, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        let index = editor
            .engine()
            .series_for(image)
            .ok_or_else(|| EditorError::UnknownImage(image.id.clone()))?;

        let mut loaded: Vec<(ImageInfo, Vec<AnnotationRecord>)> = Vec::with_capacity(index.len());
        for img in index.images() {
            let records = if img.id == image.id {
                editor.records()
            } else {
                load_or_empty(editor.store(), img).await?
            };
            loaded.push((img.clone(), records));
        }

        Ok(CrossSectionalPlan::build(
            &index,
            loaded.iter().map(|(img, records)| (img, records.as_slice())),
        ))
    }

    /// Set the selected record's direction from a click and move on.
    pub async fn click<S, P>(
        &mut self,
        editor: &AnnotationEditor<S, P>,
        click: Point,
    ) -> Result<TraversalStep, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        let (image, identity) = self
            .selection()
            .ok_or_else(|| ModeError::wrong_phase("set a direction", self.phase_name()))?;
        if editor.current_image().is_none_or(|open| open.id != image.id) {
            return Err(ModeError::wrong_phase("set a direction", "another image is open"));
        }
        let record = editor
            .record(&identity)
            .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))?;

        let scope = self.scope_for(&identity);
        let direction = Direction::from_click(record.position, click);
        let edit = editor
            .set_directions(&identity, vec![direction], scope)
            .await?;

        let progress = self.advance(editor).await?;
        Ok(TraversalStep {
            edit,
            progress,
            completed: self.state == ControllerState::Completed,
        })
    }

    /// Propagation scope for a direction set on `identity`.
    ///
    /// While a cross-sectional traversal has the record selected, only the
    /// next occurrence of the same order is updated.
    pub fn scope_for(&self, identity: &AnnotationIdentity) -> TargetScope {
        match &self.session {
            Some(Session::CrossSectional(plan))
                if !plan.is_paused()
                    && plan.current().is_some_and(|occ| &occ.identity == identity) =>
            {
                TargetScope::Images(
                    plan.next_in_order()
                        .map(|next| vec![next.id.clone()])
                        .unwrap_or_default(),
                )
            }
            _ => TargetScope::Later,
        }
    }

    /// Advance past a record whose directions were set another way, e.g. by
    /// a multi-direction session. Ignored unless it is the current selection.
    pub async fn record_completed<S, P>(
        &mut self,
        editor: &AnnotationEditor<S, P>,
        identity: &AnnotationIdentity,
    ) -> Result<Option<Progress>, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        match self.selection() {
            Some((_, selected)) if &selected == identity => Ok(Some(self.advance(editor).await?)),
            _ => Ok(None),
        }
    }

    async fn advance<S, P>(&mut self, editor: &AnnotationEditor<S, P>) -> Result<Progress, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        match &mut self.session {
            Some(Session::Longitudinal(queue)) => {
                queue.complete_head();
            }
            Some(Session::CrossSectional(plan)) => plan.complete_current(),
            None => return Err(ModeError::wrong_phase("advance", self.state.name())),
        }
        if let Some(progress) = self.progress() {
            log::debug!("Direction assignment progress {}", progress);
            self.events.emit(DirectionEvent::Progress(progress));
        }
        self.settle(editor).await
    }

    /// Move the traversal to the next record that still needs a click,
    /// switching images as needed, or complete it.
    async fn settle<S, P>(&mut self, editor: &AnnotationEditor<S, P>) -> Result<Progress, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        loop {
            match &mut self.session {
                None => return Err(ModeError::wrong_phase("continue", self.state.name())),
                Some(Session::Longitudinal(queue)) => {
                    let Some(head) = queue.head().cloned() else {
                        return Ok(self.complete());
                    };
                    if editor.record(&head).is_some_and(|r| r.lacks_direction()) {
                        let progress = queue.progress();
                        self.events.emit(DirectionEvent::Selected {
                            image: queue.image().id.clone(),
                            identity: head,
                        });
                        return Ok(progress);
                    }
                    log::debug!("{} no longer needs a direction, skipping", head);
                    queue.skip_head();
                }
                Some(Session::CrossSectional(plan)) => {
                    let Some(occurrence) = plan.current().cloned() else {
                        return Ok(self.complete());
                    };

                    let unchanged = editor
                        .engine()
                        .series_for(&occurrence.image)
                        .is_some_and(|index| index.fingerprint() == plan.fingerprint());
                    if !unchanged {
                        let key = plan.series().clone();
                        log::warn!("Time series {} changed, leaving cross-sectional mode", key);
                        self.exit(ExitReason::SeriesChanged);
                        return Err(ModeError::SeriesChanged(key));
                    }

                    if editor
                        .current_image()
                        .is_none_or(|open| open.id != occurrence.image.id)
                    {
                        self.selector
                            .select_image(&occurrence.image, SelectReason::Traversal)
                            .await?;
                        editor.open_image(occurrence.image.clone()).await?;
                    }

                    if editor.record(&occurrence.identity).is_some() {
                        let progress = plan.progress();
                        self.events.emit(DirectionEvent::Selected {
                            image: occurrence.image.id,
                            identity: occurrence.identity,
                        });
                        return Ok(progress);
                    }
                    log::debug!(
                        "{} vanished from {}, skipping",
                        occurrence.identity,
                        occurrence.image.id
                    );
                    plan.skip_current();
                }
            }
        }
    }

    fn complete(&mut self) -> Progress {
        let Some(session) = self.session.take() else {
            return Progress::Longitudinal {
                completed: 0,
                total: 0,
            };
        };
        let mode = session.mode();
        let progress = session.progress();
        self.state = ControllerState::Completed;
        log::info!("{} direction assignment completed ({})", mode, progress);
        self.events.emit(DirectionEvent::Completed { mode, progress });
        progress
    }

    fn exit(&mut self, reason: ExitReason) {
        let Some(session) = self.session.take() else {
            return;
        };
        let mode = session.mode();
        self.state = ControllerState::Idle;
        log::info!("Left {} direction assignment ({:?})", mode, reason);
        self.events.emit(DirectionEvent::Exited { mode, reason });
    }

    // ------------------------------------------------------------------------
    // Interruptions
    // ------------------------------------------------------------------------

    /// Apply an external event according to the interruption table.
    pub fn interrupt(&mut self, interruption: Interruption) -> InterruptionEffect {
        let Some(mode) = self.mode() else {
            return InterruptionEffect::Ignored;
        };
        match mode.effect_of(interruption) {
            InterruptionEffect::Ignored => InterruptionEffect::Ignored,
            InterruptionEffect::Exited => {
                self.exit(interruption.exit_reason());
                InterruptionEffect::Exited
            }
            InterruptionEffect::Paused => {
                if let Some(Session::CrossSectional(plan)) = &mut self.session
                    && !plan.is_paused()
                {
                    plan.pause();
                    let progress = plan.progress();
                    log::debug!("Cross-sectional traversal paused at {}", progress);
                    self.events.emit(DirectionEvent::Paused { progress });
                }
                InterruptionEffect::Paused
            }
        }
    }

    /// Manual cancel.
    pub fn cancel(&mut self) -> InterruptionEffect {
        self.interrupt(Interruption::Cancel)
    }

    /// Continue a paused cross-sectional traversal from its cursor.
    pub async fn resume<S, P>(&mut self, editor: &AnnotationEditor<S, P>) -> Result<Progress, ModeError>
    where
        S: AnnotationStore,
        P: TimeSeriesProvider,
    {
        if !self.is_paused() {
            return Err(ModeError::wrong_phase("resume", self.phase_name()));
        }
        if let Some(Session::CrossSectional(plan)) = &mut self.session {
            plan.unpause();
        }
        log::debug!("Cross-sectional traversal resumed");
        self.events.emit(DirectionEvent::Resumed);
        self.settle(editor).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::direction::HeadlessSelector;
    use crate::model::{AnnotationRecord, RecordOrigin};
    use crate::series::ImageCatalog;
    use crate::store::MemoryStore;
    use crate::sync::SyncEngine;

    type Editor = AnnotationEditor<Rc<MemoryStore>, ImageCatalog>;

    fn images() -> Vec<ImageInfo> {
        (1..=2)
            .map(|i| ImageInfo::new(format!("I{}", i), "p", "side", i64::from(i)))
            .collect()
    }

    fn record(order: u32) -> AnnotationRecord {
        AnnotationRecord::new(
            u64::from(order),
            AnnotationIdentity::regular(order),
            Point::new(10.0, 10.0),
            1,
            RecordOrigin::User,
        )
    }

    fn setup() -> (Editor, DirectionAssignmentController<HeadlessSelector>) {
        let store = Rc::new(MemoryStore::new());
        store.insert(&images()[0], &[record(2), record(1)]).unwrap();
        let engine = SyncEngine::new(store, ImageCatalog::with_images(images()));
        let editor = AnnotationEditor::new(engine);
        pollster::block_on(editor.open_image(images()[0].clone())).unwrap();
        let controller = DirectionAssignmentController::new(HeadlessSelector::new(), Rc::new(EventBus::new()));
        (editor, controller)
    }

    #[test]
    fn test_longitudinal_walks_in_order() {
        let (editor, mut controller) = setup();
        pollster::block_on(async {
            let progress = controller.enter(AssignmentMode::Longitudinal, &editor).await.unwrap();
            assert_eq!(progress, Progress::Longitudinal { completed: 0, total: 2 });
            assert_eq!(controller.selection().unwrap().1, AnnotationIdentity::regular(1));

            let step = controller.click(&editor, Point::new(20.0, 10.0)).await.unwrap();
            assert!(!step.completed);
            assert_eq!(controller.selection().unwrap().1, AnnotationIdentity::regular(2));

            let step = controller.click(&editor, Point::new(10.0, 20.0)).await.unwrap();
            assert!(step.completed);
            assert_eq!(step.progress, Progress::Longitudinal { completed: 2, total: 2 });
        });
        assert_eq!(controller.state(), ControllerState::Completed);
        assert!(controller.selection().is_none());
        assert!(editor.records().iter().all(|r| !r.lacks_direction()));
    }

    #[test]
    fn test_longitudinal_exits_on_user_switch() {
        let (editor, mut controller) = setup();
        pollster::block_on(controller.enter(AssignmentMode::Longitudinal, &editor)).unwrap();
        assert_eq!(
            controller.interrupt(Interruption::ImageSwitch(SelectReason::Traversal)),
            InterruptionEffect::Ignored
        );
        assert_eq!(
            controller.interrupt(Interruption::ImageSwitch(SelectReason::User)),
            InterruptionEffect::Exited
        );
        assert_eq!(controller.state(), ControllerState::Idle);
        assert!(controller.mode().is_none());
    }

    #[test]
    fn test_reentering_active_mode_rejected() {
        let (editor, mut controller) = setup();
        pollster::block_on(controller.enter(AssignmentMode::Longitudinal, &editor)).unwrap();
        let err = pollster::block_on(controller.enter(AssignmentMode::Longitudinal, &editor)).unwrap_err();
        assert!(matches!(err, ModeError::WrongPhase { .. }));
        assert_eq!(controller.mode(), Some(AssignmentMode::Longitudinal));
    }

    #[test]
    fn test_unknown_mode_name_leaves_state() {
        let (editor, mut controller) = setup();
        let err = pollster::block_on(controller.enter_named("sideways", &editor)).unwrap_err();
        assert_eq!(err, ModeError::UnknownMode("sideways".to_string()));
        assert_eq!(controller.state(), ControllerState::Idle);
    }

    #[test]
    fn test_enter_without_pending_completes() {
        let store = Rc::new(MemoryStore::new());
        let engine = SyncEngine::new(store, ImageCatalog::with_images(images()));
        let editor = AnnotationEditor::new(engine);
        pollster::block_on(editor.open_image(images()[1].clone())).unwrap();
        let mut controller = DirectionAssignmentController::new(HeadlessSelector::new(), Rc::new(EventBus::new()));
        let progress = pollster::block_on(controller.enter(AssignmentMode::CrossSectional, &editor)).unwrap();
        assert_eq!(progress.total(), 0);
        assert_eq!(controller.state(), ControllerState::Completed);
    }

    #[test]
    fn test_click_while_idle_rejected() {
        let (editor, mut controller) = setup();
        let err = pollster::block_on(controller.click(&editor, Point::new(0.0, 0.0))).unwrap_err();
        assert_eq!(err, ModeError::wrong_phase("set a direction", "idle"));
    }
}
