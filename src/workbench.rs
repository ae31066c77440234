//! Input-level facade wiring the editor, the direction controller, the
//! multi-direction session and the undo history together.
//!
//! A rendering layer forwards pointer and navigation input here and
//! subscribes to [`Workbench::events`] for everything it needs to draw.

use std::rc::Rc;

use crate::config::EngineConfig;
use crate::direction::{
    AssignmentMode, DirectionAssignmentController, ImageSelector, Interruption,
    InterruptionEffect, MultiDirectionSession, MultiPhase, MultiStep, Progress, SelectReason,
    TraversalStep,
};
use crate::editor::{AnnotationEditor, EditOutcome, LocalOutcome};
use crate::error::{EditorError, ModeError};
use crate::events::EventBus;
use crate::model::{AnnotationIdentity, AnnotationKind, Direction, ImageInfo, Point, SeriesKey};
use crate::series::{TimeSeriesIndex, TimeSeriesProvider};
use crate::store::AnnotationStore;
use crate::sync::{SyncEngine, TargetScope};
use crate::undo::{Command, UndoConfig, UndoStack};

/// What a primary click did.
#[derive(Debug, Clone, PartialEq)]
pub enum ClickOutcome {
    /// A keypoint was placed
    Placed(EditOutcome),
    /// The traversal's selected record got its direction
    Traversal(TraversalStep),
    /// A multi-direction click was collected and previewed
    MultiCollected { collected: usize, target_count: u8 },
    /// The multi-direction session finished and its directions were saved
    MultiCompleted(EditOutcome),
}

/// One annotator's working session over a plant's time series.
pub struct Workbench<S, P, Sel> {
    editor: AnnotationEditor<S, P>,
    controller: DirectionAssignmentController<Sel>,
    multi: Option<MultiDirectionSession>,
    history: UndoStack,
    series: Option<TimeSeriesIndex>,
    selected: Option<AnnotationIdentity>,
    kind: AnnotationKind,
    events: Rc<EventBus>,
}

impl<S, P, Sel> Workbench<S, P, Sel>
where
    S: AnnotationStore,
    P: TimeSeriesProvider,
    Sel: ImageSelector,
{
    pub fn new(store: S, provider: P, selector: Sel, config: &EngineConfig) -> Self {
        let engine = SyncEngine::with_settings(store, provider, &config.sync);
        Self::with_engine(engine, selector, config)
    }

    /// Build around a preconfigured engine, e.g. one with an offset estimator.
    pub fn with_engine(engine: SyncEngine<S, P>, selector: Sel, config: &EngineConfig) -> Self {
        let events = engine.events().clone();
        let editor =
            AnnotationEditor::new(engine).with_max_directions(config.directions.default_max_directions);
        Self {
            editor,
            controller: DirectionAssignmentController::new(selector, events.clone()),
            multi: None,
            history: UndoStack::with_config(UndoConfig {
                max_history: config.history.max_history,
            }),
            series: None,
            selected: None,
            kind: AnnotationKind::Regular,
            events,
        }
    }

    pub fn events(&self) -> &Rc<EventBus> {
        &self.events
    }

    pub fn editor(&self) -> &AnnotationEditor<S, P> {
        &self.editor
    }

    pub fn controller(&self) -> &DirectionAssignmentController<Sel> {
        &self.controller
    }

    pub fn history(&self) -> &UndoStack {
        &self.history
    }

    pub fn multi_session(&self) -> Option<&MultiDirectionSession> {
        self.multi.as_ref()
    }

    pub fn series(&self) -> Option<&TimeSeriesIndex> {
        self.series.as_ref()
    }

    pub fn current_image(&self) -> Option<ImageInfo> {
        self.editor.current_image()
    }

    /// "3/15"-style position of the open image in its series.
    pub fn progress_label(&self) -> Option<String> {
        let series = self.series.as_ref()?;
        let image = self.editor.current_image()?;
        Some(series.progress(&image.id))
    }

    pub fn is_sync_enabled(&self) -> bool {
        self.editor.engine().is_enabled()
    }

    pub fn set_sync_enabled(&self, enabled: bool) {
        self.editor.engine().set_enabled(enabled);
    }

    /// Kind given to keypoints placed by clicking.
    pub fn set_annotation_kind(&mut self, kind: AnnotationKind) {
        self.kind = kind;
    }

    // ------------------------------------------------------------------------
    // Navigation
    // ------------------------------------------------------------------------

    /// Switch to another plant/view-angle series and open its first image.
    pub async fn open_series(&mut self, key: &SeriesKey) -> Result<Option<ImageInfo>, EditorError> {
        self.controller.interrupt(Interruption::PlantSwitch);
        self.end_multi();
        self.history.clear();
        self.selected = None;

        if let Err(e) = self.editor.close().await {
            log::warn!("Could not save the previous image before switching plant: {}", e);
            self.editor.discard();
        }

        self.series = TimeSeriesIndex::load(self.editor.engine().series_provider(), key);
        let Some(first) = self.series.as_ref().and_then(|s| s.get(0)).cloned() else {
            log::info!("Series {} has no images", key);
            return Ok(None);
        };
        log::info!(
            "Opened series {} ({} images)",
            key,
            self.series.as_ref().map_or(0, TimeSeriesIndex::len)
        );
        self.editor.open_image(first.clone()).await?;
        Ok(Some(first))
    }

    /// User navigation to an image of the open series.
    pub async fn navigate_to(&mut self, image_id: &str) -> Result<(), EditorError> {
        let image = self
            .series
            .as_ref()
            .and_then(|s| s.position_of(image_id).and_then(|pos| s.get(pos)))
            .cloned()
            .ok_or_else(|| EditorError::UnknownImage(image_id.to_string()))?;
        if self
            .editor
            .current_image()
            .is_some_and(|open| open.id == image.id)
        {
            return Ok(());
        }

        self.controller
            .interrupt(Interruption::ImageSwitch(SelectReason::User));
        self.end_multi();
        self.history.clear();
        self.selected = None;
        self.editor.open_image(image).await
    }

    /// Navigate to the next image, wrapping around.
    pub async fn next_image(&mut self) -> Result<(), EditorError> {
        let target = self.neighbour(TimeSeriesIndex::next)?;
        self.navigate_to(&target).await
    }

    /// Navigate to the previous image, wrapping around.
    pub async fn prev_image(&mut self) -> Result<(), EditorError> {
        let target = self.neighbour(TimeSeriesIndex::prev)?;
        self.navigate_to(&target).await
    }

    fn neighbour(
        &self,
        step: impl for<'a> Fn(&'a TimeSeriesIndex, &str) -> Option<&'a ImageInfo>,
    ) -> Result<String, EditorError> {
        let image = self.editor.current_image().ok_or(EditorError::NoImageOpen)?;
        self.series
            .as_ref()
            .and_then(|s| step(s, &image.id))
            .map(|img| img.id.clone())
            .ok_or(EditorError::UnknownImage(image.id))
    }

    // ------------------------------------------------------------------------
    // Selection and manual edits
    // ------------------------------------------------------------------------

    /// Select a keypoint for the secondary trigger.
    pub fn select(&mut self, identity: Option<AnnotationIdentity>) {
        self.selected = identity;
    }

    /// Select the keypoint under the pointer, if any.
    pub fn select_at(&mut self, point: Point) -> Option<AnnotationIdentity> {
        self.selected = self.editor.hit_test(point);
        self.selected.clone()
    }

    pub fn selected(&self) -> Option<&AnnotationIdentity> {
        self.selected.as_ref()
    }

    /// Place a keypoint of the current kind with the next free order.
    pub async fn place_keypoint(&mut self, position: Point) -> Result<EditOutcome, EditorError> {
        let image = self.open_image_id()?;
        let outcome = self.editor.place(self.kind.clone(), position).await?;
        self.history.push(Command::AddKeypoint {
            image,
            record: outcome.record.clone(),
            synced_to: outcome.synced_to(),
        });
        Ok(outcome)
    }

    /// Place a keypoint with an explicit identity and direction capacity.
    pub async fn add_keypoint(
        &mut self,
        identity: AnnotationIdentity,
        position: Point,
        max_directions: Option<u8>,
    ) -> Result<EditOutcome, EditorError> {
        let image = self.open_image_id()?;
        let capacity = max_directions.unwrap_or(self.editor.max_directions());
        let outcome = self
            .editor
            .add_with_capacity(identity, position, capacity, TargetScope::Later)
            .await?;
        self.history.push(Command::AddKeypoint {
            image,
            record: outcome.record.clone(),
            synced_to: outcome.synced_to(),
        });
        Ok(outcome)
    }

    pub async fn move_keypoint(
        &mut self,
        identity: &AnnotationIdentity,
        position: Point,
    ) -> Result<EditOutcome, EditorError> {
        let image = self.open_image_id()?;
        let from = self
            .editor
            .record(identity)
            .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))?
            .position;
        let outcome = self
            .editor
            .move_to(identity, position, false, TargetScope::Later)
            .await?;
        self.history.push(Command::MoveKeypoint {
            image,
            identity: identity.clone(),
            from,
            to: position,
            with_directions: false,
            synced_to: outcome.synced_to(),
        });
        Ok(outcome)
    }

    pub async fn delete_keypoint(
        &mut self,
        identity: &AnnotationIdentity,
    ) -> Result<EditOutcome, EditorError> {
        let image = self.open_image_id()?;
        self.end_multi_for(identity);
        let outcome = self.editor.delete(identity, TargetScope::Later).await?;
        if self.selected.as_ref() == Some(identity) {
            self.selected = None;
        }
        self.history.push(Command::DeleteKeypoint {
            image,
            record: outcome.record.clone(),
            synced_to: outcome.synced_to(),
        });
        Ok(outcome)
    }

    /// Set a single direction on a keypoint from a click.
    pub async fn set_direction(
        &mut self,
        identity: &AnnotationIdentity,
        click: Point,
    ) -> Result<EditOutcome, EditorError> {
        let record = self
            .editor
            .record(identity)
            .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))?;
        let direction = Direction::from_click(record.position, click);
        self.set_directions(identity, vec![direction]).await
    }

    /// Replace a keypoint's directions.
    pub async fn set_directions(
        &mut self,
        identity: &AnnotationIdentity,
        directions: Vec<Direction>,
    ) -> Result<EditOutcome, EditorError> {
        let image = self.open_image_id()?;
        let before = self
            .editor
            .record(identity)
            .map(|r| r.directions().to_vec())
            .unwrap_or_default();
        let scope = self.controller.scope_for(identity);
        let outcome = self.editor.set_directions(identity, directions, scope).await?;
        self.record_direction_edit(image, identity, before, &outcome);
        Ok(outcome)
    }

    /// Remove every keypoint of the open image. Not propagated.
    pub async fn clear_image(&mut self) -> Result<LocalOutcome, EditorError> {
        let image = self.open_image_id()?;
        self.end_multi();
        let outcome = self.editor.clear_image().await?;
        self.selected = None;
        self.history.push(Command::ClearImage {
            image,
            records: outcome.previous.clone(),
        });
        Ok(outcome)
    }

    fn open_image_id(&self) -> Result<String, EditorError> {
        self.editor
            .current_image()
            .map(|image| image.id)
            .ok_or(EditorError::NoImageOpen)
    }

    fn record_direction_edit(
        &mut self,
        image: String,
        identity: &AnnotationIdentity,
        before: Vec<Direction>,
        outcome: &EditOutcome,
    ) {
        self.history.push(Command::EditDirections {
            image,
            identity: identity.clone(),
            before,
            after: outcome.record.directions().to_vec(),
            synced_to: outcome.synced_to(),
        });
    }

    // ------------------------------------------------------------------------
    // Pointer input
    // ------------------------------------------------------------------------

    /// Primary pointer action.
    ///
    /// Routed to the multi-direction session while it collects, then to an
    /// active traversal, and otherwise places a keypoint.
    pub async fn primary_click(&mut self, point: Point) -> Result<ClickOutcome, ModeError> {
        if let Some(outcome) = self.multi_click(point).await? {
            return Ok(outcome);
        }

        if self.controller.is_active() && !self.controller.is_paused() {
            let (image, identity) = self
                .controller
                .selection()
                .ok_or_else(|| ModeError::wrong_phase("set a direction", "active"))?;
            let before = self
                .editor
                .record(&identity)
                .map(|r| r.directions().to_vec())
                .unwrap_or_default();
            let step = self.controller.click(&self.editor, point).await?;
            self.record_direction_edit(image.id, &identity, before, &step.edit);
            return Ok(ClickOutcome::Traversal(step));
        }

        Ok(ClickOutcome::Placed(self.place_keypoint(point).await?))
    }

    async fn multi_click(&mut self, point: Point) -> Result<Option<ClickOutcome>, ModeError> {
        let Some(session) = self.multi.as_mut() else {
            return Ok(None);
        };
        match session.phase() {
            MultiPhase::Collecting => {}
            MultiPhase::CountSelection => {
                return Err(ModeError::wrong_phase("add a direction", session.phase().name()));
            }
            MultiPhase::Completed | MultiPhase::Interrupted => {
                self.multi = None;
                return Ok(None);
            }
        }

        let identity = session.identity().clone();
        let image = session.image().to_string();
        match session.click(point)? {
            MultiStep::Collected {
                collected,
                target_count,
            } => {
                self.editor
                    .preview_directions(&identity, session.collected().to_vec())?;
                Ok(Some(ClickOutcome::MultiCollected {
                    collected,
                    target_count,
                }))
            }
            MultiStep::Completed(directions) => {
                let before = session.original().to_vec();
                self.multi = None;

                // The whole set goes through the edit path once
                let scope = self.controller.scope_for(&identity);
                let result = self.editor.set_directions(&identity, directions, scope).await;
                if result.is_err() {
                    self.editor.clear_preview();
                }
                let outcome = result?;
                self.record_direction_edit(image, &identity, before, &outcome);
                self.controller
                    .record_completed(&self.editor, &identity)
                    .await?;
                Ok(Some(ClickOutcome::MultiCompleted(outcome)))
            }
        }
    }

    /// Secondary trigger: start a multi-direction session on `target` (or
    /// the selected keypoint), or confirm the proposed count.
    pub async fn secondary_trigger(
        &mut self,
        target: Option<AnnotationIdentity>,
    ) -> Result<MultiPhase, ModeError> {
        if let Some(session) = self.multi.as_mut() {
            match session.phase() {
                MultiPhase::CountSelection => {
                    session.confirm()?;
                    let identity = session.identity().clone();
                    let collected = session.collected().to_vec();
                    self.editor.preview_directions(&identity, collected)?;
                    return Ok(MultiPhase::Collecting);
                }
                MultiPhase::Collecting => {
                    return Err(ModeError::wrong_phase(
                        "confirm the direction count",
                        session.phase().name(),
                    ));
                }
                MultiPhase::Completed | MultiPhase::Interrupted => self.multi = None,
            }
        }

        let image = self.editor.current_image().ok_or(ModeError::NoImageOpen)?;
        let traversal_pick = self
            .controller
            .selection()
            .filter(|(selected_image, _)| selected_image.id == image.id)
            .map(|(_, identity)| identity);
        let identity = target
            .or_else(|| self.selected.clone())
            .or(traversal_pick)
            .ok_or_else(|| {
                ModeError::wrong_phase("start a multi-direction session", "no keypoint is selected")
            })?;
        let record = self
            .editor
            .record(&identity)
            .ok_or_else(|| EditorError::UnknownRecord(identity.clone()))?;

        self.multi = Some(MultiDirectionSession::begin(
            image.id,
            &record,
            self.events.clone(),
        )?);
        Ok(MultiPhase::CountSelection)
    }

    /// Scroll-style adjustment of the proposed direction count.
    pub fn scroll(&mut self, delta: i32) -> Result<u8, ModeError> {
        self.multi
            .as_mut()
            .ok_or_else(|| {
                ModeError::wrong_phase("adjust the direction count", "no multi-direction session")
            })?
            .adjust(delta)
    }

    /// Set the proposed direction count explicitly.
    pub fn set_direction_count(&mut self, count: i64) -> Result<u8, ModeError> {
        self.multi
            .as_mut()
            .ok_or_else(|| {
                ModeError::wrong_phase("set the direction count", "no multi-direction session")
            })?
            .set_target_count(count)
    }

    fn end_multi(&mut self) {
        if let Some(mut session) = self.multi.take()
            && session.interrupt().is_some()
        {
            self.editor.clear_preview();
        }
    }

    fn end_multi_for(&mut self, identity: &AnnotationIdentity) {
        if self
            .multi
            .as_ref()
            .is_some_and(|s| s.identity() == identity)
        {
            self.end_multi();
        }
    }

    // ------------------------------------------------------------------------
    // Direction assignment modes
    // ------------------------------------------------------------------------

    pub async fn enter_mode(&mut self, mode: AssignmentMode) -> Result<Progress, ModeError> {
        self.end_multi();
        self.controller.enter(mode, &self.editor).await
    }

    pub async fn enter_mode_named(&mut self, name: &str) -> Result<Progress, ModeError> {
        let mode = name.parse::<AssignmentMode>()?;
        self.enter_mode(mode).await
    }

    pub async fn resume_mode(&mut self) -> Result<Progress, ModeError> {
        self.end_multi();
        self.controller.resume(&self.editor).await
    }

    /// Manual cancel of the traversal and any multi-direction session.
    pub fn cancel_mode(&mut self) -> InterruptionEffect {
        self.end_multi();
        self.controller.cancel()
    }

    /// Another annotation mode (tool) was entered.
    pub fn enter_competing_mode(&mut self) -> InterruptionEffect {
        self.end_multi();
        self.controller.interrupt(Interruption::CompetingMode)
    }

    // ------------------------------------------------------------------------
    // Undo / Redo
    // ------------------------------------------------------------------------

    /// Reverse the most recent edit on the open image.
    ///
    /// Returns the description of the reversed command, or `None` when there
    /// is nothing to undo on this image.
    pub async fn undo(&mut self) -> Result<Option<String>, EditorError> {
        let Some(command) = self.history_command(UndoStack::peek_undo) else {
            return Ok(None);
        };
        self.end_multi();
        match &command {
            Command::AddKeypoint {
                record, synced_to, ..
            } => {
                self.editor
                    .delete(&record.identity(), TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::DeleteKeypoint {
                record, synced_to, ..
            } => {
                self.editor
                    .restore(record.clone(), TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::MoveKeypoint {
                identity,
                from,
                with_directions,
                synced_to,
                ..
            } => {
                self.editor
                    .move_to(identity, *from, *with_directions, TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::EditDirections {
                identity,
                before,
                synced_to,
                ..
            } => {
                self.editor
                    .set_directions(identity, before.clone(), TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::ClearImage { records, .. } => {
                self.editor.replace_records(records.clone()).await?;
            }
        }
        self.history.pop_undo();
        Ok(Some(command.description()))
    }

    /// Re-apply the most recently undone edit on the open image.
    pub async fn redo(&mut self) -> Result<Option<String>, EditorError> {
        let Some(command) = self.history_command(UndoStack::peek_redo) else {
            return Ok(None);
        };
        self.end_multi();
        match &command {
            Command::AddKeypoint {
                record, synced_to, ..
            } => {
                self.editor
                    .restore(record.clone(), TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::DeleteKeypoint {
                record, synced_to, ..
            } => {
                self.editor
                    .delete(&record.identity(), TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::MoveKeypoint {
                identity,
                to,
                with_directions,
                synced_to,
                ..
            } => {
                self.editor
                    .move_to(identity, *to, *with_directions, TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::EditDirections {
                identity,
                after,
                synced_to,
                ..
            } => {
                self.editor
                    .set_directions(identity, after.clone(), TargetScope::Images(synced_to.clone()))
                    .await?;
            }
            Command::ClearImage { .. } => {
                self.editor.clear_image().await?;
            }
        }
        self.history.pop_redo();
        Ok(Some(command.description()))
    }

    /// The next command to undo or redo, provided it belongs to the open
    /// image. History of another image is dropped.
    fn history_command(&mut self, peek: impl Fn(&UndoStack) -> Option<&Command>) -> Option<Command> {
        let command = peek(&self.history)?.clone();
        let current = self.editor.current_image()?;
        if command.image() != current.id {
            log::debug!(
                "Dropping undo history of {}, now on {}",
                command.image(),
                current.id
            );
            self.history.clear();
            return None;
        }
        Some(command)
    }
}
