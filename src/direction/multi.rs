//! Collecting several directions for one keypoint.
//!
//! The session is a pure state machine: it never touches storage. The caller
//! previews [`MultiDirectionSession::collected`] locally after each click and
//! pushes the final list through the normal edit path once, when
//! [`MultiStep::Completed`] is returned.

use std::rc::Rc;

use crate::error::{DirectionLimitError, ModeError};
use crate::events::{DirectionEvent, EventBus};
use crate::model::{AnnotationIdentity, AnnotationRecord, Direction, ImageId, Point};

/// Sub-states of a multi-direction session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiPhase {
    CountSelection,
    Collecting,
    Completed,
    Interrupted,
}

impl MultiPhase {
    pub fn name(&self) -> &'static str {
        match self {
            MultiPhase::CountSelection => "selecting a direction count",
            MultiPhase::Collecting => "collecting directions",
            MultiPhase::Completed => "completed",
            MultiPhase::Interrupted => "interrupted",
        }
    }
}

/// Result of a collecting click.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiStep {
    /// More clicks are needed
    Collected { collected: usize, target_count: u8 },
    /// The target was reached; this is the full direction list
    Completed(Vec<Direction>),
}

/// Assigns `1..=max_directions` directions to one record.
#[derive(Debug)]
pub struct MultiDirectionSession {
    image: ImageId,
    identity: AnnotationIdentity,
    anchor: Point,
    max_directions: u8,
    target_count: u8,
    original: Vec<Direction>,
    collected: Vec<Direction>,
    phase: MultiPhase,
    events: Rc<EventBus>,
}

impl MultiDirectionSession {
    /// Start count selection for a record that holds more than one direction.
    pub fn begin(
        image: ImageId,
        record: &AnnotationRecord,
        events: Rc<EventBus>,
    ) -> Result<Self, ModeError> {
        if !record.is_multi_direction() {
            return Err(ModeError::NotMultiDirection(record.identity()));
        }
        let max_directions = record.max_directions();
        let existing = u8::try_from(record.directions().len()).unwrap_or(u8::MAX);
        let session = Self {
            image,
            identity: record.identity(),
            anchor: record.position,
            max_directions,
            target_count: existing.saturating_add(1).clamp(1, max_directions),
            original: record.directions().to_vec(),
            collected: Vec::new(),
            phase: MultiPhase::CountSelection,
            events,
        };
        log::debug!(
            "Multi-direction session for {} (max {}, proposing {})",
            session.identity,
            max_directions,
            session.target_count
        );
        session.emit_count();
        Ok(session)
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn identity(&self) -> &AnnotationIdentity {
        &self.identity
    }

    pub fn phase(&self) -> MultiPhase {
        self.phase
    }

    pub fn target_count(&self) -> u8 {
        self.target_count
    }

    pub fn max_directions(&self) -> u8 {
        self.max_directions
    }

    /// Directions collected so far.
    pub fn collected(&self) -> &[Direction] {
        &self.collected
    }

    /// The record's directions when the session began.
    pub fn original(&self) -> &[Direction] {
        &self.original
    }

    /// Whether the session is still running.
    pub fn is_live(&self) -> bool {
        matches!(self.phase, MultiPhase::CountSelection | MultiPhase::Collecting)
    }

    /// Nudge the proposed count, clamped to `[1, max_directions]`.
    pub fn adjust(&mut self, delta: i32) -> Result<u8, ModeError> {
        self.require(MultiPhase::CountSelection, "adjust the direction count")?;
        let proposed = i64::from(self.target_count) + i64::from(delta);
        let clamped = proposed.clamp(1, i64::from(self.max_directions));
        self.target_count = u8::try_from(clamped).unwrap_or(self.max_directions);
        self.emit_count();
        Ok(self.target_count)
    }

    /// Set the count explicitly. Out-of-range values are rejected and the
    /// proposal is left unchanged.
    pub fn set_target_count(&mut self, count: i64) -> Result<u8, ModeError> {
        self.require(MultiPhase::CountSelection, "set the direction count")?;
        if count < 1 || count > i64::from(self.max_directions) {
            return Err(ModeError::CountOutOfRange {
                requested: count,
                max: self.max_directions,
            });
        }
        self.target_count = u8::try_from(count).unwrap_or(self.max_directions);
        self.emit_count();
        Ok(self.target_count)
    }

    /// Confirm the count and start collecting.
    ///
    /// A partially assigned record resumes from its directions; one that
    /// already has at least `target_count` starts over.
    pub fn confirm(&mut self) -> Result<(), ModeError> {
        self.require(MultiPhase::CountSelection, "confirm the direction count")?;
        self.collected = if self.original.len() < usize::from(self.target_count) {
            self.original.clone()
        } else {
            Vec::new()
        };
        self.phase = MultiPhase::Collecting;
        log::debug!(
            "Collecting {} direction(s) for {}, {} already set",
            self.target_count,
            self.identity,
            self.collected.len()
        );
        self.emit_progress();
        Ok(())
    }

    /// Add the direction from the anchor towards `click`.
    pub fn click(&mut self, click: Point) -> Result<MultiStep, ModeError> {
        self.require(MultiPhase::Collecting, "add a direction")?;
        if self.collected.len() >= usize::from(self.max_directions) {
            return Err(DirectionLimitError {
                max: self.max_directions,
                got: self.collected.len() + 1,
            }
            .into());
        }

        self.collected.push(Direction::from_click(self.anchor, click));
        self.emit_progress();

        if self.collected.len() >= usize::from(self.target_count) {
            self.phase = MultiPhase::Completed;
            log::info!(
                "Collected {} direction(s) for {}",
                self.collected.len(),
                self.identity
            );
            self.events.emit(DirectionEvent::MultiFinished {
                identity: self.identity.clone(),
                completed: true,
            });
            return Ok(MultiStep::Completed(self.collected.clone()));
        }
        Ok(MultiStep::Collected {
            collected: self.collected.len(),
            target_count: self.target_count,
        })
    }

    /// Tear the session down. Returns the direction list to restore, or
    /// `None` when the session had already completed.
    pub fn interrupt(&mut self) -> Option<Vec<Direction>> {
        if !self.is_live() {
            return None;
        }
        log::debug!("Multi-direction session for {} interrupted", self.identity);
        self.phase = MultiPhase::Interrupted;
        self.collected.clear();
        self.events.emit(DirectionEvent::MultiFinished {
            identity: self.identity.clone(),
            completed: false,
        });
        Some(self.original.clone())
    }

    fn require(&self, phase: MultiPhase, action: &'static str) -> Result<(), ModeError> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(ModeError::wrong_phase(action, self.phase.name()))
        }
    }

    fn emit_count(&self) {
        self.events.emit(DirectionEvent::MultiCount {
            identity: self.identity.clone(),
            target_count: self.target_count,
            max_directions: self.max_directions,
        });
    }

    fn emit_progress(&self) {
        self.events.emit(DirectionEvent::MultiProgress {
            identity: self.identity.clone(),
            collected: self.collected.len(),
            target_count: self.target_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RecordOrigin;

    fn record(max: u8, existing: usize) -> AnnotationRecord {
        let mut rec = AnnotationRecord::new(
            1,
            AnnotationIdentity::regular(1),
            Point::new(0.0, 0.0),
            max,
            RecordOrigin::User,
        );
        let dir = Direction::from_click(rec.position, Point::new(0.0, -10.0));
        rec.set_directions(vec![dir; existing]).unwrap();
        rec
    }

    fn session(max: u8, existing: usize) -> MultiDirectionSession {
        MultiDirectionSession::begin("I1".into(), &record(max, existing), Rc::new(EventBus::new()))
            .unwrap()
    }

    #[test]
    fn test_single_direction_record_rejected() {
        let err = MultiDirectionSession::begin("I1".into(), &record(1, 0), Rc::new(EventBus::new()))
            .unwrap_err();
        assert_eq!(err, ModeError::NotMultiDirection(AnnotationIdentity::regular(1)));
    }

    #[test]
    fn test_count_is_clamped() {
        let mut s = session(3, 0);
        assert_eq!(s.target_count(), 1);
        assert_eq!(s.adjust(5).unwrap(), 3);
        assert_eq!(s.adjust(-10).unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_count_leaves_state() {
        let mut s = session(3, 0);
        s.set_target_count(2).unwrap();
        assert_eq!(
            s.set_target_count(4),
            Err(ModeError::CountOutOfRange { requested: 4, max: 3 })
        );
        assert_eq!(s.set_target_count(0).unwrap_err(), ModeError::CountOutOfRange { requested: 0, max: 3 });
        assert_eq!(s.target_count(), 2);
        assert_eq!(s.phase(), MultiPhase::CountSelection);
    }

    #[test]
    fn test_completes_exactly_at_target() {
        let mut s = session(3, 0);
        s.set_target_count(3).unwrap();
        s.confirm().unwrap();
        assert!(matches!(s.click(Point::new(1.0, 0.0)), Ok(MultiStep::Collected { collected: 1, .. })));
        assert!(matches!(s.click(Point::new(0.0, 1.0)), Ok(MultiStep::Collected { collected: 2, .. })));
        let MultiStep::Completed(dirs) = s.click(Point::new(-1.0, 0.0)).unwrap() else {
            panic!("third click should complete");
        };
        assert_eq!(dirs.len(), 3);
        assert!((dirs[1].angle - 90.0).abs() < 0.01);
        assert_eq!(s.phase(), MultiPhase::Completed);

        // A fourth click never lands
        assert!(matches!(s.click(Point::new(0.0, -1.0)), Err(ModeError::WrongPhase { .. })));
        assert_eq!(s.collected().len(), 3);
    }

    #[test]
    fn test_resume_counts_existing_directions() {
        let mut s = session(3, 1);
        assert_eq!(s.target_count(), 2);
        s.adjust(1).unwrap();
        s.confirm().unwrap();
        assert_eq!(s.collected().len(), 1);
        assert!(matches!(s.click(Point::new(1.0, 0.0)), Ok(MultiStep::Collected { collected: 2, target_count: 3 })));
    }

    #[test]
    fn test_full_record_starts_over() {
        let mut s = session(2, 2);
        assert_eq!(s.target_count(), 2);
        s.confirm().unwrap();
        assert!(s.collected().is_empty());
    }

    #[test]
    fn test_click_before_confirm_rejected() {
        let mut s = session(2, 0);
        assert!(matches!(s.click(Point::new(1.0, 1.0)), Err(ModeError::WrongPhase { .. })));
    }

    #[test]
    fn test_interrupt_returns_original() {
        let mut s = session(3, 1);
        s.set_target_count(3).unwrap();
        s.confirm().unwrap();
        s.click(Point::new(1.0, 0.0)).unwrap();
        assert_eq!(s.phase(), MultiPhase::Collecting);
        let restored = s.interrupt().unwrap();
        assert_eq!(restored.len(), 1);
        assert_eq!(s.phase(), MultiPhase::Interrupted);
        assert!(s.interrupt().is_none());
    }

    #[test]
    fn test_events_follow_session() {
        let bus = Rc::new(EventBus::new());
        let log = bus.recorder();
        let mut s = MultiDirectionSession::begin("I1".into(), &record(2, 0), bus).unwrap();
        s.confirm().unwrap();
        s.click(Point::new(1.0, 0.0)).unwrap();
        let events = log.direction_events();
        assert!(matches!(events.first(), Some(DirectionEvent::MultiCount { target_count: 1, max_directions: 2, .. })));
        assert!(matches!(events.last(), Some(DirectionEvent::MultiFinished { completed: true, .. })));
    }
}
