//! Typed events emitted by the engine.
//!
//! Emission is one-directional: the engine and the direction controller
//! publish on an [`EventBus`], rendering code subscribes. Subscribers must not
//! subscribe new handlers from inside a handler.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::direction::{AssignmentMode, ExitReason, Progress};
use crate::model::{AnnotationIdentity, ImageId};
use crate::sync::SyncReport;

/// Events from the synchronization engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A propagation was queued behind the one in flight
    Queued {
        /// 1-based position in the queue
        position: usize,
    },
    /// A propagation run finished (including queued runs)
    Completed(SyncReport),
}

/// Events from the direction assignment controller and its sub-session.
#[derive(Debug, Clone, PartialEq)]
pub enum DirectionEvent {
    /// A traversal mode became active
    Entered {
        mode: AssignmentMode,
        progress: Progress,
    },
    /// A record became the current traversal target
    Selected {
        image: ImageId,
        identity: AnnotationIdentity,
    },
    /// Progress after a direction was set
    Progress(Progress),
    /// A cross-sectional traversal was paused by an external event
    Paused { progress: Progress },
    /// A paused traversal continues
    Resumed,
    /// The traversal ended before completion
    Exited {
        mode: AssignmentMode,
        reason: ExitReason,
    },
    /// Every pending record of the traversal has been handled
    Completed {
        mode: AssignmentMode,
        progress: Progress,
    },
    /// The proposed multi-direction count changed
    MultiCount {
        identity: AnnotationIdentity,
        target_count: u8,
        max_directions: u8,
    },
    /// A multi-direction click was collected
    MultiProgress {
        identity: AnnotationIdentity,
        collected: usize,
        target_count: u8,
    },
    /// A multi-direction session ended
    MultiFinished {
        identity: AnnotationIdentity,
        completed: bool,
    },
}

/// Any event published by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Sync(SyncEvent),
    Direction(DirectionEvent),
}

impl From<SyncEvent> for EngineEvent {
    fn from(event: SyncEvent) -> Self {
        EngineEvent::Sync(event)
    }
}

impl From<DirectionEvent> for EngineEvent {
    fn from(event: DirectionEvent) -> Self {
        EngineEvent::Direction(event)
    }
}

type Subscriber = Box<dyn Fn(&EngineEvent)>;

/// Fan-out of engine events to subscribers.
#[derive(Default)]
pub struct EventBus {
    subscribers: RefCell<Vec<Subscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler that receives every subsequent event.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&EngineEvent) + 'static,
    {
        self.subscribers.borrow_mut().push(Box::new(handler));
    }

    /// Subscribe a log that buffers events for polling.
    pub fn recorder(&self) -> EventLog {
        let log = EventLog::default();
        let sink = log.clone();
        self.subscribe(move |event| sink.push(event.clone()));
        log
    }

    /// Publish an event to every subscriber.
    pub fn emit(&self, event: impl Into<EngineEvent>) {
        let event = event.into();
        log::trace!("Event: {:?}", event);
        for subscriber in self.subscribers.borrow().iter() {
            subscriber(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Buffered events, drained by a frame loop or inspected by tests.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Rc<RefCell<Vec<EngineEvent>>>,
}

impl EventLog {
    fn push(&self, event: EngineEvent) {
        self.events.borrow_mut().push(event);
    }

    /// Take every buffered event.
    pub fn drain(&self) -> Vec<EngineEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Copy of the buffered events.
    pub fn snapshot(&self) -> Vec<EngineEvent> {
        self.events.borrow().clone()
    }

    /// Buffered sync reports, in emission order.
    pub fn sync_reports(&self) -> Vec<SyncReport> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Sync(SyncEvent::Completed(report)) => Some(report.clone()),
                _ => None,
            })
            .collect()
    }

    /// Buffered direction events, in emission order.
    pub fn direction_events(&self) -> Vec<DirectionEvent> {
        self.events
            .borrow()
            .iter()
            .filter_map(|event| match event {
                EngineEvent::Direction(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }
}
