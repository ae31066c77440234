//! Automated direction assignment.
//!
//! [`DirectionAssignmentController`] walks the records that still lack a
//! direction, either image by image (longitudinal) or order by order across
//! the whole series (cross-sectional). [`MultiDirectionSession`] collects
//! several directions for one record.

mod controller;
mod cross_sectional;
mod longitudinal;
mod mode;
mod multi;
mod selector;

pub use controller::{DirectionAssignmentController, TraversalStep};
pub use cross_sectional::{CrossSectionalPlan, Cursor, Occurrence, OrderGroup};
pub use longitudinal::LongitudinalQueue;
pub use mode::{
    AssignmentMode, ControllerState, ExitReason, Interruption, InterruptionEffect, Progress,
};
pub use multi::{MultiDirectionSession, MultiPhase, MultiStep};
pub use selector::{HeadlessSelector, ImageSelector, SelectReason};
