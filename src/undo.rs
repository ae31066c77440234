//! Undo/Redo history for keypoint edits.
//!
//! Each undoable edit is recorded as a [`Command`] holding enough state to
//! reverse it. Reversal is performed by the caller through the normal edit
//! path, so an undo is synchronized like any other edit; it only reaches the
//! images the original edit actually changed (`synced_to`).

use crate::constants::DEFAULT_MAX_HISTORY;
use crate::model::{AnnotationIdentity, AnnotationRecord, Direction, ImageId, Point};

// ============================================================================
// Command Types
// ============================================================================

/// A command that can be undone and redone.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// A keypoint was placed
    AddKeypoint {
        /// Image the keypoint was placed on
        image: ImageId,
        /// The record as placed
        record: AnnotationRecord,
        /// Later images that received a copy
        synced_to: Vec<ImageId>,
    },
    /// A keypoint was removed
    DeleteKeypoint {
        image: ImageId,
        /// The record as it was before removal
        record: AnnotationRecord,
        synced_to: Vec<ImageId>,
    },
    /// A keypoint was moved
    MoveKeypoint {
        image: ImageId,
        identity: AnnotationIdentity,
        from: Point,
        to: Point,
        /// Click origins moved along with the keypoint
        with_directions: bool,
        synced_to: Vec<ImageId>,
    },
    /// A keypoint's direction list was replaced
    EditDirections {
        image: ImageId,
        identity: AnnotationIdentity,
        before: Vec<Direction>,
        after: Vec<Direction>,
        synced_to: Vec<ImageId>,
    },
    /// Every keypoint of an image was removed (never propagated)
    ClearImage {
        image: ImageId,
        /// All records that were cleared
        records: Vec<AnnotationRecord>,
    },
}

impl Command {
    /// Get a human-readable description of this command
    pub fn description(&self) -> String {
        match self {
            Command::AddKeypoint { record, .. } => format!("Add keypoint {}", record.identity()),
            Command::DeleteKeypoint { record, .. } => {
                format!("Delete keypoint {}", record.identity())
            }
            Command::MoveKeypoint { identity, .. } => format!("Move keypoint {}", identity),
            Command::EditDirections { identity, after, .. } => {
                format!("Set {} direction(s) on {}", after.len(), identity)
            }
            Command::ClearImage { records, .. } => format!("Clear {} keypoints", records.len()),
        }
    }

    /// Image the command was recorded on.
    pub fn image(&self) -> &str {
        match self {
            Command::AddKeypoint { image, .. }
            | Command::DeleteKeypoint { image, .. }
            | Command::MoveKeypoint { image, .. }
            | Command::EditDirections { image, .. }
            | Command::ClearImage { image, .. } => image,
        }
    }
}

// ============================================================================
// Undo Stack
// ============================================================================

/// Configuration for the undo stack
#[derive(Debug, Clone)]
pub struct UndoConfig {
    /// Maximum number of commands to keep in history
    pub max_history: usize,
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
        }
    }
}

/// The undo/redo history stack.
///
/// When a new command is pushed the redo stack is cleared. Undo moves the
/// most recent command to the redo stack and redo moves it back.
#[derive(Debug, Clone, Default)]
pub struct UndoStack {
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
    config: UndoConfig,
}

impl UndoStack {
    /// Create a new empty undo stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Create with custom configuration
    pub fn with_config(config: UndoConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Push a command to the undo stack.
    /// This clears the redo stack (can't redo after a new action).
    pub fn push(&mut self, command: Command) {
        log::debug!("Undo: pushed '{}'", command.description());
        self.undo_stack.push(command);
        self.redo_stack.clear();

        // Limit history size
        let excess = self.undo_stack.len().saturating_sub(self.config.max_history);
        if excess > 0 {
            self.undo_stack.drain(..excess);
        }
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// The command the next undo would reverse.
    pub fn peek_undo(&self) -> Option<&Command> {
        self.undo_stack.last()
    }

    /// The command the next redo would re-apply.
    pub fn peek_redo(&self) -> Option<&Command> {
        self.redo_stack.last()
    }

    /// Pop a command for undoing; it moves to the redo stack.
    pub fn pop_undo(&mut self) -> Option<Command> {
        let cmd = self.undo_stack.pop()?;
        log::debug!("Undo: '{}'", cmd.description());
        self.redo_stack.push(cmd.clone());
        Some(cmd)
    }

    /// Pop a command for redoing; it moves back to the undo stack.
    pub fn pop_redo(&mut self) -> Option<Command> {
        let cmd = self.redo_stack.pop()?;
        log::debug!("Redo: '{}'", cmd.description());
        self.undo_stack.push(cmd.clone());
        Some(cmd)
    }

    /// Get the description of the command that would be undone
    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.last().map(|c| c.description())
    }

    /// Clear all history
    pub fn clear(&mut self) {
        if self.can_undo() || self.can_redo() {
            log::debug!("Undo history cleared");
        }
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Get the number of commands in undo history
    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get the number of commands in redo history
    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }
}

// ============================================================================
// Tests
// ============================================================================
