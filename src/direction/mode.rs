//! Traversal modes, controller states and the interruption table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::selector::SelectReason;
use crate::error::ModeError;

/// The two automated direction traversals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMode {
    /// Finish every pending record of one image before moving on.
    Longitudinal,
    /// Finish one order across every image of the series before the next order.
    CrossSectional,
}

impl AssignmentMode {
    /// Get the display name for this mode.
    pub fn name(&self) -> &'static str {
        match self {
            AssignmentMode::Longitudinal => "longitudinal",
            AssignmentMode::CrossSectional => "cross-sectional",
        }
    }

    /// What happens to an active traversal of this mode on an interruption.
    pub fn effect_of(&self, interruption: Interruption) -> InterruptionEffect {
        match (self, interruption) {
            // The controller's own switches never interrupt
            (_, Interruption::ImageSwitch(SelectReason::Traversal)) => InterruptionEffect::Ignored,
            (_, Interruption::PlantSwitch | Interruption::Cancel) => InterruptionEffect::Exited,
            (
                AssignmentMode::Longitudinal,
                Interruption::ImageSwitch(SelectReason::User) | Interruption::CompetingMode,
            ) => InterruptionEffect::Exited,
            (
                AssignmentMode::CrossSectional,
                Interruption::ImageSwitch(SelectReason::User) | Interruption::CompetingMode,
            ) => InterruptionEffect::Paused,
        }
    }
}

impl fmt::Display for AssignmentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AssignmentMode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "longitudinal" => Ok(AssignmentMode::Longitudinal),
            "cross-sectional" | "cross_sectional" | "crosssectional" => {
                Ok(AssignmentMode::CrossSectional)
            }
            _ => Err(ModeError::UnknownMode(s.to_string())),
        }
    }
}

/// Mode-independent controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControllerState {
    #[default]
    Idle,
    Active,
    Completed,
}

impl ControllerState {
    pub fn name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Active => "active",
            ControllerState::Completed => "completed",
        }
    }
}

/// Progress snapshot of a traversal. `total` is fixed at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Longitudinal {
        completed: usize,
        total: usize,
    },
    CrossSectional {
        completed: usize,
        total: usize,
        /// 1-based index of the current order in the traversal sequence
        current_order: usize,
        total_orders: usize,
        /// The order value being visited, `None` once finished
        order: Option<u32>,
    },
}

impl Progress {
    pub fn completed(&self) -> usize {
        match self {
            Progress::Longitudinal { completed, .. } | Progress::CrossSectional { completed, .. } => {
                *completed
            }
        }
    }

    pub fn total(&self) -> usize {
        match self {
            Progress::Longitudinal { total, .. } | Progress::CrossSectional { total, .. } => *total,
        }
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Progress::Longitudinal { completed, total } => write!(f, "{}/{}", completed, total),
            Progress::CrossSectional {
                completed,
                total,
                current_order,
                total_orders,
                ..
            } => write!(
                f,
                "{}/{} (order {}/{})",
                completed, total, current_order, total_orders
            ),
        }
    }
}

/// Why a traversal ended before completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Manual cancel
    Cancelled,
    /// User navigated away during a longitudinal traversal
    ImageSwitch,
    /// Another annotation mode was entered during a longitudinal traversal
    CompetingMode,
    /// The plant (and with it the time series) changed
    PlantSwitch,
    /// The series' image set changed since entry
    SeriesChanged,
    /// The other traversal mode was entered
    ModeReplaced,
}

/// External events that may interrupt a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    ImageSwitch(SelectReason),
    CompetingMode,
    PlantSwitch,
    Cancel,
}

impl Interruption {
    /// Exit reason recorded when this interruption ends a traversal.
    pub fn exit_reason(&self) -> ExitReason {
        match self {
            Interruption::ImageSwitch(_) => ExitReason::ImageSwitch,
            Interruption::CompetingMode => ExitReason::CompetingMode,
            Interruption::PlantSwitch => ExitReason::PlantSwitch,
            Interruption::Cancel => ExitReason::Cancelled,
        }
    }
}

/// What an interruption did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionEffect {
    /// Nothing was active, or the switch was the controller's own
    Ignored,
    /// Selection cleared, progress kept
    Paused,
    /// Session torn down
    Exited,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modes() {
        assert_eq!(
            "longitudinal".parse::<AssignmentMode>().unwrap(),
            AssignmentMode::Longitudinal
        );
        assert_eq!(
            " Cross-Sectional ".parse::<AssignmentMode>().unwrap(),
            AssignmentMode::CrossSectional
        );
        assert_eq!(
            "diagonal".parse::<AssignmentMode>(),
            Err(ModeError::UnknownMode("diagonal".to_string()))
        );
    }

    #[test]
    fn test_interruption_table() {
        use AssignmentMode::*;
        use InterruptionEffect::*;

        let user_switch = Interruption::ImageSwitch(SelectReason::User);
        let own_switch = Interruption::ImageSwitch(SelectReason::Traversal);

        assert_eq!(Longitudinal.effect_of(user_switch), Exited);
        assert_eq!(CrossSectional.effect_of(user_switch), Paused);
        assert_eq!(Longitudinal.effect_of(Interruption::CompetingMode), Exited);
        assert_eq!(CrossSectional.effect_of(Interruption::CompetingMode), Paused);
        for mode in [Longitudinal, CrossSectional] {
            assert_eq!(mode.effect_of(Interruption::PlantSwitch), Exited);
            assert_eq!(mode.effect_of(Interruption::Cancel), Exited);
            assert_eq!(mode.effect_of(own_switch), Ignored);
        }
    }

    #[test]
    fn test_progress_display() {
        let progress = Progress::CrossSectional {
            completed: 2,
            total: 4,
            current_order: 2,
            total_orders: 2,
            order: Some(7),
        };
        assert_eq!(progress.to_string(), "2/4 (order 2/2)");
        assert_eq!(progress.completed(), 2);
        assert_eq!(progress.total(), 4);
    }
}
