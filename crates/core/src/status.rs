//! Execution status and log level enums, plus the execution state machine.
//!
//! Both enums are stored as lowercase text in the database; `as_str` and
//! `FromStr` are the only conversions the persistence layer relies on.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Execution status
// ---------------------------------------------------------------------------

/// Lifecycle status of a script execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Scheduled,
    Running,
    Completed,
    Errored,
    Failed,
}

impl ExecutionStatus {
    /// Statuses from which no further transition is permitted.
    pub const TERMINAL: [ExecutionStatus; 3] = [Self::Completed, Self::Errored, Self::Failed];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        Self::TERMINAL.contains(&self)
    }

    /// Display color used by operator-facing listings.
    pub fn color(self) -> &'static str {
        match self {
            Self::Pending => "cyan",
            Self::Scheduled => "gray",
            Self::Running => "blue",
            Self::Completed => "green",
            Self::Errored | Self::Failed => "red",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scheduled" => Ok(Self::Scheduled),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "errored" => Ok(Self::Errored),
            "failed" => Ok(Self::Failed),
            other => Err(CoreError::Validation(format!(
                "Unknown execution status: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

pub mod state_machine {
    use super::ExecutionStatus::{self, *};

    /// Returns the set of statuses reachable from `from`.
    ///
    /// Terminal statuses return an empty slice.
    pub fn valid_transitions(from: ExecutionStatus) -> &'static [ExecutionStatus] {
        match from {
            Pending | Scheduled => &[Running],
            Running => &[Completed, Errored, Failed],
            Completed | Errored | Failed => &[],
        }
    }

    pub fn can_transition(from: ExecutionStatus, to: ExecutionStatus) -> bool {
        valid_transitions(from).contains(&to)
    }
}

// ---------------------------------------------------------------------------
// Log level
// ---------------------------------------------------------------------------

/// Severity of a script log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Success,
    Info,
    Warning,
    Failure,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Success => "success",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Failure => "failure",
        }
    }

    pub fn color(self) -> &'static str {
        match self {
            Self::Debug => "gray",
            Self::Success => "green",
            Self::Info => "cyan",
            Self::Warning => "yellow",
            Self::Failure => "red",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(Self::Debug),
            "success" => Ok(Self::Success),
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "failure" => Ok(Self::Failure),
            other => Err(CoreError::Validation(format!("Unknown log level: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;

    const ALL: [ExecutionStatus; 6] = [
        ExecutionStatus::Pending,
        ExecutionStatus::Scheduled,
        ExecutionStatus::Running,
        ExecutionStatus::Completed,
        ExecutionStatus::Errored,
        ExecutionStatus::Failed,
    ];

    #[test]
    fn pending_and_scheduled_only_start() {
        for from in [ExecutionStatus::Pending, ExecutionStatus::Scheduled] {
            assert_eq!(valid_transitions(from), &[ExecutionStatus::Running]);
        }
    }

    #[test]
    fn running_reaches_every_terminal_status() {
        for to in ExecutionStatus::TERMINAL {
            assert!(can_transition(ExecutionStatus::Running, to));
        }
        assert!(!can_transition(ExecutionStatus::Running, ExecutionStatus::Pending));
    }

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in ExecutionStatus::TERMINAL {
            for to in ALL {
                assert!(!can_transition(from, to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn status_text_round_trips() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<ExecutionStatus>().is_err());
    }

    #[test]
    fn status_serializes_lowercase() {
        let json = serde_json::to_string(&ExecutionStatus::Errored).unwrap();
        assert_eq!(json, "\"errored\"");
    }

    #[test]
    fn log_level_parses() {
        assert_eq!("failure".parse::<LogLevel>().unwrap(), LogLevel::Failure);
        assert!("error".parse::<LogLevel>().is_err());
    }
}
