//! The durable record of one script run and its state machine.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use validator::Validate;

use crate::error::{CoreError, CoreResult};
use crate::status::{state_machine, ExecutionStatus};
use crate::types::{Actor, DbId, Timestamp};

/// Persisted `{"input": ..., "output": ...}` container of an execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPayload {
    /// Submitted parameters with form control fields removed.
    #[serde(default)]
    pub input: Value,
    /// Stringified value returned by the script, if it completed.
    #[serde(default)]
    pub output: Option<String>,
}

impl ExecutionPayload {
    pub fn with_input(input: Value) -> Self {
        Self {
            input,
            output: None,
        }
    }

    /// Copy carrying only the input, as used for recurrences.
    pub fn input_only(&self) -> Self {
        Self::with_input(self.input.clone())
    }
}

// ---------------------------------------------------------------------------
// ScriptExecution
// ---------------------------------------------------------------------------

/// One run attempt of a script instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptExecution {
    pub id: DbId,
    pub script_instance_id: DbId,
    pub actor: Actor,
    pub created_at: Timestamp,
    pub scheduled_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub status: ExecutionStatus,
    /// Recurrence interval in minutes.
    pub interval: Option<u32>,
    /// Handle of the queued job that runs this execution.
    pub task_id: Uuid,
    /// Correlation id for change records produced by the run.
    pub request_id: Uuid,
    pub data: ExecutionPayload,
    pub task_queue: String,
}

impl ScriptExecution {
    /// Mark the execution as running. Returns `false` if it had already
    /// started, in which case nothing changes.
    pub fn start(&mut self) -> CoreResult<bool> {
        self.start_at(Utc::now())
    }

    pub fn start_at(&mut self, now: Timestamp) -> CoreResult<bool> {
        if self.started_at.is_some() {
            return Ok(false);
        }
        if !state_machine::can_transition(self.status, ExecutionStatus::Running) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: ExecutionStatus::Running,
            });
        }
        self.started_at = Some(now);
        self.status = ExecutionStatus::Running;
        Ok(true)
    }

    /// Move a running execution into one of the terminal statuses.
    pub fn terminate(&mut self, status: ExecutionStatus) -> CoreResult<()> {
        self.terminate_at(status, Utc::now())
    }

    pub fn terminate_at(&mut self, status: ExecutionStatus, now: Timestamp) -> CoreResult<()> {
        if !status.is_terminal() {
            return Err(CoreError::InvalidTerminalStatus(status));
        }
        if !state_machine::can_transition(self.status, status) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.completed_at = Some(now);
        Ok(())
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Elapsed run time: from start (or creation) to completion (or `now`).
    pub fn duration(&self, now: Timestamp) -> chrono::Duration {
        let start = self.started_at.unwrap_or(self.created_at);
        let end = self.completed_at.unwrap_or(now);
        end - start
    }

    /// Operator-facing duration, e.g. `"2 minutes, 3.50 seconds"`.
    pub fn duration_display(&self, now: Timestamp) -> String {
        let total = self.duration(now).num_milliseconds() as f64 / 1000.0;
        let minutes = (total / 60.0).floor();
        let seconds = total - minutes * 60.0;
        format!("{} minutes, {:.2} seconds", minutes as i64, seconds)
    }

    /// Build the follow-up execution of a recurring run.
    ///
    /// Returns `Ok(None)` when no interval is set. The next run is placed
    /// `interval` minutes after this run's scheduled time, so a late worker
    /// does not shift the cadence.
    pub fn next_recurrence(&self) -> CoreResult<Option<NewScriptExecution>> {
        let Some(interval) = self.interval else {
            return Ok(None);
        };
        let scheduled = self
            .scheduled_at
            .ok_or(CoreError::RecurrenceWithoutSchedule {
                execution_id: self.id,
            })?;
        let next_time = scheduled + chrono::Duration::minutes(i64::from(interval));

        let next = NewScriptExecution::new(
            self.script_instance_id,
            self.actor.clone(),
            self.task_queue.clone(),
            self.data.input.clone(),
        )
        .scheduled_at(next_time)
        .interval(interval);

        Ok(Some(next))
    }
}

// ---------------------------------------------------------------------------
// NewScriptExecution
// ---------------------------------------------------------------------------

/// Largest recurrence interval, in minutes; the column is a 32-bit integer.
pub const MAX_INTERVAL_MINUTES: u32 = i32::MAX as u32;

/// DTO for creating an execution record.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct NewScriptExecution {
    pub script_instance_id: DbId,
    pub actor: Actor,
    pub status: ExecutionStatus,
    pub scheduled_at: Option<Timestamp>,
    #[validate(range(min = 1, max = MAX_INTERVAL_MINUTES))]
    pub interval: Option<u32>,
    #[validate(length(min = 1, max = 100))]
    pub task_queue: String,
    pub task_id: Uuid,
    pub request_id: Uuid,
    pub data: ExecutionPayload,
}

impl NewScriptExecution {
    /// A pending execution with fresh task and request ids.
    pub fn new(
        script_instance_id: DbId,
        actor: Actor,
        task_queue: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            script_instance_id,
            actor,
            status: ExecutionStatus::Pending,
            scheduled_at: None,
            interval: None,
            task_queue: task_queue.into(),
            task_id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            data: ExecutionPayload::with_input(input),
        }
    }

    /// Schedule for a future time; the status becomes `scheduled`.
    pub fn scheduled_at(mut self, at: Timestamp) -> Self {
        self.scheduled_at = Some(at);
        self.status = ExecutionStatus::Scheduled;
        self
    }

    pub fn interval(mut self, minutes: u32) -> Self {
        self.interval = Some(minutes);
        self
    }

    /// Check field rules and the scheduling invariants.
    pub fn check(&self) -> CoreResult<()> {
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;

        match (self.status, self.scheduled_at) {
            (ExecutionStatus::Pending, None) | (ExecutionStatus::Scheduled, Some(_)) => {}
            (ExecutionStatus::Scheduled, None) => {
                return Err(CoreError::Validation(
                    "A scheduled execution needs a scheduled time".into(),
                ))
            }
            (ExecutionStatus::Pending, Some(_)) => {
                return Err(CoreError::Validation(
                    "An execution with a scheduled time must have status scheduled".into(),
                ))
            }
            (other, _) => {
                return Err(CoreError::Validation(format!(
                    "New executions must be pending or scheduled, got {other}"
                )))
            }
        }

        if self.interval.is_some() && self.scheduled_at.is_none() {
            return Err(CoreError::Validation(
                "A recurring execution needs a scheduled time".into(),
            ));
        }
        Ok(())
    }

    /// Materialize the record as the store would, for in-memory backends.
    pub fn into_execution(self, id: DbId, created_at: Timestamp) -> ScriptExecution {
        ScriptExecution {
            id,
            script_instance_id: self.script_instance_id,
            actor: self.actor,
            created_at,
            scheduled_at: self.scheduled_at,
            started_at: None,
            completed_at: None,
            status: self.status,
            interval: self.interval,
            task_id: self.task_id,
            request_id: self.request_id,
            data: self.data,
            task_queue: self.task_queue,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn ts(minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, minute, 0).unwrap()
    }

    fn pending() -> ScriptExecution {
        NewScriptExecution::new(7, Actor::new(Some(1), "admin"), "default", json!({"site": "ams1"}))
            .into_execution(1, ts(0))
    }

    #[test]
    fn start_sets_running_and_timestamp() {
        let mut exec = pending();
        assert!(exec.start_at(ts(1)).unwrap());
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert_eq!(exec.started_at, Some(ts(1)));
    }

    #[test]
    fn start_twice_keeps_first_timestamp() {
        let mut exec = pending();
        exec.start_at(ts(1)).unwrap();
        assert!(!exec.start_at(ts(5)).unwrap());
        assert_eq!(exec.started_at, Some(ts(1)));
    }

    #[test]
    fn terminate_rejects_non_terminal_status() {
        let mut exec = pending();
        exec.start_at(ts(1)).unwrap();
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::Scheduled,
            ExecutionStatus::Running,
        ] {
            assert_matches!(
                exec.terminate_at(status, ts(2)),
                Err(CoreError::InvalidTerminalStatus(s)) if s == status
            );
        }
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.completed_at.is_none());
    }

    #[test]
    fn terminate_requires_running() {
        let mut exec = pending();
        assert_matches!(
            exec.terminate_at(ExecutionStatus::Completed, ts(2)),
            Err(CoreError::InvalidTransition { .. })
        );
    }

    #[test]
    fn terminal_execution_cannot_restart() {
        let mut exec = pending();
        exec.start_at(ts(1)).unwrap();
        exec.terminate_at(ExecutionStatus::Errored, ts(2)).unwrap();
        exec.started_at = None;
        assert_matches!(exec.start_at(ts(3)), Err(CoreError::InvalidTransition { .. }));
    }

    #[test]
    fn duration_display_formats_minutes_and_seconds() {
        let mut exec = pending();
        exec.start_at(ts(1)).unwrap();
        exec.terminate_at(ExecutionStatus::Completed, ts(3)).unwrap();
        assert_eq!(exec.duration_display(ts(59)), "2 minutes, 0.00 seconds");
        assert!(exec.is_completed());
    }

    #[test]
    fn recurrence_without_interval_is_none() {
        assert!(pending().next_recurrence().unwrap().is_none());
    }

    #[test]
    fn recurrence_without_schedule_is_rejected() {
        let mut exec = pending();
        exec.interval = Some(30);
        assert_matches!(
            exec.next_recurrence(),
            Err(CoreError::RecurrenceWithoutSchedule { execution_id: 1 })
        );
    }

    #[test]
    fn recurrence_carries_input_and_fresh_ids() {
        let mut exec = NewScriptExecution::new(7, Actor::default(), "high", json!({"a": 1}))
            .scheduled_at(ts(0))
            .interval(30)
            .into_execution(1, ts(0));
        exec.data.output = Some("done".into());

        let next = exec.next_recurrence().unwrap().unwrap();
        assert_eq!(next.scheduled_at, Some(ts(30)));
        assert_eq!(next.status, ExecutionStatus::Scheduled);
        assert_eq!(next.data.input, json!({"a": 1}));
        assert_eq!(next.data.output, None);
        assert_eq!(next.task_queue, "high");
        assert_eq!(next.interval, Some(30));
        assert_ne!(next.task_id, exec.task_id);
        assert_ne!(next.request_id, exec.request_id);
    }

    #[test]
    fn check_rejects_zero_interval_and_unscheduled_recurrence() {
        let zero = NewScriptExecution::new(1, Actor::default(), "default", json!({}))
            .scheduled_at(ts(0))
            .interval(0);
        assert_matches!(zero.check(), Err(CoreError::Validation(_)));

        let unscheduled = NewScriptExecution::new(1, Actor::default(), "default", json!({}))
            .interval(5);
        assert_matches!(unscheduled.check(), Err(CoreError::Validation(_)));

        let ok = NewScriptExecution::new(1, Actor::default(), "default", json!({}))
            .scheduled_at(ts(0))
            .interval(5);
        assert!(ok.check().is_ok());
    }

    #[test]
    fn check_rejects_interval_beyond_column_range() {
        let longest = NewScriptExecution::new(1, Actor::default(), "default", json!({}))
            .scheduled_at(ts(0))
            .interval(MAX_INTERVAL_MINUTES);
        assert!(longest.check().is_ok());

        let too_long = NewScriptExecution::new(1, Actor::default(), "default", json!({}))
            .scheduled_at(ts(0))
            .interval(MAX_INTERVAL_MINUTES + 1);
        assert_matches!(too_long.check(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn payload_serializes_with_null_output() {
        let payload = ExecutionPayload::with_input(json!({"x": true}));
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            json!({"input": {"x": true}, "output": null})
        );
    }
}
