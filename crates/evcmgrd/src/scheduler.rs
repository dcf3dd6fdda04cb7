//! Time-scheduled circuit actions.
//!
//! The scheduler is a priority queue of due times serviced by the
//! daemon's dispatch loop. Jobs are one-shot; the only way to cancel an
//! armed job is removing its circuit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use tracing::debug;
use uuid::Uuid;

use crate::evc::Evc;
use crate::storage::date_format_opt;

/// What a schedule entry does when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleAction {
    /// Enable and deploy the circuit.
    Create,
    /// Withdraw the circuit.
    Remove,
}

/// A schedule entry carried by a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitSchedule {
    /// Entry id.
    pub id: String,
    /// When to fire.
    #[serde(default, with = "date_format_opt", skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// What to do.
    pub action: ScheduleAction,
}

impl CircuitSchedule {
    /// Creates a schedule entry with a fresh id.
    pub fn new(date: Option<DateTime<Utc>>, action: ScheduleAction) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            date,
            action,
        }
    }
}

/// A job armed in the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ScheduledJob {
    /// When the job is due.
    pub due: DateTime<Utc>,
    /// The circuit the job acts on.
    pub circuit_id: String,
    /// What to do.
    pub action: ScheduleAction,
}

/// One-shot job queue ordered by due time.
#[derive(Debug, Default)]
pub struct Scheduler {
    queue: BinaryHeap<Reverse<ScheduledJob>>,
}

impl Scheduler {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arms the one-shot enable job at the circuit's activation time.
    ///
    /// With `fire_if_elapsed` false an activation time already in the
    /// past arms nothing; reloaded circuits use this so a restart does
    /// not re-fire old activations.
    pub fn schedule_enable(&mut self, evc: &Evc, fire_if_elapsed: bool, now: DateTime<Utc>) {
        let due = evc.creation_time();
        if !fire_if_elapsed && due < now {
            debug!("{} activation time already elapsed, not arming", evc);
            return;
        }

        self.queue.push(Reverse(ScheduledJob {
            due,
            circuit_id: evc.id().to_string(),
            action: ScheduleAction::Create,
        }));
    }

    /// Arms every dated schedule entry carried by a circuit.
    pub fn add(&mut self, evc: &Evc) {
        for schedule in evc.circuit_scheduler() {
            if let Some(date) = schedule.date {
                self.queue.push(Reverse(ScheduledJob {
                    due: date,
                    circuit_id: evc.id().to_string(),
                    action: schedule.action,
                }));
            }
        }
    }

    /// Drops every job armed for a circuit.
    pub fn cancel_circuit(&mut self, circuit_id: &str) {
        self.queue.retain(|entry| entry.0.circuit_id != circuit_id);
    }

    /// Pops every job due at or before `now`, earliest first.
    pub fn run_pending(&mut self, now: DateTime<Utc>) -> Vec<ScheduledJob> {
        let mut due = Vec::new();
        while let Some(Reverse(job)) = self.queue.peek() {
            if job.due > now {
                break;
            }
            due.push(self.queue.pop().expect("peeked job vanished").0);
        }
        due
    }

    /// Returns the number of armed jobs.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Returns true if no jobs are armed.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
