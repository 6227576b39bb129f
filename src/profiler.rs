//! # Profiler
//!
//! Per-process scheduling metrics, derived once from the timestamps and
//! counters in a terminal record:
//!
//! | Metric | Definition |
//! |--------|------------|
//! | TAT    | exit time − creation time |
//! | WT     | accumulated `wait_time` (suspension excluded) |
//! | RT     | first scheduled − creation time, undefined if never scheduled |
//! | #CS    | final context-switch count |
//!
//! All times are in scheduler ticks.

use core::fmt;

use crate::process::{Pid, Process};

/// Metrics of one terminated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    pub pid: Pid,
    /// Turnaround time.
    pub turnaround: u64,
    /// Waiting time.
    pub waiting: u64,
    /// Response time. `None` if the process never ran.
    pub response: Option<u64>,
    /// Number of times the process was switched onto the CPU.
    pub context_switches: u64,
}

/// Compute the report of `p`, terminated at `exit_time`.
pub fn profile(p: &Process, exit_time: u64) -> Report {
    Report {
        pid: p.pid,
        turnaround: exit_time.saturating_sub(p.creation_time),
        waiting: p.wait_time,
        response: p
            .first_scheduled
            .map(|first| first.saturating_sub(p.creation_time)),
        context_switches: p.context_switches,
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PID: {} TAT: {} WT: {} ",
            self.pid, self.turnaround, self.waiting
        )?;
        match self.response {
            Some(rt) => write!(f, "RT: {} ", rt)?,
            None => write!(f, "RT: - ")?,
        }
        write!(f, "#CS: {}", self.context_switches)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
