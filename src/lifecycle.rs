//! # Process Lifecycle
//!
//! Creation (including gated and time-limited variants), gate release,
//! exit and reaping. Every function here runs with the table lock held.

use thiserror::Error;

use crate::config::SchedParams;
use crate::process::{Context, Pid, ProcState, Process};
use crate::profiler::Report;
use crate::scheduler;
use crate::table::{ForkError, ProcessTable};

/// Failures of `wait()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WaitError {
    #[error("pid {0} has no children")]
    NoChildren(Pid),
    #[error("no process is running")]
    NoCurrentProcess,
}

/// Create a process that starts executing at `entry`.
///
/// With `start_later` the process is Runnable but gated: it is neither
/// selected nor credited wait time until [`release_gated`]. A non-zero
/// `exec_time` caps its CPU usage in ticks.
pub fn create(
    table: &mut ProcessTable,
    params: &SchedParams,
    parent: Option<Pid>,
    entry: usize,
    start_later: bool,
    exec_time: u64,
) -> Result<Pid, ForkError> {
    let now = table.now();
    let pid = table.allocate(|pid| {
        let mut p = Process::embryo(pid, parent, params.init_priority, now);
        p.context = Context::start(entry);
        p.gated = start_later;
        p.exec_time = exec_time;
        p.dynamic_priority = scheduler::dynamic_priority(&p, params);
        p.set_state(ProcState::Runnable);
        p
    })?;

    log::info!(
        "pid {} created (parent {:?}, start_later {}, exec_time {})",
        pid,
        parent,
        start_later,
        exec_time
    );
    Ok(pid)
}

/// Release every gated process in one pass.
///
/// Returns the number of processes released.
pub fn release_gated(table: &mut ProcessTable) -> usize {
    let mut released = 0;
    for p in table.iter_mut().filter(|p| p.gated) {
        p.gated = false;
        released += 1;
    }
    log::debug!("released {} gated process(es)", released);
    released
}

/// Terminate `pid` with `status`.
pub fn exit(table: &mut ProcessTable, pid: Pid, status: i32) {
    table.retire(pid, status);
}

/// Reap one Zombie child of `parent`, lowest pid first.
///
/// Returns `Ok(None)` when `parent` has children but none has exited yet;
/// the caller then puts `parent` to sleep.
pub fn reap(table: &mut ProcessTable, parent: Pid) -> Result<Option<Report>, WaitError> {
    let mut has_children = false;
    let mut zombie: Option<Pid> = None;
    for p in table.iter().filter(|p| p.parent == Some(parent)) {
        has_children = true;
        if p.state() == ProcState::Zombie && zombie.map_or(true, |z| p.pid < z) {
            zombie = Some(p.pid);
        }
    }

    match zombie {
        Some(pid) => {
            let record = table.remove(pid);
            log::debug!("pid {} reaped by {}", pid, parent);
            Ok(record.report)
        }
        None if has_children => Ok(None),
        None => Err(WaitError::NoChildren(parent)),
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
