//! # Scheduler
//!
//! Core scheduling logic for BoostOS. Implements a preemptive scheduler
//! whose priorities are recomputed from scratch every tick so that waiting
//! processes are boosted and CPU-bound ones decay.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt:
//! 1. **Update metrics**: the Running process gains a CPU tick, every
//!    selectable Runnable process gains a tick of wait time
//! 2. **Recompute priorities**: for every non-terminal process
//!    `dynamic = initial − α·cpu_ticks_used + β·wait_time`
//! 3. **Handle signals**: apply every pending signal (suspend, resume,
//!    terminate, divert to handler)
//! 4. **Enforce budgets**: the process charged this tick is interrupted
//!    once it has used its `exec_time`, even if a signal just suspended it
//! 5. **Select next process**: highest dynamic priority among selectable
//!    processes, lowest pid on ties; idle if none
//! 6. **Dispatch**: Runnable → Running, record first schedule, count the
//!    context switch
//!
//! ## Starvation Prevention
//!
//! A process that is denied the CPU gains β per tick with no upper bound,
//! while the process holding the CPU loses α per tick. Any starved process
//! therefore overtakes every CPU-bound competitor after a bounded number
//! of ticks.

use crate::config::SchedParams;
use crate::process::{Pid, ProcState, Process};
use crate::signal;
use crate::table::{ProcessTable, Switch};

/// Dynamic priority of `p` under `params`. Pure function of the record's
/// counters; never updated incrementally.
#[inline]
pub fn dynamic_priority(p: &Process, params: &SchedParams) -> i64 {
    p.initial_priority - params.alpha * p.cpu_ticks_used as i64
        + params.beta * p.wait_time as i64
}

/// Tick-driven scheduler. Holds only its coefficients; all mutable state
/// lives in the process table so that it is covered by the table lock.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    params: SchedParams,
}

impl Scheduler {
    pub const fn new(params: SchedParams) -> Self {
        Self { params }
    }

    #[inline]
    pub fn params(&self) -> &SchedParams {
        &self.params
    }

    /// Called from the SysTick handler every tick (steps 1–4).
    pub fn tick(&self, table: &mut ProcessTable) {
        table.advance_clock();

        // --- Accrue CPU and wait time ---
        let mut charged = None;
        for p in table.iter_mut() {
            match p.state() {
                ProcState::Running => {
                    p.cpu_ticks_used += 1;
                    charged = Some(p.pid);
                }
                ProcState::Runnable if !p.gated => p.wait_time += 1,
                _ => {}
            }
        }
        if charged.is_none() {
            table.count_idle_tick();
        }

        // --- Recompute priorities ---
        self.recompute(table);

        // --- Signals ---
        signal::handle_pending(table);

        // --- CPU budget ---
        // Checked against the process charged this tick, whatever state the
        // signal pass left it in.
        if let Some(pid) = charged {
            let exhausted = table
                .get(pid)
                .is_some_and(|p| !p.state().is_terminal() && p.budget_exhausted());
            if exhausted {
                log::info!("pid {} reached its exec_time", pid);
                signal::interrupt(table, pid);
            }
        }
    }

    /// Recompute the dynamic priority of every non-terminal process.
    pub fn recompute(&self, table: &mut ProcessTable) {
        for p in table.iter_mut().filter(|p| !p.state().is_terminal()) {
            p.dynamic_priority = dynamic_priority(p, &self.params);
        }
    }

    /// Highest dynamic priority among selectable processes, lowest pid on
    /// ties.
    pub fn select(&self, table: &ProcessTable) -> Option<Pid> {
        table
            .iter()
            .filter(|p| p.is_selectable())
            .max_by(|a, b| {
                a.dynamic_priority
                    .cmp(&b.dynamic_priority)
                    .then_with(|| b.pid.cmp(&a.pid))
            })
            .map(|p| p.pid)
    }

    /// Preempt the Running process, pick the next one and dispatch it
    /// (steps 5–6). Returns the switch for the arch port to perform.
    pub fn schedule(&self, table: &mut ProcessTable) -> Switch {
        let now = table.now();

        if let Some(prev) = table.running() {
            if let Some(p) = table.get_mut(prev) {
                p.set_state(ProcState::Runnable);
            }
        }

        let next = self.select(table);
        if let Some(p) = next.and_then(|pid| table.get_mut(pid)) {
            p.set_state(ProcState::Running);
            if p.first_scheduled.is_none() {
                p.first_scheduled = Some(now);
            }
            p.context_switches += 1;
        }

        let switch = table.set_pending(next);
        log::trace!("tick {}: {:?} -> {:?}", now, switch.from, switch.to);
        switch
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedParams::DEFAULT)
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle;
    use crate::signal::SignalKind;

    fn spawn(t: &mut ProcessTable, s: &Scheduler) -> Pid {
        lifecycle::create(t, s.params(), None, 0, false, 0).unwrap()
    }

    /// One full timer tick: metrics, signals, selection.
    fn run_tick(t: &mut ProcessTable, s: &Scheduler) -> Switch {
        s.tick(t);
        s.schedule(t)
    }

    #[test]
    fn test_priority_formula() {
        let params = SchedParams::new(100, 3, 2);
        let mut p = Process::embryo(Pid(9), None, 100, 0);
        p.cpu_ticks_used = 10;
        p.wait_time = 4;
        assert_eq!(dynamic_priority(&p, &params), 100 - 30 + 8);

        p.cpu_ticks_used = 50;
        assert!(dynamic_priority(&p, &params) < 0, "priority may go negative");
    }

    #[test]
    fn test_tie_breaks_on_lowest_pid() {
        let s = Scheduler::new(SchedParams::new(100, 1, 1));
        let mut t = ProcessTable::new();
        let a = spawn(&mut t, &s);
        let _b = spawn(&mut t, &s);
        assert_eq!(s.select(&t), Some(a));
    }

    #[test]
    fn test_idle_when_nothing_runnable() {
        let s = Scheduler::default();
        let mut t = ProcessTable::new();
        let sw = run_tick(&mut t, &s);
        assert_eq!(sw, Switch { from: None, to: None });
        assert_eq!(t.idle_ticks(), 1);
    }

    #[test]
    fn test_wait_bonus_scenario() {
        // A waits 10 ticks while another process holds the CPU: with β=2
        // and α=0 its priority must be exactly 100 + 2·10.
        let s = Scheduler::new(SchedParams::new(100, 0, 2));
        let mut t = ProcessTable::new();
        let hog = lifecycle::create(&mut t, s.params(), None, 0, false, 0).unwrap();
        let a = lifecycle::create(&mut t, s.params(), None, 0, false, 0).unwrap();
        t.get_mut(a).unwrap().initial_priority = 100;
        t.get_mut(hog).unwrap().initial_priority = 10_000;

        s.schedule(&mut t);
        assert_eq!(t.running(), Some(hog));

        for _ in 0..10 {
            s.tick(&mut t);
            // Keep the hog on the CPU without re-selecting.
            assert_eq!(t.running(), Some(hog));
        }
        let p = t.get(a).unwrap();
        assert_eq!(p.wait_time, 10);
        assert_eq!(p.dynamic_priority, 120);

        // Recomputation is idempotent: same counters, same value.
        s.recompute(&mut t);
        assert_eq!(t.get(a).unwrap().dynamic_priority, 120);
    }

    #[test]
    fn test_bounded_starvation() {
        let s = Scheduler::new(SchedParams::new(100, 1, 1));
        let mut t = ProcessTable::new();
        let a = spawn(&mut t, &s);
        let b = spawn(&mut t, &s);

        // Equal priority: lowest pid runs first.
        assert_eq!(s.schedule(&mut t).to, Some(a));

        // After one tick of running, a has dropped below the waiting b.
        let sw = run_tick(&mut t, &s);
        assert_eq!(sw, Switch { from: None, to: Some(b) });
        assert_eq!(t.get(a).unwrap().dynamic_priority, 99);
        assert_eq!(t.get(b).unwrap().dynamic_priority, 101);

        // Neither process goes more than a couple of ticks without the CPU.
        let mut last_ran = [t.now(), t.now()];
        for _ in 0..50 {
            let sw = run_tick(&mut t, &s);
            let idx = if sw.to == Some(a) { 0 } else { 1 };
            last_ran[idx] = t.now();
            assert!(t.now() - last_ran[0] <= 2);
            assert!(t.now() - last_ran[1] <= 2);
        }
    }

    #[test]
    fn test_starved_process_eventually_wins() {
        let s = Scheduler::new(SchedParams::new(0, 1, 1));
        let mut t = ProcessTable::new();
        let hog = spawn(&mut t, &s);
        let low = spawn(&mut t, &s);
        t.get_mut(hog).unwrap().initial_priority = 40;

        let mut ticks = 0;
        s.schedule(&mut t);
        while t.running() != Some(low) {
            run_tick(&mut t, &s);
            ticks += 1;
            assert!(ticks < 100, "low-priority process starved");
        }
        // hog loses one per tick run, low gains one per tick waited.
        assert!(ticks <= 21);
    }

    #[test]
    fn test_context_switches_match_dispatches() {
        let s = Scheduler::new(SchedParams::new(100, 2, 1));
        let mut t = ProcessTable::new();
        let pids = [spawn(&mut t, &s), spawn(&mut t, &s), spawn(&mut t, &s)];
        let mut dispatched = [0u64; 3];

        for _ in 0..60 {
            let sw = run_tick(&mut t, &s);
            let i = pids.iter().position(|p| Some(*p) == sw.to).unwrap();
            dispatched[i] += 1;
        }
        for (i, pid) in pids.iter().enumerate() {
            let p = t.get(*pid).unwrap();
            assert_eq!(p.context_switches, dispatched[i]);
            assert!(p.first_scheduled.unwrap() >= p.creation_time);
        }
    }

    #[test]
    fn test_first_scheduled_set_once() {
        let s = Scheduler::default();
        let mut t = ProcessTable::new();
        let a = spawn(&mut t, &s);
        run_tick(&mut t, &s);
        let first = t.get(a).unwrap().first_scheduled;
        assert_eq!(first, Some(1));
        for _ in 0..5 {
            run_tick(&mut t, &s);
        }
        assert_eq!(t.get(a).unwrap().first_scheduled, first);
    }

    #[test]
    fn test_exec_time_forces_zombie() {
        let s = Scheduler::default();
        let mut t = ProcessTable::new();
        let a = lifecycle::create(&mut t, s.params(), None, 0, false, 3).unwrap();
        signal::register(&mut t, a, crate::process::HandlerRef(0x400)).unwrap();

        run_tick(&mut t, &s); // dispatched, 0 ticks used
        for used in 1..3 {
            signal::broadcast(&mut t, SignalKind::Custom);
            run_tick(&mut t, &s);
            assert_eq!(t.get(a).unwrap().cpu_ticks_used, used);
            assert_eq!(t.get(a).unwrap().state(), ProcState::Running);
        }

        signal::broadcast(&mut t, SignalKind::Custom);
        let sw = run_tick(&mut t, &s);
        let p = t.get(a).unwrap();
        assert_eq!(p.cpu_ticks_used, 3);
        assert_eq!(p.state(), ProcState::Zombie);
        assert_eq!(sw.to, None);
    }

    /// Table with init and shell held back, so `a` is the only candidate.
    fn lone_budgeted(s: &Scheduler, exec_time: u64) -> (ProcessTable, Pid) {
        let mut t = ProcessTable::new();
        for _ in 0..2 {
            lifecycle::create(&mut t, s.params(), None, 0, true, 0).unwrap();
        }
        let a = lifecycle::create(&mut t, s.params(), None, 0, false, exec_time).unwrap();
        (t, a)
    }

    #[test]
    fn test_budget_enforced_when_suspended_same_tick() {
        let s = Scheduler::default();
        let (mut t, a) = lone_budgeted(&s, 2);

        assert_eq!(s.schedule(&mut t).to, Some(a));
        run_tick(&mut t, &s);
        assert_eq!(t.get(a).unwrap().cpu_ticks_used, 1);

        // The tick that uses up the budget also applies STP_BG.
        signal::broadcast(&mut t, SignalKind::StpBg);
        s.tick(&mut t);
        assert_eq!(t.get(a).unwrap().state(), ProcState::Zombie);
        assert_eq!(t.get(a).unwrap().exit_status, Some(signal::KILLED_STATUS));

        // FG has nothing left to resume.
        assert_eq!(signal::broadcast(&mut t, SignalKind::Fg), 0);
        for _ in 0..3 {
            assert_eq!(run_tick(&mut t, &s).to, None);
        }
        let p = t.get(a).unwrap();
        assert_eq!(p.state(), ProcState::Zombie);
        assert_eq!(p.cpu_ticks_used, 2);
    }

    #[test]
    fn test_int_and_budget_same_tick_retire_once() {
        let s = Scheduler::default();
        let (mut t, a) = lone_budgeted(&s, 2);

        s.schedule(&mut t);
        run_tick(&mut t, &s);

        // A second retire would panic on Zombie -> Zombie.
        signal::broadcast(&mut t, SignalKind::Int);
        s.tick(&mut t);

        let p = t.get(a).unwrap();
        assert_eq!(p.state(), ProcState::Zombie);
        assert_eq!(p.cpu_ticks_used, 2);
        assert_eq!(p.exit_time, Some(t.now()));
        let report = p.report.unwrap();
        assert_eq!(report.pid, a);
        assert_eq!(report.context_switches, 2);
    }

    #[test]
    fn test_gated_processes_release_together() {
        let s = Scheduler::default();
        let mut t = ProcessTable::new();
        let worker = spawn(&mut t, &s);
        let gated: [Pid; 3] = core::array::from_fn(|_| {
            lifecycle::create(&mut t, s.params(), None, 0, true, 0).unwrap()
        });

        for _ in 0..5 {
            assert_eq!(run_tick(&mut t, &s).to, Some(worker));
        }
        for pid in gated {
            let p = t.get(pid).unwrap();
            assert_eq!(p.wait_time, 0, "gated processes do not accrue wait time");
            assert_eq!(p.first_scheduled, None);
        }

        assert_eq!(lifecycle::release_gated(&mut t), 3);
        assert!(gated.iter().all(|pid| t.get(*pid).unwrap().is_selectable()));
    }

    #[test]
    fn test_suspension_does_not_count_as_waiting() {
        let s = Scheduler::new(SchedParams::new(100, 1, 1));
        let mut t = ProcessTable::new();
        let _init = spawn(&mut t, &s);
        let _shell = spawn(&mut t, &s);
        let user = spawn(&mut t, &s);
        t.get_mut(user).unwrap().initial_priority = 0;

        for _ in 0..3 {
            run_tick(&mut t, &s);
        }
        let before = t.get(user).unwrap().wait_time;

        signal::broadcast(&mut t, SignalKind::StpBg);
        run_tick(&mut t, &s);
        assert_eq!(t.get(user).unwrap().state(), ProcState::Suspended);
        let at_suspend = t.get(user).unwrap().wait_time;
        assert_eq!(at_suspend, before + 1);

        for _ in 0..10 {
            run_tick(&mut t, &s);
        }
        assert_eq!(t.get(user).unwrap().wait_time, at_suspend);

        signal::broadcast(&mut t, SignalKind::Fg);
        run_tick(&mut t, &s);
        let p = t.get(user).unwrap();
        assert_ne!(p.state(), ProcState::Suspended);
        assert_eq!(p.wait_time, at_suspend);
        assert_eq!(p.suspended_ticks, 11);
    }
}
