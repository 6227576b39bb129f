//! # BoostOS
//!
//! A teaching kernel core for ARM Cortex-M4 microcontrollers: a bounded
//! process table, a preemptive scheduler that boosts waiting processes,
//! keyboard-driven signals, process lifecycle and per-process profiling.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                 Processes (init, shell, …)               │
//! ├──────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                   │
//! │   custom_fork · scheduler_start · signal · sigret        │
//! │   exit · wait · yield_now · console_key · timer_tick     │
//! ├──────────────┬─────────────┬──────────────┬──────────────┤
//! │  Scheduler   │  Signals    │  Lifecycle   │  Profiler    │
//! │ scheduler.rs │  signal.rs  │ lifecycle.rs │  profiler.rs │
//! ├──────────────┴─────────────┴──────────────┴──────────────┤
//! │     Process Table (table.rs) · Records (process.rs)      │
//! │            guarded by one TableLock (sync.rs)            │
//! ├──────────────────────────────────────────────────────────┤
//! │           Arch Port (arch/cortex_m4.rs)                  │
//! │   PendSV · SysTick · stacks · frame synthesis            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Scheduling Model
//!
//! Every tick each process's dynamic priority is recomputed from scratch:
//!
//! ```text
//! dynamic = initial − α·cpu_ticks_used + β·wait_time
//! ```
//!
//! The highest value runs, lowest pid on ties. A process denied the CPU
//! keeps gaining β per tick, so starvation is bounded.
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **Fixed-size table**: `[Option<Process>; MAX_PROCS]`
//! - **Per-slot stack**: `[u8; STACK_SIZE]` owned by the arch port
//! - **One lock**: every table access goes through `TableLock::with`
//!
//! Host builds (unit tests and the simulation binary) swap the arch port
//! for a no-op and drive ticks by hand.

#![cfg_attr(not(test), no_std)]

pub mod config;
pub mod process;
pub mod table;
pub mod signal;
pub mod lifecycle;
pub mod scheduler;
pub mod profiler;
pub mod sync;
pub mod arch;
pub mod kernel;
