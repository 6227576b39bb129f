//! # Architecture Abstraction Layer
//!
//! Provides a hardware abstraction boundary for the scheduler. The core
//! never touches registers: it decides a [`Switch`](crate::table::Switch)
//! and asks the port to perform it with [`request_switch`].
//!
//! - `cortex_m4`: the real port (PendSV context switch, SysTick tick).
//! - `hosted`: a no-op port for host builds, where tests and the
//!   simulation binary drive ticks and switches by hand.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4::request_switch;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod hosted;
#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub use hosted::request_switch;
