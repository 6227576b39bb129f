//! # Hosted Port
//!
//! Stand-in for the hardware port on host builds. There is no second
//! register set to switch to: callers observe the decided
//! [`Switch`](crate::table::Switch) directly and commit it with
//! [`Kernel::commit_switch`](crate::kernel::Kernel::commit_switch).

/// Switches are committed explicitly on the host.
#[inline]
pub fn request_switch() {}
