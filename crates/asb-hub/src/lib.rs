// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-hub
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The coordination hub: admission control, scheduling, worker fan-out,
//! and startup recovery.
//!
//! The [`Hub`] object owns all mutable hub state (exclusion sets, the
//! scheduler timer, the event bus) behind an explicit
//! construct → start → stop lifecycle; there are no process-wide
//! singletons. The dispatcher admits requests sequentially against the
//! exclusion sets, then fans admitted work out into parallel workers
//! bounded by the configured worker cap.

/// Admission control and routing.
pub mod dispatcher;
/// Hub lifecycle and shared state.
pub mod hub;
/// Startup reconciliation of orphaned in-progress requests.
pub mod recovery;
/// Periodic tick loop.
pub mod scheduler;
/// Per-request execution drivers.
pub mod worker;

pub use dispatcher::{Backend, ExclusionSets, dispatch};
pub use hub::{Hub, HubError, HubShared};
pub use scheduler::Scheduler;
