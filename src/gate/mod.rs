//! Admission control for outbound submissions.

mod admission;
mod scheduler;

pub use admission::{AdmissionGate, GateConfig, GateError, GateState, Grant};
pub use scheduler::{DelayScheduler, SchedulerError};
