//! Satellite pollers running independent loops against the external API.

mod returns;
mod supervisors;

pub use returns::{ReturnsMonitor, ReturnsMonitorStatus};
pub use supervisors::{SupervisorMonitor, SupervisorMonitorStatus};
