//! Supervisor Module
//!
//! Child process supervision and the node's liveness/reconcile loop.

mod liveness;
mod process;
mod startup;
mod status;

pub use liveness::{LivenessSupervisor, SupervisorOutcome, RECYCLE_EXIT_CODE};
pub use process::{LaunchVars, SupervisedChild};
pub use startup::{launch_children, launch_children_until};
pub use status::{NodeStatus, StatusBoard, SupervisorState};
