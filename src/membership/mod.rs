//! Membership Module
//!
//! Node identity types, peer reachability probing, and resolution of the
//! live peer set from the shared directory.

mod node;
mod probe;
mod resolver;

pub use node::{Endpoint, NodeIdentity};
pub use probe::{ReachabilityProber, TcpProber};
pub use resolver::MembershipResolver;
