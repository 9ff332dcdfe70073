mod args;
#[cfg(test)]
mod fixture;
mod fwd;
mod link;
pub mod node;
pub mod protocol;
mod route;
mod utils;

pub use args::Args;
pub use fwd::{DropReason, ForwardDecision, ForwardingEngine};
pub use link::LinkLayer;
pub use route::{Interface, InterfaceTable, Prefix, RouteEntry, RouteState, RoutingTable};
