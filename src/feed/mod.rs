//! Position Feed
//!
//! Shared position and the fan-out to subscribers.
//!
//! ## Module Structure
//!
//! - `registry`: Live subscriber set
//! - `scheduler`: Periodic advance and dispatch

pub mod registry;
pub mod scheduler;

pub use registry::{SubscriberHandle, SubscriberId, SubscriberRegistry};
pub use scheduler::{BroadcastScheduler, DispatchReport, SchedulerConfig};
