//! # Traveller Position Broadcaster
//!
//! Streams a single moving position to every connected client over
//! Server-Sent Events.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TRAVELLER BROADCASTER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/            - Value types                              │
//! │  └── coord.rs     - Coordinate, boundary wrap, clock         │
//! │                                                              │
//! │  feed/            - Shared state and fan-out                 │
//! │  ├── registry.rs  - Live subscriber set                      │
//! │  └── scheduler.rs - Tick, advance position, dispatch         │
//! │                                                              │
//! │  network/         - Transport                                │
//! │  ├── frame.rs     - SSE frame formatting                     │
//! │  ├── delivery.rs  - Per-connection delivery loop             │
//! │  └── server.rs    - HTTP routes and server lifecycle         │
//! │                                                              │
//! │  config.rs        - Runtime tunables                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! Tick → advance shared position → copy into each subscriber inbox →
//! delivery loop formats and writes → HTTP body streams to the client.
//!
//! The scheduler is the only writer of the shared position. Each
//! subscriber gets its own `Copy` of the value computed for that tick,
//! so all subscribers in one dispatch see the same coordinate.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod feed;
pub mod network;

// Re-export commonly used types
pub use crate::config::BroadcasterConfig;
pub use crate::core::coord::{wrap_around, Coordinate};
pub use crate::feed::registry::{SubscriberHandle, SubscriberId, SubscriberRegistry};
pub use crate::feed::scheduler::{BroadcastScheduler, DispatchReport};
pub use crate::network::delivery::{DeliveryExit, DeliveryLoop, FrameSink};
pub use crate::network::server::{BroadcastContext, BroadcastServer, ServerError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Scheduler tick period (ms)
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 25;

/// Idle keep-alive period (ms)
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 30_000;

/// Bound on one per-subscriber inbox send (ms)
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 25;

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "traveller=info,traveller_server=info,tower_http=info";
