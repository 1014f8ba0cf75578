//! Network Layer
//!
//! SSE framing, per-connection delivery and the HTTP server.

pub mod frame;
pub mod delivery;
pub mod server;

pub use frame::{format_event, keepalive_frame, FrameError};
pub use delivery::{ChannelSink, DeliveryConfig, DeliveryExit, DeliveryLoop, FrameSink, SinkError};
pub use server::{build_router, BroadcastContext, BroadcastServer, ServerError};
