//! Core value types.
//!
//! The coordinate that moves through the system and the boundary wrap
//! that keeps it inside valid latitude/longitude ranges.

pub mod coord;

pub use coord::{wrap_around, Coordinate, unix_timestamp};
