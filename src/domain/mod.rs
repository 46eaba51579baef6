//! Domain layer - Core types and port definitions
//!
//! The cloud driver and host collector traits live here together with the
//! value types that cross them.

pub mod ports;

pub use ports::*;
