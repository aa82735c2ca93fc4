//! System utilities
//!
//! Platform detection used to gate backend availability.

pub mod platform;
