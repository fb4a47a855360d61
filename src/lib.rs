//! A WebSocket relay for shared-canvas collaboration.
//!
//! Clients join a room over `/ws`, exchange drawing, chat and presence
//! events, and receive the room's canvas snapshot when they join.

pub mod config;
pub mod error;
pub mod relay;
