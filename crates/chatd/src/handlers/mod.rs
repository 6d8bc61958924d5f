//! Packet handlers (C8), one module per packet family, registered into the
//! dispatcher (C7) by packet-type string.

pub mod auth;
pub mod common;
pub mod hello;
pub mod messaging;
pub mod rooms;
