//! WebSocket transport — accepts telephony media streams, drives a
//! conversation orchestrator per session, and relays its events back out.

pub mod mulaw;
pub mod schema;
pub mod server;
pub mod session;

pub use server::{start_gateway, DetectorFactory, GatewayState};
