//! HTTP and WebSocket gateway for lcm-live.
//!
//! Clients open an ingest WebSocket at `/ws`, are admitted (or turned away
//! when the server is full), send their generation parameters once and then
//! push camera frames. The transformed output is pulled separately as a
//! motion-JPEG stream from `/stream/{session_id}`.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;
pub mod stream;

pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
