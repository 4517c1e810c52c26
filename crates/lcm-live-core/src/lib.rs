//! Core types for lcm-live: config, errors, the per-session frame slot and
//! the session registry that gates admission.

pub mod config;
pub mod error;
pub mod frame;
pub mod params;
pub mod protocol;
pub mod registry;
pub mod session;
pub mod slot;

pub use frame::Frame;
pub use params::GenerationParams;
pub use registry::{RegistryError, SessionRegistry};
pub use session::{Session, SessionId};
pub use slot::{FrameSlot, PutOutcome};
