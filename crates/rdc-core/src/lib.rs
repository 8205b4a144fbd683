//! RDC Core - Shared types for label-routed data channels
//!
//! This crate provides the domain types shared between the protocol
//! parser, the servo drivers and the daemon (rdcd):
//! - `Label` and the `ChannelHandle` / `ChannelObserver` transport seam
//! - `Setpoint` and `DegreeRange` for two-axis servo commands
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod channel;
pub mod error;
pub mod label;
pub mod setpoint;

// Re-exports for convenience
pub use channel::{
    ChannelHandle, ChannelObserver, ChannelState, ObserverId, ObserverRegistry, SharedChannel,
};
pub use error::{DomainError, DomainResult};
pub use label::Label;
pub use setpoint::{DegreeRange, Setpoint, DEGREE_MAX, DEGREE_MID, DEGREE_MIN};
