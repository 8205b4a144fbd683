//! RDC Daemon - data channel dispatch and servo channel managers
//!
//! This crate provides the core infrastructure for the rdcd daemon:
//! - `dispatcher` - routes newly opened channels to managers by label
//! - `manager` - the `ChannelManager` capability and its owned `HandlerSet`
//! - `handler` - per-channel observer forwarding messages to its manager
//! - `servo` - two-axis servo manager driven by setpoint messages
//! - `server` - Unix socket transport (one connection = one channel)
//! - `loopback` - in-process transport for embedding and tests
//! - `config` - TOML daemon configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        rdcd daemon                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  ChannelServer  │────▶│        Dispatcher           │   │
//! │  │ (Unix Socket)   │     │  label → [Weak<Manager>]    │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │ on_new_channel    │
//! │           │ messages                    ▼                   │
//! │           │              ┌─────────────────────────────┐   │
//! │           │              │   ServoManager              │   │
//! │           │              │   HandlerSet ─▶ PwmDriver   │   │
//! │           ▼              └──────────────▲──────────────┘   │
//! │  ┌─────────────────┐                    │ process           │
//! │  │ ChannelHandler  │────────────────────┘                   │
//! │  │  (per channel)  │                                        │
//! │  └─────────────────┘                                        │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Poisoned mutexes are recovered, never propagated as panics
//! - Channel operations handle closure gracefully

pub mod config;
pub mod dispatcher;
pub mod handler;
pub mod loopback;
pub mod manager;
pub mod server;
pub mod servo;

pub use dispatcher::Dispatcher;
pub use handler::{ChannelHandler, HandlerId};
pub use manager::{ChannelManager, HandlerSet};
pub use servo::{ServoError, ServoManager, ServoState};
