//! RDC Protocol - Inbound message format for servo data channels
//!
//! A setpoint command is a single text message carrying two integers,
//! e.g. `"90, 45"`. This crate tokenizes and parses it; clamping and
//! hardware mapping belong to the servo manager.

pub mod parse;

pub use parse::{parse_setpoint, tokenize, ParseError, SETPOINT_TOKENS};
