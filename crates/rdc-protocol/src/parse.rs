//! Parsing of setpoint command messages.
//!
//! # Tokenization
//!
//! Tokens are separated by `,` or ` `. A single space directly after a comma
//! belongs to that comma, so `", "` is one delimiter. Any other delimiter
//! character starts a new token, and empty tokens are kept:
//!
//! | input      | tokens              |
//! |------------|---------------------|
//! | `"90, 45"` | `["90", "45"]`      |
//! | `"90,45"`  | `["90", "45"]`      |
//! | `"90 45"`  | `["90", "45"]`      |
//! | `"90  45"` | `["90", "", "45"]`  |
//! | `"90,,45"` | `["90", "", "45"]`  |

use rdc_core::Setpoint;
use thiserror::Error;

/// Number of tokens in a setpoint command.
pub const SETPOINT_TOKENS: usize = 2;

/// Reasons a setpoint message is rejected as malformed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Message is not valid UTF-8")]
    InvalidUtf8,

    #[error("Expected {expected} tokens, found {found}")]
    TokenCount { expected: usize, found: usize },

    #[error("Token {position} is not an integer: {token:?}")]
    InvalidInteger { position: usize, token: String },
}

/// Splits a message into tokens.
///
/// See the module documentation for the delimiter rule.
pub fn tokenize(message: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start = 0;
    let mut after_comma = false;

    for (idx, ch) in message.char_indices() {
        match ch {
            ' ' if after_comma => {
                // Second half of a ", " delimiter
                start = idx + 1;
                after_comma = false;
            }
            ',' | ' ' => {
                tokens.push(message.get(start..idx).unwrap_or_default());
                start = idx + 1;
                after_comma = ch == ',';
            }
            _ => after_comma = false,
        }
    }
    tokens.push(message.get(start..).unwrap_or_default());

    tokens
}

/// Parses a raw message payload into a setpoint.
///
/// The values are returned exactly as sent; range handling is up to the
/// caller.
///
/// # Errors
///
/// - `ParseError::InvalidUtf8` if the payload is not text
/// - `ParseError::TokenCount` unless there are exactly two tokens
/// - `ParseError::InvalidInteger` if a token is not a base-10 `i32`
pub fn parse_setpoint(data: &[u8]) -> Result<Setpoint, ParseError> {
    let message = std::str::from_utf8(data).map_err(|_| ParseError::InvalidUtf8)?;

    let tokens = tokenize(message);
    let (x, y) = match tokens.as_slice() {
        [x, y] => (parse_degree(0, x)?, parse_degree(1, y)?),
        other => {
            return Err(ParseError::TokenCount {
                expected: SETPOINT_TOKENS,
                found: other.len(),
            })
        }
    };

    Ok(Setpoint::new(x, y))
}

fn parse_degree(position: usize, token: &str) -> Result<i32, ParseError> {
    token.parse().map_err(|_| ParseError::InvalidInteger {
        position,
        token: token.to_string(),
    })
}
