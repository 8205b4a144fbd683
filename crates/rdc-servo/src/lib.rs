//! PWM servo drivers for RDC.
//!
//! The servo manager talks to hardware only through the [`PwmDriver`]
//! trait. Two backends are provided:
//! - [`PigpiodDriver`] - client for the pigpio daemon's socket interface
//! - [`SimulatedPwm`] - in-memory backend that records every call
//!
//! [`ServoConfig`] carries the PWM timing constants and per-axis limits, and
//! maps degrees to the duty-cycle units the driver expects.

pub mod config;
pub mod driver;
pub mod error;
pub mod pigpiod;
pub mod simulated;

pub use config::{AxisConfig, ServoConfig, DEFAULT_X_AXIS, DEFAULT_Y_AXIS};
pub use driver::{PinMode, PwmDriver};
pub use error::{ConfigError, PwmError};
pub use pigpiod::{PigpiodDriver, DEFAULT_PIGPIOD_HOST, DEFAULT_PIGPIOD_PORT};
pub use simulated::{PwmCall, PwmOp, SimulatedPwm};
