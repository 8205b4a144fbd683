//! Two-axis servo manager.
//!
//! `ServoManager` turns setpoint messages (`"x, y"` in degrees) received on
//! any of its channels into PWM duty cycles on two output pins.
//!
//! # Lifecycle
//!
//! ```text
//! create() ──ok──▶ Ready ──shutdown()/drop──▶ Closed
//!    │
//!    └──err──▶ (no manager)
//! ```
//!
//! Creation configures both pins (mode, frequency, range) and fails on the
//! first rejected step. Changes already applied by earlier steps are left
//! as they are. On success both axes are driven to the neutral position
//! before any message is accepted.
//!
//! # Message Handling
//!
//! Malformed messages are logged and discarded. Values outside an axis'
//! configured range are clamped. Driver failures are logged and never
//! reported back to the channel.
//!
//! # Locking
//!
//! The driver, position and state share one mutex. Lock order is driver
//! state, then the handler set, then the channel's observer list.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use rdc_core::{Label, Setpoint, SharedChannel};
use rdc_protocol::parse_setpoint;
use rdc_servo::{PinMode, PwmDriver, PwmError, ServoConfig};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{ChannelManager, HandlerId, HandlerSet};

/// Hardware setup step, reported when creation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    Mode,
    Frequency,
    Range,
}

impl fmt::Display for InitStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::Mode => "output mode",
            Self::Frequency => "PWM frequency",
            Self::Range => "PWM range",
        };
        f.write_str(step)
    }
}

/// Errors from creating a [`ServoManager`].
#[derive(Error, Debug)]
pub enum ServoError {
    #[error("Invalid servo configuration: {0}")]
    Config(#[from] rdc_servo::ConfigError),

    #[error("Failed to set {step} on pin {pin}: {source}")]
    Init {
        step: InitStep,
        pin: u32,
        #[source]
        source: PwmError,
    },
}

/// Manager lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoState {
    /// Hardware configured, accepting setpoints
    Ready,

    /// Handlers released and driver stopped
    Closed,
}

struct Hardware<D> {
    driver: D,
    state: ServoState,
    position: Setpoint,
}

/// Channel manager driving a pair of servos.
pub struct ServoManager<D: PwmDriver> {
    label: Label,
    config: ServoConfig,
    hardware: Mutex<Hardware<D>>,
    handlers: HandlerSet,
    self_ref: Weak<Self>,
}

impl<D: PwmDriver> ServoManager<D> {
    /// Validates `config`, configures both pins and drives them to neutral.
    pub fn create(label: Label, config: ServoConfig, mut driver: D) -> Result<Arc<Self>, ServoError> {
        config.validate()?;

        let pins = [config.x.pin, config.y.pin];
        for pin in pins {
            driver
                .set_mode(pin, PinMode::Output)
                .map_err(|source| init_error(InitStep::Mode, pin, source))?;
        }
        for pin in pins {
            let actual = driver
                .set_pwm_frequency(pin, config.pwm_frequency)
                .map_err(|source| init_error(InitStep::Frequency, pin, source))?;
            debug!(pin, requested = config.pwm_frequency, actual, "PWM frequency set");
        }
        for pin in pins {
            driver
                .set_pwm_range(pin, config.pwm_range)
                .map_err(|source| init_error(InitStep::Range, pin, source))?;
        }

        let mut hardware = Hardware {
            driver,
            state: ServoState::Ready,
            position: Setpoint::NEUTRAL,
        };
        drive(&mut hardware.driver, &config, Setpoint::NEUTRAL);

        info!(
            %label,
            x_pin = config.x.pin,
            y_pin = config.y.pin,
            x_range = %config.x.range(),
            y_range = %config.y.range(),
            "Servo manager ready"
        );

        Ok(Arc::new_cyclic(|me| Self {
            label,
            config,
            hardware: Mutex::new(hardware),
            handlers: HandlerSet::new(),
            self_ref: me.clone(),
        }))
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn state(&self) -> ServoState {
        self.lock().state
    }

    /// Last setpoint driven to the hardware, after clamping.
    pub fn position(&self) -> Setpoint {
        self.lock().position
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Clamps `setpoint` to the axis ranges and drives it.
    ///
    /// Ignored once the manager is closed.
    pub fn apply(&self, setpoint: Setpoint) {
        let clamped = setpoint.clamped(&self.config.x.range(), &self.config.y.range());
        if !clamped.is_within_domain() {
            warn!(label = %self.label, %setpoint, %clamped, "Setpoint outside 0-180 after clamping");
            return;
        }

        let mut hardware = self.lock();
        if hardware.state == ServoState::Closed {
            debug!(label = %self.label, %setpoint, "Ignoring setpoint on closed manager");
            return;
        }

        if clamped != setpoint {
            debug!(label = %self.label, %setpoint, %clamped, "Setpoint clamped");
        }
        drive(&mut hardware.driver, &self.config, clamped);
        hardware.position = clamped;
    }

    /// Releases every handler and stops the driver. Idempotent.
    pub fn shutdown(&self) {
        let mut hardware = self.lock();
        if hardware.state == ServoState::Closed {
            return;
        }
        hardware.state = ServoState::Closed;

        let released = self.handlers.drain();
        hardware.driver.stop();
        info!(label = %self.label, released, "Servo manager closed");
    }

    fn lock(&self) -> MutexGuard<'_, Hardware<D>> {
        self.hardware.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<D: PwmDriver> ChannelManager for ServoManager<D> {
    fn label(&self) -> &Label {
        &self.label
    }

    fn on_new_channel(&self, channel: SharedChannel) {
        let hardware = self.lock();
        if hardware.state == ServoState::Closed {
            warn!(label = %self.label, "Closed servo manager ignoring new channel");
            return;
        }

        let manager: Weak<dyn ChannelManager> = self.self_ref.clone();
        let handler = self.handlers.attach(manager, channel);
        drop(hardware);

        if self.handlers.contains(handler) {
            info!(label = %self.label, %handler, "Channel opened");
        }
    }

    fn on_closed(&self, handler: HandlerId) {
        if self.handlers.remove(handler) {
            info!(label = %self.label, %handler, "Channel closed");
        }
    }

    fn process(&self, data: &[u8]) {
        debug!(label = %self.label, message = %String::from_utf8_lossy(data), "Received message");

        match parse_setpoint(data) {
            Ok(setpoint) => self.apply(setpoint),
            Err(e) => warn!(label = %self.label, error = %e, "Rejected setpoint message"),
        }
    }
}

impl<D: PwmDriver> Drop for ServoManager<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<D: PwmDriver> fmt::Debug for ServoManager<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServoManager")
            .field("label", &self.label)
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

fn init_error(step: InitStep, pin: u32, source: PwmError) -> ServoError {
    ServoError::Init { step, pin, source }
}

/// Writes both axes. Failures are logged per axis.
fn drive<D: PwmDriver>(driver: &mut D, config: &ServoConfig, setpoint: Setpoint) {
    for (axis, pin, degree) in [("x", config.x.pin, setpoint.x), ("y", config.y.pin, setpoint.y)] {
        let duty = config.to_duty_cycle(degree);
        if let Err(e) = driver.set_pwm_duty_cycle(pin, duty) {
            error!(axis, pin, duty, error = %e, "Failed to set duty cycle");
        }
    }
}
