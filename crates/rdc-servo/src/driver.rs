//! The hardware seam between servo managers and PWM backends.

use crate::PwmError;

/// GPIO pin mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input,
    Output,
}

impl PinMode {
    /// pigpio's numeric mode code.
    pub fn code(self) -> u32 {
        match self {
            Self::Input => 0,
            Self::Output => 1,
        }
    }
}

/// A PWM-capable GPIO backend.
///
/// Obtaining a driver (connecting to pigpiod, building a simulator) is the
/// hardware `init` step. Every call may fail; callers decide whether a
/// failure is fatal.
pub trait PwmDriver: Send + 'static {
    /// Configures `pin` as input or output.
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), PwmError>;

    /// Sets the PWM frequency in Hz, returning the frequency actually used.
    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> Result<u32, PwmError>;

    /// Sets the duty-cycle range (the value meaning 100% on).
    fn set_pwm_range(&mut self, pin: u32, range: u32) -> Result<(), PwmError>;

    /// Sets the duty cycle in units of the configured range.
    fn set_pwm_duty_cycle(&mut self, pin: u32, duty_cycle: u32) -> Result<(), PwmError>;

    /// Releases the backend. Calling it again is a no-op.
    fn stop(&mut self);
}

impl<D: PwmDriver + ?Sized> PwmDriver for Box<D> {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), PwmError> {
        (**self).set_mode(pin, mode)
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> Result<u32, PwmError> {
        (**self).set_pwm_frequency(pin, frequency)
    }

    fn set_pwm_range(&mut self, pin: u32, range: u32) -> Result<(), PwmError> {
        (**self).set_pwm_range(pin, range)
    }

    fn set_pwm_duty_cycle(&mut self, pin: u32, duty_cycle: u32) -> Result<(), PwmError> {
        (**self).set_pwm_duty_cycle(pin, duty_cycle)
    }

    fn stop(&mut self) {
        (**self).stop()
    }
}
