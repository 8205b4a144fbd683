//! In-memory PWM backend.
//!
//! Records every successful call so the daemon can run without hardware
//! (`rdcd start --simulate`) and tests can assert on what would have been
//! driven. Clones share the same record.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::{PinMode, PwmDriver, PwmError};

/// Driver operation, used to record calls and to inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PwmOp {
    SetMode,
    SetFrequency,
    SetRange,
    SetDutyCycle,
    Stop,
}

impl PwmOp {
    fn command_name(self) -> &'static str {
        match self {
            Self::SetMode => "set_mode",
            Self::SetFrequency => "set_PWM_frequency",
            Self::SetRange => "set_PWM_range",
            Self::SetDutyCycle => "set_PWM_dutycycle",
            Self::Stop => "pigpio_stop",
        }
    }
}

/// One recorded driver call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmCall {
    pub op: PwmOp,
    pub pin: u32,
    pub value: u32,
}

#[derive(Debug, Default)]
struct SimState {
    calls: Vec<PwmCall>,
    fail_on: Option<PwmOp>,
    stopped: bool,
}

/// Simulated PWM backend.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPwm {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend on which every `op` call fails.
    pub fn failing_on(op: PwmOp) -> Self {
        let sim = Self::new();
        sim.fail_on(Some(op));
        sim
    }

    /// Makes every later `op` call fail, or clears the failure with `None`.
    pub fn fail_on(&self, op: Option<PwmOp>) {
        self.lock().fail_on = op;
    }

    /// Returns all recorded calls in order.
    pub fn calls(&self) -> Vec<PwmCall> {
        self.lock().calls.clone()
    }

    /// Returns `(pin, duty_cycle)` for every recorded duty-cycle call.
    pub fn duty_cycles(&self) -> Vec<(u32, u32)> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.op == PwmOp::SetDutyCycle)
            .map(|c| (c.pin, c.value))
            .collect()
    }

    /// Forgets all recorded calls.
    pub fn clear(&self) {
        self.lock().calls.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, op: PwmOp, pin: u32, value: u32) -> Result<(), PwmError> {
        let mut state = self.lock();
        if state.stopped {
            return Err(PwmError::Stopped);
        }
        if state.fail_on == Some(op) {
            return Err(PwmError::Command {
                command: op.command_name(),
                pin,
                code: -1,
            });
        }
        debug!(?op, pin, value, "Simulated PWM call");
        state.calls.push(PwmCall { op, pin, value });
        Ok(())
    }
}

impl PwmDriver for SimulatedPwm {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> Result<(), PwmError> {
        self.record(PwmOp::SetMode, pin, mode.code())
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> Result<u32, PwmError> {
        self.record(PwmOp::SetFrequency, pin, frequency)?;
        Ok(frequency)
    }

    fn set_pwm_range(&mut self, pin: u32, range: u32) -> Result<(), PwmError> {
        self.record(PwmOp::SetRange, pin, range)
    }

    fn set_pwm_duty_cycle(&mut self, pin: u32, duty_cycle: u32) -> Result<(), PwmError> {
        self.record(PwmOp::SetDutyCycle, pin, duty_cycle)
    }

    fn stop(&mut self) {
        let mut state = self.lock();
        if !state.stopped {
            state.stopped = true;
            state.calls.push(PwmCall {
                op: PwmOp::Stop,
                pin: 0,
                value: 0,
            });
        }
    }
}
