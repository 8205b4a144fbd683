//! Servo timing constants and per-axis limits.
//!
//! Defaults match a standard hobby servo on a 50 Hz signal: a 500-2500 us
//! pulse spans 0-180 degrees. With a PWM range of 40000 the 20 ms period
//! gives duty cycles from 1000 to 5000, and 90 degrees maps to 3000.

use rdc_core::{DegreeRange, DEGREE_MAX, DEGREE_MIN};
use serde::{Deserialize, Deserializer, Serialize};

use crate::ConfigError;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// pigpio accepts PWM ranges in 25..=40000.
const PWM_RANGE_MIN: u32 = 25;
const PWM_RANGE_MAX: u32 = 40_000;

/// Highest Broadcom GPIO number pigpio addresses.
const MAX_GPIO: u32 = 53;

/// Default wiring and limits of the horizontal axis.
pub const DEFAULT_X_AXIS: AxisConfig = AxisConfig {
    pin: 12,
    min: 20,
    max: DEGREE_MAX,
};

/// Default wiring and limits of the vertical axis.
pub const DEFAULT_Y_AXIS: AxisConfig = AxisConfig {
    pin: 13,
    min: DEGREE_MIN,
    max: DEGREE_MAX,
};

/// One servo axis: the GPIO pin it is wired to and its allowed angles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AxisConfig {
    pub pin: u32,
    pub min: i32,
    pub max: i32,
}

/// An axis table as written in a config file. Missing keys fall back to
/// that axis' defaults rather than to the full 0-180 range.
#[derive(Debug, Default, Deserialize)]
struct AxisTable {
    pin: Option<u32>,
    min: Option<i32>,
    max: Option<i32>,
}

impl AxisTable {
    fn or(self, defaults: AxisConfig) -> AxisConfig {
        AxisConfig {
            pin: self.pin.unwrap_or(defaults.pin),
            min: self.min.unwrap_or(defaults.min),
            max: self.max.unwrap_or(defaults.max),
        }
    }
}

fn deserialize_x_axis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AxisConfig, D::Error> {
    AxisTable::deserialize(deserializer).map(|table| table.or(DEFAULT_X_AXIS))
}

fn deserialize_y_axis<'de, D: Deserializer<'de>>(deserializer: D) -> Result<AxisConfig, D::Error> {
    AxisTable::deserialize(deserializer).map(|table| table.or(DEFAULT_Y_AXIS))
}

impl AxisConfig {
    pub fn new(pin: u32, range: DegreeRange) -> Self {
        Self {
            pin,
            min: range.min,
            max: range.max,
        }
    }

    /// Clamp range for this axis.
    pub fn range(&self) -> DegreeRange {
        DegreeRange {
            min: self.min,
            max: self.max,
        }
    }
}

/// Configuration for a two-axis servo manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoConfig {
    /// PWM frequency in Hz
    pub pwm_frequency: u32,

    /// Duty-cycle value meaning 100% on
    pub pwm_range: u32,

    /// Pulse width for 0 degrees, in microseconds
    pub pulse_min_us: u32,

    /// Pulse width for 180 degrees, in microseconds
    pub pulse_max_us: u32,

    /// Horizontal (roll) axis
    #[serde(deserialize_with = "deserialize_x_axis")]
    pub x: AxisConfig,

    /// Vertical (pitch) axis
    #[serde(deserialize_with = "deserialize_y_axis")]
    pub y: AxisConfig,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            pwm_frequency: 50,
            pwm_range: 40_000,
            pulse_min_us: 500,
            pulse_max_us: 2500,
            x: DEFAULT_X_AXIS,
            y: DEFAULT_Y_AXIS,
        }
    }
}

impl ServoConfig {
    /// Checks that the timing constants and axis limits are usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pwm_frequency == 0 || u64::from(self.pwm_frequency) > MICROS_PER_SECOND {
            return Err(ConfigError::InvalidValue {
                field: "pwm_frequency",
                value: self.pwm_frequency.to_string(),
                expected: format!("1..={MICROS_PER_SECOND} Hz"),
            });
        }

        if !(PWM_RANGE_MIN..=PWM_RANGE_MAX).contains(&self.pwm_range) {
            return Err(ConfigError::InvalidValue {
                field: "pwm_range",
                value: self.pwm_range.to_string(),
                expected: format!("{PWM_RANGE_MIN}..={PWM_RANGE_MAX}"),
            });
        }

        if self.pulse_min_us >= self.pulse_max_us {
            return Err(ConfigError::InvalidValue {
                field: "pulse_min_us",
                value: self.pulse_min_us.to_string(),
                expected: format!("less than pulse_max_us ({})", self.pulse_max_us),
            });
        }

        let period = self.period_us();
        if u64::from(self.pulse_max_us) > period {
            return Err(ConfigError::InvalidValue {
                field: "pulse_max_us",
                value: self.pulse_max_us.to_string(),
                expected: format!("at most the PWM period ({period} us)"),
            });
        }

        for (axis, config) in [("x", &self.x), ("y", &self.y)] {
            config
                .range()
                .validate()
                .map_err(|source| ConfigError::InvalidAxis { axis, source })?;
            if config.pin > MAX_GPIO {
                return Err(ConfigError::InvalidValue {
                    field: "pin",
                    value: config.pin.to_string(),
                    expected: format!("GPIO 0..={MAX_GPIO}"),
                });
            }
        }

        if self.x.pin == self.y.pin {
            return Err(ConfigError::SharedPin { pin: self.x.pin });
        }

        Ok(())
    }

    /// PWM period in microseconds.
    pub fn period_us(&self) -> u64 {
        MICROS_PER_SECOND / u64::from(self.pwm_frequency.max(1))
    }

    /// Duty cycle producing the 0 degree pulse.
    pub fn duty_cycle_min(&self) -> u32 {
        self.pulse_to_duty(self.pulse_min_us)
    }

    /// Duty cycle producing the 180 degree pulse.
    pub fn duty_cycle_max(&self) -> u32 {
        self.pulse_to_duty(self.pulse_max_us)
    }

    /// Maps an angle to the driver's duty-cycle units.
    ///
    /// `degree` is expected inside 0-180; values outside are clamped so the
    /// result always stays within the configured pulse bounds.
    pub fn to_duty_cycle(&self, degree: i32) -> u32 {
        let degree = DegreeRange::FULL.clamp(degree);
        let min = u64::from(self.duty_cycle_min());
        let max = u64::from(self.duty_cycle_max());
        let span = (DEGREE_MAX - DEGREE_MIN) as u64;
        let offset = (degree - DEGREE_MIN) as u64;

        let duty = offset * max.saturating_sub(min) / span + min;
        u32::try_from(duty).unwrap_or(u32::MAX)
    }

    fn pulse_to_duty(&self, pulse_us: u32) -> u32 {
        let duty = u64::from(self.pwm_range) * u64::from(pulse_us) / self.period_us().max(1);
        u32::try_from(duty).unwrap_or(u32::MAX)
    }
}
