//! Two-axis servo setpoints and their valid ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{DomainError, DomainResult};

/// Lowest angle a servo accepts, in degrees.
pub const DEGREE_MIN: i32 = 0;

/// Highest angle a servo accepts, in degrees.
pub const DEGREE_MAX: i32 = 180;

/// Neutral angle both axes are driven to at startup.
pub const DEGREE_MID: i32 = DEGREE_MAX / 2;

/// Inclusive range of angles an axis may be driven to.
///
/// Incoming commands are clamped into this range rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegreeRange {
    pub min: i32,
    pub max: i32,
}

impl DegreeRange {
    /// The whole 0-180 degree domain.
    pub const FULL: DegreeRange = DegreeRange {
        min: DEGREE_MIN,
        max: DEGREE_MAX,
    };

    /// Creates a range, checking it is ordered and inside 0-180.
    pub fn new(min: i32, max: i32) -> DomainResult<Self> {
        let range = Self { min, max };
        range.validate()?;
        Ok(range)
    }

    /// Checks the range is ordered and inside the 0-180 domain.
    ///
    /// Ranges built through serde skip `new`, so configuration loaders
    /// call this after deserializing.
    pub fn validate(&self) -> DomainResult<()> {
        if self.min > self.max || self.min < DEGREE_MIN || self.max > DEGREE_MAX {
            return Err(DomainError::InvalidRange {
                min: self.min,
                max: self.max,
                expected: format!("{DEGREE_MIN} <= min <= max <= {DEGREE_MAX}"),
            });
        }
        Ok(())
    }

    /// Clamps `degree` into the range.
    pub fn clamp(&self, degree: i32) -> i32 {
        degree.max(self.min).min(self.max)
    }

    /// Returns true if `degree` lies inside the range.
    pub fn contains(&self, degree: i32) -> bool {
        (self.min..=self.max).contains(&degree)
    }
}

impl Default for DegreeRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for DegreeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.min, self.max)
    }
}

/// A two-axis position command, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setpoint {
    pub x: i32,
    pub y: i32,
}

impl Setpoint {
    /// Both axes at the neutral position.
    pub const NEUTRAL: Setpoint = Setpoint {
        x: DEGREE_MID,
        y: DEGREE_MID,
    };

    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Clamps each axis into its own range.
    pub fn clamped(self, x_range: &DegreeRange, y_range: &DegreeRange) -> Self {
        Self {
            x: x_range.clamp(self.x),
            y: y_range.clamp(self.y),
        }
    }

    /// Returns true if both axes lie inside the 0-180 domain.
    pub fn is_within_domain(&self) -> bool {
        DegreeRange::FULL.contains(self.x) && DegreeRange::FULL.contains(self.y)
    }
}

impl fmt::Display for Setpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.x, self.y)
    }
}
