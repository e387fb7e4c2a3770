//! GPIO pin layer.
//!
//! - [`board`]: static table of legal pin numbers for the board
//! - [`backend`]: [`PinBackend`] trait and the sysfs implementation
//! - [`registry`]: legality/claim queries over a board table and a backend
//! - [`pin`]: [`GpioPin`], one exclusively claimed pin
//! - [`pwm`]: software PWM worker driving a claimed pin
//! - `mock`: in-memory backend (feature `mock`)

pub mod backend;
pub mod board;
#[cfg(feature = "mock")]
pub mod mock;
pub mod pin;
pub mod pwm;
pub mod registry;

pub use backend::{PinBackend, SysfsBackend};
pub use board::{BoardTable, PinDescriptor};
#[cfg(feature = "mock")]
pub use mock::MockBackend;
pub use pin::GpioPin;
pub use pwm::PwmSchedule;
pub use registry::PinRegistry;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Logic level of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    High,
}

impl Level {
    /// Value as written to a sysfs `value` entry
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }
}

impl TryFrom<u8> for Level {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Level::Low),
            1 => Ok(Level::High),
            other => Err(Error::InvalidArgument(format!(
                "pin value must be 0 or 1, got {other}"
            ))),
        }
    }
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

/// Pin direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// Value as written to a sysfs `direction` entry
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Input => "in",
            Direction::Output => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "in" | "input" => Ok(Direction::Input),
            "out" | "output" => Ok(Direction::Output),
            other => Err(Error::InvalidArgument(format!(
                "unknown pin direction '{other}'"
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a claimed pin is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PinMode {
    /// Plain digital I/O
    Digital,
    /// Output driven by a software PWM worker
    PwmCapable,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Digital => f.write_str("GPIO"),
            PinMode::PwmCapable => f.write_str("PWM"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_from_raw() {
        assert_eq!(Level::try_from(0).unwrap(), Level::Low);
        assert_eq!(Level::try_from(1).unwrap(), Level::High);
        assert!(matches!(
            Level::try_from(2),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("in".parse::<Direction>().unwrap(), Direction::Input);
        assert_eq!("out\n".parse::<Direction>().unwrap(), Direction::Output);
        assert!(matches!(
            "sideways".parse::<Direction>(),
            Err(Error::InvalidArgument(_))
        ));
    }
}
