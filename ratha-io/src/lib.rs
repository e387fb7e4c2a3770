//! RathaIO - GPIO motor and ranging library for a two-motor rover
//!
//! Drives DC motors through software PWM on Linux sysfs GPIO and measures
//! obstacle distance with an HC-SR04 style ultrasonic ranger.
//!
//! ## Layers
//!
//! - [`gpio`]: board pin table, claim bookkeeping, pins, software PWM
//! - [`devices`]: motors and the ultrasonic ranger
//! - [`vehicle`]: differential-drive vehicle on two motors
//! - [`control`]: operator session, command events, telemetry
//!
//! ## Features
//!
//! - `mock`: in-memory pin backend for hardware-free runs and tests

pub mod config;
pub mod control;
pub mod devices;
pub mod error;
pub mod gpio;
pub mod timing;
pub mod vehicle;

// Re-export commonly used types
pub use config::AppConfig;
pub use control::{CarController, ControlCommand, ControlEvent, Flow};
pub use error::{Error, Result};
pub use gpio::{GpioPin, PinRegistry};
pub use vehicle::{Direction, RangeFinder, Telemetry, Vehicle, VehicleState};
