//! Devices built on claimed GPIO pins
//!
//! - [`motor`]: DC motor on an H-bridge or two-wire driver
//! - [`ultrasonic`]: trigger/echo ultrasonic ranger

pub mod motor;
pub mod ultrasonic;

pub use motor::{Motor, MotorState, Rotation};
pub use ultrasonic::{Measurement, NO_READING, UltrasonicRanger};
