//! Configuration for RathaIO
//!
//! Loads configuration from a TOML file. Every table rejects unknown keys;
//! pin numbers have no defaults, tuning values do (see the `default_*`
//! functions).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default)]
    pub motor: MotorConfig,
    pub vehicle: VehicleConfig,
    pub ranger: RangerConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which pin-control backend to use and where it lives
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BoardConfig {
    /// `sysfs` for real hardware, `mock` for a dry run
    #[serde(default = "default_backend")]
    pub backend: String,

    /// sysfs GPIO class directory
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,

    /// Replace the built-in Raspberry Pi pin table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_pins: Option<Vec<u32>>,
}

fn default_backend() -> String {
    "sysfs".to_string()
}
fn default_gpio_root() -> PathBuf {
    PathBuf::from(crate::gpio::backend::SYSFS_GPIO_ROOT)
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            gpio_root: default_gpio_root(),
            legal_pins: None,
        }
    }
}

/// DC motor tuning shared by both wheels
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MotorConfig {
    /// Duty cycle (%) below which a motor may not overcome static friction
    #[serde(default = "default_min_speed")]
    pub min_speed: u8,

    /// Software PWM frequency on the speed pin
    #[serde(default = "default_pwm_frequency")]
    pub pwm_frequency_hz: f64,
}

fn default_min_speed() -> u8 {
    30
}
fn default_pwm_frequency() -> f64 {
    20.0
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            min_speed: default_min_speed(),
            pwm_frequency_hz: default_pwm_frequency(),
        }
    }
}

/// Pins of one motor driver channel
///
/// With `enable` set this is an H-bridge channel (direction on `in1`/`in2`,
/// speed on `enable`). Without it the PWM signal moves between `in1` and
/// `in2` depending on the rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MotorPins {
    pub in1: u32,
    pub in2: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<u32>,
}

impl MotorPins {
    /// Every pin number used by this channel
    pub fn numbers(&self) -> Vec<u32> {
        let mut pins = vec![self.in1, self.in2];
        pins.extend(self.enable);
        pins
    }
}

/// Vehicle layout and steering
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct VehicleConfig {
    pub left_motor: MotorPins,
    pub right_motor: MotorPins,

    /// Inner wheel speed on arcs, as a percentage of the outer wheel speed
    #[serde(default = "default_turn_rate")]
    pub turn_rate: u8,

    /// Lowest speed used for in-place rotation
    #[serde(default)]
    pub min_rotate_speed: u8,
}

fn default_turn_rate() -> u8 {
    50
}

/// Ultrasonic ranger wiring and calibration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RangerConfig {
    pub trigger_pin: u32,
    pub echo_pin: u32,

    /// Closest calibrated distance (cm)
    #[serde(default = "default_min_distance")]
    pub min_distance_cm: f64,

    /// Farthest calibrated distance (cm); also bounds the echo wait
    #[serde(default = "default_max_distance")]
    pub max_distance_cm: f64,

    #[serde(default = "default_speed_of_sound")]
    pub speed_of_sound_cm_s: f64,
}

fn default_min_distance() -> f64 {
    5.0
}
fn default_max_distance() -> f64 {
    350.0
}
fn default_speed_of_sound() -> f64 {
    34_000.0
}

impl RangerConfig {
    /// Ranger on the given pins with default calibration
    pub fn with_pins(trigger_pin: u32, echo_pin: u32) -> Self {
        Self {
            trigger_pin,
            echo_pin,
            min_distance_cm: default_min_distance(),
            max_distance_cm: default_max_distance(),
            speed_of_sound_cm_s: default_speed_of_sound(),
        }
    }
}

/// Command handling and telemetry
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    #[serde(default = "default_step")]
    pub speed_step: u8,

    #[serde(default = "default_step")]
    pub turn_step: u8,

    /// Background ranging period
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_ms: u64,

    /// Status LED blinking at 1 Hz while a session is connected
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_pin: Option<u32>,
}

fn default_step() -> u8 {
    5
}
fn default_telemetry_interval() -> u64 {
    100
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            speed_step: default_step(),
            turn_step: default_step(),
            telemetry_interval_ms: default_telemetry_interval(),
            heartbeat_pin: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    ///
    /// # Example
    /// ```no_run
    /// use ratha_io::config::AppConfig;
    ///
    /// let config = AppConfig::from_file("ratha.toml")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reference wiring of the two-motor car
    pub fn rc_car_defaults() -> Self {
        Self {
            board: BoardConfig::default(),
            motor: MotorConfig::default(),
            vehicle: VehicleConfig {
                left_motor: MotorPins {
                    in1: 16,
                    in2: 20,
                    enable: Some(21),
                },
                right_motor: MotorPins {
                    in1: 13,
                    in2: 19,
                    enable: Some(26),
                },
                turn_rate: default_turn_rate(),
                min_rotate_speed: 0,
            },
            ranger: RangerConfig::with_pins(6, 5),
            controller: ControllerConfig {
                heartbeat_pin: Some(12),
                ..ControllerConfig::default()
            },
            logging: LoggingConfig::default(),
        }
    }

    /// Reject values the hardware layer cannot honour
    ///
    /// Checks that no pin number is used twice, that percentages are within
    /// 0..=100 and that frequencies, distances and intervals are positive.
    pub fn validate(&self) -> Result<()> {
        let mut roles: HashMap<u32, &'static str> = HashMap::new();
        let mut assign = |pin: u32, role: &'static str| -> Result<()> {
            match roles.insert(pin, role) {
                Some(previous) => Err(Error::InvalidConfiguration(format!(
                    "pin {pin} assigned to both {previous} and {role}"
                ))),
                None => Ok(()),
            }
        };

        for pin in self.vehicle.left_motor.numbers() {
            assign(pin, "left motor")?;
        }
        for pin in self.vehicle.right_motor.numbers() {
            assign(pin, "right motor")?;
        }
        assign(self.ranger.trigger_pin, "ranger trigger")?;
        assign(self.ranger.echo_pin, "ranger echo")?;
        if let Some(pin) = self.controller.heartbeat_pin {
            assign(pin, "heartbeat")?;
        }

        for (name, value) in [
            ("motor.min_speed", self.motor.min_speed),
            ("vehicle.turn_rate", self.vehicle.turn_rate),
            ("vehicle.min_rotate_speed", self.vehicle.min_rotate_speed),
            ("controller.speed_step", self.controller.speed_step),
            ("controller.turn_step", self.controller.turn_step),
        ] {
            if value > 100 {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} must be within 0..=100, got {value}"
                )));
            }
        }

        let positive = [
            ("motor.pwm_frequency_hz", self.motor.pwm_frequency_hz),
            ("ranger.max_distance_cm", self.ranger.max_distance_cm),
            ("ranger.speed_of_sound_cm_s", self.ranger.speed_of_sound_cm_s),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::InvalidConfiguration(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }
        if !(0.0..self.ranger.max_distance_cm).contains(&self.ranger.min_distance_cm) {
            return Err(Error::InvalidConfiguration(format!(
                "ranger.min_distance_cm must be within [0, {}), got {}",
                self.ranger.max_distance_cm, self.ranger.min_distance_cm
            )));
        }
        if self.controller.telemetry_interval_ms == 0 {
            return Err(Error::InvalidConfiguration(
                "controller.telemetry_interval_ms must be positive".to_string(),
            ));
        }
        match self.board.backend.as_str() {
            "sysfs" | "mock" => Ok(()),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown board backend '{other}'"
            ))),
        }
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfiguration(format!("serialize config: {e}")))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::rc_car_defaults()
    }
}
