//! DC motor on GPIO pins
//!
//! # State machine
//!
//! ```text
//! Uninitialized --init--> Stopped --rotate--> RunningCw / RunningCcw
//!       ^                    ^                        |
//!       |                    +------ stop / brake ----+
//!       +------- deinit -----------------------------+
//! ```
//!
//! # Wiring
//!
//! | Wiring | CW | CCW | Stop (coast) | Brake |
//! |--------|----|-----|--------------|-------|
//! | H-bridge (`in1`, `in2`, `enable`) | in1 H, in2 L, PWM on enable | in1 L, in2 H, PWM on enable | both L, duty 0 | both H, duty 100 |
//! | Two-wire (`in1`, `in2`) | PWM on in1, in2 L | in1 L, PWM on in2 | both L | both H |
//!
//! Speeds are PWM duty cycles in percent. Speeds below the configured minimum
//! are applied as given and logged, since the motor may stall there.

use crate::config::{MotorConfig, MotorPins};
use crate::error::{Error, Result};
use crate::gpio::{Direction, GpioPin, Level, PinMode, PinRegistry};
use std::fmt;
use std::str::FromStr;
use std::thread::ThreadId;

/// Rotation sense
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    Cw,
    Ccw,
}

impl FromStr for Rotation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cw" | "rcw" => Ok(Rotation::Cw),
            "ccw" | "rccw" => Ok(Rotation::Ccw),
            other => Err(Error::InvalidArgument(format!(
                "invalid rotation direction '{other}'"
            ))),
        }
    }
}

/// Motor lifecycle and rotation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Uninitialized,
    Stopped,
    RunningCw,
    RunningCcw,
}

impl MotorState {
    fn running(rotation: Rotation) -> Self {
        match rotation {
            Rotation::Cw => MotorState::RunningCw,
            Rotation::Ccw => MotorState::RunningCcw,
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, MotorState::RunningCw | MotorState::RunningCcw)
    }
}

impl fmt::Display for MotorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MotorState::Uninitialized => "uninitialized",
            MotorState::Stopped => "stopped",
            MotorState::RunningCw => "running cw",
            MotorState::RunningCcw => "running ccw",
        };
        f.write_str(s)
    }
}

/// Claimed pins, by wiring
enum MotorPinSet {
    HBridge {
        in1: GpioPin,
        in2: GpioPin,
        enable: GpioPin,
    },
    TwoWire {
        in1: GpioPin,
        in2: GpioPin,
    },
}

/// One DC motor
pub struct Motor {
    name: String,
    config: MotorConfig,
    pins: Option<MotorPinSet>,
    state: MotorState,
    speed: u8,
}

impl Motor {
    /// Create an uninitialized motor; no pins are touched yet
    pub fn new(name: &str, config: MotorConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            pins: None,
            state: MotorState::Uninitialized,
            speed: 0,
        }
    }

    /// Claim the motor pins and leave the motor stopped
    ///
    /// On an H-bridge the PWM worker is started on `enable` at duty 0 and
    /// runs until [`Motor::deinit`]. Fails with
    /// [`Error::InvalidConfiguration`] if any pin is unavailable; pins claimed
    /// before the failure are released again.
    pub fn init(&mut self, registry: &PinRegistry, pins: MotorPins) -> Result<()> {
        if self.state != MotorState::Uninitialized {
            return Err(Error::InvalidConfiguration(format!(
                "{} motor is already initialized",
                self.name
            )));
        }

        let numbers = pins.numbers();
        for (i, &pin) in numbers.iter().enumerate() {
            if numbers[..i].contains(&pin) || !registry.is_available(pin) {
                log::error!("{} motor pin {} is unavailable", self.name, pin);
                return Err(Error::InvalidConfiguration(format!(
                    "{} motor pin {} is not available on the board or is already in use",
                    self.name, pin
                )));
            }
        }

        let claim = |number: u32, mode: PinMode| {
            GpioPin::acquire(registry, number, mode).map_err(|e| {
                Error::InvalidConfiguration(format!(
                    "{} motor pin {}: {}",
                    self.name, number, e
                ))
            })
        };

        let set = match pins.enable {
            Some(enable) => {
                let in1 = quiet_output(claim(pins.in1, PinMode::Digital)?)?;
                let in2 = quiet_output(claim(pins.in2, PinMode::Digital)?)?;
                let mut enable = claim(enable, PinMode::PwmCapable)?;
                enable.pwm_start(self.config.pwm_frequency_hz, 0.0, 0)?;
                MotorPinSet::HBridge { in1, in2, enable }
            }
            None => MotorPinSet::TwoWire {
                in1: quiet_output(claim(pins.in1, PinMode::Digital)?)?,
                in2: quiet_output(claim(pins.in2, PinMode::Digital)?)?,
            },
        };

        self.pins = Some(set);
        self.state = MotorState::Stopped;
        self.speed = 0;
        log::info!("{} motor initialized on pins {:?}", self.name, numbers);
        Ok(())
    }

    /// Stop the PWM worker and release every pin
    pub fn deinit(&mut self) -> Result<()> {
        let Some(set) = self.pins.take() else {
            log::debug!("Trying to release {} motor pins before initialization", self.name);
            return Err(Error::InvalidConfiguration(format!(
                "{} motor is not initialized",
                self.name
            )));
        };

        let mut first_err = None;
        let mut release = |pin: &mut GpioPin| {
            if let Err(e) = pin.release() {
                first_err.get_or_insert(e);
            }
        };
        match set {
            MotorPinSet::HBridge {
                mut in1,
                mut in2,
                mut enable,
            } => {
                release(&mut enable);
                release(&mut in1);
                release(&mut in2);
            }
            MotorPinSet::TwoWire { mut in1, mut in2 } => {
                release(&mut in1);
                release(&mut in2);
            }
        }

        self.state = MotorState::Uninitialized;
        self.speed = 0;
        log::info!("{} motor released", self.name);
        first_err.map_or(Ok(()), Err)
    }

    /// Run the motor in `rotation` at `speed` percent
    ///
    /// Same rotation as now: only the duty cycle changes. New rotation: the
    /// direction pins are switched first, then the duty cycle is applied.
    pub fn rotate(&mut self, rotation: Rotation, speed: u8) -> Result<()> {
        check_speed(speed)?;
        let target = MotorState::running(rotation);
        let frequency = self.config.pwm_frequency_hz;
        let state = self.state;
        let name = &self.name;
        let Some(set) = self.pins.as_mut() else {
            log::error!("Trying to rotate {} motor before initializing its pins", name);
            return Err(Error::InvalidConfiguration(format!(
                "{name} motor is not initialized"
            )));
        };

        if speed < self.config.min_speed {
            log::warn!(
                "{} motor speed {} is below the minimum {}; the motor may fail to rotate",
                name,
                speed,
                self.config.min_speed
            );
        }

        let duty = f64::from(speed);
        let applied = match set {
            MotorPinSet::HBridge { in1, in2, enable } => {
                let switched = if state != target {
                    let (high, low) = match rotation {
                        Rotation::Cw => (in1, in2),
                        Rotation::Ccw => (in2, in1),
                    };
                    // Drop the opposite side first so both are never high together
                    low.set_value(Level::Low)
                        .and_then(|()| high.set_value(Level::High))
                } else {
                    Ok(())
                };
                // Unknown polarity: leave the bridge undriven
                let duty = if switched.is_ok() { duty } else { 0.0 };
                switched.and(enable_duty(enable, frequency, duty))
            }
            MotorPinSet::TwoWire { in1, in2 } => {
                let (drive, idle) = match rotation {
                    Rotation::Cw => (in1, in2),
                    Rotation::Ccw => (in2, in1),
                };
                let started = if state != target {
                    park(idle, Level::Low)
                        .and_then(|()| drive.reconfigure(PinMode::PwmCapable))
                        .and_then(|()| drive.pwm_start(frequency, duty, 0))
                } else {
                    drive.pwm_start(frequency, duty, 0)
                };
                if started.is_err() {
                    for pin in [drive, idle] {
                        if let Err(e) = park(pin, Level::Low) {
                            log::warn!("{} motor: pin {} left undriven: {}", name, pin.number(), e);
                        }
                    }
                }
                started
            }
        };

        if let Err(e) = applied {
            log::error!("{} motor failed to rotate {:?}: {}", name, rotation, e);
            self.state = MotorState::Stopped;
            self.speed = 0;
            return Err(e);
        }
        if state != target {
            log::debug!("{} motor: {} -> {}", name, state, target);
        }
        self.state = target;
        self.speed = speed;
        Ok(())
    }

    /// Change the speed of a running motor without touching direction pins
    ///
    /// On a stopped motor this only logs; nothing is applied.
    pub fn update_speed(&mut self, speed: u8) -> Result<()> {
        check_speed(speed)?;
        let Some(set) = self.pins.as_mut() else {
            return Err(Error::InvalidConfiguration(format!(
                "{} motor is not initialized",
                self.name
            )));
        };
        if !self.state.is_running() {
            log::warn!("{} motor is not rotating; speed change ignored", self.name);
            return Ok(());
        }

        let duty = f64::from(speed);
        match set {
            MotorPinSet::HBridge { enable, .. } => {
                enable_duty(enable, self.config.pwm_frequency_hz, duty)?
            }
            MotorPinSet::TwoWire { in1, in2 } => {
                let drive = if self.state == MotorState::RunningCw { in1 } else { in2 };
                drive.pwm_update(duty)?;
            }
        }
        self.speed = speed;
        Ok(())
    }

    /// Coast: both direction pins low, no drive
    pub fn stop(&mut self) -> Result<()> {
        self.halt(Level::Low)?;
        log::debug!("{} motor stopped", self.name);
        Ok(())
    }

    /// Brake: both direction pins high, shorting the windings
    pub fn brake(&mut self) -> Result<()> {
        self.halt(Level::High)?;
        log::debug!("{} motor braked", self.name);
        Ok(())
    }

    /// Drive both direction pins to `level`, then set the enable duty
    ///
    /// Every step is attempted even if an earlier one fails. The motor is
    /// recorded as stopped once its drive is cut.
    fn halt(&mut self, level: Level) -> Result<()> {
        let frequency = self.config.pwm_frequency_hz;
        let Some(set) = self.pins.as_mut() else {
            return Err(Error::InvalidConfiguration(format!(
                "{} motor is not initialized",
                self.name
            )));
        };

        let (result, cut) = match set {
            MotorPinSet::HBridge { in1, in2, enable } => {
                let pins = in1.set_value(level).and(in2.set_value(level));
                // Braking needs the bridge enabled, but only with both sides high
                let duty = if level == Level::High && pins.is_ok() {
                    100.0
                } else {
                    0.0
                };
                let enabled = enable_duty(enable, frequency, duty);
                let cut = enabled.is_ok();
                (pins.and(enabled), cut)
            }
            MotorPinSet::TwoWire { in1, in2 } => {
                let result = park(in1, level).and(park(in2, level));
                let cut = result.is_ok();
                (result, cut)
            }
        };

        if cut {
            self.state = MotorState::Stopped;
            self.speed = 0;
        }
        if let Err(e) = &result {
            log::error!("{} motor failed to halt: {}", self.name, e);
        }
        result
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> MotorState {
        self.state
    }

    /// Current duty cycle (%)
    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn min_speed(&self) -> u8 {
        self.config.min_speed
    }

    pub fn is_initialized(&self) -> bool {
        self.pins.is_some()
    }

    /// Thread id of the motor's PWM worker, if one is running
    pub fn pwm_thread(&self) -> Option<ThreadId> {
        match self.pins.as_ref()? {
            MotorPinSet::HBridge { enable, .. } => enable.pwm_thread(),
            MotorPinSet::TwoWire { in1, in2 } => in1.pwm_thread().or_else(|| in2.pwm_thread()),
        }
    }
}

fn check_speed(speed: u8) -> Result<()> {
    if speed > 100 {
        return Err(Error::InvalidArgument(format!(
            "motor speed must be within 0..=100, got {speed}"
        )));
    }
    Ok(())
}

/// Apply `duty` on an H-bridge enable pin, restarting its worker if it died
fn enable_duty(enable: &mut GpioPin, frequency_hz: f64, duty: f64) -> Result<()> {
    if enable.pwm_active() {
        enable.pwm_update(duty)
    } else {
        log::warn!(
            "PWM on enable pin {} is not running; restarting it",
            enable.number()
        );
        enable.pwm_start(frequency_hz, duty, 0)
    }
}

/// Output, driven low
fn quiet_output(mut pin: GpioPin) -> Result<GpioPin> {
    pin.set_direction(Direction::Output)?;
    pin.set_value(Level::Low)?;
    Ok(pin)
}

/// Stop any PWM on `pin` and hold it at `level` as a digital output
fn park(pin: &mut GpioPin, level: Level) -> Result<()> {
    if pin.pwm_active() {
        pin.pwm_stop()?;
    }
    pin.reconfigure(PinMode::Digital)?;
    pin.set_value(level)
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::gpio::{BoardTable, MockBackend};
    use std::sync::Arc;

    const H_BRIDGE: MotorPins = MotorPins {
        in1: 16,
        in2: 20,
        enable: Some(21),
    };
    const TWO_WIRE: MotorPins = MotorPins {
        in1: 12,
        in2: 16,
        enable: None,
    };

    fn setup() -> (MockBackend, PinRegistry) {
        let mock = MockBackend::new();
        let registry = PinRegistry::new(BoardTable::raspberry_pi(), Arc::new(mock.clone()));
        (mock, registry)
    }

    fn motor() -> Motor {
        Motor::new(
            "test",
            MotorConfig {
                min_speed: 30,
                pwm_frequency_hz: 50.0,
            },
        )
    }

    #[test]
    fn test_rotation_parse() {
        assert_eq!("rcw".parse::<Rotation>().unwrap(), Rotation::Cw);
        assert_eq!("CCW".parse::<Rotation>().unwrap(), Rotation::Ccw);
        assert!(matches!(
            "sideways".parse::<Rotation>(),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_lifecycle_errors() {
        let (_mock, registry) = setup();
        let mut m = motor();
        assert!(matches!(
            m.rotate(Rotation::Cw, 50),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(matches!(m.stop(), Err(Error::InvalidConfiguration(_))));
        assert!(matches!(m.deinit(), Err(Error::InvalidConfiguration(_))));

        m.init(&registry, H_BRIDGE).unwrap();
        assert_eq!(m.state(), MotorState::Stopped);
        assert!(matches!(
            m.init(&registry, H_BRIDGE),
            Err(Error::InvalidConfiguration(_))
        ));
        m.deinit().unwrap();
        assert_eq!(m.state(), MotorState::Uninitialized);
        assert!(matches!(m.deinit(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_init_with_unavailable_pin_releases_nothing_held() {
        let (mock, registry) = setup();
        mock.export_external(21);
        let mut m = motor();
        assert!(matches!(
            m.init(&registry, H_BRIDGE),
            Err(Error::InvalidConfiguration(_))
        ));
        assert!(!mock.is_exported_pin(16));
        assert!(!mock.is_exported_pin(20));
        assert_eq!(m.state(), MotorState::Uninitialized);
    }

    #[test]
    fn test_init_starts_idle_pwm() {
        let (mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();
        assert!(m.pwm_thread().is_some());
        assert_eq!(mock.level(16), Some(Level::Low));
        assert_eq!(mock.level(20), Some(Level::Low));
        m.deinit().unwrap();
        assert!(!mock.is_exported_pin(21));
    }

    #[test]
    fn test_rotate_sets_polarity() {
        let (mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();

        m.rotate(Rotation::Cw, 40).unwrap();
        assert_eq!(m.state(), MotorState::RunningCw);
        assert_eq!(mock.level(16), Some(Level::High));
        assert_eq!(mock.level(20), Some(Level::Low));

        // Same speed, new direction: polarity still flips
        m.rotate(Rotation::Ccw, 40).unwrap();
        assert_eq!(m.state(), MotorState::RunningCcw);
        assert_eq!(mock.level(16), Some(Level::Low));
        assert_eq!(mock.level(20), Some(Level::High));
        assert_eq!(m.speed(), 40);
    }

    #[test]
    fn test_rotate_rejects_bad_speed() {
        let (_mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();
        assert!(matches!(
            m.rotate(Rotation::Cw, 101),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(m.state(), MotorState::Stopped);
    }

    #[test]
    fn test_below_min_speed_still_applied() {
        let (_mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();
        m.rotate(Rotation::Cw, 10).unwrap();
        assert_eq!(m.speed(), 10);
        assert_eq!(m.state(), MotorState::RunningCw);
    }

    #[test]
    fn test_stop_and_brake_patterns() {
        let (mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();

        m.rotate(Rotation::Ccw, 60).unwrap();
        m.brake().unwrap();
        assert_eq!(m.state(), MotorState::Stopped);
        assert_eq!(mock.level(16), Some(Level::High));
        assert_eq!(mock.level(20), Some(Level::High));

        m.stop().unwrap();
        assert_eq!(mock.level(16), Some(Level::Low));
        assert_eq!(mock.level(20), Some(Level::Low));
        assert_eq!(m.speed(), 0);

        // Rotating again after a brake leaves only one side high
        m.rotate(Rotation::Cw, 50).unwrap();
        assert_eq!(mock.level(16), Some(Level::High));
        assert_eq!(mock.level(20), Some(Level::Low));
    }

    #[test]
    fn test_failed_polarity_switch_cuts_drive() {
        let (mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();
        m.rotate(Rotation::Ccw, 50).unwrap();

        // in2 cannot be dropped, so the switch to CW never completes
        mock.set_fault(20, true);
        assert!(matches!(
            m.rotate(Rotation::Cw, 50),
            Err(Error::HardwareIo { .. })
        ));
        assert_eq!(m.state(), MotorState::Stopped);
        assert_eq!(m.speed(), 0);
        assert_eq!(mock.level(16), Some(Level::Low));
        assert!(m.pwm_thread().is_some());

        mock.set_fault(20, false);
        m.rotate(Rotation::Cw, 50).unwrap();
        assert_eq!(mock.level(16), Some(Level::High));
        assert_eq!(mock.level(20), Some(Level::Low));
    }

    #[test]
    fn test_halt_drives_pins_even_if_one_fails() {
        let (mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();
        m.rotate(Rotation::Cw, 50).unwrap();

        mock.set_fault(20, true);
        assert!(m.stop().is_err());
        assert_eq!(mock.level(16), Some(Level::Low));
        // Drive is cut through the enable pin
        assert_eq!(m.state(), MotorState::Stopped);

        mock.set_fault(20, false);
        m.rotate(Rotation::Cw, 50).unwrap();
        mock.set_fault(20, true);
        // Brake falls back to coasting when a side cannot go high
        assert!(m.brake().is_err());
        assert_eq!(m.state(), MotorState::Stopped);
        mock.set_fault(20, false);
    }

    #[test]
    fn test_update_speed_on_stopped_motor_is_ignored() {
        let (_mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, H_BRIDGE).unwrap();
        m.update_speed(70).unwrap();
        assert_eq!(m.speed(), 0);

        m.rotate(Rotation::Cw, 40).unwrap();
        m.update_speed(70).unwrap();
        assert_eq!(m.speed(), 70);
    }

    #[test]
    fn test_two_wire_moves_pwm_between_pins() {
        let (mock, registry) = setup();
        let mut m = motor();
        m.init(&registry, TWO_WIRE).unwrap();
        assert!(m.pwm_thread().is_none());

        m.rotate(Rotation::Cw, 50).unwrap();
        let cw_thread = m.pwm_thread().unwrap();
        assert_eq!(mock.level(16), Some(Level::Low));

        m.rotate(Rotation::Cw, 80).unwrap();
        assert_eq!(m.pwm_thread(), Some(cw_thread));

        m.rotate(Rotation::Ccw, 50).unwrap();
        let ccw_thread = m.pwm_thread().unwrap();
        assert_ne!(ccw_thread, cw_thread);
        assert_eq!(mock.level(12), Some(Level::Low));

        m.brake().unwrap();
        assert!(m.pwm_thread().is_none());
        assert_eq!(mock.level(12), Some(Level::High));
        assert_eq!(mock.level(16), Some(Level::High));

        m.deinit().unwrap();
        assert!(!mock.is_exported_pin(12));
        assert!(!mock.is_exported_pin(16));
    }
}
