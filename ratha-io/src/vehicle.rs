//! Two-motor differential-drive vehicle
//!
//! Steering is done only by running the wheels at different speeds. On an
//! arc the inner wheel keeps `turn_rate` percent of the outer wheel's speed,
//! rounded to the nearest integer.
//!
//! | Direction | Left | Right |
//! |-----------|------|-------|
//! | `Forward` | CW, speed | CW, speed |
//! | `Backward` | CCW, speed | CCW, speed |
//! | `RotateRight` | CW, rot | CCW, rot |
//! | `RotateLeft` | CCW, rot | CW, rot |
//! | `ForwardRight` / `TurnRight` | CW, speed | CW, inner |
//! | `ForwardLeft` / `TurnLeft` | CW, inner | CW, speed |
//! | `BackwardRight` | CCW, speed | CCW, inner |
//! | `BackwardLeft` | CCW, inner | CCW, speed |
//! | `Stop` | coast | coast |
//! | `Brake` | brake | brake |
//!
//! `rot` is `max(speed, min_rotate_speed)`.

use crate::config::{AppConfig, MotorPins, RangerConfig};
use crate::devices::{Motor, NO_READING, Rotation, UltrasonicRanger};
use crate::error::{Error, Result};
use crate::gpio::PinRegistry;
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Direction vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
    RotateRight,
    RotateLeft,
    TurnRight,
    TurnLeft,
    ForwardRight,
    ForwardLeft,
    BackwardRight,
    BackwardLeft,
    Stop,
    Brake,
}

impl Direction {
    pub const ALL: [Direction; 12] = [
        Direction::Forward,
        Direction::Backward,
        Direction::RotateRight,
        Direction::RotateLeft,
        Direction::TurnRight,
        Direction::TurnLeft,
        Direction::ForwardRight,
        Direction::ForwardLeft,
        Direction::BackwardRight,
        Direction::BackwardLeft,
        Direction::Stop,
        Direction::Brake,
    ];

    /// Canonical token, accepted back by `FromStr`
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::RotateRight => "rotate_right",
            Direction::RotateLeft => "rotate_left",
            Direction::TurnRight => "turn_right",
            Direction::TurnLeft => "turn_left",
            Direction::ForwardRight => "fwd_right",
            Direction::ForwardLeft => "fwd_left",
            Direction::BackwardRight => "bwd_right",
            Direction::BackwardLeft => "bwd_left",
            Direction::Stop => "stop",
            Direction::Brake => "brake",
        }
    }

    /// True for directions that leave the wheels turning
    pub fn is_motion(self) -> bool {
        !matches!(self, Direction::Stop | Direction::Brake)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let token = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        let direction = match token.as_str() {
            "forward" | "fwd" => Direction::Forward,
            "backward" | "bwd" | "back" => Direction::Backward,
            "rotate_right" | "rot_right" => Direction::RotateRight,
            "rotate_left" | "rot_left" => Direction::RotateLeft,
            "turn_right" => Direction::TurnRight,
            "turn_left" => Direction::TurnLeft,
            "fwd_right" | "forward_right" => Direction::ForwardRight,
            "fwd_left" | "forward_left" => Direction::ForwardLeft,
            "bwd_right" | "backward_right" => Direction::BackwardRight,
            "bwd_left" | "backward_left" => Direction::BackwardLeft,
            "stop" => Direction::Stop,
            "brake" => Direction::Brake,
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "unsupported direction '{}'",
                    s.trim()
                )));
            }
        };
        Ok(direction)
    }
}

/// Vehicle lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VehicleState {
    Uninitialized,
    /// Pins claimed, no command yet
    Ready,
    Running,
    Stopped,
}

impl fmt::Display for VehicleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VehicleState::Uninitialized => "uninitialized",
            VehicleState::Ready => "ready",
            VehicleState::Running => "running",
            VehicleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Snapshot pushed to the front-end
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub direction: Option<Direction>,
    pub speed: u8,
    pub turn_rate: u8,
    /// Last ranger reading in cm, -1 if none
    pub distance_cm: f64,
}

impl fmt::Display for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = self.direction.map_or("-", Direction::as_str);
        write!(
            f,
            "direction={} speed={}% turn_rate={}% distance=",
            direction, self.speed, self.turn_rate
        )?;
        if self.distance_cm < 0.0 {
            f.write_str("n/a")
        } else {
            write!(f, "{:.1}cm", self.distance_cm)
        }
    }
}

/// What each wheel should do for one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WheelPlan {
    Coast,
    Brake,
    Run {
        left: (Rotation, u8),
        right: (Rotation, u8),
    },
}

/// Speed kept by the inner wheel on an arc
pub fn inner_wheel_speed(speed: u8, turn_rate: u8) -> u8 {
    // Integer rounding: (s * t + 50) / 100 == round(s * t / 100) for s, t <= 100
    ((u32::from(speed) * u32::from(turn_rate) + 50) / 100) as u8
}

fn plan(direction: Direction, speed: u8, turn_rate: u8, min_rotate_speed: u8) -> WheelPlan {
    use crate::devices::Rotation::{Ccw, Cw};

    let inner = inner_wheel_speed(speed, turn_rate);
    let rot = speed.max(min_rotate_speed);
    let (left, right) = match direction {
        Direction::Stop => return WheelPlan::Coast,
        Direction::Brake => return WheelPlan::Brake,
        Direction::Forward => ((Cw, speed), (Cw, speed)),
        Direction::Backward => ((Ccw, speed), (Ccw, speed)),
        Direction::RotateRight => ((Cw, rot), (Ccw, rot)),
        Direction::RotateLeft => ((Ccw, rot), (Cw, rot)),
        Direction::ForwardRight | Direction::TurnRight => ((Cw, speed), (Cw, inner)),
        Direction::ForwardLeft | Direction::TurnLeft => ((Cw, inner), (Cw, speed)),
        Direction::BackwardRight => ((Ccw, speed), (Ccw, inner)),
        Direction::BackwardLeft => ((Ccw, inner), (Ccw, speed)),
    };
    WheelPlan::Run { left, right }
}

/// Forward-facing ranger and its last reading
///
/// Cloned out of the vehicle so background sampling does not hold the
/// vehicle lock through the echo busy-wait.
#[derive(Clone)]
pub struct RangeFinder {
    ranger: Arc<Mutex<UltrasonicRanger>>,
    last_cm: Arc<Mutex<f64>>,
}

impl RangeFinder {
    fn new(ranger: UltrasonicRanger) -> Self {
        Self {
            ranger: Arc::new(Mutex::new(ranger)),
            last_cm: Arc::new(Mutex::new(NO_READING)),
        }
    }

    /// Measure once and keep the result (cm, -1 if nothing was timed)
    pub fn measure(&self) -> f64 {
        let distance = self.ranger.lock().measure();
        *self.last_cm.lock() = distance;
        distance
    }

    pub fn last_distance(&self) -> f64 {
        *self.last_cm.lock()
    }
}

/// Left and right motor plus a forward-facing ranger
pub struct Vehicle {
    registry: PinRegistry,
    left: Motor,
    right: Motor,
    ranger: RangeFinder,
    left_pins: MotorPins,
    right_pins: MotorPins,
    min_rotate_speed: u8,

    state: VehicleState,
    direction: Option<Direction>,
    /// Last wheel plan both motors accepted
    applied: WheelPlan,
    speed: u8,
    turn_rate: u8,
}

impl Vehicle {
    /// Build a vehicle from configuration; no pins are claimed yet
    pub fn new(registry: PinRegistry, config: &AppConfig) -> Self {
        Self {
            registry,
            left: Motor::new("left", config.motor.clone()),
            right: Motor::new("right", config.motor.clone()),
            ranger: RangeFinder::new(UltrasonicRanger::new(config.ranger.clone())),
            left_pins: config.vehicle.left_motor,
            right_pins: config.vehicle.right_motor,
            min_rotate_speed: config.vehicle.min_rotate_speed,
            state: VehicleState::Uninitialized,
            direction: None,
            applied: WheelPlan::Coast,
            speed: 0,
            turn_rate: config.vehicle.turn_rate.min(100),
        }
    }

    /// Claim every pin: both motors, then the ranger
    ///
    /// If any part fails, the parts already initialized are released again
    /// and the vehicle stays uninitialized.
    pub fn initialize(&mut self) -> Result<()> {
        if self.state != VehicleState::Uninitialized {
            return Err(Error::InvalidConfiguration(
                "vehicle is already initialized".to_string(),
            ));
        }

        if let Err(e) = self.left.init(&self.registry, self.left_pins) {
            log::error!("Failed to initialize left motor: {}", e);
            return Err(e);
        }
        if let Err(e) = self.right.init(&self.registry, self.right_pins) {
            log::error!("Failed to initialize right motor: {}", e);
            self.unwind();
            return Err(e);
        }
        let mut ranger = self.ranger.ranger.lock();
        let RangerConfig {
            trigger_pin,
            echo_pin,
            ..
        } = *ranger.config();
        let ranged = ranger.init(&self.registry, trigger_pin, echo_pin);
        drop(ranger);
        if let Err(e) = ranged {
            log::error!("Failed to initialize ultrasonic ranger: {}", e);
            self.unwind();
            return Err(e);
        }

        self.state = VehicleState::Ready;
        self.direction = None;
        self.applied = WheelPlan::Coast;
        self.speed = 0;
        log::info!("Vehicle initialized");
        Ok(())
    }

    fn unwind(&mut self) {
        for motor in [&mut self.left, &mut self.right] {
            if motor.is_initialized() {
                if let Err(e) = motor.deinit() {
                    log::warn!("Failed to release {} motor while unwinding: {}", motor.name(), e);
                }
            }
        }
    }

    /// Stop the motors and release every pin
    ///
    /// Runs at most once per [`Vehicle::initialize`]; a second call fails with
    /// [`Error::InvalidConfiguration`].
    pub fn deinit(&mut self) -> Result<()> {
        if self.state == VehicleState::Uninitialized {
            log::error!("Trying to deinitialize a vehicle that is not initialized");
            return Err(Error::InvalidConfiguration(
                "vehicle is not initialized".to_string(),
            ));
        }

        let mut first_err = None;
        for motor in [&mut self.left, &mut self.right] {
            if let Err(e) = motor.stop() {
                log::warn!("Failed to stop {} motor: {}", motor.name(), e);
            }
            if let Err(e) = motor.deinit() {
                log::error!("Failed to release {} motor: {}", motor.name(), e);
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.ranger.ranger.lock().deinit() {
            log::error!("Failed to release ultrasonic ranger: {}", e);
            first_err.get_or_insert(e);
        }

        self.state = VehicleState::Uninitialized;
        self.direction = None;
        self.applied = WheelPlan::Coast;
        self.speed = 0;
        log::info!("Vehicle released");
        first_err.map_or(Ok(()), Err)
    }

    /// Move in `direction` at `speed` percent
    ///
    /// Arguments are checked before any pin is touched. If a motor rejects
    /// the command, both wheels are put back to the last accepted plan and
    /// held direction and speed are left as they were. When even that fails,
    /// the wheels are coasted and the vehicle reports `Stop`.
    pub fn drive(&mut self, direction: Direction, speed: u8) -> Result<()> {
        if self.state == VehicleState::Uninitialized {
            log::error!("Trying to move the vehicle before initialization");
            return Err(Error::InvalidConfiguration(
                "vehicle is not initialized".to_string(),
            ));
        }
        if speed > 100 {
            return Err(Error::InvalidArgument(format!(
                "vehicle speed must be within 0..=100, got {speed}"
            )));
        }

        let target = plan(direction, speed, self.turn_rate, self.min_rotate_speed);
        if let Err(e) = self.apply(target) {
            log::error!("Failed to move {}: {}", direction, e);
            self.roll_back();
            return Err(e);
        }
        if let WheelPlan::Run { left, right } = target {
            log::debug!(
                "{}: left {:?} {}%, right {:?} {}%",
                direction,
                left.0,
                left.1,
                right.0,
                right.1
            );
        }

        self.applied = target;
        self.state = if direction.is_motion() {
            VehicleState::Running
        } else {
            VehicleState::Stopped
        };
        self.direction = Some(direction);
        self.speed = speed;
        Ok(())
    }

    fn apply(&mut self, plan: WheelPlan) -> Result<()> {
        match plan {
            WheelPlan::Coast => self.left.stop().and(self.right.stop()),
            WheelPlan::Brake => self.left.brake().and(self.right.brake()),
            WheelPlan::Run { left, right } => {
                self.left.rotate(left.0, left.1)?;
                self.right.rotate(right.0, right.1)
            }
        }
    }

    fn roll_back(&mut self) {
        let Err(e) = self.apply(self.applied) else {
            return;
        };
        log::error!("Failed to restore {:?}: {}; coasting", self.applied, e);
        if self.applied != WheelPlan::Coast {
            if let Err(e) = self.apply(WheelPlan::Coast) {
                log::error!("Failed to coast the vehicle: {}", e);
            }
        }
        self.applied = WheelPlan::Coast;
        self.state = VehicleState::Stopped;
        self.direction = Some(Direction::Stop);
        self.speed = 0;
    }

    /// Change speed and/or turn rate
    ///
    /// While running, the current direction is re-issued with the new values
    /// so the change applies at once. On failure the old values are kept.
    pub fn change_params(&mut self, speed: Option<u8>, turn_rate: Option<u8>) -> Result<()> {
        for (name, value) in [("speed", speed), ("turn rate", turn_rate)] {
            if let Some(v) = value.filter(|&v| v > 100) {
                return Err(Error::InvalidArgument(format!(
                    "{name} must be within 0..=100, got {v}"
                )));
            }
        }

        let new_speed = speed.unwrap_or(self.speed);
        let old_turn_rate = self.turn_rate;
        self.turn_rate = turn_rate.unwrap_or(old_turn_rate);

        match self.direction {
            Some(direction) if self.state == VehicleState::Running => {
                if let Err(e) = self.drive(direction, new_speed) {
                    self.turn_rate = old_turn_rate;
                    return Err(e);
                }
            }
            _ => self.speed = new_speed,
        }
        log::debug!(
            "Vehicle params: speed {}%, turn rate {}%",
            self.speed,
            self.turn_rate
        );
        Ok(())
    }

    /// Measure the distance ahead (cm, -1 if nothing was timed)
    pub fn get_distance(&mut self) -> f64 {
        self.ranger.measure()
    }

    /// Handle for measuring without holding the vehicle
    pub fn range_finder(&self) -> RangeFinder {
        self.ranger.clone()
    }

    pub fn telemetry(&self) -> Telemetry {
        Telemetry {
            direction: self.direction,
            speed: self.speed,
            turn_rate: self.turn_rate,
            distance_cm: self.ranger.last_distance(),
        }
    }

    pub fn state(&self) -> VehicleState {
        self.state
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn turn_rate(&self) -> u8 {
        self.turn_rate
    }

    pub fn left_motor(&self) -> &Motor {
        &self.left
    }

    pub fn right_motor(&self) -> &Motor {
        &self.right
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }
}
