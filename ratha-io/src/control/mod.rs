//! Operator-facing control session
//!
//! [`CarController`] owns the [`Vehicle`] for one session. It turns
//! [`ControlEvent`]s into vehicle calls, keeps the requested speed and turn
//! rate, and pushes a [`Telemetry`] snapshot after every event. A
//! [`RangingThread`] refreshes the distance in the background through the
//! vehicle's [`RangeFinder`](crate::vehicle::RangeFinder), outside the
//! vehicle lock.

pub mod commands;
pub mod telemetry;

pub use commands::{ControlCommand, ControlEvent, Flow};
pub use telemetry::{RangingThread, TELEMETRY_CHANNEL_CAPACITY, telemetry_channel};

use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::gpio::{GpioPin, PinMode};
use crate::vehicle::{Direction, Telemetry, Vehicle};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Heartbeat blink
const HEARTBEAT_FREQUENCY_HZ: f64 = 1.0;
const HEARTBEAT_DUTY: f64 = 50.0;

pub struct CarController {
    vehicle: Arc<Mutex<Vehicle>>,
    config: ControllerConfig,
    speed: u8,
    turn_rate: u8,
    telemetry: Sender<Telemetry>,
    heartbeat: Option<GpioPin>,
    ranging: Option<RangingThread>,
    connected: bool,
}

impl CarController {
    /// Take ownership of an uninitialized vehicle
    pub fn new(vehicle: Vehicle, config: ControllerConfig, telemetry: Sender<Telemetry>) -> Self {
        let turn_rate = vehicle.turn_rate();
        Self {
            vehicle: Arc::new(Mutex::new(vehicle)),
            config,
            speed: 0,
            turn_rate,
            telemetry,
            heartbeat: None,
            ranging: None,
            connected: false,
        }
    }

    /// Initialize the vehicle, start the heartbeat and background ranging
    ///
    /// A heartbeat pin that cannot be claimed is logged and skipped.
    pub fn connect(&mut self) -> Result<()> {
        if self.connected {
            return Err(Error::InvalidConfiguration(
                "controller is already connected".to_string(),
            ));
        }

        let (registry, range_finder) = {
            let mut vehicle = self.vehicle.lock();
            vehicle.initialize()?;
            (vehicle.registry().clone(), vehicle.range_finder())
        };

        if let Some(pin) = self.config.heartbeat_pin {
            let started = GpioPin::acquire(&registry, pin, PinMode::PwmCapable).and_then(|mut p| {
                p.pwm_start(HEARTBEAT_FREQUENCY_HZ, HEARTBEAT_DUTY, 0)?;
                Ok(p)
            });
            match started {
                Ok(p) => self.heartbeat = Some(p),
                Err(e) => log::warn!("Heartbeat on pin {} unavailable: {}", pin, e),
            }
        }

        let interval = Duration::from_millis(self.config.telemetry_interval_ms);
        let spawned = RangingThread::spawn(
            Arc::clone(&self.vehicle),
            range_finder,
            self.telemetry.clone(),
            interval,
        );
        match spawned {
            Ok(ranging) => self.ranging = Some(ranging),
            Err(e) => {
                self.heartbeat = None;
                if let Err(deinit_err) = self.vehicle.lock().deinit() {
                    log::error!("Failed to release vehicle: {}", deinit_err);
                }
                return Err(e);
            }
        }

        self.connected = true;
        log::info!("Car connected");
        self.publish();
        Ok(())
    }

    /// Apply one event
    ///
    /// A rejected event leaves the held speed and turn rate unchanged.
    /// Telemetry is pushed either way.
    pub fn handle(&mut self, event: ControlEvent) -> Result<Flow> {
        log::info!("Received {}", event);
        let result = self.apply(event);
        if let Err(e) = &result {
            log::error!("{} failed: {}", event, e);
        }
        self.publish();
        result
    }

    fn apply(&mut self, event: ControlEvent) -> Result<Flow> {
        let command = match event {
            ControlEvent::Direction(direction) => {
                self.vehicle.lock().drive(direction, self.speed)?;
                return Ok(Flow::Continue);
            }
            ControlEvent::Command(command) => command,
        };

        match command {
            ControlCommand::SpeedUp | ControlCommand::SpeedDown => {
                let speed = step(self.speed, self.config.speed_step, command == ControlCommand::SpeedUp);
                self.vehicle.lock().change_params(Some(speed), None)?;
                self.speed = speed;
                log::debug!("Car speed set to {}%", speed);
            }
            ControlCommand::TurnRateUp | ControlCommand::TurnRateDown => {
                let turn_rate = step(
                    self.turn_rate,
                    self.config.turn_step,
                    command == ControlCommand::TurnRateUp,
                );
                self.vehicle.lock().change_params(None, Some(turn_rate))?;
                self.turn_rate = turn_rate;
                log::debug!("Car turn rate set to {}%", turn_rate);
            }
            ControlCommand::Stop => self.vehicle.lock().drive(Direction::Stop, self.speed)?,
            ControlCommand::Brake => self.vehicle.lock().drive(Direction::Brake, self.speed)?,
            ControlCommand::Exit => return Ok(Flow::Exit),
        }
        Ok(Flow::Continue)
    }

    fn publish(&self) {
        let snapshot = self.vehicle.lock().telemetry();
        telemetry::publish(&self.telemetry, snapshot);
    }

    /// Stop background work and release every pin
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Err(Error::InvalidConfiguration(
                "controller is not connected".to_string(),
            ));
        }
        self.connected = false;

        let mut first_err = None;
        if let Some(ranging) = self.ranging.take() {
            if let Err(e) = ranging.stop() {
                first_err.get_or_insert(e);
            }
        }
        if let Some(mut heartbeat) = self.heartbeat.take() {
            if let Err(e) = heartbeat.release() {
                log::warn!("Failed to release heartbeat pin: {}", e);
            }
        }
        if let Err(e) = self.vehicle.lock().deinit() {
            first_err.get_or_insert(e);
        }

        log::info!("Car disconnected");
        first_err.map_or(Ok(()), Err)
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Speed used for the next direction event
    pub fn speed(&self) -> u8 {
        self.speed
    }

    pub fn turn_rate(&self) -> u8 {
        self.turn_rate
    }

    pub fn telemetry(&self) -> Telemetry {
        self.vehicle.lock().telemetry()
    }

    /// Shared handle to the vehicle
    pub fn vehicle(&self) -> Arc<Mutex<Vehicle>> {
        Arc::clone(&self.vehicle)
    }

    pub fn heartbeat_active(&self) -> bool {
        self.heartbeat.as_ref().is_some_and(GpioPin::pwm_active)
    }
}

impl Drop for CarController {
    fn drop(&mut self) {
        if self.connected {
            if let Err(e) = self.disconnect() {
                log::error!("Disconnect on drop failed: {}", e);
            }
        }
    }
}

/// Move `value` by `step` and clamp to 0..=100
fn step(value: u8, step: u8, up: bool) -> u8 {
    if up {
        value.saturating_add(step).min(100)
    } else {
        value.saturating_sub(step)
    }
}
