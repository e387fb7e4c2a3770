//! HC-SR04 style ultrasonic ranger
//!
//! A 10 us trigger pulse makes the sensor emit a burst; the echo pin then
//! stays high for the round-trip time of the sound. Both edges are polled
//! with a busy wait. The wait for the rising edge is bounded by the round
//! trip to the farthest calibrated distance; the high phase only by the
//! sensor's own echo limit, so far readings still come back as numbers
//! flagged out of range.

use crate::config::RangerConfig;
use crate::error::{Error, Result};
use crate::gpio::{Direction, GpioPin, Level, PinMode, PinRegistry};
use crate::timing::micro_sleep;
use std::time::{Duration, Instant};

/// Trigger held low before the pulse so the sensor sees a clean edge
const SETTLE_US: u64 = 2000;

/// Trigger pulse width
const TRIGGER_PULSE_US: u64 = 10;

/// Longest echo an HC-SR04 produces (no obstacle)
pub const ECHO_LIMIT: Duration = Duration::from_millis(38);

/// Distance reported when nothing was measured
pub const NO_READING: f64 = -1.0;

/// One successful reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    pub distance_cm: f64,
    /// Echo high time (round trip)
    pub echo_time: Duration,
    /// Within the calibrated min/max distances
    pub in_range: bool,
}

pub struct UltrasonicRanger {
    config: RangerConfig,
    trigger: Option<GpioPin>,
    echo: Option<GpioPin>,
    last: Option<Measurement>,
}

impl UltrasonicRanger {
    pub fn new(config: RangerConfig) -> Self {
        Self {
            config,
            trigger: None,
            echo: None,
            last: None,
        }
    }

    /// Claim `trigger` as an output driven low and `echo` as an input
    ///
    /// Fails with [`Error::InvalidPin`] if either pin is not on the board or
    /// is already claimed.
    pub fn init(&mut self, registry: &PinRegistry, trigger: u32, echo: u32) -> Result<()> {
        if self.is_initialized() {
            return Err(Error::InvalidConfiguration(
                "ultrasonic ranger is already initialized".to_string(),
            ));
        }
        if trigger == echo {
            return Err(Error::InvalidArgument(format!(
                "trigger and echo must be different pins, both are {trigger}"
            )));
        }
        if self.max_round_trip().is_zero() {
            return Err(Error::InvalidConfiguration(format!(
                "ranger window from {} cm at {} cm/s is empty",
                self.config.max_distance_cm, self.config.speed_of_sound_cm_s
            )));
        }
        for pin in [trigger, echo] {
            if !registry.is_available(pin) {
                log::error!("Ultrasonic pin {} is not available", pin);
                return Err(Error::InvalidPin(pin));
            }
        }

        let mut trigger_pin = GpioPin::acquire(registry, trigger, PinMode::Digital)?;
        trigger_pin.set_direction(Direction::Output)?;
        trigger_pin.set_value(Level::Low)?;

        let mut echo_pin = GpioPin::acquire(registry, echo, PinMode::Digital)?;
        echo_pin.set_direction(Direction::Input)?;

        self.trigger = Some(trigger_pin);
        self.echo = Some(echo_pin);
        log::info!(
            "Ultrasonic ranger initialized (trigger {}, echo {}, window {:?})",
            trigger,
            echo,
            self.max_round_trip()
        );
        Ok(())
    }

    /// Release both pins
    pub fn deinit(&mut self) -> Result<()> {
        let (Some(mut trigger), Some(mut echo)) = (self.trigger.take(), self.echo.take()) else {
            return Err(Error::InvalidConfiguration(
                "ultrasonic ranger is not initialized".to_string(),
            ));
        };
        let first = trigger.release();
        let second = echo.release();
        log::info!("Ultrasonic ranger released");
        first.and(second)
    }

    pub fn is_initialized(&self) -> bool {
        self.trigger.is_some() && self.echo.is_some()
    }

    /// Distance in cm, or [`NO_READING`] if no echo was timed
    pub fn measure(&mut self) -> f64 {
        match self.try_measure() {
            Ok(m) => m.distance_cm,
            Err(Error::Timeout) => {
                log::warn!("No echo within {:?}: object out of range", self.max_round_trip());
                NO_READING
            }
            Err(e) => {
                log::warn!("Ultrasonic measurement failed: {}", e);
                NO_READING
            }
        }
    }

    /// Fire one trigger pulse and time the echo
    pub fn try_measure(&mut self) -> Result<Measurement> {
        let window = self.max_round_trip();
        let echo_limit = window.max(ECHO_LIMIT);
        let speed = self.config.speed_of_sound_cm_s;
        let (Some(trigger), Some(echo)) = (self.trigger.as_mut(), self.echo.as_ref()) else {
            return Err(Error::InvalidConfiguration(
                "ultrasonic ranger is not initialized".to_string(),
            ));
        };

        trigger.set_value(Level::Low)?;
        micro_sleep(SETTLE_US);
        trigger.set_value(Level::High)?;
        micro_sleep(TRIGGER_PULSE_US);
        trigger.set_value(Level::Low)?;

        let armed = Instant::now();
        while echo.get_value()? == Level::Low {
            if armed.elapsed() > window {
                return Err(Error::Timeout);
            }
            std::hint::spin_loop();
        }

        let rise = Instant::now();
        while echo.get_value()? == Level::High {
            if rise.elapsed() > echo_limit {
                return Err(Error::Timeout);
            }
            std::hint::spin_loop();
        }
        let echo_time = rise.elapsed();

        let distance_cm = echo_time.as_secs_f64() * speed / 2.0;
        let in_range = (self.config.min_distance_cm..=self.config.max_distance_cm)
            .contains(&distance_cm);
        if !in_range {
            log::debug!(
                "Distance {:.1} cm outside calibrated range {}..{} cm",
                distance_cm,
                self.config.min_distance_cm,
                self.config.max_distance_cm
            );
        }

        let measurement = Measurement {
            distance_cm,
            echo_time,
            in_range,
        };
        self.last = Some(measurement);
        Ok(measurement)
    }

    pub fn last_measurement(&self) -> Option<Measurement> {
        self.last
    }

    /// Round trip to `max_distance_cm`, the bound on the wait for the echo
    pub fn max_round_trip(&self) -> Duration {
        let secs = 2.0 * self.config.max_distance_cm / self.config.speed_of_sound_cm_s;
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }

    pub fn config(&self) -> &RangerConfig {
        &self.config
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::gpio::{BoardTable, MockBackend};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn setup() -> (MockBackend, PinRegistry) {
        let mock = MockBackend::new();
        let registry = PinRegistry::new(BoardTable::raspberry_pi(), Arc::new(mock.clone()));
        (mock, registry)
    }

    #[test]
    fn test_window_from_calibration() {
        let ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        assert_relative_eq!(
            ranger.max_round_trip().as_secs_f64(),
            2.0 * 350.0 / 34_000.0,
            max_relative = 1e-9
        );
    }

    #[test]
    fn test_init_claims_pins() {
        let (mock, registry) = setup();
        let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        ranger.init(&registry, 6, 5).unwrap();
        assert_eq!(mock.direction(6), Some(Direction::Output));
        assert_eq!(mock.level(6), Some(Level::Low));
        assert_eq!(mock.direction(5), Some(Direction::Input));

        ranger.deinit().unwrap();
        assert!(!mock.is_exported_pin(6));
        assert!(!mock.is_exported_pin(5));
        assert!(matches!(ranger.deinit(), Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_init_rejects_unavailable_pins() {
        let (mock, registry) = setup();
        let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        assert!(matches!(
            ranger.init(&registry, 1, 5),
            Err(Error::InvalidPin(1))
        ));

        mock.export_external(5);
        assert!(matches!(
            ranger.init(&registry, 6, 5),
            Err(Error::InvalidPin(5))
        ));
        assert!(!mock.is_exported_pin(6));
    }

    #[test]
    fn test_measure_without_init_is_sentinel() {
        let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        assert_eq!(ranger.measure(), NO_READING);
    }

    #[test]
    fn test_trigger_pulse_shape() {
        let (mock, registry) = setup();
        let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        ranger.init(&registry, 6, 5).unwrap();
        mock.clear_writes();

        assert_eq!(ranger.measure(), NO_READING);
        let writes = mock.writes_for(6);
        let levels: Vec<Level> = writes.iter().map(|w| w.level).collect();
        assert_eq!(levels, vec![Level::Low, Level::High, Level::Low]);
        assert!(writes[1].at - writes[0].at >= Duration::from_micros(SETTLE_US));
        assert!(writes[2].at - writes[1].at >= Duration::from_micros(TRIGGER_PULSE_US));
    }

    #[test]
    fn test_close_echo_is_flagged_out_of_range() {
        let (mock, registry) = setup();
        let mut config = RangerConfig::with_pins(6, 5);
        config.min_distance_cm = 20.0;
        let mut ranger = UltrasonicRanger::new(config);
        ranger.init(&registry, 6, 5).unwrap();
        mock.attach_echo(6, 5, Duration::from_micros(100), Duration::from_micros(300));

        let m = ranger.try_measure().unwrap();
        assert!(m.distance_cm < 20.0);
        assert!(!m.in_range);
        assert_eq!(ranger.last_measurement(), Some(m));
    }

    #[test]
    fn test_far_echo_is_returned_and_flagged() {
        let (mock, registry) = setup();
        let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        ranger.init(&registry, 6, 5).unwrap();
        // 25 ms round trip is about 425 cm, past the 350 cm maximum
        mock.attach_echo(6, 5, Duration::from_micros(100), Duration::from_millis(25));

        let m = ranger.try_measure().unwrap();
        assert!(!m.in_range);
        assert!(m.echo_time > ranger.max_round_trip());
        assert_relative_eq!(m.distance_cm, 425.0, max_relative = 0.05);

        let distance = ranger.measure();
        assert!(distance > 350.0, "got {distance}");
    }

    #[test]
    fn test_stuck_high_echo_times_out() {
        let (mock, registry) = setup();
        let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
        ranger.init(&registry, 6, 5).unwrap();
        mock.attach_echo(6, 5, Duration::ZERO, Duration::from_secs(5));

        let start = Instant::now();
        assert!(matches!(ranger.try_measure(), Err(Error::Timeout)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
