//! End-to-end scenarios on the mock backend

use approx::assert_abs_diff_eq;
use ratha_io::config::{AppConfig, MotorConfig, MotorPins, RangerConfig};
use ratha_io::devices::{Motor, MotorState, NO_READING, Rotation, UltrasonicRanger};
use ratha_io::gpio::{BoardTable, GpioPin, Level, MockBackend, PinMode, PinRegistry};
use ratha_io::{Direction, Error, Vehicle, VehicleState};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup() -> (MockBackend, PinRegistry) {
    let mock = MockBackend::new();
    let registry = PinRegistry::new(BoardTable::raspberry_pi(), Arc::new(mock.clone()));
    (mock, registry)
}

const LEFT_DIRECTION_PINS: [u32; 2] = [16, 20];
const RIGHT_DIRECTION_PINS: [u32; 2] = [13, 19];

#[test]
fn test_every_legal_pin_can_be_reclaimed() {
    let (_mock, registry) = setup();
    let numbers: Vec<u32> = registry.board().numbers().collect();
    for number in numbers {
        for mode in [PinMode::Digital, PinMode::PwmCapable] {
            let mut pin = GpioPin::acquire(&registry, number, mode).unwrap();
            for other in [PinMode::Digital, PinMode::PwmCapable] {
                assert!(matches!(
                    GpioPin::acquire(&registry, number, other),
                    Err(Error::AlreadyClaimed(n)) if n == number
                ));
            }
            pin.release().unwrap();
            assert!(!registry.is_claimed(number));
        }
    }
}

#[test]
fn test_motor_speed_change_reuses_worker() {
    let (mock, registry) = setup();
    let mut motor = Motor::new(
        "left",
        MotorConfig {
            min_speed: 30,
            pwm_frequency_hz: 100.0,
        },
    );
    motor
        .init(
            &registry,
            MotorPins {
                in1: 16,
                in2: 20,
                enable: Some(21),
            },
        )
        .unwrap();

    motor.rotate(Rotation::Cw, 50).unwrap();
    let worker = motor.pwm_thread().unwrap();
    mock.clear_writes();

    motor.rotate(Rotation::Cw, 80).unwrap();
    assert_eq!(motor.pwm_thread(), Some(worker));
    assert_eq!(motor.speed(), 80);
    assert_eq!(motor.state(), MotorState::RunningCw);
    for pin in [16, 20] {
        assert!(mock.writes_for(pin).is_empty(), "direction pin {pin} touched");
    }

    motor.deinit().unwrap();
    assert!(motor.pwm_thread().is_none());
}

fn vehicle_with_turn_rate(mock: &MockBackend, turn_rate: u8) -> Vehicle {
    let registry = PinRegistry::new(BoardTable::raspberry_pi(), Arc::new(mock.clone()));
    let mut config = AppConfig::rc_car_defaults();
    config.vehicle.turn_rate = turn_rate;
    let mut vehicle = Vehicle::new(registry, &config);
    vehicle.initialize().unwrap();
    vehicle
}

#[test]
fn test_turn_right_slows_right_wheel() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 40);

    vehicle.drive(Direction::TurnRight, 50).unwrap();
    assert_eq!(vehicle.left_motor().speed(), 50);
    assert_eq!(vehicle.right_motor().speed(), 20);
    assert_eq!(vehicle.left_motor().state(), MotorState::RunningCw);
    assert_eq!(vehicle.right_motor().state(), MotorState::RunningCw);

    vehicle.drive(Direction::TurnLeft, 50).unwrap();
    assert_eq!(vehicle.left_motor().speed(), 20);
    assert_eq!(vehicle.right_motor().speed(), 50);
    vehicle.deinit().unwrap();
}

#[test]
fn test_rotations_run_wheels_opposite() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 50);

    vehicle.drive(Direction::RotateRight, 40).unwrap();
    assert_eq!(vehicle.left_motor().state(), MotorState::RunningCw);
    assert_eq!(vehicle.right_motor().state(), MotorState::RunningCcw);
    assert_eq!(mock.level(16), Some(Level::High));
    assert_eq!(mock.level(13), Some(Level::Low));
    assert_eq!(mock.level(19), Some(Level::High));
    vehicle.deinit().unwrap();
}

#[test]
fn test_stop_pattern_from_every_direction() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 50);

    for direction in Direction::ALL {
        vehicle.drive(direction, 60).unwrap();
        vehicle.drive(Direction::Stop, 60).unwrap();
        for pin in LEFT_DIRECTION_PINS.iter().chain(&RIGHT_DIRECTION_PINS) {
            assert_eq!(
                mock.level(*pin),
                Some(Level::Low),
                "pin {pin} after {direction}"
            );
        }
        assert_eq!(vehicle.state(), VehicleState::Stopped);
        assert_eq!(vehicle.left_motor().state(), MotorState::Stopped);
        assert_eq!(vehicle.right_motor().state(), MotorState::Stopped);
    }
    vehicle.deinit().unwrap();
}

#[test]
fn test_failed_move_leaves_no_wheel_running() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 50);
    vehicle.drive(Direction::Stop, 0).unwrap();

    // Right in2 fails after the left wheel has already been started
    mock.set_fault(19, true);
    assert!(matches!(
        vehicle.drive(Direction::Forward, 60),
        Err(Error::HardwareIo { .. })
    ));
    assert_eq!(vehicle.direction(), Some(Direction::Stop));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert_eq!(vehicle.left_motor().state(), MotorState::Stopped);
    assert_eq!(vehicle.left_motor().speed(), 0);
    assert_eq!(mock.level(16), Some(Level::Low));
    assert_eq!(vehicle.right_motor().state(), MotorState::Stopped);

    mock.set_fault(19, false);
    vehicle.drive(Direction::Forward, 60).unwrap();
    assert_eq!(vehicle.state(), VehicleState::Running);
    vehicle.deinit().unwrap();
}

#[test]
fn test_unrecoverable_move_reports_stop() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 50);
    vehicle.drive(Direction::Forward, 60).unwrap();

    // Rotating flips the right polarity; neither it nor Forward can be restored
    mock.set_fault(19, true);
    assert!(vehicle.drive(Direction::RotateRight, 60).is_err());
    assert_eq!(vehicle.direction(), Some(Direction::Stop));
    assert_eq!(vehicle.state(), VehicleState::Stopped);
    assert_eq!(vehicle.speed(), 0);
    for pin in LEFT_DIRECTION_PINS {
        assert_eq!(mock.level(pin), Some(Level::Low), "pin {pin}");
    }
    assert_eq!(vehicle.left_motor().state(), MotorState::Stopped);
    assert_eq!(vehicle.right_motor().state(), MotorState::Stopped);

    mock.set_fault(19, false);
    vehicle.deinit().unwrap();
}

#[test]
fn test_stop_after_enable_worker_failure() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 50);
    vehicle.drive(Direction::Forward, 60).unwrap();

    // A write error ends the left enable worker
    mock.set_fault(21, true);
    let deadline = Instant::now() + Duration::from_secs(2);
    while vehicle.left_motor().pwm_thread().is_some() {
        assert!(Instant::now() < deadline, "enable worker survived the fault");
        std::thread::sleep(Duration::from_millis(5));
    }
    mock.set_fault(21, false);

    vehicle.drive(Direction::Stop, 0).unwrap();
    for pin in LEFT_DIRECTION_PINS.iter().chain(&RIGHT_DIRECTION_PINS) {
        assert_eq!(mock.level(*pin), Some(Level::Low), "pin {pin}");
    }
    assert_eq!(vehicle.left_motor().state(), MotorState::Stopped);
    assert!(vehicle.left_motor().pwm_thread().is_some());

    vehicle.drive(Direction::Forward, 60).unwrap();
    assert_eq!(vehicle.left_motor().state(), MotorState::RunningCw);
    vehicle.deinit().unwrap();
}

#[test]
fn test_deinit_releases_everything() {
    let mock = MockBackend::new();
    let mut vehicle = vehicle_with_turn_rate(&mock, 50);
    vehicle.drive(Direction::Forward, 70).unwrap();
    vehicle.deinit().unwrap();

    for pin in [16, 20, 21, 13, 19, 26, 6, 5] {
        assert!(!mock.is_exported_pin(pin), "pin {pin} still exported");
    }
    assert_eq!(vehicle.state(), VehicleState::Uninitialized);
}

fn ranger(mock: &MockBackend) -> UltrasonicRanger {
    let registry = PinRegistry::new(BoardTable::raspberry_pi(), Arc::new(mock.clone()));
    let mut ranger = UltrasonicRanger::new(RangerConfig::with_pins(6, 5));
    ranger.init(&registry, 6, 5).unwrap();
    ranger
}

#[test]
fn test_ranger_without_echo_returns_sentinel() {
    let mock = MockBackend::new();
    let mut ranger = ranger(&mock);

    let start = Instant::now();
    assert_eq!(ranger.measure(), NO_READING);
    assert!(matches!(ranger.try_measure(), Err(Error::Timeout)));
    // Settle time plus one window per call, with slack for the scheduler
    assert!(start.elapsed() < Duration::from_millis(500));
    ranger.deinit().unwrap();
}

#[test]
fn test_ranger_times_echo_width() {
    let mock = MockBackend::new();
    let mut ranger = ranger(&mock);
    mock.attach_echo(6, 5, Duration::from_micros(200), Duration::from_millis(2));

    let m = ranger.try_measure().unwrap();
    assert_abs_diff_eq!(m.distance_cm, 34.0, epsilon = 4.0);
    assert!(m.in_range);
    assert!(m.echo_time > Duration::from_micros(1500));

    let distance = ranger.measure();
    assert_abs_diff_eq!(distance, 34.0, epsilon = 4.0);
    ranger.deinit().unwrap();
}

#[test]
fn test_ranger_reports_echo_beyond_maximum() {
    let mock = MockBackend::new();
    let mut ranger = ranger(&mock);
    // About 425 cm with the default 350 cm maximum
    mock.attach_echo(6, 5, Duration::from_micros(100), Duration::from_millis(25));

    let m = ranger.try_measure().unwrap();
    assert!(!m.in_range);
    assert_abs_diff_eq!(m.distance_cm, 425.0, epsilon = 20.0);
    assert!(ranger.measure() > 350.0);
    ranger.deinit().unwrap();
}
