//! Software PWM
//!
//! One named OS thread per PWM pin toggles the pin from a shared
//! [`PwmSchedule`]. The schedule sits behind a mutex so a duty-cycle update
//! from the control path is never observed half-written; the worker copies it
//! at the start of every phase, so an update lands within one period.
//!
//! # Cancellation
//!
//! Stopping is cooperative. The worker checks its run flag once per cycle,
//! after the low phase, so a pulse is never cut short and stop latency is at
//! most one period. [`PwmWorker::stop`] joins the thread before returning, so
//! no edge follows it.
//!
//! # Boundary duty cycles
//!
//! 0 % and 100 % hold the pin at one level for whole periods and only write
//! when the level actually changes.

use super::Level;
use super::pin::PinLine;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

/// Frequency and duty cycle of a PWM signal, with derived phase lengths
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PwmSchedule {
    frequency_hz: f64,
    duty_cycle: f64,
    period: Duration,
}

/// What one cycle of a schedule looks like on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    AlwaysLow,
    AlwaysHigh,
    Toggle,
}

impl PwmSchedule {
    /// Validate and build a schedule
    ///
    /// Fails with [`Error::InvalidArgument`] if `frequency_hz <= 0` or
    /// `duty_cycle` is outside `[0, 100]`.
    pub fn new(frequency_hz: f64, duty_cycle: f64) -> Result<Self> {
        if !(frequency_hz.is_finite() && frequency_hz > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "PWM frequency must be > 0 Hz, got {frequency_hz}"
            )));
        }
        check_duty(duty_cycle)?;
        let period = Duration::try_from_secs_f64(1.0 / frequency_hz).map_err(|_| {
            Error::InvalidArgument(format!("PWM frequency {frequency_hz} Hz is out of range"))
        })?;
        Ok(Self {
            frequency_hz,
            duty_cycle,
            period,
        })
    }

    /// Same frequency, new duty cycle
    pub fn with_duty_cycle(self, duty_cycle: f64) -> Result<Self> {
        check_duty(duty_cycle)?;
        Ok(Self { duty_cycle, ..self })
    }

    pub fn frequency_hz(&self) -> f64 {
        self.frequency_hz
    }

    pub fn duty_cycle(&self) -> f64 {
        self.duty_cycle
    }

    /// `1 / frequency`
    pub fn period(&self) -> Duration {
        self.period
    }

    /// `duty / 100 * period`
    pub fn high_time(&self) -> Duration {
        self.period.mul_f64(self.duty_cycle / 100.0)
    }

    /// `period - high_time`
    pub fn low_time(&self) -> Duration {
        self.period.saturating_sub(self.high_time())
    }

    fn shape(&self) -> Shape {
        if self.duty_cycle <= 0.0 {
            Shape::AlwaysLow
        } else if self.duty_cycle >= 100.0 {
            Shape::AlwaysHigh
        } else {
            Shape::Toggle
        }
    }
}

fn check_duty(duty_cycle: f64) -> Result<()> {
    if (0.0..=100.0).contains(&duty_cycle) {
        Ok(())
    } else {
        Err(Error::InvalidArgument(format!(
            "duty cycle must be within [0, 100], got {duty_cycle}"
        )))
    }
}

/// Handle to the PWM thread of one pin
///
/// Owned by the [`GpioPin`](super::GpioPin) it drives; there is never more
/// than one per pin. Dropping the handle stops and joins the thread.
pub(crate) struct PwmWorker {
    pin: u32,
    schedule: Arc<Mutex<PwmSchedule>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PwmWorker {
    /// Start a worker on `line`
    ///
    /// `pulses == 0` runs until stopped; otherwise the worker exits by itself
    /// after that many cycles.
    pub(crate) fn spawn(line: PinLine, schedule: PwmSchedule, pulses: u32) -> Result<Self> {
        let pin = line.number();
        let shared = Arc::new(Mutex::new(schedule));
        let running = Arc::new(AtomicBool::new(true));

        let worker_schedule = Arc::clone(&shared);
        let worker_running = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name(format!("pin{pin}-pwm"))
            .spawn(move || pwm_loop(line, worker_schedule, worker_running, pulses))
            .map_err(|e| Error::ThreadSpawn(format!("PWM thread for pin {pin}: {e}")))?;

        log::debug!(
            "Started PWM on pin {} at {} Hz, duty {}% ({} pulses)",
            pin,
            schedule.frequency_hz(),
            schedule.duty_cycle(),
            pulses
        );

        Ok(Self {
            pin,
            schedule: shared,
            running,
            handle: Some(handle),
        })
    }

    /// True until the worker has been stopped or has finished its pulses
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub(crate) fn schedule(&self) -> PwmSchedule {
        *self.schedule.lock()
    }

    /// Swap the whole schedule; picked up at the next phase
    pub(crate) fn set_schedule(&self, schedule: PwmSchedule) {
        *self.schedule.lock() = schedule;
    }

    /// Change the duty cycle, keeping the running frequency
    pub(crate) fn update_duty(&self, duty_cycle: f64) -> Result<()> {
        let mut schedule = self.schedule.lock();
        *schedule = schedule.with_duty_cycle(duty_cycle)?;
        Ok(())
    }

    pub(crate) fn thread_id(&self) -> Option<ThreadId> {
        self.handle.as_ref().map(|h| h.thread().id())
    }

    /// Clear the run flag and wait for the thread to exit
    ///
    /// A worker that already finished its pulses is still joined, but the
    /// call reports [`Error::NotRunning`].
    pub(crate) fn stop(mut self) -> Result<()> {
        let was_running = self.running.swap(false, Ordering::Relaxed);
        self.join()?;
        if was_running {
            log::debug!("Stopped PWM on pin {}", self.pin);
            Ok(())
        } else {
            Err(Error::NotRunning(self.pin))
        }
    }

    fn join(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join().map_err(|_| Error::ThreadPanic)?;
        }
        Ok(())
    }
}

impl Drop for PwmWorker {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if self.join().is_err() {
            log::error!("PWM thread for pin {} panicked", self.pin);
        }
    }
}

fn pwm_loop(line: PinLine, schedule: Arc<Mutex<PwmSchedule>>, running: Arc<AtomicBool>, pulses: u32) {
    let mut remaining = pulses;

    while running.load(Ordering::Relaxed) {
        if let Err(e) = run_cycle(&line, &schedule) {
            log::error!("PWM on pin {} aborted: {}", line.number(), e);
            break;
        }
        if pulses > 0 {
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
    }

    running.store(false, Ordering::Relaxed);
    log::trace!("PWM thread for pin {} exiting", line.number());
}

/// One high phase followed by one low phase, each from the schedule current
/// at its start
fn run_cycle(line: &PinLine, schedule: &Mutex<PwmSchedule>) -> Result<()> {
    let current = *schedule.lock();
    match current.shape() {
        Shape::AlwaysLow => {
            line.hold(Level::Low)?;
            thread::sleep(current.period());
        }
        Shape::AlwaysHigh => {
            line.hold(Level::High)?;
            thread::sleep(current.period());
        }
        Shape::Toggle => {
            line.write(Level::High)?;
            thread::sleep(current.high_time());

            let current = *schedule.lock();
            if current.shape() != Shape::AlwaysHigh {
                line.write(Level::Low)?;
            }
            thread::sleep(current.low_time());
        }
    }
    Ok(())
}
