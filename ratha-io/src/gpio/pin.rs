//! Exclusively claimed GPIO pin
//!
//! A [`GpioPin`] exists only between a successful [`GpioPin::acquire`] and
//! [`GpioPin::release`]. Claims are checked against the backend at acquire
//! time, so two live objects for one pin number cannot coexist.
//!
//! In [`PinMode::PwmCapable`] the pin is always an output and may own one
//! software PWM worker (see [`super::pwm`]).

use super::backend::PinBackend;
use super::pwm::{PwmSchedule, PwmWorker};
use super::registry::PinRegistry;
use super::{Direction, Level, PinMode};
use crate::error::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;

/// Write path to one pin, shared by the owner and its PWM worker
///
/// Caches the last level so output reads never touch hardware.
#[derive(Clone)]
pub(crate) struct PinLine {
    number: u32,
    backend: Arc<dyn PinBackend>,
    high: Arc<AtomicBool>,
}

impl PinLine {
    fn new(number: u32, backend: Arc<dyn PinBackend>) -> Self {
        Self {
            number,
            backend,
            high: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn number(&self) -> u32 {
        self.number
    }

    pub(crate) fn cached(&self) -> Level {
        Level::from(self.high.load(Ordering::Relaxed))
    }

    pub(crate) fn write(&self, level: Level) -> Result<()> {
        self.backend.write_value(self.number, level)?;
        self.high.store(level == Level::High, Ordering::Relaxed);
        log::trace!("Pin {} value set to {:?}", self.number, level);
        Ok(())
    }

    /// Write only if `level` differs from the cached one
    pub(crate) fn hold(&self, level: Level) -> Result<()> {
        if self.cached() != level {
            self.write(level)?;
        }
        Ok(())
    }

    fn read(&self) -> Result<Level> {
        let level = self.backend.read_value(self.number)?;
        self.high.store(level == Level::High, Ordering::Relaxed);
        Ok(level)
    }
}

/// One claimed GPIO pin
pub struct GpioPin {
    line: PinLine,
    mode: PinMode,
    direction: Direction,
    claimed: bool,
    pwm: Option<PwmWorker>,
}

impl GpioPin {
    /// Claim `number` for exclusive use
    ///
    /// Fails with [`Error::InvalidPin`] if the board has no such pin and with
    /// [`Error::AlreadyClaimed`] if a live instance exists. A PWM-capable pin
    /// starts as an output driven low; a digital pin keeps the kernel default
    /// (input).
    pub fn acquire(registry: &PinRegistry, number: u32, mode: PinMode) -> Result<Self> {
        if !registry.is_legal(number) {
            log::error!("Pin {} isn't available for this board", number);
            return Err(Error::InvalidPin(number));
        }
        if registry.is_claimed(number) {
            log::error!("Failed to claim pin {}: an instance already exists", number);
            return Err(Error::AlreadyClaimed(number));
        }

        let backend = Arc::clone(registry.backend());
        backend.export(number)?;
        log::info!("Pin {} instance created ({})", number, mode);

        let mut pin = Self {
            line: PinLine::new(number, backend),
            mode,
            direction: Direction::Input,
            claimed: true,
            pwm: None,
        };

        if mode == PinMode::PwmCapable {
            if let Err(e) = pin.make_quiet_output() {
                let _ = pin.release();
                return Err(e);
            }
        }
        Ok(pin)
    }

    pub fn number(&self) -> u32 {
        self.line.number()
    }

    pub fn mode(&self) -> PinMode {
        self.mode
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed
    }

    /// Set the pin direction
    ///
    /// A PWM-capable pin is always written as an output and its stored
    /// direction stays [`Direction::Output`] whatever was requested.
    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        self.ensure_claimed()?;
        let effective = match self.mode {
            PinMode::Digital => direction,
            PinMode::PwmCapable => {
                if direction != Direction::Output {
                    log::warn!(
                        "Pin {} is PWM-capable; direction forced to output",
                        self.number()
                    );
                }
                Direction::Output
            }
        };

        self.line
            .backend
            .set_direction(self.number(), effective)
            .inspect_err(|e| {
                log::error!("Failed to set pin {} direction to {}: {}", self.number(), effective, e)
            })?;
        self.direction = effective;
        log::debug!("Pin {} direction set to {}", self.number(), effective);
        Ok(())
    }

    /// Drive the pin
    ///
    /// Rejected while a PWM worker owns the pin.
    pub fn set_value(&mut self, level: Level) -> Result<()> {
        self.ensure_claimed()?;
        if self.pwm_active() {
            return Err(Error::InvalidConfiguration(format!(
                "pin {} is driven by a PWM worker",
                self.number()
            )));
        }
        self.line.write(level).inspect_err(|e| {
            log::error!("Couldn't set pin {} value to {:?}: {}", self.number(), level, e)
        })
    }

    /// Output pins return the last written level; input pins are sampled
    pub fn get_value(&self) -> Result<Level> {
        self.ensure_claimed()?;
        match self.direction {
            Direction::Output => Ok(self.line.cached()),
            Direction::Input => self.line.read(),
        }
    }

    /// Switch between digital and PWM-capable use
    ///
    /// Leaving PWM-capable mode with a live worker is an error; stop the
    /// worker first. Either way the pin ends up an output driven low.
    pub fn reconfigure(&mut self, mode: PinMode) -> Result<()> {
        self.ensure_claimed()?;
        if mode == self.mode {
            return Ok(());
        }
        if self.pwm_active() {
            return Err(Error::InvalidConfiguration(format!(
                "stop PWM on pin {} before reconfiguring it",
                self.number()
            )));
        }
        // Reap a worker that finished its pulse count
        self.pwm = None;

        self.mode = mode;
        self.make_quiet_output()?;
        log::info!("Changed pin {} mode to {}", self.number(), mode);
        Ok(())
    }

    /// Hand the pin back to the board
    ///
    /// A live PWM worker is stopped first and a high output is driven low.
    /// The claim is cleared even if a hardware write fails; the first error
    /// is returned.
    pub fn release(&mut self) -> Result<()> {
        if !self.claimed {
            log::warn!("Failed to release pin {}: not in use", self.number());
            return Err(Error::NotClaimed(self.number()));
        }

        let mut first_err = None;
        if let Some(worker) = self.pwm.take() {
            if let Err(e @ Error::ThreadPanic) = worker.stop() {
                first_err = Some(e);
            }
        }
        if self.direction == Direction::Output && self.line.cached() == Level::High {
            if let Err(e) = self.line.write(Level::Low) {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = self.line.backend.unexport(self.number()) {
            log::error!("Failed to unexport pin {}: {}", self.number(), e);
            first_err.get_or_insert(e);
        }

        self.claimed = false;
        log::info!("Released pin {}", self.number());
        first_err.map_or(Ok(()), Err)
    }

    // ------------------------------------------------------------------
    // Software PWM
    // ------------------------------------------------------------------

    /// Start a PWM signal on this pin
    ///
    /// `pulses == 0` runs until [`GpioPin::pwm_stop`]. If a worker is already
    /// running its schedule is replaced in place; no second thread is started.
    /// A live worker keeps its pulse count, so a non-zero `pulses` is then
    /// rejected with [`Error::InvalidArgument`].
    pub fn pwm_start(&mut self, frequency_hz: f64, duty_cycle: f64, pulses: u32) -> Result<()> {
        self.ensure_claimed()?;
        if self.mode != PinMode::PwmCapable {
            log::error!("Pin {} is not configured for PWM signals", self.number());
            return Err(Error::InvalidConfiguration(format!(
                "pin {} is not in PWM mode",
                self.number()
            )));
        }
        let schedule = PwmSchedule::new(frequency_hz, duty_cycle)?;

        match &self.pwm {
            Some(worker) if worker.is_running() => {
                if pulses > 0 {
                    return Err(Error::InvalidArgument(format!(
                        "PWM already running on pin {}; stop it before starting {} pulses",
                        self.number(),
                        pulses
                    )));
                }
                worker.set_schedule(schedule);
                log::debug!(
                    "Updated PWM on pin {} to {} Hz, duty {}%",
                    self.number(),
                    frequency_hz,
                    duty_cycle
                );
            }
            _ => {
                // Reap a worker that finished on its own before replacing it
                self.pwm = None;
                self.pwm = Some(PwmWorker::spawn(self.line.clone(), schedule, pulses)?);
            }
        }
        Ok(())
    }

    /// Change the duty cycle of the running signal, keeping its frequency
    pub fn pwm_update(&mut self, duty_cycle: f64) -> Result<()> {
        self.ensure_claimed()?;
        match &self.pwm {
            Some(worker) if worker.is_running() => worker.update_duty(duty_cycle),
            _ => {
                log::warn!(
                    "PWM update on pin {} ignored: no signal running",
                    self.number()
                );
                Err(Error::NotRunning(self.number()))
            }
        }
    }

    /// Stop the PWM signal and wait for its thread to exit
    pub fn pwm_stop(&mut self) -> Result<()> {
        self.ensure_claimed()?;
        if self.mode != PinMode::PwmCapable {
            return Err(Error::InvalidConfiguration(format!(
                "pin {} is not in PWM mode",
                self.number()
            )));
        }
        match self.pwm.take() {
            Some(worker) => worker.stop(),
            None => {
                log::error!(
                    "Trying to stop a PWM signal on pin {} while it's not running",
                    self.number()
                );
                Err(Error::NotRunning(self.number()))
            }
        }
    }

    /// True while a PWM worker is toggling this pin
    pub fn pwm_active(&self) -> bool {
        self.pwm.as_ref().is_some_and(PwmWorker::is_running)
    }

    /// Schedule of the live worker, if any
    pub fn pwm_schedule(&self) -> Option<PwmSchedule> {
        self.pwm
            .as_ref()
            .filter(|w| w.is_running())
            .map(PwmWorker::schedule)
    }

    /// Thread id of the live worker, if any
    pub fn pwm_thread(&self) -> Option<ThreadId> {
        self.pwm
            .as_ref()
            .filter(|w| w.is_running())
            .and_then(PwmWorker::thread_id)
    }

    fn ensure_claimed(&self) -> Result<()> {
        if self.claimed {
            Ok(())
        } else {
            Err(Error::NotClaimed(self.number()))
        }
    }

    fn make_quiet_output(&mut self) -> Result<()> {
        self.line
            .backend
            .set_direction(self.number(), Direction::Output)?;
        self.direction = Direction::Output;
        self.line.write(Level::Low)
    }
}

impl Drop for GpioPin {
    fn drop(&mut self) {
        if self.claimed {
            log::debug!("Pin {} dropped while claimed, releasing", self.number());
            if let Err(e) = self.release() {
                log::error!("Release of pin {} on drop failed: {}", self.number(), e);
            }
        }
    }
}
