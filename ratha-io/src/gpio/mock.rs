//! Mock pin backend for testing and hardware-free runs
//!
//! Keeps pin state in memory and logs every value write with a timestamp so
//! tests can reconstruct waveforms. Inputs can be driven directly or by a
//! simulated HC-SR04 echo that answers trigger pulses.

use super::backend::PinBackend;
use super::{Direction, Level};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Writes kept before the oldest are dropped
const WRITE_LOG_CAPACITY: usize = 16_384;

/// One value write seen by the mock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinWrite {
    pub pin: u32,
    pub level: Level,
    pub at: Instant,
}

/// Simulated ultrasonic sensor wired to a trigger/echo pin pair
#[derive(Debug, Clone, Copy)]
struct EchoLink {
    trigger: u32,
    echo: u32,
    delay: Duration,
    width: Duration,
}

#[derive(Default)]
struct MockInner {
    exported: HashSet<u32>,
    directions: HashMap<u32, Direction>,
    levels: HashMap<u32, Level>,
    writes: VecDeque<PinWrite>,
    failing: HashSet<u32>,
    echoes: Vec<EchoLink>,
    trigger_falls: HashMap<u32, Instant>,
}

impl MockInner {
    fn check_fault(&self, pin: u32, entry: &str) -> Result<()> {
        if self.failing.contains(&pin) {
            return Err(Error::hardware(
                format!("mock/gpio{pin}/{entry}"),
                std::io::Error::other("injected fault"),
            ));
        }
        Ok(())
    }

    fn check_exported(&self, pin: u32, entry: &str) -> Result<()> {
        if !self.exported.contains(&pin) {
            return Err(Error::hardware(
                format!("mock/gpio{pin}/{entry}"),
                std::io::Error::from(std::io::ErrorKind::NotFound),
            ));
        }
        Ok(())
    }

    fn echo_level(&self, pin: u32, now: Instant) -> Option<Level> {
        let link = self.echoes.iter().find(|l| l.echo == pin)?;
        let fall = self.trigger_falls.get(&link.trigger)?;
        let rise = *fall + link.delay;
        Some(Level::from(now >= rise && now < rise + link.width))
    }
}

/// In-memory [`PinBackend`]
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Mutex<MockInner>>,
}

impl MockBackend {
    /// Create a new mock backend with nothing exported
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate another process exporting `pin`
    pub fn export_external(&self, pin: u32) {
        self.inner.lock().exported.insert(pin);
    }

    /// Drive the level an input read will return
    pub fn set_input_level(&self, pin: u32, level: Level) {
        self.inner.lock().levels.insert(pin, level);
    }

    /// Make every access to `pin` fail (or stop failing)
    pub fn set_fault(&self, pin: u32, failing: bool) {
        let mut inner = self.inner.lock();
        if failing {
            inner.failing.insert(pin);
        } else {
            inner.failing.remove(&pin);
        }
    }

    /// Answer trigger pulses on `trigger` with an echo pulse on `echo`
    ///
    /// The echo rises `delay` after the trigger's falling edge and stays high
    /// for `width`.
    pub fn attach_echo(&self, trigger: u32, echo: u32, delay: Duration, width: Duration) {
        let mut inner = self.inner.lock();
        inner.echoes.retain(|l| l.echo != echo);
        inner.echoes.push(EchoLink {
            trigger,
            echo,
            delay,
            width,
        });
    }

    pub fn is_exported_pin(&self, pin: u32) -> bool {
        self.inner.lock().exported.contains(&pin)
    }

    /// Last level written or injected for `pin`
    pub fn level(&self, pin: u32) -> Option<Level> {
        self.inner.lock().levels.get(&pin).copied()
    }

    pub fn direction(&self, pin: u32) -> Option<Direction> {
        self.inner.lock().directions.get(&pin).copied()
    }

    /// All logged writes, oldest first
    pub fn writes(&self) -> Vec<PinWrite> {
        self.inner.lock().writes.iter().copied().collect()
    }

    /// Logged writes for one pin, oldest first
    pub fn writes_for(&self, pin: u32) -> Vec<PinWrite> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|w| w.pin == pin)
            .copied()
            .collect()
    }

    pub fn clear_writes(&self) {
        self.inner.lock().writes.clear();
    }
}

impl PinBackend for MockBackend {
    fn export(&self, pin: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_fault(pin, "export")?;
        if !inner.exported.insert(pin) {
            return Err(Error::hardware(
                "mock/export",
                std::io::Error::from(std::io::ErrorKind::ResourceBusy),
            ));
        }
        // Kernel default after export
        inner.directions.insert(pin, Direction::Input);
        Ok(())
    }

    fn unexport(&self, pin: u32) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_fault(pin, "unexport")?;
        if !inner.exported.remove(&pin) {
            return Err(Error::hardware(
                "mock/unexport",
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            ));
        }
        inner.directions.remove(&pin);
        Ok(())
    }

    fn is_exported(&self, pin: u32) -> bool {
        self.inner.lock().exported.contains(&pin)
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_exported(pin, "direction")?;
        inner.check_fault(pin, "direction")?;
        inner.directions.insert(pin, direction);
        Ok(())
    }

    fn write_value(&self, pin: u32, level: Level) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.check_exported(pin, "value")?;
        inner.check_fault(pin, "value")?;

        let now = Instant::now();
        let previous = inner.levels.insert(pin, level);
        if previous == Some(Level::High)
            && level == Level::Low
            && inner.echoes.iter().any(|l| l.trigger == pin)
        {
            inner.trigger_falls.insert(pin, now);
        }

        if inner.writes.len() >= WRITE_LOG_CAPACITY {
            inner.writes.pop_front();
        }
        inner.writes.push_back(PinWrite { pin, level, at: now });
        log::trace!("mock gpio{} <- {:?}", pin, level);
        Ok(())
    }

    fn read_value(&self, pin: u32) -> Result<Level> {
        let inner = self.inner.lock();
        inner.check_exported(pin, "value")?;
        inner.check_fault(pin, "value")?;
        if let Some(level) = inner.echo_level(pin, Instant::now()) {
            return Ok(level);
        }
        Ok(inner.levels.get(&pin).copied().unwrap_or(Level::Low))
    }
}
