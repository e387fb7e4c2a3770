//! Pin-control backends
//!
//! [`PinBackend`] is the hardware boundary: claim/release map to export/unexport,
//! direction/value map to writes and reads of per-pin entries. Failures are
//! returned as [`Error::HardwareIo`] and never retried here.

use super::{Direction, Level};
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Default sysfs GPIO class directory
pub const SYSFS_GPIO_ROOT: &str = "/sys/class/gpio";

/// Board pin-control interface
pub trait PinBackend: Send + Sync {
    /// Make `pin` available to userspace
    fn export(&self, pin: u32) -> Result<()>;

    /// Hand `pin` back to the kernel
    fn unexport(&self, pin: u32) -> Result<()>;

    /// True if a live instance of `pin` exists, whoever exported it
    fn is_exported(&self, pin: u32) -> bool;

    /// Write the pin direction
    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()>;

    /// Drive an output pin
    fn write_value(&self, pin: u32, level: Level) -> Result<()>;

    /// Sample the pin
    fn read_value(&self, pin: u32) -> Result<Level>;
}

/// Linux `/sys/class/gpio` backend
#[derive(Debug, Clone)]
pub struct SysfsBackend {
    root: PathBuf,
}

impl SysfsBackend {
    /// Backend rooted at `root` (normally [`SYSFS_GPIO_ROOT`])
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        log::debug!("Using sysfs GPIO root {}", root.display());
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }

    fn write_entry(path: PathBuf, contents: &str) -> Result<()> {
        fs::write(&path, contents).map_err(|e| Error::hardware(path, e))
    }
}

impl Default for SysfsBackend {
    fn default() -> Self {
        Self::new(SYSFS_GPIO_ROOT)
    }
}

impl PinBackend for SysfsBackend {
    fn export(&self, pin: u32) -> Result<()> {
        Self::write_entry(self.root.join("export"), &pin.to_string())
    }

    fn unexport(&self, pin: u32) -> Result<()> {
        Self::write_entry(self.root.join("unexport"), &pin.to_string())
    }

    fn is_exported(&self, pin: u32) -> bool {
        self.pin_dir(pin).exists()
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<()> {
        Self::write_entry(self.pin_dir(pin).join("direction"), direction.as_str())
    }

    fn write_value(&self, pin: u32, level: Level) -> Result<()> {
        Self::write_entry(self.pin_dir(pin).join("value"), level.as_str())
    }

    fn read_value(&self, pin: u32) -> Result<Level> {
        let path = self.pin_dir(pin).join("value");
        let raw = fs::read_to_string(&path).map_err(|e| Error::hardware(&path, e))?;
        match raw.trim() {
            "0" => Ok(Level::Low),
            "1" => Ok(Level::High),
            other => Err(Error::hardware(
                path,
                std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("unexpected pin value '{other}'"),
                ),
            )),
        }
    }
}
