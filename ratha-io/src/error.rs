//! Error types for RathaIO

use std::path::PathBuf;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// RathaIO error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pin number is not part of the board's GPIO table
    #[error("Pin {0} is not available on this board")]
    InvalidPin(u32),

    /// Pin is already exported (by us or another process)
    #[error("Pin {0} is already claimed")]
    AlreadyClaimed(u32),

    /// Operation on a pin that was released
    #[error("Pin {0} is not claimed")]
    NotClaimed(u32),

    /// Out-of-domain parameter (direction, level, duty cycle, speed, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Operation attempted in the wrong lifecycle state, or bad configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Underlying pin-control write/read failed
    #[error("GPIO I/O error on {}: {source}", .path.display())]
    HardwareIo {
        /// Pin-control entry that failed
        path: PathBuf,
        /// OS error
        #[source]
        source: std::io::Error,
    },

    /// PWM stop/update requested with no live worker
    #[error("No PWM signal running on pin {0}")]
    NotRunning(u32),

    /// Echo edge not observed within the ranging window
    #[error("Echo timeout")]
    Timeout,

    /// I/O error (configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Worker thread could not be created
    #[error("Failed to spawn thread: {0}")]
    ThreadSpawn(String),

    /// Worker thread panicked before it could be joined
    #[error("Thread panicked")]
    ThreadPanic,
}

impl Error {
    /// Build a [`Error::HardwareIo`] for a pin-control path
    pub(crate) fn hardware(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::HardwareIo {
            path: path.into(),
            source,
        }
    }
}
