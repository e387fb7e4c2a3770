//! Pin legality and claim queries

use super::backend::{PinBackend, SysfsBackend};
use super::board::{BoardTable, PinDescriptor};
use crate::config::BoardConfig;
use crate::error::{Error, Result};
use std::sync::Arc;

/// Board table plus the backend that knows which pins are live
///
/// Claim state is never cached here: [`PinRegistry::is_claimed`] asks the
/// backend, so pins exported by other processes are seen as claimed too.
#[derive(Clone)]
pub struct PinRegistry {
    board: Arc<BoardTable>,
    backend: Arc<dyn PinBackend>,
}

impl PinRegistry {
    pub fn new(board: BoardTable, backend: Arc<dyn PinBackend>) -> Self {
        log::info!(
            "Pin registry for {} ({} pins)",
            board.name(),
            board.len()
        );
        Self {
            board: Arc::new(board),
            backend,
        }
    }

    /// Board table and backend selected by the `[board]` configuration
    pub fn from_config(config: &BoardConfig) -> Result<Self> {
        let board = match &config.legal_pins {
            Some(pins) => BoardTable::from_numbers("custom", pins),
            None => BoardTable::raspberry_pi(),
        };
        let backend: Arc<dyn PinBackend> = match config.backend.as_str() {
            "sysfs" => Arc::new(SysfsBackend::new(config.gpio_root.clone())),
            #[cfg(feature = "mock")]
            "mock" => {
                log::warn!("Using the in-memory mock backend; no hardware is driven");
                Arc::new(super::MockBackend::new())
            }
            other => {
                return Err(Error::InvalidConfiguration(format!(
                    "board backend '{other}' is not available in this build"
                )));
            }
        };
        Ok(Self::new(board, backend))
    }

    /// True if `pin` exists on the board
    pub fn is_legal(&self, pin: u32) -> bool {
        self.board.contains(pin)
    }

    /// True if a live instance of a legal `pin` exists
    pub fn is_claimed(&self, pin: u32) -> bool {
        self.is_legal(pin) && self.backend.is_exported(pin)
    }

    /// True if `pin` is legal and nobody holds it
    pub fn is_available(&self, pin: u32) -> bool {
        self.is_legal(pin) && !self.backend.is_exported(pin)
    }

    pub fn descriptor(&self, pin: u32) -> Option<&PinDescriptor> {
        self.board.descriptor(pin)
    }

    pub fn board(&self) -> &BoardTable {
        &self.board
    }

    pub(crate) fn backend(&self) -> &Arc<dyn PinBackend> {
        &self.backend
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::gpio::MockBackend;

    #[test]
    fn test_legality_and_claims() {
        let mock = MockBackend::new();
        let registry = PinRegistry::new(BoardTable::raspberry_pi(), Arc::new(mock.clone()));

        assert!(registry.is_legal(20));
        assert!(!registry.is_legal(40));
        assert!(registry.is_available(20));

        mock.export_external(20);
        assert!(registry.is_claimed(20));
        assert!(!registry.is_available(20));

        // Illegal pins are never reported as claimed
        mock.export_external(40);
        assert!(!registry.is_claimed(40));
    }

    #[test]
    fn test_from_config() {
        let config = BoardConfig {
            backend: "mock".to_string(),
            legal_pins: Some(vec![5, 6]),
            ..BoardConfig::default()
        };
        let registry = PinRegistry::from_config(&config).unwrap();
        assert_eq!(registry.board().name(), "custom");
        assert!(registry.is_available(5));
        assert!(!registry.is_legal(20));

        let config = BoardConfig {
            backend: "i2c".to_string(),
            ..BoardConfig::default()
        };
        assert!(matches!(
            PinRegistry::from_config(&config),
            Err(Error::InvalidConfiguration(_))
        ));
    }
}
