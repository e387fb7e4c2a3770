//! Board pin tables.
//!
//! A [`BoardTable`] is plain data handed to the [`PinRegistry`](super::PinRegistry)
//! at startup. Nothing here touches hardware.

use std::collections::BTreeMap;

/// One legal GPIO pin and its alternate functions (informational only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinDescriptor {
    pub number: u32,
    pub functions: Vec<String>,
}

impl PinDescriptor {
    /// Plain GPIO pin with no alternate function
    pub fn gpio(number: u32) -> Self {
        Self {
            number,
            functions: vec!["GPIO".to_string()],
        }
    }

    fn with_alt(number: u32, alt: &str) -> Self {
        Self {
            number,
            functions: vec!["GPIO".to_string(), alt.to_string()],
        }
    }
}

/// Legal pins of one board, keyed by BCM number
#[derive(Debug, Clone)]
pub struct BoardTable {
    name: String,
    pins: BTreeMap<u32, PinDescriptor>,
}

impl BoardTable {
    /// Build a table from arbitrary descriptors
    pub fn new(name: &str, pins: impl IntoIterator<Item = PinDescriptor>) -> Self {
        Self {
            name: name.to_string(),
            pins: pins.into_iter().map(|p| (p.number, p)).collect(),
        }
    }

    /// Table of plain GPIO pins from a list of numbers (config override)
    pub fn from_numbers(name: &str, numbers: &[u32]) -> Self {
        Self::new(name, numbers.iter().copied().map(PinDescriptor::gpio))
    }

    /// Raspberry Pi 40-pin header, BCM numbering
    pub fn raspberry_pi() -> Self {
        let alt = [
            (2, "I2C_SDA"),
            (3, "I2C_SCL"),
            (10, "SPI0_MOSI"),
            (9, "SPI0_MISO"),
            (11, "SPI0_CLK"),
            (14, "UART0_TXD0"),
            (15, "UART0_RXD0"),
            (18, "PCM_CLK"),
            (8, "SPI0_CE0_N"),
            (7, "SPI0_CE1_N"),
        ];
        let plain = [4, 17, 27, 22, 5, 6, 13, 19, 26, 23, 24, 25, 12, 16, 20, 21];

        let pins = alt
            .iter()
            .map(|&(n, f)| PinDescriptor::with_alt(n, f))
            .chain(plain.iter().copied().map(PinDescriptor::gpio));
        Self::new("raspberry-pi-40pin", pins)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True if `pin` exists on this board
    pub fn contains(&self, pin: u32) -> bool {
        self.pins.contains_key(&pin)
    }

    pub fn descriptor(&self, pin: u32) -> Option<&PinDescriptor> {
        self.pins.get(&pin)
    }

    /// Legal pin numbers in ascending order
    pub fn numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.pins.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

impl Default for BoardTable {
    fn default() -> Self {
        Self::raspberry_pi()
    }
}
