//! Radio configuration.
//!
//! [`RadioConfig`] is the runtime configuration handed to the controller and
//! the router. [`SETUP_TABLE`] is the fixed modem configuration written
//! verbatim during [`Rfm69::setup`](crate::driver::Rfm69::setup):
//! packet mode FSK at 19.2 kbps, 25 kHz deviation, 915 MHz carrier, two byte
//! sync word, variable length packets with CRC and continuous DAGC.

use core::time::Duration;

use crate::consts::{CSMA_LIMIT, MAX_DATA_LEN, MAX_POWER_LEVEL, MODE_READY_TIMEOUT, TX_TIMEOUT};
use crate::registers::*;

/// Register writes applied in order at setup, `(address, value)`.
pub const SETUP_TABLE: &[(u8, u8)] = &[
    // sequencer on, listen off, standby
    (REG_OPMODE, 0x04),
    // packet mode, FSK, no shaping
    (REG_DATAMODUL, 0x00),
    // 19.2 kbps
    (REG_BITRATEMSB, 0x06),
    (REG_BITRATELSB, 0x83),
    // 25 kHz deviation
    (REG_FDEVMSB, 0x01),
    (REG_FDEVLSB, 0x9A),
    // 915 MHz
    (REG_FRFMSB, 0xE4),
    (REG_FRFMID, 0xC0),
    (REG_FRFLSB, 0x00),
    // DCC 4%, mantissa 24, exponent 3
    (REG_RXBW, 0x53),
    (REG_DIOMAPPING1, DIO0_PAYLOAD_READY),
    // ClkOut off
    (REG_DIOMAPPING2, 0x07),
    // resets the FIFO and status flags
    (REG_IRQFLAGS2, 0x10),
    // sync on, fifo fill auto, 2 byte sync word, no tolerance
    (REG_SYNCCONFIG, 0x88),
    (REG_SYNCVALUE1, 0x2D),
    // variable length, no DC-free, CRC on, CRC auto clear, no address filter
    (REG_PACKETCONFIG1, 0x90),
    (REG_PAYLOADLENGTH, MAX_DATA_LEN as u8),
    // TX starts on FIFO not empty
    (REG_FIFOTHRESH, 0x8F),
    // no RX restart delay, auto RX restart, AES off
    (REG_PACKETCONFIG2, 0xF2),
    // continuous DAGC, low beta off
    (REG_TESTDAGC, 0x30),
];

/// Edge of the interrupt line that signals a DIO0 event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Edge {
    /// Low to high. DIO0 is active high on stock modules.
    #[default]
    Rising,
    /// High to low, for boards that invert the line.
    Falling,
}

/// Runtime configuration of one radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RadioConfig {
    /// Address of this node. `255` is reserved for broadcast.
    pub node_id: u8,
    /// Network discriminator programmed into the sync word.
    pub network_id: u8,
    /// Whether the module is a high power (HW/HCW) variant with PA_BOOST.
    pub high_power: bool,
    /// AES key, either empty (encryption off) or exactly 16 bytes.
    pub encryption_key: Vec<u8>,
    /// Carrier-sense floor in dBm.
    pub csma_limit: i16,
    /// PA output power, 0 to 31.
    pub power_level: u8,
    /// Bound on each mode-ready poll.
    pub mode_ready_timeout: Duration,
    /// Bound on waiting for the packet-sent interrupt.
    pub tx_timeout: Duration,
    /// Edge of the interrupt line to listen for.
    pub irq_edge: Edge,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            network_id: 100,
            high_power: true,
            encryption_key: Vec::new(),
            csma_limit: CSMA_LIMIT,
            power_level: MAX_POWER_LEVEL,
            mode_ready_timeout: MODE_READY_TIMEOUT,
            tx_timeout: TX_TIMEOUT,
            irq_edge: Edge::Rising,
        }
    }
}

impl RadioConfig {
    /// Creates a configuration for `node_id` on `network_id`, everything
    /// else at its default.
    pub fn new(node_id: u8, network_id: u8) -> Self {
        Self {
            node_id,
            network_id,
            ..Self::default()
        }
    }
}
