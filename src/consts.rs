//! Constants used across the link layer.
//!
//! This module defines the protocol-wide limits, addressing conventions,
//! bus parameters and timing budgets shared by the device controller and
//! the router.
//!
//! ## Key Concepts
//!
//! - **Payload Limits**: The transceiver FIFO is 66 bytes deep; the payload
//!   is capped so that a whole frame always fits.
//! - **Addressing**: One byte per node, with `255` reserved for broadcast.
//! - **Timing**: Acknowledgement and data budgets used by the request
//!   presets, plus the bound on every mode-ready poll.

use core::time::Duration;

use embedded_hal::spi::{MODE_0, Mode};

/// Maximum size (in bytes) of user payload carried by a single packet.
pub const MAX_DATA_LEN: usize = 66;

/// Length (in bytes) of the frame header that follows the length byte:
/// destination, source and flags.
pub const HEADER_LEN: usize = 3;

/// Maximum length of a FIFO write transaction:
/// opcode, length byte, header and payload.
pub const MAX_FRAME_LEN: usize = MAX_DATA_LEN + HEADER_LEN + 2;

/// Length of an AES-128 key.
pub const AES_KEY_LEN: usize = 16;

/// The broadcast address. Packets sent here are accepted by every node
/// on the network and are never acknowledged.
pub const BROADCAST_ADDRESS: u8 = u8::MAX;

/// Default carrier-sense floor in dBm. A channel reading weaker than this
/// is considered clear.
pub const CSMA_LIMIT: i16 = -80;

/// Highest value accepted by the PA output power field.
pub const MAX_POWER_LEVEL: u8 = 31;

/// Capacity of the outbound packet queue between callers and the radio loop.
pub const TX_QUEUE_CAPACITY: usize = 5;

/// Capacity of the loop-local queue of pending acknowledgement replies.
pub const ACK_QUEUE_CAPACITY: usize = 4;

/// Number of transmissions attempted before an acknowledged send gives up.
pub const ACK_RETRIES: u8 = 3;

/// How long a single attempt waits for its acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(40);

/// How long a `get` waits for the data reply once acknowledged.
pub const DATA_TIMEOUT: Duration = Duration::from_millis(3000);

/// Upper bound on any mode-ready (or RSSI-done) poll.
pub const MODE_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between two polls of a status flag that was not yet set.
pub const STATUS_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on waiting for the packet-sent interrupt.
pub const TX_TIMEOUT: Duration = Duration::from_secs(1);

/// Bus clock the transceiver is specified for.
pub const SPI_FREQUENCY_HZ: u32 = 10_000_000;

/// Bus mode: clock idle low, data captured on the first edge.
pub const SPI_MODE: Mode = MODE_0;

/// Word size on the bus.
pub const SPI_BITS_PER_WORD: u8 = 8;

/// The two values written to the scratch register while probing the bus.
pub const PROBE_VALUES: [u8; 2] = [0xAA, 0x55];
