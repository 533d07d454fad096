//! Error type shared by the controller and the router.
//!
//! Bus and pin failures are captured through their embedded-hal
//! [`ErrorKind`](embedded_hal::spi::ErrorKind) so the error stays
//! non-generic and cheap to copy between tasks.

use embedded_hal::{digital, spi};
use thiserror::Error;

/// Errors reported by the driver and the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A bus transaction failed.
    #[error("bus transaction failed: {0:?}")]
    Bus(spi::ErrorKind),
    /// The interrupt or reset line failed.
    #[error("pin operation failed: {0:?}")]
    Pin(digital::ErrorKind),
    /// The scratch register never read back the probe value.
    #[error("no transceiver answered on the bus")]
    NoDevice,
    /// The mode-ready flag did not appear within the budget.
    #[error("timed out waiting for mode ready")]
    ModeReadyTimeout,
    /// An RSSI measurement did not finish within the budget.
    #[error("timed out waiting for an RSSI measurement")]
    RssiTimeout,
    /// The packet-sent interrupt did not arrive within the budget.
    #[error("timed out waiting for the packet to be sent")]
    TxTimeout,
    /// An encryption key was neither empty nor 16 bytes long.
    #[error("invalid encryption key length {0}, expected 0 or 16")]
    InvalidKeyLength(usize),
    /// The broadcast address cannot be a node's own address.
    #[error("node id {0} is reserved for broadcast")]
    InvalidNodeId(u8),
    /// Every attempt of an acknowledged send went unanswered.
    #[error("no ack response")]
    NoAckResponse,
    /// The peer answered an ack request with a payload.
    #[error("invalid ack")]
    InvalidAck,
    /// The peer acknowledged but never sent the requested data.
    #[error("no data response")]
    NoDataResponse,
    /// A newer request to the same node took over the response slot.
    #[error("request superseded by a newer request to node {0}")]
    Superseded(u8),
    /// The radio loop is gone, or the bus was already released.
    #[error("radio loop closed")]
    Closed,
    /// `run` was called while the loop was already running.
    #[error("radio loop already running")]
    AlreadyRunning,
}

impl Error {
    pub(crate) fn bus<E: spi::Error>(err: E) -> Self {
        Error::Bus(err.kind())
    }

    pub(crate) fn pin<E: digital::Error>(err: E) -> Self {
        Error::Pin(err.kind())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
