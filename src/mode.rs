//! Operating modes and the register writes needed to move between them.
//!
//! [`Mode::transition`] is a pure function: it inspects the cached mode, the
//! requested mode and the module variant, and returns the [`Transition`] the
//! controller has to perform. This keeps the side effects of a mode change
//! (PA test registers on high power modules, the oscillator settle wait when
//! leaving sleep) testable without a bus.

use heapless::Vec;

use crate::registers::{
    OPMODE_MODE_MASK, REG_OPMODE, REG_TESTPA1, REG_TESTPA2, TESTPA1_BOOST, TESTPA1_NORMAL,
    TESTPA2_BOOST, TESTPA2_NORMAL,
};

/// Transceiver operating mode.
#[derive(PartialEq, Eq, Clone, Copy, Default, Debug)]
#[cfg_attr(feature = "defmt-0-3", derive(defmt::Format))]
pub enum Mode {
    /// Oscillator off, lowest consumption. Leaving it needs a settle wait.
    #[default]
    Sleep,
    /// Oscillator on, ready for configuration and FIFO access.
    Standby,
    /// Listening for packets.
    Receiver,
    /// Sending the FIFO content.
    Transmitter,
}

impl Mode {
    /// Value of the mode field inside `REG_OPMODE`.
    pub const fn bits(self) -> u8 {
        match self {
            Mode::Sleep => 0x00,
            Mode::Standby => 0x04,
            Mode::Transmitter => 0x0C,
            Mode::Receiver => 0x10,
        }
    }

    /// Plans the move from `self` to `to`.
    ///
    /// Returns `None` when the mode does not change; no bus traffic is
    /// needed then.
    pub fn transition(self, to: Mode, high_power: bool) -> Option<Transition> {
        if self == to {
            return None;
        }

        let mut writes = Vec::new();
        let _ = writes.push(RegisterWrite::Modify {
            reg: REG_OPMODE,
            keep: !OPMODE_MODE_MASK,
            set: to.bits(),
        });

        if high_power && matches!(to, Mode::Receiver | Mode::Transmitter) {
            let boost = to == Mode::Transmitter;
            let (pa1, pa2) = if boost {
                (TESTPA1_BOOST, TESTPA2_BOOST)
            } else {
                (TESTPA1_NORMAL, TESTPA2_NORMAL)
            };
            let _ = writes.push(RegisterWrite::Write {
                reg: REG_TESTPA1,
                value: pa1,
            });
            let _ = writes.push(RegisterWrite::Write {
                reg: REG_TESTPA2,
                value: pa2,
            });
        }

        Some(Transition {
            to,
            writes,
            await_ready: self == Mode::Sleep,
        })
    }
}

/// One register operation of a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWrite {
    /// Plain write of `value`.
    Write {
        /// Register address
        reg: u8,
        /// Value to write
        value: u8,
    },
    /// Read-modify-write: `(current & keep) | set`.
    Modify {
        /// Register address
        reg: u8,
        /// Bits of the current value to preserve
        keep: u8,
        /// Bits to set
        set: u8,
    },
}

/// The work required to enter a new mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    /// Mode entered once the writes succeed.
    pub to: Mode,
    /// Register operations, in order.
    pub writes: Vec<RegisterWrite, 3>,
    /// Whether the controller must wait for mode-ready afterwards.
    pub await_ready: bool,
}
