//! Register map of the RFM69 transceiver.
//!
//! Only the registers the driver touches are listed. Addresses are the raw
//! 7-bit values; the bus encoding (bit 7 set for writes) is applied by the
//! controller.
//!
//! Status and control registers whose bits are inspected individually are
//! exposed as [`bitflags`] types so that callers never juggle raw masks.

use bitflags::bitflags;

/// FIFO read/write access
pub const REG_FIFO: u8 = 0x00;
/// Operating mode and sequencer control
pub const REG_OPMODE: u8 = 0x01;
/// Data processing mode and modulation scheme
pub const REG_DATAMODUL: u8 = 0x02;
/// Bit rate setting (MSB)
pub const REG_BITRATEMSB: u8 = 0x03;
/// Bit rate setting (LSB)
pub const REG_BITRATELSB: u8 = 0x04;
/// Frequency deviation (MSB)
pub const REG_FDEVMSB: u8 = 0x05;
/// Frequency deviation (LSB)
pub const REG_FDEVLSB: u8 = 0x06;
/// RF carrier frequency (MSB)
pub const REG_FRFMSB: u8 = 0x07;
/// RF carrier frequency (MID)
pub const REG_FRFMID: u8 = 0x08;
/// RF carrier frequency (LSB)
pub const REG_FRFLSB: u8 = 0x09;
/// PA selection and output power
pub const REG_PALEVEL: u8 = 0x11;
/// Over current protection
pub const REG_OCP: u8 = 0x13;
/// Channel filter bandwidth
pub const REG_RXBW: u8 = 0x19;
/// RSSI trigger and status
pub const REG_RSSICONFIG: u8 = 0x23;
/// Last RSSI measurement, in -0.5 dBm steps
pub const REG_RSSIVALUE: u8 = 0x24;
/// Mapping of pins DIO0 to DIO3
pub const REG_DIOMAPPING1: u8 = 0x25;
/// Mapping of pins DIO4, DIO5 and ClkOut
pub const REG_DIOMAPPING2: u8 = 0x26;
/// Mode and synthesizer status
pub const REG_IRQFLAGS1: u8 = 0x27;
/// FIFO and packet status
pub const REG_IRQFLAGS2: u8 = 0x28;
/// Sync word recognition control
pub const REG_SYNCCONFIG: u8 = 0x2E;
/// Sync word byte 1, doubles as the bus probe scratch register
pub const REG_SYNCVALUE1: u8 = 0x2F;
/// Sync word byte 2, carries the network id
pub const REG_SYNCVALUE2: u8 = 0x30;
/// Packet format, CRC and address filtering
pub const REG_PACKETCONFIG1: u8 = 0x37;
/// Maximum payload length in variable length mode
pub const REG_PAYLOADLENGTH: u8 = 0x38;
/// Node address used by hardware address filtering
pub const REG_NODEADRS: u8 = 0x39;
/// FIFO threshold and TX start condition
pub const REG_FIFOTHRESH: u8 = 0x3C;
/// RX restart and AES control
pub const REG_PACKETCONFIG2: u8 = 0x3D;
/// First of the sixteen AES key registers
pub const REG_AESKEY1: u8 = 0x3E;
/// High power PA test register 1
pub const REG_TESTPA1: u8 = 0x5A;
/// High power PA test register 2
pub const REG_TESTPA2: u8 = 0x5C;
/// Fading margin improvement
pub const REG_TESTDAGC: u8 = 0x6F;

/// Mask of the mode field inside [`REG_OPMODE`].
pub const OPMODE_MODE_MASK: u8 = 0x1C;

/// [`REG_OCP`] value enabling over current protection at 95 mA.
pub const OCP_ON: u8 = 0x1A;
/// [`REG_OCP`] value disabling over current protection.
pub const OCP_OFF: u8 = 0x0F;

/// DIO0 mapping while transmitting: PacketSent.
pub const DIO0_PACKET_SENT: u8 = 0x00;
/// DIO0 mapping while receiving: PayloadReady.
pub const DIO0_PAYLOAD_READY: u8 = 0x40;

/// [`REG_TESTPA1`] value for normal operation.
pub const TESTPA1_NORMAL: u8 = 0x55;
/// [`REG_TESTPA1`] value for +20 dBm operation.
pub const TESTPA1_BOOST: u8 = 0x5D;
/// [`REG_TESTPA2`] value for normal operation.
pub const TESTPA2_NORMAL: u8 = 0x70;
/// [`REG_TESTPA2`] value for +20 dBm operation.
pub const TESTPA2_BOOST: u8 = 0x7C;

/// Mask of the output power field inside [`REG_PALEVEL`].
pub const PALEVEL_POWER_MASK: u8 = 0x1F;

bitflags! {
    /// [`REG_IRQFLAGS1`] status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags1: u8 {
        /// Operating mode transition finished
        const MODE_READY = 0x80;
        /// Receiver ready
        const RX_READY = 0x40;
        /// Transmitter ready
        const TX_READY = 0x20;
        /// PLL locked
        const PLL_LOCK = 0x10;
        /// RSSI exceeded threshold
        const RSSI = 0x08;
        /// RX timeout elapsed
        const TIMEOUT = 0x04;
        /// Auto mode intermediate state entered
        const AUTO_MODE = 0x02;
        /// Sync word (and address, if enabled) matched
        const SYNC_ADDRESS_MATCH = 0x01;
    }
}

bitflags! {
    /// [`REG_IRQFLAGS2`] status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IrqFlags2: u8 {
        /// FIFO full
        const FIFO_FULL = 0x80;
        /// FIFO holds at least one byte
        const FIFO_NOT_EMPTY = 0x40;
        /// FIFO level above threshold
        const FIFO_LEVEL = 0x20;
        /// FIFO overrun; writing it clears the FIFO
        const FIFO_OVERRUN = 0x10;
        /// Packet fully transmitted
        const PACKET_SENT = 0x08;
        /// Payload received and CRC checked
        const PAYLOAD_READY = 0x04;
        /// CRC of the received payload is valid
        const CRC_OK = 0x02;
    }
}

bitflags! {
    /// [`REG_PALEVEL`] amplifier enable bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PaLevel: u8 {
        /// PA0 on (RFIO pin)
        const PA0_ON = 0x80;
        /// PA1 on (PA_BOOST pin)
        const PA1_ON = 0x40;
        /// PA2 on (PA_BOOST pin)
        const PA2_ON = 0x20;
    }
}

bitflags! {
    /// [`REG_PACKETCONFIG2`] control bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketConfig2: u8 {
        /// Force the receiver back into wait mode
        const RX_RESTART = 0x04;
        /// Restart the receiver automatically after a payload is read
        const AUTO_RX_RESTART = 0x02;
        /// AES encryption and decryption enabled
        const AES_ON = 0x01;
    }
}

bitflags! {
    /// [`REG_RSSICONFIG`] trigger and status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RssiConfig: u8 {
        /// Measurement finished
        const DONE = 0x02;
        /// Start a measurement
        const START = 0x01;
    }
}
