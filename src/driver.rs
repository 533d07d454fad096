//! RFM69 device controller.
//!
//! This module provides the [`Rfm69`] struct, which owns the bus to one
//! transceiver and everything that follows from it: the cached operating
//! mode, register access, FIFO framing, RSSI sampling, AES key programming
//! and PA management for high power modules.
//!
//! ## Bus protocol
//!
//! Every operation is a single full-duplex transaction of equal-length
//! buffers:
//!
//! - register write: `[addr | 0x80, value]`
//! - register read: `[addr & 0x7F, 0x00]`, value returned at offset 1
//! - FIFO write and read: see [`crate::packet`]
//!
//! ## Timing
//!
//! Register access is synchronous. Operations that wait on the chip (mode
//! ready, RSSI done, the bus probe at setup) are `async` and race a deadline
//! taken from [`RadioConfig::mode_ready_timeout`], so a wedged module
//! surfaces as an error instead of a hang.
//!
//! ## Ownership
//!
//! All methods take `&mut self`. Whoever owns the `Rfm69` is the only party
//! able to touch the bus; the [`Router`](crate::router::Router) takes it by
//! value and keeps it inside its event loop.

use embedded_hal::digital::OutputPin;
use embedded_hal::spi::SpiDevice;
use log::{debug, info, trace, warn};
use tokio::time;

use crate::config::{RadioConfig, SETUP_TABLE};
use crate::consts::{
    AES_KEY_LEN, BROADCAST_ADDRESS, MAX_FRAME_LEN, MAX_POWER_LEVEL, PROBE_VALUES,
    STATUS_POLL_INTERVAL,
};
use crate::error::{Error, Result};
use crate::mode::{Mode, RegisterWrite};
use crate::packet::{FrameHeader, Packet, encode_frame};
use crate::registers::*;

/// Controller for one RFM69 transceiver.
///
/// ## Type Parameters
///
/// - `SPI`: A type implementing [`embedded_hal::spi::SpiDevice`], configured
///   for 10 MHz, mode 0, 8 bit words (see [`crate::consts::SPI_MODE`]).
///
/// ## Example
///
/// ```no_run
/// # async fn demo<SPI: embedded_hal::spi::SpiDevice>(spi: SPI) -> rfm69::Result<()> {
/// use rfm69::{Mode, RadioConfig, Rfm69};
///
/// let mut radio = Rfm69::new(spi, RadioConfig::new(1, 100));
/// radio.setup().await?;
/// radio.set_power_level(20)?;
/// radio.set_mode(Mode::Receiver).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Rfm69<SPI> {
    spi: SPI,
    mode: Mode,
    config: RadioConfig,
}

impl<SPI> Rfm69<SPI> {
    /// Wraps `spi`. No bus traffic happens until [`setup`](Rfm69::setup).
    ///
    /// The cached mode starts at [`Mode::Sleep`], the power-on state of the
    /// chip, so the first transition waits for the oscillator.
    pub fn new(spi: SPI, mut config: RadioConfig) -> Self {
        config.power_level = config.power_level.min(MAX_POWER_LEVEL);
        Self {
            spi,
            mode: Mode::Sleep,
            config,
        }
    }

    /// The cached operating mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The configuration currently programmed.
    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    /// Consumes the controller and hands back the bus.
    pub fn release(self) -> SPI {
        self.spi
    }
}

impl<SPI> Rfm69<SPI>
where
    SPI: SpiDevice,
{
    /// Brings the transceiver into a known state.
    ///
    /// # Behavior
    /// - Probes the bus by writing [`PROBE_VALUES`] to the scratch register
    ///   until each reads back
    /// - Applies [`SETUP_TABLE`]
    /// - Programs the network id into the sync word
    /// - Disables AES
    /// - Applies the PA settings for the module variant
    /// - Enters [`Mode::Standby`] and waits for mode-ready
    ///
    /// # Errors
    /// - [`Error::NoDevice`] if the probe never reads back
    /// - [`Error::ModeReadyTimeout`] if standby is never reported
    /// - [`Error::Bus`] on any bus failure
    pub async fn setup(&mut self) -> Result<()> {
        info!("probing transceiver");
        self.probe().await?;

        for &(reg, value) in SETUP_TABLE {
            self.write_reg(reg, value)?;
        }
        self.set_network(self.config.network_id)?;
        self.encrypt(&[])?;
        self.set_high_power(self.config.high_power)?;
        self.set_mode(Mode::Standby).await?;
        self.wait_for_mode().await?;
        info!(
            "transceiver ready: node {} network {}",
            self.config.node_id, self.config.network_id
        );
        Ok(())
    }

    async fn probe(&mut self) -> Result<()> {
        let budget = self.config.mode_ready_timeout;
        let probe = async {
            for value in PROBE_VALUES {
                while self.read_reg(REG_SYNCVALUE1)? != value {
                    self.write_reg(REG_SYNCVALUE1, value)?;
                    time::sleep(STATUS_POLL_INTERVAL).await;
                }
            }
            Ok::<(), Error>(())
        };
        time::timeout(budget, probe)
            .await
            .map_err(|_| Error::NoDevice)?
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> Result<()> {
        self.spi.transfer(rx, tx).map_err(Error::bus)
    }

    fn write_bytes(&mut self, tx: &[u8]) -> Result<()> {
        let mut rx = [0u8; MAX_FRAME_LEN];
        let len = tx.len().min(MAX_FRAME_LEN);
        self.transfer(&tx[..len], &mut rx[..len])
    }

    /// Reads one register.
    pub fn read_reg(&mut self, addr: u8) -> Result<u8> {
        let mut rx = [0u8; 2];
        self.transfer(&[addr & 0x7F, 0x00], &mut rx)?;
        trace!("read {:#04x}: {:#04x}", addr, rx[1]);
        Ok(rx[1])
    }

    /// Writes one register.
    pub fn write_reg(&mut self, addr: u8, value: u8) -> Result<()> {
        trace!("write {:#04x}: {:#04x}", addr, value);
        self.write_bytes(&[addr | 0x80, value])
    }

    /// Read-modify-write: stores `(current & keep) | set`.
    pub fn modify_reg(&mut self, addr: u8, keep: u8, set: u8) -> Result<()> {
        let current = self.read_reg(addr)?;
        self.write_reg(addr, (current & keep) | set)
    }

    fn apply(&mut self, write: RegisterWrite) -> Result<()> {
        match write {
            RegisterWrite::Write { reg, value } => self.write_reg(reg, value),
            RegisterWrite::Modify { reg, keep, set } => self.modify_reg(reg, keep, set),
        }
    }

    /// Switches the operating mode.
    ///
    /// Does nothing, and issues no bus traffic, when `mode` is already the
    /// cached mode. See [`Mode::transition`] for the writes performed
    /// otherwise. The cached mode only changes once every write succeeded.
    pub async fn set_mode(&mut self, mode: Mode) -> Result<()> {
        let Some(transition) = self.mode.transition(mode, self.config.high_power) else {
            return Ok(());
        };
        for write in transition.writes.iter().copied() {
            self.apply(write)?;
        }
        if transition.await_ready {
            self.wait_for_mode().await?;
        }
        debug!("mode {:?} -> {:?}", self.mode, transition.to);
        self.mode = transition.to;
        Ok(())
    }

    /// Switches to `mode`, then blocks until the chip reports mode-ready.
    ///
    /// Used with [`Mode::Standby`] before any FIFO access.
    pub async fn set_mode_and_wait(&mut self, mode: Mode) -> Result<()> {
        self.set_mode(mode).await?;
        self.wait_for_mode().await
    }

    /// Polls the mode-ready flag until it is set or the budget runs out.
    pub async fn wait_for_mode(&mut self) -> Result<()> {
        let budget = self.config.mode_ready_timeout;
        match time::timeout(
            budget,
            self.poll_flag(REG_IRQFLAGS1, IrqFlags1::MODE_READY.bits()),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("mode ready not reported within {:?}", budget);
                Err(Error::ModeReadyTimeout)
            }
        }
    }

    async fn poll_flag(&mut self, reg: u8, mask: u8) -> Result<()> {
        loop {
            if self.read_reg(reg)? & mask != 0 {
                return Ok(());
            }
            time::sleep(STATUS_POLL_INTERVAL).await;
        }
    }

    /// Programs the AES key.
    ///
    /// - 16 bytes: writes the key and enables AES
    /// - empty: disables AES
    ///
    /// # Errors
    /// [`Error::InvalidKeyLength`] for any other length, before touching
    /// the bus.
    pub fn encrypt(&mut self, key: &[u8]) -> Result<()> {
        let enable = match key.len() {
            0 => false,
            AES_KEY_LEN => {
                let mut tx = [0u8; AES_KEY_LEN + 1];
                tx[0] = REG_AESKEY1 | 0x80;
                tx[1..].copy_from_slice(key);
                self.write_bytes(&tx)?;
                true
            }
            len => return Err(Error::InvalidKeyLength(len)),
        };
        let set = if enable {
            PacketConfig2::AES_ON.bits()
        } else {
            0
        };
        debug!("AES {}", if enable { "on" } else { "off" });
        self.modify_reg(REG_PACKETCONFIG2, !PacketConfig2::AES_ON.bits(), set)
    }

    /// Selects the PA configuration for a high power module (`true`:
    /// PA1 and PA2 on PA_BOOST, over current protection off) or a standard
    /// module (`false`: PA0 at the configured power level).
    pub fn set_high_power(&mut self, high_power: bool) -> Result<()> {
        self.config.high_power = high_power;
        self.write_reg(REG_OCP, if high_power { OCP_OFF } else { OCP_ON })?;
        if high_power {
            self.modify_reg(
                REG_PALEVEL,
                PALEVEL_POWER_MASK,
                (PaLevel::PA1_ON | PaLevel::PA2_ON).bits(),
            )
        } else {
            self.write_reg(
                REG_PALEVEL,
                PaLevel::PA0_ON.bits() | self.config.power_level,
            )
        }
    }

    /// Sets the output power, clamped to `0..=31`. The PA enable bits are
    /// left untouched.
    pub fn set_power_level(&mut self, level: u8) -> Result<()> {
        self.config.power_level = level.min(MAX_POWER_LEVEL);
        self.modify_reg(
            REG_PALEVEL,
            !PALEVEL_POWER_MASK,
            self.config.power_level,
        )
    }

    /// Changes the network id carried in the sync word.
    pub fn set_network(&mut self, network_id: u8) -> Result<()> {
        self.config.network_id = network_id;
        self.write_reg(REG_SYNCVALUE2, network_id)
    }

    /// Changes the node address of this radio.
    ///
    /// # Errors
    /// [`Error::InvalidNodeId`] for the broadcast address, before any bus
    /// traffic.
    pub fn set_address(&mut self, node_id: u8) -> Result<()> {
        if node_id == BROADCAST_ADDRESS {
            return Err(Error::InvalidNodeId(node_id));
        }
        self.config.node_id = node_id;
        self.write_reg(REG_NODEADRS, node_id)
    }

    /// Carrier sense.
    ///
    /// In [`Mode::Receiver`], samples the RSSI; a reading weaker than
    /// [`RadioConfig::csma_limit`] moves the radio to standby and reports
    /// the channel clear. Anything else reports it busy.
    pub async fn can_send(&mut self) -> Result<bool> {
        if self.mode == Mode::Receiver {
            let rssi = self.read_rssi(false).await?;
            if rssi < self.config.csma_limit {
                self.set_mode(Mode::Standby).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Reads the signal strength in dBm.
    ///
    /// With `force_trigger` a fresh measurement is started and awaited
    /// first; in continuous DAGC the last value is already current.
    pub async fn read_rssi(&mut self, force_trigger: bool) -> Result<i16> {
        if force_trigger {
            self.write_reg(REG_RSSICONFIG, RssiConfig::START.bits())?;
            let budget = self.config.mode_ready_timeout;
            time::timeout(
                budget,
                self.poll_flag(REG_RSSICONFIG, RssiConfig::DONE.bits()),
            )
            .await
            .map_err(|_| Error::RssiTimeout)??;
        }
        let raw = self.read_reg(REG_RSSIVALUE)?;
        Ok(-i16::from(raw) / 2)
    }

    /// Reads [`REG_IRQFLAGS2`].
    pub fn irq_flags2(&mut self) -> Result<IrqFlags2> {
        Ok(IrqFlags2::from_bits_truncate(self.read_reg(REG_IRQFLAGS2)?))
    }

    /// Routes DIO0 to the given event ([`DIO0_PACKET_SENT`] or
    /// [`DIO0_PAYLOAD_READY`]).
    pub fn map_dio0(&mut self, mapping: u8) -> Result<()> {
        self.write_reg(REG_DIOMAPPING1, mapping)
    }

    /// Forces the receiver to restart, which also unlocks a FIFO that
    /// would otherwise stay blocked on a half-received frame.
    pub fn restart_rx(&mut self) -> Result<()> {
        self.modify_reg(
            REG_PACKETCONFIG2,
            !PacketConfig2::RX_RESTART.bits(),
            PacketConfig2::RX_RESTART.bits(),
        )
    }

    /// Loads `packet` into the FIFO in a single transaction, stamped with
    /// this node's address. Payload beyond 66 bytes is dropped.
    pub fn write_fifo(&mut self, packet: &Packet) -> Result<()> {
        let frame = encode_frame(packet, self.config.node_id);
        trace!("fifo write {:02x?}", frame.as_slice());
        self.write_bytes(&frame)
    }

    /// Drains one frame from the FIFO.
    ///
    /// The RSSI is sampled first so it belongs to the frame being read. A
    /// three byte probe yields the length and destination, then the body
    /// read yields source, flags and payload.
    pub async fn read_fifo(&mut self) -> Result<Packet> {
        let rssi = self.read_rssi(false).await?;

        let mut probe = [0u8; 3];
        self.transfer(&[REG_FIFO & 0x7F, 0, 0], &mut probe)?;
        let header = FrameHeader::parse(&probe);

        let len = header.body_len();
        let mut tx = [0u8; MAX_FRAME_LEN];
        tx[0] = REG_FIFO & 0x7F;
        let mut body = [0u8; MAX_FRAME_LEN];
        self.transfer(&tx[..len], &mut body[..len])?;
        trace!("fifo read {:02x?}", &body[..len]);

        Ok(header.decode_body(&body[..len], rssi))
    }
}

/// Pulses the reset line of the module: high for 100 µs, then low and a
/// 5 ms settle before the chip answers on the bus.
pub async fn reset<P: OutputPin>(pin: &mut P) -> Result<()> {
    pin.set_high().map_err(Error::pin)?;
    time::sleep(core::time::Duration::from_micros(100)).await;
    pin.set_low().map_err(Error::pin)?;
    time::sleep(core::time::Duration::from_millis(5)).await;
    Ok(())
}
