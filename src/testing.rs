//! Simulated transceiver for tests.
//!
//! [`FakeChip`] models just enough of the RFM69 to drive the controller and
//! the radio loop end to end: a register file, the FIFO, mode-ready and
//! RSSI status, packet-sent and payload-ready flags, and DIO0 edges. Frames
//! written to the FIFO are recorded when the transmitter is entered; frames
//! queued with [`FakeChip::inject`] or produced by a responder are delivered
//! whenever the receiver is listening with an empty FIFO.

use core::fmt;
use core::future::Future;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::digital;
use embedded_hal::spi::{self, Operation, SpiDevice};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::Edge;
use crate::irq::InterruptLine;
use crate::registers::*;

const MODE_TX: u8 = 0x0C;
const MODE_RX: u8 = 0x10;

type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Builds a frame as it sits in the FIFO: `[len, to, from, flags, payload]`.
pub fn frame(to: u8, from: u8, flags: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![(payload.len() + 3) as u8, to, from, flags];
    frame.extend_from_slice(payload);
    frame
}

struct Chip {
    regs: [u8; 0x80],
    fifo: VecDeque<u8>,
    staged: Option<Vec<u8>>,
    pending: VecDeque<Vec<u8>>,
    sent: Vec<(Instant, Vec<u8>)>,
    responder: Option<Responder>,
    packet_sent: bool,
    packet_sent_stuck: bool,
    mode_ready: bool,
    unplugged: bool,
    bus_failing: bool,
    pulled_up: bool,
    edges: mpsc::UnboundedSender<bool>,
}

impl Chip {
    fn mode(&self) -> u8 {
        self.regs[REG_OPMODE as usize] & OPMODE_MODE_MASK
    }

    fn fire(&self) {
        let _ = self.edges.send(true);
    }

    fn load_next(&mut self) {
        if self.mode() != MODE_RX || !self.fifo.is_empty() {
            return;
        }
        if let Some(next) = self.pending.pop_front() {
            self.fifo.extend(next);
            self.fire();
        }
    }

    fn read(&mut self, reg: u8) -> u8 {
        match reg {
            REG_FIFO => {
                let byte = self.fifo.pop_front().unwrap_or(0);
                if self.fifo.is_empty() {
                    self.load_next();
                }
                byte
            }
            REG_IRQFLAGS1 => {
                if self.mode_ready {
                    IrqFlags1::MODE_READY.bits()
                } else {
                    0
                }
            }
            REG_IRQFLAGS2 => {
                let mut flags = IrqFlags2::empty();
                if !self.fifo.is_empty() {
                    flags |= IrqFlags2::PAYLOAD_READY | IrqFlags2::FIFO_NOT_EMPTY;
                }
                if self.packet_sent {
                    flags |= IrqFlags2::PACKET_SENT;
                }
                flags.bits()
            }
            REG_RSSICONFIG => self.regs[reg as usize] | RssiConfig::DONE.bits(),
            _ => self.regs[reg as usize & 0x7F],
        }
    }

    fn write(&mut self, reg: u8, value: u8) {
        self.regs[reg as usize & 0x7F] = value;
        if reg != REG_OPMODE {
            return;
        }
        self.packet_sent = false;
        match self.mode() {
            MODE_TX => {
                if let Some(frame) = self.staged.take() {
                    self.sent.push((Instant::now(), frame.clone()));
                    if !self.packet_sent_stuck {
                        self.packet_sent = true;
                        self.fire();
                    }
                    if let Some(responder) = self.responder.as_mut() {
                        self.pending.extend(responder(&frame));
                    }
                }
            }
            MODE_RX => self.load_next(),
            _ => {}
        }
    }

    fn exchange(&mut self, rx: &mut [u8], tx: &[u8]) -> Result<(), FakeBusError> {
        if self.bus_failing {
            return Err(FakeBusError);
        }
        rx.fill(0);
        if self.unplugged || tx.is_empty() {
            return Ok(());
        }
        let addr = tx[0];
        let reg = addr & 0x7F;
        if addr & 0x80 != 0 {
            if reg == REG_FIFO {
                self.staged = Some(tx[1..].to_vec());
            } else {
                for (i, &value) in tx[1..].iter().enumerate() {
                    self.write(reg + i as u8, value);
                }
            }
        } else {
            for (i, slot) in rx.iter_mut().enumerate().skip(1) {
                let next = if reg == REG_FIFO { reg } else { reg + i as u8 - 1 };
                *slot = self.read(next);
            }
        }
        Ok(())
    }
}

/// Handle on the simulated chip shared by the fake bus and pin.
#[derive(Clone)]
pub struct FakeChip(Arc<Mutex<Chip>>);

impl fmt::Debug for FakeChip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FakeChip")
    }
}

impl FakeChip {
    fn lock(&self) -> MutexGuard<'_, Chip> {
        self.0.lock().unwrap()
    }

    /// Current value of a register.
    pub fn reg(&self, reg: u8) -> u8 {
        self.lock().regs[reg as usize]
    }

    /// Makes the chip ignore writes and read back zero.
    pub fn unplug(&self) {
        self.lock().unplugged = true;
    }

    pub fn set_mode_ready(&self, ready: bool) {
        self.lock().mode_ready = ready;
    }

    /// Makes every subsequent transaction fail.
    pub fn fail_bus(&self, failing: bool) {
        self.lock().bus_failing = failing;
    }

    /// While on, transmitted frames are recorded but PACKET_SENT never
    /// rises and no edge is signalled.
    pub fn suppress_packet_sent(&self, stuck: bool) {
        self.lock().packet_sent_stuck = stuck;
    }

    pub fn pulled_up(&self) -> bool {
        self.lock().pulled_up
    }

    /// Signals one DIO0 edge.
    pub fn fire_edge(&self) {
        self.lock().fire();
    }

    /// Makes the next wait on the interrupt line fail.
    pub fn break_irq(&self) {
        let _ = self.lock().edges.send(false);
    }

    /// Queues a frame for reception.
    pub fn inject(&self, frame: Vec<u8>) {
        let mut chip = self.lock();
        chip.pending.push_back(frame);
        chip.load_next();
    }

    /// Installs a peer that answers every transmitted frame.
    pub fn respond_with<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        self.lock().responder = Some(Box::new(responder));
    }

    /// Every transmitted frame with the instant it went out.
    pub fn sent(&self) -> Vec<(Instant, Vec<u8>)> {
        self.lock().sent.clone()
    }

    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent.iter().map(|(_, f)| f.clone()).collect()
    }
}

/// Bus error reported while [`FakeChip::fail_bus`] is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeBusError;

impl spi::Error for FakeBusError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

/// Bus side of the simulated chip.
#[derive(Debug)]
pub struct FakeSpi(FakeChip);

impl spi::ErrorType for FakeSpi {
    type Error = FakeBusError;
}

impl SpiDevice for FakeSpi {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), FakeBusError> {
        let mut chip = self.0.lock();
        for op in operations {
            match op {
                Operation::Transfer(rx, tx) => chip.exchange(&mut rx[..], &tx[..])?,
                Operation::Write(tx) => {
                    let mut rx = vec![0u8; tx.len()];
                    chip.exchange(&mut rx, &tx[..])?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Pin error reported after [`FakeChip::break_irq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakePinError;

impl digital::Error for FakePinError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

/// DIO0 side of the simulated chip.
#[derive(Debug)]
pub struct FakeIrq {
    chip: FakeChip,
    edges: mpsc::UnboundedReceiver<bool>,
}

impl digital::ErrorType for FakeIrq {
    type Error = FakePinError;
}

impl InterruptLine for FakeIrq {
    fn configure_pull_up(&mut self) -> Result<(), FakePinError> {
        self.chip.lock().pulled_up = true;
        Ok(())
    }

    fn wait_for_edge(
        &mut self,
        _edge: Edge,
    ) -> impl Future<Output = Result<(), FakePinError>> + Send {
        async move {
            match self.edges.recv().await {
                Some(true) => Ok(()),
                Some(false) => Err(FakePinError),
                None => std::future::pending().await,
            }
        }
    }
}

/// A fresh chip in sleep mode with its bus and interrupt line.
pub fn fake_radio() -> (FakeSpi, FakeIrq, FakeChip) {
    let (edges, rx) = mpsc::unbounded_channel();
    let mut regs = [0u8; 0x80];
    regs[REG_RSSIVALUE as usize] = 80;
    let chip = FakeChip(Arc::new(Mutex::new(Chip {
        regs,
        fifo: VecDeque::new(),
        staged: None,
        pending: VecDeque::new(),
        sent: Vec::new(),
        responder: None,
        packet_sent: false,
        packet_sent_stuck: false,
        mode_ready: true,
        unplugged: false,
        bus_failing: false,
        pulled_up: false,
        edges,
    })));
    let irq = FakeIrq {
        chip: chip.clone(),
        edges: rx,
    };
    (FakeSpi(chip.clone()), irq, chip)
}
