//! Link layer: addressing, acknowledgements and request correlation.
//!
//! A [`Router`] owns the [`Rfm69`] controller and the interrupt line. Exactly
//! one task, the one awaiting [`Router::run`], ever touches the bus; every
//! other task talks to it through the router:
//!
//! - [`send`](Router::send), [`send_with_ack`](Router::send_with_ack),
//!   [`get`](Router::get) and [`request`](Router::request) push packets onto a
//!   bounded outbound queue and wait for the reply on a per-node correlator
//! - [`handle`](Router::handle) installs a callback for packets nobody is
//!   waiting for
//! - [`close`](Router::close) stops the loop and hands back the bus
//!
//! ## Example
//!
//! ```no_run
//! # async fn demo<SPI, IRQ>(spi: SPI, irq: IRQ) -> rfm69::Result<()>
//! # where
//! #     SPI: embedded_hal::spi::SpiDevice + Send + 'static,
//! #     IRQ: rfm69::InterruptLine,
//! # {
//! use std::sync::Arc;
//! use rfm69::{RadioConfig, Router};
//!
//! let router = Arc::new(Router::init(spi, irq, RadioConfig::new(1, 100)).await?);
//! router.handle(2, |packet| log::info!("node 2 says {:?}", packet.data));
//!
//! let runner = Arc::clone(&router);
//! let task = tokio::spawn(async move { runner.run().await });
//!
//! let reply = router.get(3, b"temp?").await?;
//! log::info!("node 3 answered {:?}", reply.data);
//!
//! let _spi = router.close().await?;
//! # let _ = task.await;
//! # Ok(())
//! # }
//! ```

use core::fmt;
use core::mem;
use core::sync::atomic::{AtomicU64, Ordering};
use core::time::Duration;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use embedded_hal::spi::SpiDevice;
use heapless::Deque;
use log::{debug, error, info, trace, warn};
use tokio::sync::{mpsc, watch};
use tokio::time;

use crate::config::{Edge, RadioConfig};
use crate::consts::{
    ACK_QUEUE_CAPACITY, ACK_RETRIES, ACK_TIMEOUT, BROADCAST_ADDRESS, DATA_TIMEOUT,
    TX_QUEUE_CAPACITY,
};
use crate::driver::Rfm69;
use crate::error::{Error, Result};
use crate::irq::{InterruptLine, IrqSubscription};
use crate::mode::Mode;
use crate::packet::Packet;
use crate::registers::{DIO0_PACKET_SENT, DIO0_PAYLOAD_READY, IrqFlags2};

/// Callback invoked on the radio loop for unsolicited packets.
pub type Handler = Arc<dyn Fn(Packet) + Send + Sync>;

/// Parameters of [`Router::request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Ask the peer to acknowledge and retry until it does.
    pub ack: bool,
    /// Number of attempts when `ack` is set; at least one is always made.
    pub retries: u8,
    /// How long each attempt waits for its acknowledgement.
    pub ack_timeout: Duration,
    /// Whether a data reply is expected after the acknowledgement.
    pub want_data: bool,
    /// How long to wait for the data reply.
    pub data_timeout: Duration,
}

impl RequestOptions {
    /// Fire and forget.
    pub const SEND: Self = Self {
        ack: false,
        retries: 0,
        ack_timeout: Duration::ZERO,
        want_data: false,
        data_timeout: Duration::ZERO,
    };

    /// Acknowledged delivery, no reply expected.
    pub const SEND_WITH_ACK: Self = Self {
        ack: true,
        retries: ACK_RETRIES,
        ack_timeout: ACK_TIMEOUT,
        want_data: false,
        data_timeout: Duration::ZERO,
    };

    /// Acknowledged delivery followed by a data reply.
    pub const GET: Self = Self {
        ack: true,
        retries: ACK_RETRIES,
        ack_timeout: ACK_TIMEOUT,
        want_data: true,
        data_timeout: DATA_TIMEOUT,
    };
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Correlator {
    id: u64,
    tx: mpsc::Sender<Packet>,
}

/// Where inbound packets go: the pending request of the sender, if any,
/// otherwise the sender's handler.
#[derive(Default)]
struct DispatchTable {
    next_id: AtomicU64,
    correlators: Mutex<HashMap<u8, Correlator>>,
    handlers: Mutex<HashMap<u8, Handler>>,
}

impl DispatchTable {
    /// Installs a fresh correlator for `node`, replacing any previous one.
    fn correlate(self: &Arc<Self>, node: u8) -> (Correlation, mpsc::Receiver<Packet>) {
        let (tx, rx) = mpsc::channel(1);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if lock(&self.correlators)
            .insert(node, Correlator { id, tx })
            .is_some()
        {
            debug!("replacing pending request to node {}", node);
        }
        let correlation = Correlation {
            table: Arc::clone(self),
            node,
            id,
        };
        (correlation, rx)
    }

    /// Hands the packet to the sender's correlator. Gives it back when
    /// nobody is waiting.
    fn correlate_reply(&self, packet: Packet) -> Option<Packet> {
        let correlators = lock(&self.correlators);
        let Some(correlator) = correlators.get(&packet.from) else {
            return Some(packet);
        };
        match correlator.tx.try_send(packet) {
            Ok(()) => None,
            Err(mpsc::error::TrySendError::Full(packet)) => {
                debug!("reply from node {} already pending, dropping", packet.from);
                None
            }
            Err(mpsc::error::TrySendError::Closed(packet)) => Some(packet),
        }
    }

    fn dispatch(&self, packet: Packet) {
        let Some(packet) = self.correlate_reply(packet) else {
            return;
        };
        let handler = lock(&self.handlers).get(&packet.from).cloned();
        match handler {
            Some(handler) => handler(packet),
            None => debug!("no handler for node {}, dropping packet", packet.from),
        }
    }
}

/// Removes its correlator when the request finishes, unless a newer request
/// took the slot over.
struct Correlation {
    table: Arc<DispatchTable>,
    node: u8,
    id: u64,
}

impl Drop for Correlation {
    fn drop(&mut self) {
        let mut correlators = lock(&self.table.correlators);
        if correlators
            .get(&self.node)
            .is_some_and(|correlator| correlator.id == self.id)
        {
            correlators.remove(&self.node);
        }
    }
}

enum Lifecycle<SPI, IRQ> {
    Ready(Box<RadioLoop<SPI, IRQ>>),
    Running,
    Stopped(Rfm69<SPI>),
    Closed,
}

/// Sets the `done` flag however `run` ends, including when its future is
/// dropped.
struct Finished<'a>(&'a watch::Sender<bool>);

impl Drop for Finished<'_> {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// Addressed, acknowledged packet exchange over one RFM69.
///
/// The router is `Send + Sync` and meant to be shared behind an [`Arc`]:
/// one task awaits [`run`](Router::run), any number of others send.
pub struct Router<SPI, IRQ> {
    node_id: u8,
    network_id: u8,
    outbound: mpsc::Sender<Packet>,
    table: Arc<DispatchTable>,
    shutdown: watch::Sender<bool>,
    done: watch::Sender<bool>,
    state: Mutex<Lifecycle<SPI, IRQ>>,
}

impl<SPI, IRQ> fmt::Debug for Router<SPI, IRQ> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("node_id", &self.node_id)
            .field("network_id", &self.network_id)
            .finish_non_exhaustive()
    }
}

impl<SPI, IRQ> Router<SPI, IRQ>
where
    SPI: SpiDevice,
    IRQ: InterruptLine,
{
    /// Sets up the transceiver behind `spi` and prepares the loop.
    ///
    /// Enables the pull-up on `irq`, runs [`Rfm69::setup`] and programs the
    /// encryption key from `config`. The loop does not start until
    /// [`run`](Router::run) is awaited; packets sent before that wait in
    /// the outbound queue.
    ///
    /// # Errors
    /// - [`Error::InvalidNodeId`] if `config.node_id` is the broadcast
    ///   address, before the hardware is touched
    /// - [`Error::InvalidKeyLength`] for a key that is neither empty nor
    ///   16 bytes
    /// - any setup failure
    pub async fn init(spi: SPI, mut irq: IRQ, config: RadioConfig) -> Result<Self> {
        if config.node_id == BROADCAST_ADDRESS {
            return Err(Error::InvalidNodeId(config.node_id));
        }
        irq.configure_pull_up().map_err(Error::pin)?;

        let node_id = config.node_id;
        let network_id = config.network_id;
        let edge = config.irq_edge;
        let tx_timeout = config.tx_timeout;
        let key = config.encryption_key.clone();

        let mut driver = Rfm69::new(spi, config);
        driver.setup().await?;
        driver.encrypt(&key)?;

        let (outbound, queue) = mpsc::channel(TX_QUEUE_CAPACITY);
        let table = Arc::new(DispatchTable::default());
        let radio_loop = RadioLoop {
            driver,
            pin: irq,
            edge,
            queue,
            table: Arc::clone(&table),
            tx_timeout,
        };

        Ok(Self {
            node_id,
            network_id,
            outbound,
            table,
            shutdown: watch::Sender::new(false),
            done: watch::Sender::new(false),
            state: Mutex::new(Lifecycle::Ready(Box::new(radio_loop))),
        })
    }

    /// Address of this node.
    pub fn node_id(&self) -> u8 {
        self.node_id
    }

    /// Network this node is on.
    pub fn network_id(&self) -> u8 {
        self.network_id
    }

    /// Installs the callback for unsolicited packets from `node`, replacing
    /// any previous one.
    ///
    /// The callback runs on the radio loop, so it should return quickly.
    pub fn handle<F>(&self, node: u8, handler: F)
    where
        F: Fn(Packet) + Send + Sync + 'static,
    {
        lock(&self.table.handlers).insert(node, Arc::new(handler));
    }

    /// Runs the radio loop until [`close`](Router::close) is called or the
    /// bus fails.
    ///
    /// The loop owns the controller and the bus while it runs. Dropping or
    /// aborting this future drops both: [`close`](Router::close) then
    /// returns [`Error::Closed`] and the bus is gone. End the loop with
    /// `close` to get the bus back.
    ///
    /// # Errors
    /// - [`Error::AlreadyRunning`] if another task is running the loop
    /// - [`Error::Closed`] if the loop already ran or was dropped
    /// - the bus or pin error that stopped the loop
    pub async fn run(&self) -> Result<()> {
        let radio_loop = {
            let mut state = lock(&self.state);
            match mem::replace(&mut *state, Lifecycle::Running) {
                Lifecycle::Ready(radio_loop) => radio_loop,
                // still Running with `done` set: an earlier run was dropped
                Lifecycle::Running if *self.done.borrow() => return Err(Error::Closed),
                Lifecycle::Running => return Err(Error::AlreadyRunning),
                other => {
                    *state = other;
                    return Err(Error::Closed);
                }
            }
        };
        let _finished = Finished(&self.done);

        let (driver, result) = (*radio_loop).run(self.shutdown.subscribe()).await;
        *lock(&self.state) = Lifecycle::Stopped(driver);
        if let Err(err) = &result {
            error!("radio loop stopped: {}", err);
        }
        result
    }

    /// Stops the loop and returns the bus.
    ///
    /// Waits for a running loop to finish its current operation. The
    /// interrupt watcher is stopped and the radio left in standby.
    /// Requests still waiting for replies run into their own timeouts.
    ///
    /// # Errors
    /// [`Error::Closed`] if the bus was already returned.
    pub async fn close(&self) -> Result<SPI> {
        self.shutdown.send_replace(true);
        let mut done = self.done.subscribe();

        let current = {
            let mut state = lock(&self.state);
            if matches!(*state, Lifecycle::Running) {
                None
            } else {
                Some(mem::replace(&mut *state, Lifecycle::Closed))
            }
        };
        let state = match current {
            Some(state) => state,
            None => {
                let _ = done.wait_for(|done| *done).await;
                mem::replace(&mut *lock(&self.state), Lifecycle::Closed)
            }
        };
        let driver = match state {
            Lifecycle::Ready(radio_loop) => radio_loop.driver,
            Lifecycle::Stopped(driver) => driver,
            Lifecycle::Running | Lifecycle::Closed => return Err(Error::Closed),
        };
        info!("router closed, releasing bus");
        Ok(driver.release())
    }

    /// Sends `payload` to `node` without waiting for anything.
    pub async fn send(&self, node: u8, payload: &[u8]) -> Result<()> {
        self.request(node, payload, &RequestOptions::SEND)
            .await
            .map(drop)
    }

    /// Sends `payload` to `node` and waits for the acknowledgement.
    ///
    /// # Errors
    /// [`Error::NoAckResponse`] after three unanswered attempts 40 ms
    /// apart, [`Error::InvalidAck`] if the acknowledgement carries data.
    pub async fn send_with_ack(&self, node: u8, payload: &[u8]) -> Result<()> {
        self.request(node, payload, &RequestOptions::SEND_WITH_ACK)
            .await
            .map(drop)
    }

    /// Sends `payload` to `node`, waits for the acknowledgement and then
    /// for the data reply.
    ///
    /// # Errors
    /// As [`send_with_ack`](Router::send_with_ack), plus
    /// [`Error::NoDataResponse`] if no reply arrives within 3 s.
    pub async fn get(&self, node: u8, payload: &[u8]) -> Result<Packet> {
        self.request(node, payload, &RequestOptions::GET)
            .await?
            .ok_or(Error::NoDataResponse)
    }

    /// The send primitive behind the presets.
    ///
    /// 1. Installs a correlator for `node`, superseding any pending request
    ///    to the same node.
    /// 2. With `options.ack`, sends up to `options.retries` attempts, each
    ///    waiting `options.ack_timeout` for an empty acknowledgement.
    ///    Without, sends once.
    /// 3. Waits `options.data_timeout` for a further packet from `node`.
    ///
    /// Returns the data reply when `options.want_data` is set and one
    /// arrived, `None` otherwise.
    ///
    /// # Errors
    /// - [`Error::NoAckResponse`] when every attempt went unanswered
    /// - [`Error::InvalidAck`] when the acknowledgement carried data
    /// - [`Error::NoDataResponse`] when data was wanted but none arrived
    /// - [`Error::Superseded`] when a newer request to `node` took over
    /// - [`Error::Closed`] when the loop is gone
    pub async fn request(
        &self,
        node: u8,
        payload: &[u8],
        options: &RequestOptions,
    ) -> Result<Option<Packet>> {
        let (_correlation, mut replies) = self.table.correlate(node);

        if options.ack {
            self.await_ack(node, payload, options, &mut replies).await?;
        } else {
            self.enqueue(Packet::new(node, payload)).await?;
        }

        match time::timeout(options.data_timeout, replies.recv()).await {
            Ok(Some(reply)) => Ok(options.want_data.then_some(reply)),
            Ok(None) => Err(Error::Superseded(node)),
            Err(_) if options.want_data => {
                debug!("no data from node {} within {:?}", node, options.data_timeout);
                Err(Error::NoDataResponse)
            }
            Err(_) => Ok(None),
        }
    }

    async fn await_ack(
        &self,
        node: u8,
        payload: &[u8],
        options: &RequestOptions,
        replies: &mut mpsc::Receiver<Packet>,
    ) -> Result<()> {
        let attempts = options.retries.max(1);
        for attempt in 1..=attempts {
            let mut packet = Packet::new(node, payload);
            packet.request_ack = true;
            self.enqueue(packet).await?;

            match time::timeout(options.ack_timeout, replies.recv()).await {
                Ok(Some(ack)) if ack.data.is_empty() => return Ok(()),
                Ok(Some(ack)) => {
                    warn!(
                        "node {} acknowledged with {} bytes of data",
                        node,
                        ack.data.len()
                    );
                    return Err(Error::InvalidAck);
                }
                Ok(None) => return Err(Error::Superseded(node)),
                Err(_) => debug!("no ack from node {} ({}/{})", node, attempt, attempts),
            }
        }
        Err(Error::NoAckResponse)
    }

    async fn enqueue(&self, packet: Packet) -> Result<()> {
        self.outbound.send(packet).await.map_err(|_| Error::Closed)
    }
}

/// Resolves once shutdown was requested, or the router is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Everything the loop owns while it is not running.
struct RadioLoop<SPI, IRQ> {
    driver: Rfm69<SPI>,
    pin: IRQ,
    edge: Edge,
    queue: mpsc::Receiver<Packet>,
    table: Arc<DispatchTable>,
    tx_timeout: Duration,
}

impl<SPI, IRQ> RadioLoop<SPI, IRQ>
where
    SPI: SpiDevice,
    IRQ: InterruptLine,
{
    async fn run(self, shutdown: watch::Receiver<bool>) -> (Rfm69<SPI>, Result<()>) {
        let RadioLoop {
            driver,
            pin,
            edge,
            mut queue,
            table,
            tx_timeout,
        } = self;

        let mut link = Link {
            driver,
            irq: IrqSubscription::subscribe(pin, edge),
            acks: Deque::new(),
            table,
            tx_timeout,
        };
        let result = link.serve(&mut queue, shutdown).await;
        drop(queue);

        let Link {
            mut driver, irq, ..
        } = link;
        irq.unsubscribe().await;
        if let Err(err) = driver.set_mode(Mode::Standby).await {
            warn!("could not leave the radio in standby: {}", err);
        }
        (driver, result)
    }
}

/// The running loop.
struct Link<SPI, IRQ> {
    driver: Rfm69<SPI>,
    irq: IrqSubscription<IRQ>,
    acks: Deque<Packet, ACK_QUEUE_CAPACITY>,
    table: Arc<DispatchTable>,
    tx_timeout: Duration,
}

impl<SPI, IRQ> Link<SPI, IRQ>
where
    SPI: SpiDevice,
    IRQ: InterruptLine,
{
    async fn serve(
        &mut self,
        queue: &mut mpsc::Receiver<Packet>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.listen().await?;
        info!("radio loop running as node {}", self.driver.config().node_id);

        loop {
            while let Some(ack) = self.acks.pop_front() {
                let result = self.transmit(&ack).await;
                self.recover(result).await?;
            }

            tokio::select! {
                () = stopped(&mut shutdown) => {
                    info!("radio loop shutting down");
                    return Ok(());
                }
                packet = queue.recv() => {
                    let Some(packet) = packet else {
                        return Ok(());
                    };
                    let result = self.transmit(&packet).await;
                    self.recover(result).await?;
                }
                event = self.irq.next() => {
                    event?;
                    let result = self.on_interrupt().await;
                    self.recover(result).await?;
                }
            }
        }
    }

    /// Timeouts leave the radio in an unknown mode but the bus healthy:
    /// log and listen again. Anything else stops the loop.
    async fn recover(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(err @ (Error::ModeReadyTimeout | Error::TxTimeout | Error::RssiTimeout)) => {
                warn!("{}, re-arming receiver", err);
                match self.listen().await {
                    Err(Error::ModeReadyTimeout) => Ok(()),
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn listen(&mut self) -> Result<()> {
        self.driver.map_dio0(DIO0_PAYLOAD_READY)?;
        self.driver.set_mode(Mode::Receiver).await
    }

    async fn transmit(&mut self, packet: &Packet) -> Result<()> {
        debug!(
            "sending {} bytes to node {} (flags {:#04x})",
            packet.data.len(),
            packet.to,
            packet.flags().bits()
        );
        self.driver.restart_rx()?;
        self.driver.set_mode_and_wait(Mode::Standby).await?;
        self.driver.map_dio0(DIO0_PACKET_SENT)?;
        self.irq.drain()?;
        self.driver.write_fifo(packet)?;
        self.driver.set_mode(Mode::Transmitter).await?;
        self.wait_sent().await?;
        self.driver.set_mode_and_wait(Mode::Standby).await?;
        self.listen().await
    }

    async fn wait_sent(&mut self) -> Result<()> {
        let budget = self.tx_timeout;
        let sent = async {
            loop {
                self.irq.next().await?;
                if self.driver.irq_flags2()?.contains(IrqFlags2::PACKET_SENT) {
                    return Ok::<(), Error>(());
                }
                trace!("edge without packet sent");
            }
        };
        time::timeout(budget, sent)
            .await
            .map_err(|_| Error::TxTimeout)?
    }

    async fn on_interrupt(&mut self) -> Result<()> {
        if self.driver.mode() != Mode::Receiver {
            trace!("ignoring edge in {:?}", self.driver.mode());
            return Ok(());
        }
        if !self.driver.irq_flags2()?.contains(IrqFlags2::PAYLOAD_READY) {
            trace!("spurious edge");
            return Ok(());
        }
        let packet = self.driver.read_fifo().await?;
        self.driver.set_mode(Mode::Receiver).await?;
        self.dispatch(packet);
        Ok(())
    }

    fn dispatch(&mut self, packet: Packet) {
        let node_id = self.driver.config().node_id;
        if packet.to != node_id && packet.to != BROADCAST_ADDRESS {
            debug!("dropping packet for node {}", packet.to);
            return;
        }
        debug!(
            "received {} bytes from node {} at {} dBm",
            packet.data.len(),
            packet.from,
            packet.rssi
        );
        if packet.to != BROADCAST_ADDRESS && packet.request_ack {
            if self.acks.push_back(packet.to_ack()).is_err() {
                warn!("ack queue full, not acknowledging node {}", packet.from);
            }
        }
        self.table.dispatch(packet);
    }
}
