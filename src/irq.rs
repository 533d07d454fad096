//! Interrupt line handling.
//!
//! The transceiver signals "packet sent" and "payload ready" on DIO0. The
//! [`InterruptLine`] trait abstracts the GPIO the line is wired to; an
//! [`IrqSubscription`] turns its edges into a stream of unit events that the
//! radio loop can `select!` on next to its other inputs.
//!
//! An event carries no information beyond "an edge happened": the loop reads
//! the status registers to learn what it means. A pin failure is delivered
//! as the last event before the stream ends.

use core::future::Future;

use embedded_hal::digital::ErrorType;
use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Edge;
use crate::error::{Error, Result};

/// Depth of the edge event queue. Edges arriving while it is full are
/// dropped: the loop re-reads the flags on the next event anyway.
pub const IRQ_QUEUE_CAPACITY: usize = 8;

/// A GPIO input connected to DIO0.
pub trait InterruptLine: ErrorType<Error: Send> + Send + 'static {
    /// Enables the internal pull-up on the line.
    fn configure_pull_up(&mut self) -> core::result::Result<(), Self::Error>;

    /// Resolves on the next `edge` transition of the line.
    fn wait_for_edge(
        &mut self,
        edge: Edge,
    ) -> impl Future<Output = core::result::Result<(), Self::Error>> + Send;
}

/// A running edge watcher.
///
/// Dropping the subscription stops the watcher as well, but the pin is
/// lost; use [`unsubscribe`](IrqSubscription::unsubscribe) to get it back.
#[derive(Debug)]
pub struct IrqSubscription<P> {
    events: mpsc::Receiver<Result<()>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Option<P>>,
}

impl<P: InterruptLine> IrqSubscription<P> {
    /// Starts watching `pin` for `edge`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(pin: P, edge: Edge) -> Self {
        let (tx, events) = mpsc::channel(IRQ_QUEUE_CAPACITY);
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(watch(pin, edge, tx, stop_rx));
        debug!("watching interrupt line for {:?} edges", edge);
        Self {
            events,
            stop: Some(stop),
            task,
        }
    }

    /// Waits for the next edge.
    ///
    /// # Errors
    /// - [`Error::Pin`] once, when the line failed
    /// - [`Error::Closed`] after that, or after an unsubscribe
    pub async fn next(&mut self) -> Result<()> {
        self.events.recv().await.unwrap_or(Err(Error::Closed))
    }

    /// Discards edges that arrived before now.
    ///
    /// # Errors
    /// A pin failure found among them is returned instead of discarded.
    pub fn drain(&mut self) -> Result<usize> {
        let mut drained = 0;
        while let Ok(event) = self.events.try_recv() {
            event?;
            drained += 1;
        }
        Ok(drained)
    }

    /// Stops the watcher and returns the pin, or `None` if the watcher
    /// died on a pin error.
    pub async fn unsubscribe(mut self) -> Option<P> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.await {
            Ok(pin) => pin,
            Err(err) => {
                error!("interrupt watcher panicked: {}", err);
                None
            }
        }
    }
}

async fn watch<P: InterruptLine>(
    mut pin: P,
    edge: Edge,
    events: mpsc::Sender<Result<()>>,
    mut stop: oneshot::Receiver<()>,
) -> Option<P> {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            res = pin.wait_for_edge(edge) => match res {
                Ok(()) => match events.try_send(Ok(())) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!("interrupt queue full, dropping edge");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                },
                Err(err) => {
                    let err = Error::pin(err);
                    error!("interrupt line failed: {}", err);
                    let _ = events.send(Err(err)).await;
                    return None;
                }
            },
        }
    }
    debug!("interrupt watcher stopped");
    Some(pin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fake_radio;

    #[tokio::test]
    async fn test_edges_become_events() {
        let (_spi, irq, chip) = fake_radio();
        let mut sub = IrqSubscription::subscribe(irq, Edge::Rising);

        chip.fire_edge();
        chip.fire_edge();
        sub.next().await.unwrap();
        sub.next().await.unwrap();

        assert!(sub.unsubscribe().await.is_some());
    }

    #[tokio::test]
    async fn test_drain_discards_stale_edges() {
        let (_spi, irq, chip) = fake_radio();
        let mut sub = IrqSubscription::subscribe(irq, Edge::Rising);

        chip.fire_edge();
        chip.fire_edge();
        tokio::task::yield_now().await;
        tokio::time::sleep(core::time::Duration::from_millis(5)).await;
        assert_eq!(sub.drain(), Ok(2));
        assert_eq!(sub.drain(), Ok(0));
        sub.unsubscribe().await;
    }

    #[tokio::test]
    async fn test_pin_error_is_reported_then_closes_stream() {
        let (_spi, irq, chip) = fake_radio();
        let mut sub = IrqSubscription::subscribe(irq, Edge::Falling);

        chip.break_irq();
        assert_eq!(
            sub.next().await,
            Err(Error::Pin(embedded_hal::digital::ErrorKind::Other))
        );
        assert_eq!(sub.next().await, Err(Error::Closed));
        assert!(sub.unsubscribe().await.is_none());
    }
}
