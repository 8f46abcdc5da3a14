use derive_more::Constructor;
use tracing::warn;

/// Transmitter capability required by core components that push items to a queue.
pub trait Tx {
    type Item;
    type Error;
    fn send(&self, item: Self::Item) -> Result<(), Self::Error>;
}

/// Construct an unbounded single-producer single-consumer queue pair.
///
/// The core event loop and its I/O workers communicate exclusively through these queues; the
/// receiving side is drained per tick (see [`UnboundedRx::drain`]).
pub fn unbounded<T>() -> (UnboundedTx<T>, UnboundedRx<T>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (UnboundedTx::new(tx), UnboundedRx::new(rx))
}

#[derive(Debug)]
pub struct UnboundedTx<T> {
    pub tx: tokio::sync::mpsc::UnboundedSender<T>,
}

impl<T> Clone for UnboundedTx<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> UnboundedTx<T> {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

/// Error returned when the receiving half of a queue has been dropped.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
#[error("RxDropped")]
pub struct RxDropped;

impl<T> Tx for UnboundedTx<T> {
    type Item = T;
    type Error = RxDropped;

    fn send(&self, item: Self::Item) -> Result<(), Self::Error> {
        self.tx.send(item).map_err(|_| RxDropped)
    }
}

#[derive(Debug, Constructor)]
pub struct UnboundedRx<T> {
    pub rx: tokio::sync::mpsc::UnboundedReceiver<T>,
}

impl<T> UnboundedRx<T> {
    /// Pull every currently available item without blocking.
    ///
    /// Stops at `Empty` so one tick never waits on a producer; a disconnected producer simply
    /// yields an empty drain.
    pub fn drain(&mut self) -> Vec<T> {
        let mut items = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(item) => items.push(item),
                Err(tokio::sync::mpsc::error::TryRecvError::Empty) => break,
                Err(tokio::sync::mpsc::error::TryRecvError::Disconnected) => break,
            }
        }
        items
    }

}

/// `Tx` wrapper that drops, rather than propagates, send failures after the receiver is gone.
///
/// Used for the audit replica/observer channels where a dropped consumer must not kill the core.
#[derive(Debug)]
pub struct ChannelTxDroppable<ChannelTx> {
    pub state: ChannelState<ChannelTx>,
}

#[derive(Debug)]
pub enum ChannelState<ChannelTx> {
    Active(ChannelTx),
    Disabled,
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx>
where
    ChannelTx: Tx,
{
    pub fn new(tx: ChannelTx) -> Self {
        Self {
            state: ChannelState::Active(tx),
        }
    }

    pub fn send(&mut self, item: ChannelTx::Item) {
        let ChannelState::Active(tx) = &self.state else {
            return;
        };

        if tx.send(item).is_err() {
            warn!("ChannelTxDroppable receiver dropped - disabling channel");
            self.state = ChannelState::Disabled;
        }
    }
}
