use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// The receiving side is gone; the item was not delivered.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("conduit receiver dropped")]
pub struct ConduitClosed;

struct Handoff<T> {
    item: T,
    delivered: oneshot::Sender<()>,
}

/// Zero-buffer handoff: a send completes only once a receiver has taken the
/// item. There is a single sender, so the conduit closes exactly once, when
/// it is closed or dropped.
pub fn conduit<T>() -> (ConduitSender<T>, ConduitReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (ConduitSender { tx }, ConduitReceiver { rx })
}

pub struct ConduitSender<T> {
    tx: mpsc::Sender<Handoff<T>>,
}

impl<T> ConduitSender<T> {
    pub async fn send(&self, item: T) -> Result<(), ConduitClosed> {
        let (delivered, ack) = oneshot::channel();
        self.tx
            .send(Handoff { item, delivered })
            .await
            .map_err(|_| ConduitClosed)?;
        ack.await.map_err(|_| ConduitClosed)
    }

    /// Blocking variant for parser threads. Must not be called from an async
    /// context.
    pub fn blocking_send(&self, item: T) -> Result<(), ConduitClosed> {
        let (delivered, ack) = oneshot::channel();
        self.tx
            .blocking_send(Handoff { item, delivered })
            .map_err(|_| ConduitClosed)?;
        ack.blocking_recv().map_err(|_| ConduitClosed)
    }

    /// Receivers observe closure after the last delivered item.
    pub fn close(self) {}
}

pub struct ConduitReceiver<T> {
    rx: mpsc::Receiver<Handoff<T>>,
}

impl<T> ConduitReceiver<T> {
    /// `None` once the sender is closed and every item was delivered.
    /// Cancel safe: an item is only acknowledged once it is returned.
    pub async fn recv(&mut self) -> Option<T> {
        let Handoff { item, delivered } = self.rx.recv().await?;
        let _ = delivered.send(());
        Some(item)
    }
}
