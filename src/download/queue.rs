//! Pipeline stage abstractions: the closable download queue and the ordered
//! merge channel.
//!
//! Each stage hand-off is one value owning its own completion decision, so
//! the coordinator and the error manager can both complete a stage without
//! racing: completion is idempotent inside the value itself.

use std::collections::BTreeSet;
use std::sync::Mutex;
use tokio::sync::{Notify, mpsc};

use crate::error::{Error, Result};
use crate::types::PartNumber;

struct QueueInner<T> {
    items: BTreeSet<T>,
    closed: bool,
}

/// Unbounded multi-consumer queue of part numbers with idempotent close.
///
/// `pop` suspends until an item arrives or the queue is closed and drained,
/// and always hands out the smallest pending item: the merge stage needs the
/// lowest unmerged part before any in-flight slot is released, so later
/// parts must never starve it of a slot.
/// After `close`, remaining items are still handed out; `push` fails.
pub(crate) struct PartQueue<T> {
    inner: Mutex<QueueInner<T>>,
    notify: Notify,
}

impl<T: Ord> PartQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: BTreeSet::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue an item. Fails with [`Error::QueueClosed`] once closed.
    pub(crate) fn push(&self, item: T) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return Err(Error::QueueClosed);
            }
            inner.items.insert(item);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Dequeue the smallest pending item, waiting if the queue is empty but
    /// open.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<T> {
        loop {
            // The notified future must be created before the check so a push
            // or close between unlock and await still wakes us.
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = inner.items.pop_first() {
                    return Some(item);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the queue. Idempotent; wakes every blocked consumer.
    pub(crate) fn close(&self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }
}

/// Ordered channel feeding the merge stage, with idempotent completion.
///
/// The coordinator sends part numbers strictly in merge order; either the
/// coordinator (all parts merged) or the error manager (poison) completes it.
pub(crate) struct MergeChannel {
    tx: Mutex<Option<mpsc::UnboundedSender<PartNumber>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<PartNumber>>>,
}

impl MergeChannel {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Hand a part number to the merge stage.
    ///
    /// Fails with [`Error::QueueClosed`] once completed.
    pub(crate) fn send(&self, part_number: PartNumber) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(part_number).map_err(|_| Error::QueueClosed),
            None => Err(Error::QueueClosed),
        }
    }

    /// Complete the channel: no further parts will ever be sent. Idempotent.
    pub(crate) fn complete(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }

    /// Take the single consumer end. Returns `None` once taken; the merge
    /// task is the only consumer.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::UnboundedReceiver<PartNumber>> {
        self.rx.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    #[cfg(test)]
    pub(crate) fn is_completed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none()
    }
}
