//! Single-slot handoff between the capture side and the worker. Holds at most
//! one item; a newer item replaces the pending one, which is dropped on the
//! spot.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// What happened to an item passed to [`LatestSlot::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// The slot was empty.
    Queued,
    /// A pending item was dropped in favour of this one.
    Replaced,
    /// The slot is closed; the item was dropped.
    Rejected,
}

struct SlotState<T> {
    pending: Option<T>,
    closed: bool,
}

pub struct LatestSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                pending: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Never blocks on the consumer.
    pub fn put(&self, item: T) -> Offer {
        let (offer, dropped) = {
            let mut state = self.lock();
            if state.closed {
                (Offer::Rejected, Some(item))
            } else {
                match state.pending.replace(item) {
                    Some(old) => (Offer::Replaced, Some(old)),
                    None => (Offer::Queued, None),
                }
            }
        };
        // dropped items run their release outside the lock
        drop(dropped);
        if offer != Offer::Rejected {
            self.notify.notify_one();
        }
        offer
    }

    /// Waits for the next item. `None` once the slot is closed.
    pub async fn recv(&self) -> Option<T> {
        loop {
            {
                let mut state = self.lock();
                if let Some(item) = state.pending.take() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Rejects further items and drops the pending one, if any.
    pub fn close(&self) {
        let pending = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.take()
        };
        drop(pending);
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }
}
