//! Single-slot, latest-wins handoff between a frame producer and consumer.
//!
//! A [`FrameSlot`] holds at most one value. `put` overwrites whatever the
//! consumer has not picked up yet, so a producer that outpaces the consumer
//! never builds a backlog: the consumer always sees the freshest frame.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Result of [`FrameSlot::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// The slot was empty.
    Stored,
    /// An unconsumed value was discarded in favour of the new one.
    Replaced,
    /// The slot is closed; the value was dropped.
    Closed,
}

struct SlotState<T> {
    value: Option<T>,
    closed: bool,
}

/// Capacity-1 overwrite channel with an explicit close signal.
pub struct FrameSlot<T> {
    state: Mutex<SlotState<T>>,
    notify: Notify,
}

impl<T> Default for FrameSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FrameSlot<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                value: None,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store `value`, replacing any value the consumer has not taken yet.
    ///
    /// Never blocks. A suspended [`get`](Self::get) is released with the new
    /// value.
    pub fn put(&self, value: T) -> PutOutcome {
        let stale = {
            let mut state = self.lock();
            if state.closed {
                return PutOutcome::Closed;
            }
            state.value.replace(value)
        };
        self.notify.notify_one();

        match stale {
            Some(_) => PutOutcome::Replaced,
            None => PutOutcome::Stored,
        }
    }

    /// Wait for a value and take it, leaving the slot empty.
    ///
    /// Returns `None` once the slot is closed, whether the close happened
    /// before the call or while it was suspended.
    pub async fn get(&self) -> Option<T> {
        loop {
            // Register interest before inspecting the state so a put or close
            // landing between the check and the await is not missed.
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if state.closed {
                    return None;
                }
                if let Some(value) = state.value.take() {
                    return Some(value);
                }
            }

            notified.await;
        }
    }

    /// Close the slot, discarding any pending value and waking every
    /// suspended consumer. Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        let stale = {
            let mut state = self.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
            state.value.take()
        };
        drop(stale);
        self.notify.notify_waiters();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    async fn assert_nothing_pending<T: std::fmt::Debug>(slot: &FrameSlot<T>) {
        let next = tokio::time::timeout(Duration::from_millis(20), slot.get()).await;
        assert!(next.is_err(), "slot should be empty, got {next:?}");
    }

    #[tokio::test]
    async fn test_latest_put_wins() {
        let slot = FrameSlot::new();
        assert_eq!(slot.put("a"), PutOutcome::Stored);
        assert_eq!(slot.put("b"), PutOutcome::Replaced);
        assert_eq!(slot.get().await, Some("b"));
        assert_nothing_pending(&slot).await;
    }

    #[tokio::test]
    async fn test_many_puts_single_get() {
        let slot = FrameSlot::new();
        for i in 0..100 {
            slot.put(i);
        }
        assert_eq!(slot.get().await, Some(99));
        assert_nothing_pending(&slot).await;
    }

    #[tokio::test]
    async fn test_get_suspends_until_put() {
        let slot = Arc::new(FrameSlot::new());

        let pending = tokio::time::timeout(Duration::from_millis(50), slot.get()).await;
        assert!(pending.is_err(), "get on an empty slot should not complete");

        let consumer = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.put(7u32);

        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("consumer should be released")
            .unwrap();
        assert_eq!(got, Some(7));
    }

    #[tokio::test]
    async fn test_close_wakes_pending_get() {
        let slot = Arc::new(FrameSlot::<u32>::new());
        let consumer = {
            let slot = slot.clone();
            tokio::spawn(async move { slot.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(slot.close());
        let got = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .expect("close should release the consumer")
            .unwrap();
        assert_eq!(got, None);
    }

    #[tokio::test]
    async fn test_closed_slot_is_terminal() {
        let slot = FrameSlot::new();
        slot.put(1u8);
        assert!(slot.close());
        assert!(!slot.close());
        assert!(slot.is_closed());

        assert_eq!(slot.put(2), PutOutcome::Closed);
        assert_eq!(slot.get().await, None);
        assert_eq!(slot.get().await, None);
    }

    #[tokio::test]
    async fn test_each_put_releases_one_value() {
        let slot = Arc::new(FrameSlot::new());
        let consumer = {
            let slot = slot.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(v) = slot.get().await {
                    seen.push(v);
                }
                seen
            })
        };

        for i in 0..20u32 {
            slot.put(i);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        slot.close();

        let seen = consumer.await.unwrap();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]), "values arrive in put order: {seen:?}");
        assert!(seen.len() <= 20);
    }
}
