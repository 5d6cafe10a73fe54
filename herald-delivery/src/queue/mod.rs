//! Per-protocol message queue management

pub mod delay;

use std::{collections::VecDeque, time::Duration};

use parking_lot::{Mutex, MutexGuard};

pub use self::delay::DelayQueue;
use crate::{error::QueueError, message::Message};

/// Default bounded wait for the queue lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a queue operation may wait for the queue's exclusive lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockWait {
    /// Wait up to [`DEFAULT_LOCK_TIMEOUT`]
    #[default]
    Default,
    /// Wait up to the given duration
    For(Duration),
    /// Block until the lock is free
    Indefinitely,
}

#[derive(Debug)]
struct Lists<T> {
    sendable: VecDeque<T>,
    delayed: DelayQueue<T>,
}

/// Immediate FIFO plus delay queue for a single protocol.
///
/// All mutation happens while holding the queue's lock, acquired with a
/// bounded wait unless [`LockWait::Indefinitely`] is requested.
#[derive(Debug)]
pub struct MessageQueue<T = Message> {
    namespace: String,
    lists: Mutex<Lists<T>>,
}

impl<T> MessageQueue<T> {
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            lists: Mutex::new(Lists {
                sendable: VecDeque::new(),
                delayed: DelayQueue::new(),
            }),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn lock(&self, wait: LockWait) -> Result<MutexGuard<'_, Lists<T>>, QueueError> {
        let waited = match wait {
            LockWait::Indefinitely => return Ok(self.lists.lock()),
            LockWait::Default => DEFAULT_LOCK_TIMEOUT,
            LockWait::For(duration) => duration,
        };

        self.lists
            .try_lock_for(waited)
            .ok_or_else(|| QueueError::LockTimeout {
                namespace: self.namespace.clone(),
                waited,
            })
    }

    /// Queue `item`, held back for `delay_secs` seconds when non-zero.
    pub fn add(&self, item: T, delay_secs: u64, wait: LockWait) -> Result<(), QueueError> {
        let mut lists = self.lock(wait)?;
        if delay_secs > 0 {
            lists.delayed.add(item, delay_secs);
        } else {
            lists.sendable.push_back(item);
        }
        Ok(())
    }

    /// Take the next immediately sendable item.
    pub fn shift(&self, wait: LockWait) -> Result<Option<T>, QueueError> {
        Ok(self.lock(wait)?.sendable.pop_front())
    }

    /// Move every delayed item whose ready time has passed to the sendable list.
    ///
    /// Returns the number of items promoted.
    pub fn check_delayed_messages(&self, wait: LockWait) -> Result<usize, QueueError> {
        let mut lists = self.lock(wait)?;
        let mut promoted = 0;
        while let Some(item) = lists.delayed.poll() {
            lists.sendable.push_back(item);
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Items ready to be sent right now.
    pub fn sendable_count(&self) -> usize {
        self.lists.lock().sendable.len()
    }

    /// Items still waiting on their delay.
    pub fn delayed_count(&self) -> usize {
        self.lists.lock().delayed.size()
    }

    pub fn total(&self) -> usize {
        let lists = self.lists.lock();
        lists.sendable.len() + lists.delayed.size()
    }

    /// Time until the next delayed item becomes ready.
    pub fn time_to_next_ready(&self) -> Option<Duration> {
        self.lists.lock().delayed.time_to_next_ready()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_fifo_order_preserved() {
        let queue = MessageQueue::new("test");
        for item in ["a", "b", "c"] {
            queue.add(item, 0, LockWait::Default).unwrap();
        }

        assert_eq!(queue.shift(LockWait::Default).unwrap(), Some("a"));
        assert_eq!(queue.shift(LockWait::Default).unwrap(), Some("b"));
        assert_eq!(queue.shift(LockWait::Default).unwrap(), Some("c"));
        assert_eq!(queue.shift(LockWait::Default).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_items_promoted_once_ready() {
        let queue = MessageQueue::new("test");
        queue.add("a", 0, LockWait::Default).unwrap();
        queue.add("b", 5, LockWait::Default).unwrap();

        assert_eq!(queue.sendable_count(), 1);
        assert_eq!(queue.delayed_count(), 1);
        assert_eq!(queue.total(), 2);

        assert_eq!(queue.check_delayed_messages(LockWait::Default).unwrap(), 0);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.check_delayed_messages(LockWait::Default).unwrap(), 1);
        assert_eq!(queue.sendable_count(), 2);
        assert_eq!(queue.delayed_count(), 0);
        assert_eq!(queue.total(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_leaves_future_items_delayed() {
        let queue = MessageQueue::new("test");
        queue.add(1, 1, LockWait::Default).unwrap();
        queue.add(2, 2, LockWait::Default).unwrap();
        queue.add(3, 60, LockWait::Default).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(queue.check_delayed_messages(LockWait::Default).unwrap(), 2);
        assert_eq!(queue.shift(LockWait::Default).unwrap(), Some(1));
        assert_eq!(queue.shift(LockWait::Default).unwrap(), Some(2));
        assert_eq!(queue.shift(LockWait::Default).unwrap(), None);
        assert_eq!(queue.delayed_count(), 1);
        assert_eq!(queue.total(), queue.sendable_count() + queue.delayed_count());
    }

    #[test]
    fn test_lock_timeout_names_namespace() {
        let queue = Arc::new(MessageQueue::new("tenant-a"));
        let _held = queue.lists.lock();

        let err = queue
            .add("x", 0, LockWait::For(Duration::from_millis(10)))
            .unwrap_err();
        assert_eq!(
            err,
            QueueError::LockTimeout {
                namespace: "tenant-a".to_string(),
                waited: Duration::from_millis(10),
            }
        );
        assert!(err.to_string().contains("tenant-a"));
    }

    #[test]
    fn test_lock_timeout_leaves_items_in_place() {
        let queue = MessageQueue::new("test");
        queue.add("kept", 0, LockWait::Default).unwrap();

        {
            let _held = queue.lists.lock();
            assert!(queue.shift(LockWait::For(Duration::from_millis(5))).is_err());
        }

        assert_eq!(queue.shift(LockWait::Default).unwrap(), Some("kept"));
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = Arc::new(MessageQueue::new("test"));
        let handles: Vec<_> = (0..4)
            .map(|producer| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue
                            .add(producer * 1000 + i, 0, LockWait::Indefinitely)
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.sendable_count(), 1000);
        assert_eq!(queue.total(), 1000);
    }
}
