//! Items held back until an absolute ready time has passed

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;

/// Ready-time offset used when a delay does not fit the clock, roughly 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Debug)]
struct Delayed<T> {
    item: T,
    ready_at: Instant,
}

/// A queue that only hands out items whose delay has elapsed.
///
/// Entries are kept sorted ascending by ready time. Insertion splices the new
/// entry in after every entry that becomes ready no later than it, so items
/// with the same ready time leave in insertion order.
#[derive(Debug)]
pub struct DelayQueue<T> {
    entries: VecDeque<Delayed<T>>,
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DelayQueue<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Add `item`, ready `delay_secs` seconds from now.
    ///
    /// A delay too large for the clock parks the item in the far future.
    pub fn add(&mut self, item: T, delay_secs: u64) {
        let now = Instant::now();
        let ready_at = now
            .checked_add(Duration::from_secs(delay_secs))
            .unwrap_or_else(|| now + FAR_FUTURE);
        let position = self
            .entries
            .partition_point(|entry| entry.ready_at <= ready_at);
        self.entries.insert(position, Delayed { item, ready_at });
    }

    /// Detach the earliest item if its ready time has passed.
    ///
    /// Returns `None` without touching the queue otherwise.
    pub fn poll(&mut self) -> Option<T> {
        let now = Instant::now();
        if self.entries.front()?.ready_at <= now {
            self.entries.pop_front().map(|entry| entry.item)
        } else {
            None
        }
    }

    /// Number of entries, ready or not.
    #[must_use]
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Time until the earliest entry becomes ready, `None` when empty.
    #[must_use]
    pub fn time_to_next_ready(&self) -> Option<Duration> {
        self.entries
            .front()
            .map(|entry| entry.ready_at.saturating_duration_since(Instant::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_empty() {
        let mut queue: DelayQueue<&str> = DelayQueue::new();
        assert_eq!(queue.poll(), None);
        assert_eq!(queue.size(), 0);
        assert_eq!(queue.time_to_next_ready(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_not_ready_until_delay_elapsed() {
        let mut queue = DelayQueue::new();
        queue.add("x", 1);

        assert_eq!(queue.poll(), None);
        assert_eq!(queue.size(), 1, "a premature poll must not remove the entry");

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert_eq!(queue.poll(), Some("x"));
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_ready_item_leaves_first() {
        let mut queue = DelayQueue::new();
        queue.add("late", 30);
        queue.add("early", 5);
        queue.add("middle", 10);
        queue.add("now", 0);

        assert_eq!(queue.poll(), Some("now"));
        assert_eq!(queue.poll(), None);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(queue.poll(), Some("early"));
        assert_eq!(queue.poll(), Some("middle"));
        assert_eq!(queue.poll(), Some("late"));
        assert_eq!(queue.poll(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_equal_ready_times_keep_insertion_order() {
        let mut queue = DelayQueue::new();
        queue.add(1, 3);
        queue.add(2, 3);
        queue.add(3, 3);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(queue.poll(), Some(1));
        assert_eq!(queue.poll(), Some(2));
        assert_eq!(queue.poll(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_counts_adds_minus_successful_polls() {
        let mut queue = DelayQueue::new();
        for delay in [0, 0, 4, 8] {
            queue.add(delay, delay);
        }
        assert_eq!(queue.size(), 4);

        assert!(queue.poll().is_some());
        assert!(queue.poll().is_some());
        assert!(queue.poll().is_none());
        assert_eq!(queue.size(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_to_next_ready_is_clamped() {
        let mut queue = DelayQueue::new();
        queue.add("a", 2);
        assert_eq!(queue.time_to_next_ready(), Some(Duration::from_secs(2)));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(queue.time_to_next_ready(), Some(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_delay_parks_item() {
        let mut queue = DelayQueue::new();
        queue.add("never", u64::MAX);
        queue.add("soon", 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(queue.poll(), Some("soon"));
        assert_eq!(queue.poll(), None);
        assert_eq!(queue.size(), 1);
        assert!(queue.time_to_next_ready() > Some(Duration::from_secs(86_400 * 365)));
    }
}
