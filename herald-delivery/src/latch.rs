//! Count-down latch used while the distributor waits for its workers.

use std::{
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};

use tokio::sync::Notify;

/// Opens once [`InitLatch::count_down`] has been called `count` times.
#[derive(Debug)]
pub struct InitLatch {
    remaining: AtomicUsize,
    notify: Notify,
}

impl InitLatch {
    #[must_use]
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            notify: Notify::new(),
        }
    }

    /// Record one acknowledgement. Extra calls past zero are ignored.
    pub fn count_down(&self) {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            });

        if previous == Ok(1) {
            self.notify.notify_waiters();
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// Wait until the count reaches zero.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                // Registered before the check so a concurrent count_down is not missed.
                let notified = self.notify.notified();
                if self.remaining() == 0 {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn test_zero_count_is_open() {
        let latch = InitLatch::new(0);
        assert!(latch.wait(Duration::from_millis(1)).await);
    }

    #[tokio::test]
    async fn test_opens_after_all_acknowledgements() {
        let latch = Arc::new(InitLatch::new(3));

        for _ in 0..3 {
            let latch = Arc::clone(&latch);
            tokio::spawn(async move { latch.count_down() });
        }

        assert!(latch.wait(Duration::from_secs(5)).await);
        assert_eq!(latch.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_when_short() {
        let latch = InitLatch::new(2);
        latch.count_down();

        assert!(!latch.wait(Duration::from_secs(10)).await);
        assert_eq!(latch.remaining(), 1);
    }

    #[test]
    fn test_count_down_saturates() {
        let latch = InitLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.remaining(), 0);
    }
}
