//! Retry timing for rescheduled messages.
//!
//! Every retry clone doubles its parent's delay (never less than one second),
//! and any non-zero delay handed to a queue gets a random jitter so retries
//! from the same failure do not land on the gateway at the same instant.
//! Delays are capped at [`MAX_DELAY_SECS`].

use chrono::{DateTime, Utc};
use rand::Rng;

/// Shortest delay a retry clone may carry, in seconds
pub const MIN_RETRY_DELAY_SECS: u64 = 1;

/// Upper bound of the random jitter added to non-zero delays, in seconds
pub const MAX_JITTER_SECS: u64 = 10;

/// Longest delay a message may wait in a queue: four weeks, the same as the
/// longest time to live a message may carry
pub const MAX_DELAY_SECS: u64 = crate::message::MAX_TTL_SECS;

/// Cap `delay_secs` at [`MAX_DELAY_SECS`].
#[must_use]
pub const fn clamp_delay(delay_secs: u64) -> u64 {
    if delay_secs > MAX_DELAY_SECS {
        MAX_DELAY_SECS
    } else {
        delay_secs
    }
}

/// Delay of the next attempt: `min(MAX_DELAY_SECS, max(1, 2 * delay))`.
#[must_use]
pub const fn escalate_delay(delay_secs: u64) -> u64 {
    let doubled = delay_secs.saturating_mul(2);
    if doubled < MIN_RETRY_DELAY_SECS {
        MIN_RETRY_DELAY_SECS
    } else {
        clamp_delay(doubled)
    }
}

/// A random jitter in `0..=MAX_JITTER_SECS` seconds.
#[must_use]
pub fn jitter_secs() -> u64 {
    rand::rng().random_range(0..=MAX_JITTER_SECS)
}

/// Delay handed to the queue for a message carrying `delay_secs`.
///
/// Zero stays zero so immediate messages skip the delay queue entirely.
/// The result never exceeds [`MAX_DELAY_SECS`].
#[must_use]
pub fn with_jitter(delay_secs: u64) -> u64 {
    if delay_secs == 0 {
        0
    } else {
        clamp_delay(delay_secs.saturating_add(jitter_secs()))
    }
}

/// A gateway supplied hint for when to try again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryAfter {
    /// Delta in seconds
    Seconds(u64),
    /// Absolute point in time
    At(DateTime<Utc>),
}

impl RetryAfter {
    /// Parse a `Retry-After` header value: either delta seconds or an HTTP date.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Ok(seconds) = value.parse::<u64>() {
            return Some(Self::Seconds(seconds));
        }

        DateTime::parse_from_rfc2822(value)
            .ok()
            .map(|at| Self::At(at.with_timezone(&Utc)))
    }

    /// Seconds to wait from `now`, rounded to the nearest second.
    ///
    /// A point in time that already passed yields zero, and the result is
    /// capped at [`MAX_DELAY_SECS`].
    #[must_use]
    pub fn delay_secs(&self, now: DateTime<Utc>) -> u64 {
        let delay = match self {
            Self::Seconds(seconds) => *seconds,
            Self::At(at) => {
                let millis = (*at - now).num_milliseconds();
                u64::try_from(millis.saturating_add(500) / 1000).unwrap_or(0)
            }
        };
        clamp_delay(delay)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn test_escalate_delay() {
        assert_eq!(escalate_delay(0), 1);
        assert_eq!(escalate_delay(1), 2);
        assert_eq!(escalate_delay(30), 60);
        assert_eq!(escalate_delay(MAX_DELAY_SECS - 1), MAX_DELAY_SECS);
        assert_eq!(escalate_delay(u64::MAX), MAX_DELAY_SECS);
    }

    #[test]
    fn test_jitter_bounds() {
        for _ in 0..200 {
            assert!(jitter_secs() <= MAX_JITTER_SECS);
        }
    }

    #[test]
    fn test_with_jitter_keeps_zero() {
        assert_eq!(with_jitter(0), 0);
        for _ in 0..50 {
            let delay = with_jitter(5);
            assert!((5..=15).contains(&delay), "delay {delay} out of range");
        }
    }

    #[test]
    fn test_with_jitter_stays_under_ceiling() {
        assert_eq!(with_jitter(u64::MAX), MAX_DELAY_SECS);
        assert_eq!(with_jitter(MAX_DELAY_SECS), MAX_DELAY_SECS);
    }

    #[test]
    fn test_parse_retry_after_delta_seconds() {
        assert_eq!(RetryAfter::parse("120"), Some(RetryAfter::Seconds(120)));
        assert_eq!(RetryAfter::parse(" 7 "), Some(RetryAfter::Seconds(7)));
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let parsed = RetryAfter::parse("Wed, 21 Oct 2015 07:28:00 GMT").unwrap();
        let RetryAfter::At(at) = parsed else {
            panic!("expected an absolute time, got {parsed:?}");
        };
        assert_eq!(at.to_rfc3339(), "2015-10-21T07:28:00+00:00");
    }

    #[test]
    fn test_parse_retry_after_garbage() {
        assert_eq!(RetryAfter::parse("soon"), None);
        assert_eq!(RetryAfter::parse("-5"), None);
    }

    #[test]
    fn test_delay_from_absolute_time() {
        let now = Utc::now();
        let future = RetryAfter::At(now + Duration::seconds(90));
        assert_eq!(future.delay_secs(now), 90);

        let past = RetryAfter::At(now - Duration::seconds(30));
        assert_eq!(past.delay_secs(now), 0);

        assert_eq!(RetryAfter::Seconds(4).delay_secs(now), 4);
    }

    #[test]
    fn test_delay_capped_at_ceiling() {
        let now = Utc::now();
        let huge = RetryAfter::parse("18446744073709551615").unwrap();
        assert_eq!(huge.delay_secs(now), MAX_DELAY_SECS);

        let distant = RetryAfter::At(now + Duration::days(365));
        assert_eq!(distant.delay_secs(now), MAX_DELAY_SECS);
    }
}
