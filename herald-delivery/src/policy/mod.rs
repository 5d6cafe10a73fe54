//! Delivery policies that are independent of any particular gateway.
//!
//! - [`retry`]: delay escalation, jitter and gateway retry hints

pub mod retry;

pub use retry::{MAX_DELAY_SECS, RetryAfter, escalate_delay, with_jitter};
