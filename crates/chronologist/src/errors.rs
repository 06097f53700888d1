//! Retry classification for reconciliation failures.
//!
//! [`RetryPolicy`] is a cross-cutting concern: the controller's requeue loop
//! asks it whether a failed reconciliation is worth another attempt. Payload
//! faults can never succeed on retry; transport faults usually can.

/// Whether a reconciliation failure is safe to retry.
///
/// Retryable failures are re-enqueued with the work queue's exponential
/// backoff, up to the retry ceiling. Non-retryable failures are logged and
/// dropped immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// The failure is transient (e.g. the annotation store was unreachable or
    /// answered with an error status); retrying may succeed.
    Retryable,
    /// The failure is structural (e.g. a malformed payload or queue key);
    /// retrying can never succeed.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Retryable)
    }
}
