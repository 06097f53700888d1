//! Port traits implemented by infrastructure crates.

use async_trait::async_trait;

use crate::release::ReleaseEvent;

/// A sink that keeps an external store in sync with release events.
///
/// `register` must be idempotent: calling it repeatedly with the same event
/// against a store that already reflects it performs no writes. Consistency is
/// re-derived from the store on every call; implementations hold no durable
/// record of what they last wrote.
#[async_trait]
pub trait Chronicle: Send + Sync {
    /// Ensures the store holds exactly one record reflecting `event`.
    async fn register(&self, event: ReleaseEvent) -> anyhow::Result<()>;

    /// Ensures the store holds no records for the `(name, revision)` key.
    async fn unregister(&self, name: &str, revision: &str) -> anyhow::Result<()>;
}

/// An optional in-process sink for the same release-event stream.
///
/// Independent of [`Chronicle`]; not part of the reconciliation correctness
/// path. The `key` is the controller's queue key for the carrier resource.
pub trait ReleaseSink: Send + Sync {
    /// Records that `key` currently corresponds to `event`. Overwrites any
    /// previous record for the same key.
    fn register_release(&self, key: &str, event: &ReleaseEvent);

    /// Drops the record for `key`, if any.
    fn unregister_release(&self, key: &str);
}
