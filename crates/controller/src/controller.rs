//! The controller proper: pump, cache, and worker loops.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context as _;
use chrono::Utc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use chronologist::{Chronicle, ReleaseSink, RetryPolicy};

use crate::carrier::{Carrier, CarrierNotification, CarrierSource, WatchTarget};
use crate::key::{key_to_release, KeyError};
use crate::queue::WorkQueue;

/// How many rate-limited attempts a key gets before the controller gives up
/// on it.
pub const MAX_RETRIES: u32 = 5;

/// Controller construction options.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    /// Carrier-resource kind to watch.
    pub target: WatchTarget,
    /// Carriers created earlier than `now - max_age` are not reconciled.
    /// Zero disables the filter.
    pub max_age: Duration,
    /// Number of concurrent reconciliation workers.
    pub workers: usize,
    /// First retry delay of the per-key backoff schedule.
    pub retry_base_delay: Duration,
    /// Upper bound of the per-key backoff schedule.
    pub retry_max_delay: Duration,
}

impl Options {
    /// Returns options for the given target with the default scheduling
    /// parameters.
    pub fn new(target: WatchTarget) -> Self {
        Self {
            target,
            max_age: Duration::ZERO,
            workers: 1,
            retry_base_delay: Duration::from_millis(5),
            retry_max_delay: Duration::from_secs(1000),
        }
    }
}

/// Watches carrier resources and keeps the annotation store in sync with the
/// release revisions they hold.
#[derive(Clone)]
pub struct Controller {
    chronicle: Arc<dyn Chronicle>,
    sink: Option<Arc<dyn ReleaseSink>>,
    queue: Arc<WorkQueue>,
    cache: Arc<RwLock<HashMap<String, Carrier>>>,
    options: Options,
}

impl Controller {
    /// Returns a new controller. The watch target in `options` has already
    /// been validated by [`WatchTarget::from_flags`].
    pub fn new(
        chronicle: Arc<dyn Chronicle>,
        sink: Option<Arc<dyn ReleaseSink>>,
        options: Options,
    ) -> Self {
        Self {
            chronicle,
            sink,
            queue: WorkQueue::new(options.retry_base_delay, options.retry_max_delay),
            cache: Arc::new(RwLock::new(HashMap::new())),
            options,
        }
    }

    /// Runs the controller until `shutdown` is cancelled.
    ///
    /// Blocks reconciliation until the source has replicated its initial
    /// list; returns an error if the source ends before that happens.
    /// After cancellation, in-flight reconciliations drain naturally.
    pub async fn run(
        &self,
        source: impl CarrierSource + 'static,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!(target = %self.options.target, "starting controller");

        let (synced_tx, synced_rx) = oneshot::channel();
        let pump = tokio::spawn(self.clone().pump(source, shutdown.clone(), synced_tx));

        debug!("waiting for the initial carrier list");
        tokio::select! {
            _ = shutdown.cancelled() => {
                self.queue.shut_down();
                let _ = pump.await;
                info!("shutting down controller");
                return Ok(());
            }
            synced = synced_rx => {
                synced
                    .map_err(|_| anyhow::anyhow!("notification stream ended before the initial sync"))
                    .context("sync carrier cache")?;
            }
        }

        info!("controller synced and ready");

        let mut workers = Vec::with_capacity(self.options.workers.max(1));
        for worker in 0..self.options.workers.max(1) {
            let controller = self.clone();
            workers.push(tokio::spawn(controller.worker_loop(worker)));
        }

        shutdown.cancelled().await;
        self.queue.shut_down();
        for worker in workers {
            let _ = worker.await;
        }
        let _ = pump.await;
        info!("shutting down controller");
        Ok(())
    }

    /// Feeds notifications into the cache and the queue.
    async fn pump(
        self,
        mut source: impl CarrierSource,
        shutdown: CancellationToken,
        synced_tx: oneshot::Sender<()>,
    ) {
        let mut synced_tx = Some(synced_tx);
        loop {
            let notification = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = source.recv() => match received {
                    Ok(Some(notification)) => notification,
                    Ok(None) => {
                        info!("notification stream closed");
                        break;
                    }
                    Err(err) => {
                        error!(error = %format!("{err:#}"), "receiving notifications failed");
                        break;
                    }
                },
            };

            match notification {
                CarrierNotification::Applied(carrier) => {
                    let key = carrier.queue_key();
                    let stale = self.is_stale(&carrier);
                    // The cache mirrors the platform completely; staleness
                    // only gates reconciliation.
                    self.write_cache().insert(key.clone(), carrier);
                    if stale {
                        debug!(key = %key, kind = %self.options.target, "carrier is too old, skip");
                        continue;
                    }
                    info!(key = %key, kind = %self.options.target, "applying carrier");
                    self.queue.add(&key);
                }
                CarrierNotification::Deleted(carrier) => {
                    let key = carrier.queue_key();
                    self.write_cache().remove(&key);
                    if self.is_stale(&carrier) {
                        debug!(key = %key, kind = %self.options.target, "carrier is too old, skip");
                        continue;
                    }
                    info!(key = %key, kind = %self.options.target, "deleting carrier");
                    self.queue.add(&key);
                }
                CarrierNotification::Synced => {
                    if let Some(synced) = synced_tx.take() {
                        let _ = synced.send(());
                    }
                }
            }
        }
    }

    async fn worker_loop(self, worker: usize) {
        debug!(worker, "worker started");
        while self.process_next_item().await {}
        debug!(worker, "worker stopped");
    }

    /// Processes one queued key. Returns `false` once the queue shuts down.
    async fn process_next_item(&self) -> bool {
        let Some(key) = self.queue.get().await else {
            return false;
        };
        debug!(key = %key, "got an item from the queue");

        match self.sync_key(&key).await {
            Ok(()) => self.queue.forget(&key),
            Err(err) => match retry_policy(&err) {
                RetryPolicy::NonRetryable => {
                    error!(
                        key = %key,
                        error = %format!("{err:#}"),
                        "error processing item, dropping it (retrying cannot help)",
                    );
                    self.queue.forget(&key);
                }
                RetryPolicy::Retryable if self.queue.num_requeues(&key) < MAX_RETRIES => {
                    warn!(
                        key = %key,
                        error = %format!("{err:#}"),
                        "error processing item, will retry",
                    );
                    self.queue.add_rate_limited(&key);
                }
                RetryPolicy::Retryable => {
                    error!(
                        key = %key,
                        error = %format!("{err:#}"),
                        "error processing item, giving up",
                    );
                    self.queue.forget(&key);
                }
            },
        }

        self.queue.done(&key);
        true
    }

    /// Reconciles one key against the annotation store.
    async fn sync_key(&self, key: &str) -> anyhow::Result<()> {
        let started = std::time::Instant::now();

        let (name, revision) = key_to_release(key)?;

        let carrier = self.read_cache().get(key).cloned();
        let result = match carrier {
            None => {
                debug!(
                    key = %key,
                    release = %name,
                    revision = %revision,
                    "carrier has been deleted, unregistering release event",
                );
                let result = self.chronicle.unregister(&name, &revision).await;
                if result.is_ok() {
                    if let Some(sink) = &self.sink {
                        sink.unregister_release(key);
                    }
                }
                result
            }
            Some(carrier) => {
                let event = helm::event_from_raw_release(&carrier.release_data)
                    .context("create a release event from raw release data")?;
                if let Some(sink) = &self.sink {
                    sink.register_release(key, &event);
                }
                self.chronicle.register(event).await
            }
        };

        debug!(key = %key, elapsed = ?started.elapsed(), "finished syncing carrier");
        result
    }

    fn is_stale(&self, carrier: &Carrier) -> bool {
        if self.options.max_age.is_zero() {
            return false;
        }
        let Ok(max_age) = chrono::Duration::from_std(self.options.max_age) else {
            return false;
        };
        Utc::now() - max_age > carrier.created_at
    }

    fn read_cache(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Carrier>> {
        self.cache.read().expect("carrier cache lock poisoned")
    }

    fn write_cache(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Carrier>> {
        self.cache.write().expect("carrier cache lock poisoned")
    }
}

/// Classifies a reconciliation failure for the requeue loop.
///
/// Payload-shape and key-shape faults can never succeed on retry; everything
/// else is assumed transient and goes through the backoff schedule.
fn retry_policy(err: &anyhow::Error) -> RetryPolicy {
    if err.downcast_ref::<helm::DecodeError>().is_some()
        || err.downcast_ref::<KeyError>().is_some()
    {
        RetryPolicy::NonRetryable
    } else {
        RetryPolicy::Retryable
    }
}
