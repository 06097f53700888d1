//! The watch-queue controller.
//!
//! Subscribes to carrier-resource notifications from the orchestration
//! platform, deduplicates them through a key-based work queue, and drives
//! workers that reconcile each release revision against the annotation store.
//!
//! ## Control loop
//!
//! One pump task applies every notification to a local carrier cache and
//! enqueues the carrier's key (unless the staleness filter drops it). Worker
//! tasks dequeue keys, look the carrier up in the cache, and either register
//! the decoded release event or, when the carrier is gone, unregister it.
//! Workers are held back until the pump has replicated the initial list, so
//! a freshly started controller never mass-unregisters releases it simply has
//! not seen yet.
//!
//! Failed reconciliations are re-enqueued with exponential backoff up to a
//! retry ceiling; payload-shape and key-shape faults are dropped immediately
//! because no retry can fix them. No failure is fatal to the process.
//!
//! ## Architectural Layer
//!
//! **Orchestration.** The platform transport is behind [`CarrierSource`]; the
//! annotation store is behind [`chronologist::Chronicle`]. This crate owns
//! scheduling, dedup, retries, and shutdown, and contains no wire formats.

mod carrier;
mod controller;
mod key;
mod queue;

pub use carrier::{Carrier, CarrierNotification, CarrierSource, WatchTarget, WatchTargetError};
pub use controller::{Controller, Options, MAX_RETRIES};
pub use key::{key_to_release, KeyError};
pub use queue::WorkQueue;
