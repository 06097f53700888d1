//! Carrier resources and the inbound notification boundary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Which carrier-resource kind a controller run watches.
///
/// The platform's deployment tooling stores release payloads in one of two
/// interchangeable resource kinds; a single controller run watches exactly
/// one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    /// Watch config-map carriers.
    ConfigMaps,
    /// Watch secret carriers.
    Secrets,
}

/// Rejected watch-target configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WatchTargetError {
    /// Both carrier kinds were selected.
    #[error("watching config maps and secrets at the same time is not supported")]
    Both,
    /// Neither carrier kind was selected.
    #[error("either config maps or secrets must be watched")]
    Neither,
}

impl WatchTarget {
    /// Resolves the two configuration flags into a watch target.
    ///
    /// Exactly one flag must be set; anything else is rejected here, before
    /// any controller is constructed.
    pub fn from_flags(
        watch_config_maps: bool,
        watch_secrets: bool,
    ) -> Result<Self, WatchTargetError> {
        match (watch_config_maps, watch_secrets) {
            (true, true) => Err(WatchTargetError::Both),
            (false, false) => Err(WatchTargetError::Neither),
            (true, false) => Ok(Self::ConfigMaps),
            (false, true) => Ok(Self::Secrets),
        }
    }

    /// Returns the resource kind name, for logs.
    pub fn kind(self) -> &'static str {
        match self {
            Self::ConfigMaps => "ConfigMap",
            Self::Secrets => "Secret",
        }
    }
}

impl std::fmt::Display for WatchTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind())
    }
}

/// A snapshot of one carrier resource.
///
/// The resource name embeds the release revision (`<release>.v<revision>`),
/// so the queue key derived from a carrier identifies one release revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Carrier {
    /// Namespace the resource lives in.
    pub namespace: String,
    /// Resource name, `<release>.v<revision>`.
    pub name: String,
    /// Instant the resource was created.
    pub created_at: DateTime<Utc>,
    /// The opaque release payload (base64 text), empty when absent.
    pub release_data: String,
}

impl Carrier {
    /// Returns the work-queue key for this carrier.
    pub fn queue_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// One notification from the platform subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CarrierNotification {
    /// The carrier was added or updated. The platform watch does not
    /// distinguish the two; reconciliation re-derives state either way.
    Applied(Carrier),
    /// The carrier was deleted; carries its last known state.
    Deleted(Carrier),
    /// The initial list has been fully replicated. Delivered once per
    /// subscription, after the initial carriers arrive as `Applied`.
    Synced,
}

/// The inbound subscription boundary.
///
/// Implementations replicate the platform's list/watch API for carriers
/// matching the ownership label filter of the configured [`WatchTarget`].
#[async_trait]
pub trait CarrierSource: Send {
    /// Receives the next notification. `Ok(None)` means the subscription has
    /// ended; an error means it failed in a way the source could not recover
    /// from.
    async fn recv(&mut self) -> anyhow::Result<Option<CarrierNotification>>;
}

/// Plain channels are a valid source; tests and embedders feed notifications
/// directly.
#[async_trait]
impl CarrierSource for tokio::sync::mpsc::Receiver<CarrierNotification> {
    async fn recv(&mut self) -> anyhow::Result<Option<CarrierNotification>> {
        Ok(tokio::sync::mpsc::Receiver::recv(self).await)
    }
}
