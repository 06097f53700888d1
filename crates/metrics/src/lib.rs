//! Local metrics exposition of the release-event stream.
//!
//! Implements [`chronologist::ReleaseSink`] over a Prometheus registry. Not
//! part of the reconciliation correctness path; the controller feeds it the
//! same stream of events it reconciles.

use std::collections::HashMap;
use std::sync::Mutex;

use prometheus::{IntGaugeVec, Opts, Registry};

use chronologist::{ReleaseEvent, ReleaseSink};

/// Release revisions currently known to the controller, one series per
/// revision, valued at the revision's last-deployed instant.
pub struct ReleaseMetrics {
    releases: IntGaugeVec,
    // Label sets by queue key, so unregistration can drop the right series.
    labels_by_key: Mutex<HashMap<String, [String; 4]>>,
    registry: Registry,
}

impl ReleaseMetrics {
    /// Returns a new sink with its own registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let releases = IntGaugeVec::new(
            Opts::new(
                "chronologist_release",
                "Tracked release revisions, valued at their last-deployed instant \
                 in seconds since the epoch.",
            ),
            &[
                "release_type",
                "release_name",
                "release_revision",
                "release_namespace",
            ],
        )?;
        registry.register(Box::new(releases.clone()))?;
        Ok(Self {
            releases,
            labels_by_key: Mutex::new(HashMap::new()),
            registry,
        })
    }

    /// Returns the registry holding the release series, for exposition.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl ReleaseSink for ReleaseMetrics {
    fn register_release(&self, key: &str, event: &ReleaseEvent) {
        let labels = [
            event.kind.as_str().to_owned(),
            event.name.clone(),
            event.revision.clone(),
            event.namespace.clone(),
        ];

        let mut by_key = self.labels_by_key.lock().expect("metrics lock poisoned");
        if let Some(previous) = by_key.insert(key.to_owned(), labels.clone()) {
            if previous != labels {
                let _ = self
                    .releases
                    .remove_label_values(&label_refs(&previous));
            }
        }
        self.releases
            .with_label_values(&label_refs(&labels))
            .set(event.time.timestamp());
    }

    fn unregister_release(&self, key: &str) {
        let mut by_key = self.labels_by_key.lock().expect("metrics lock poisoned");
        if let Some(labels) = by_key.remove(key) {
            let _ = self.releases.remove_label_values(&label_refs(&labels));
        }
    }
}

fn label_refs(labels: &[String; 4]) -> [&str; 4] {
    [
        labels[0].as_str(),
        labels[1].as_str(),
        labels[2].as_str(),
        labels[3].as_str(),
    ]
}
