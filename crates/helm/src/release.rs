//! The release document schema and its mapping to domain events.

use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use chronologist::{ReleaseEvent, ReleaseType};

/// A deployed release revision, as serialized by the deployment tooling.
///
/// External format: only the fields Chronologist reads are modeled; unknown
/// fields are ignored on deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    /// Release name, stable across revisions.
    pub name: String,
    /// Namespace the release is installed into.
    #[serde(default)]
    pub namespace: String,
    /// Revision number, starting at 1.
    pub version: u64,
    /// Status block for this revision.
    pub info: ReleaseInfo,
}

/// Status block of a [`Release`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseInfo {
    /// Status of this revision, e.g. `deployed` or `superseded`.
    #[serde(default)]
    pub status: String,
    /// Human-readable description of the action that produced this revision.
    #[serde(default)]
    pub description: String,
    /// Instant this revision was last deployed.
    pub last_deployed: DateTime<Utc>,
}

/// Assembles a release event from a decoded release.
///
/// The same release always yields the same event. The last-deployed instant is
/// used rather than first-created because it is unique per revision, while a
/// release's creation time never changes across revisions. The instant is
/// truncated to whole seconds so it survives the annotation store's
/// millisecond representation unchanged.
pub fn event_from_release(release: &Release) -> ReleaseEvent {
    let time = release
        .info
        .last_deployed
        .with_nanosecond(0)
        .unwrap_or(release.info.last_deployed);

    // Classification is a substring heuristic over the human-authored
    // description; the release document carries no explicit rollout/rollback
    // field. Known precision gap: a rollout described with the word
    // "rollback" in it is misclassified.
    let kind = if release.info.description.to_lowercase().contains("rollback") {
        ReleaseType::Rollback
    } else {
        ReleaseType::Rollout
    };

    ReleaseEvent {
        time,
        kind,
        status: release.info.status.clone(),
        name: release.name.clone(),
        revision: release.version.to_string(),
        namespace: release.namespace.clone(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn release(description: &str) -> Release {
        Release {
            name: "foo".to_owned(),
            namespace: "default".to_owned(),
            version: 3,
            info: ReleaseInfo {
                status: "deployed".to_owned(),
                description: description.to_owned(),
                last_deployed: Utc.with_ymd_and_hms(2019, 1, 2, 15, 4, 5).unwrap(),
            },
        }
    }

    #[test]
    fn event_carries_release_fields_verbatim() {
        let event = event_from_release(&release("Install complete"));
        assert_eq!(event.name, "foo");
        assert_eq!(event.revision, "3");
        assert_eq!(event.namespace, "default");
        assert_eq!(event.status, "deployed");
        assert_eq!(event.kind, ReleaseType::Rollout);
    }

    #[test]
    fn subsecond_precision_is_truncated() {
        let mut rel = release("Install complete");
        rel.info.last_deployed = Utc.with_ymd_and_hms(2019, 1, 2, 15, 4, 5).unwrap()
            + chrono::Duration::milliseconds(750);

        let event = event_from_release(&rel);
        assert_eq!(event.time, Utc.with_ymd_and_hms(2019, 1, 2, 15, 4, 5).unwrap());
    }

    #[test]
    fn rollback_description_classifies_as_rollback() {
        let event = event_from_release(&release("Rollback to 2"));
        assert_eq!(event.kind, ReleaseType::Rollback);

        let event = event_from_release(&release("ROLLBACK complete"));
        assert_eq!(event.kind, ReleaseType::Rollback);
    }
}
