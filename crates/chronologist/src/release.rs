//! Release event value types.
//!
//! A [`ReleaseEvent`] is the neutral representation of one deployment of one
//! release revision. It can be decoded from the platform's release payload and
//! rendered as a dashboard annotation; see the `helm` and `grafana` crates for
//! those codecs.

use chrono::{DateTime, Utc};

/// The kind of deployment a release event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReleaseType {
    /// A forward deployment of a new revision.
    Rollout,
    /// A re-deployment of an earlier revision.
    Rollback,
    /// The kind could not be determined from the release metadata.
    Unknown,
}

impl ReleaseType {
    /// Returns the canonical string form used in annotation tags.
    ///
    /// [`ReleaseType::Unknown`] renders as the empty string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rollout => "rollout",
            Self::Rollback => "rollback",
            Self::Unknown => "",
        }
    }

    /// Parses a string form back into a release type.
    ///
    /// Any value other than the two canonical forms maps to
    /// [`ReleaseType::Unknown`], so tags written by a future producer never
    /// fail to parse.
    pub fn parse(value: &str) -> Self {
        match value {
            "rollout" => Self::Rollout,
            "rollback" => Self::Rollback,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One deployment of one release revision, in neutral form.
///
/// The pair `(name, revision)` uniquely identifies a release event and is the
/// reconciliation key. The value is immutable once constructed; reconciliation
/// compares whole events with [`ReleaseEvent::differences`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseEvent {
    /// Instant the revision was last deployed, truncated to whole seconds, UTC.
    pub time: DateTime<Utc>,
    /// Rollout, rollback, or unknown.
    pub kind: ReleaseType,
    /// Status string taken verbatim from the release metadata.
    pub status: String,
    /// Release name. Stable across revisions; carries no revision suffix.
    pub name: String,
    /// Release revision, the decimal form of a non-negative integer.
    pub revision: String,
    /// Namespace the release belongs to.
    pub namespace: String,
}

impl ReleaseEvent {
    /// Compares two events field by field and returns a human-readable diff.
    ///
    /// An empty result means the events are equal. Reconciliation uses this
    /// both to decide whether a remote record needs an update and to say why
    /// in the logs.
    pub fn differences(&self, other: &ReleaseEvent) -> Vec<String> {
        let mut diffs = Vec::new();
        if self.time != other.time {
            diffs.push(format!("time: {} != {}", self.time, other.time));
        }
        if self.kind != other.kind {
            diffs.push(format!("type: {:?} != {:?}", self.kind, other.kind));
        }
        if self.status != other.status {
            diffs.push(format!("status: {} != {}", self.status, other.status));
        }
        if self.name != other.name {
            diffs.push(format!("name: {} != {}", self.name, other.name));
        }
        if self.revision != other.revision {
            diffs.push(format!("revision: {} != {}", self.revision, other.revision));
        }
        if self.namespace != other.namespace {
            diffs.push(format!(
                "namespace: {} != {}",
                self.namespace, other.namespace
            ));
        }
        diffs
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn event() -> ReleaseEvent {
        ReleaseEvent {
            time: Utc.with_ymd_and_hms(2019, 1, 2, 15, 4, 5).unwrap(),
            kind: ReleaseType::Rollout,
            status: "DEPLOYED".to_owned(),
            name: "foo".to_owned(),
            revision: "1".to_owned(),
            namespace: "default".to_owned(),
        }
    }

    #[test]
    fn release_type_string_forms_round_trip() {
        for kind in [ReleaseType::Rollout, ReleaseType::Rollback] {
            assert_eq!(ReleaseType::parse(kind.as_str()), kind);
        }
        assert_eq!(ReleaseType::parse(""), ReleaseType::Unknown);
        assert_eq!(ReleaseType::parse("canary"), ReleaseType::Unknown);
    }

    #[test]
    fn equal_events_have_no_differences() {
        assert!(event().differences(&event()).is_empty());
    }

    #[test]
    fn differences_name_each_changed_field() {
        let mut other = event();
        other.status = "FAILED".to_owned();
        other.revision = "2".to_owned();

        let diffs = event().differences(&other);
        assert_eq!(diffs.len(), 2);
        assert!(diffs[0].starts_with("status:"));
        assert!(diffs[1].starts_with("revision:"));
    }
}
