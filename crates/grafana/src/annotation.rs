//! The annotation wire format and its codec.

use async_trait::async_trait;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use chronologist::{ReleaseEvent, ReleaseType};

use crate::client::ClientError;

/// Tag marking an annotation as managed by this system.
///
/// Every query and every write is scoped by this marker, so annotations
/// created by other writers are never touched.
pub const OWNERSHIP_TAG: &str = "heritage=chronologist";

/// A store annotation, as carried on the wire.
///
/// `id` is assigned by the store; `0` means the annotation has not been
/// created yet, and the field is omitted from request bodies in that case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Store-assigned identifier; `0` until the annotation is created.
    #[serde(default, skip_serializing_if = "id_is_unset")]
    pub id: u64,
    /// Annotation instant in epoch milliseconds.
    #[serde(rename = "time")]
    pub time_millis: i64,
    /// Unordered `key=value` tag set.
    pub tags: Vec<String>,
    /// Human-readable rendering shown on dashboard graphs.
    pub text: String,
}

fn id_is_unset(id: &u64) -> bool {
    *id == 0
}

impl Annotation {
    /// Builds the annotation that represents `event`, carrying `id`.
    ///
    /// Deterministic: tags are emitted in a fixed order and the same event
    /// always yields the same annotation for the same id.
    pub fn from_event(id: u64, event: &ReleaseEvent) -> Self {
        Self {
            id,
            time_millis: event.time.timestamp() * 1000,
            tags: vec![
                "event=release".to_owned(),
                OWNERSHIP_TAG.to_owned(),
                format!("release_type={}", event.kind),
                format!("release_status={}", event.status),
                format!("release_name={}", event.name),
                format!("release_revision={}", event.revision),
                format!("release_namespace={}", event.namespace),
            ],
            text: format!("{} release {}", capitalize(event.kind.as_str()), event.name),
        }
    }

    /// Reassembles the release event this annotation represents.
    ///
    /// Total: tags without a recognized prefix are ignored, and an
    /// unrecognized `release_type=` value maps to [`ReleaseType::Unknown`],
    /// so annotations normalized by the store or written by a newer producer
    /// still decode. Inverse of [`Annotation::from_event`] for every valid
    /// event, excluding the store-assigned id.
    pub fn to_event(&self) -> ReleaseEvent {
        let mut event = ReleaseEvent {
            time: DateTime::from_timestamp(self.time_millis / 1000, 0)
                .unwrap_or(DateTime::UNIX_EPOCH),
            kind: ReleaseType::Unknown,
            status: String::new(),
            name: String::new(),
            revision: String::new(),
            namespace: String::new(),
        };

        for tag in &self.tags {
            if let Some(value) = tag.strip_prefix("release_type=") {
                event.kind = ReleaseType::parse(value);
            } else if let Some(value) = tag.strip_prefix("release_status=") {
                event.status = value.to_owned();
            } else if let Some(value) = tag.strip_prefix("release_name=") {
                event.name = value.to_owned();
            } else if let Some(value) = tag.strip_prefix("release_revision=") {
                event.revision = value.to_owned();
            } else if let Some(value) = tag.strip_prefix("release_namespace=") {
                event.namespace = value.to_owned();
            }
        }

        event
    }
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Query parameters for listing annotations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetAnnotationsParams {
    /// Tags every returned annotation must carry.
    pub tags: Vec<String>,
}

impl GetAnnotationsParams {
    /// Returns params filtering by the ownership marker and a release key.
    pub fn by_release(name: &str, revision: &str) -> Self {
        Self {
            tags: vec![
                OWNERSHIP_TAG.to_owned(),
                format!("release_name={name}"),
                format!("release_revision={revision}"),
            ],
        }
    }
}

/// Management of annotations in the remote store.
#[async_trait]
pub trait Annotator: Send + Sync {
    /// Saves the annotation, creating it when its id is unset and updating it
    /// otherwise.
    async fn save_annotation(&self, annotation: Annotation) -> Result<(), ClientError>;

    /// Returns annotations matching the query params.
    async fn get_annotations(
        &self,
        params: GetAnnotationsParams,
    ) -> Result<Vec<Annotation>, ClientError>;

    /// Deletes the annotation with the given id.
    async fn delete_annotation(&self, id: u64) -> Result<(), ClientError>;
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

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
    fn from_event_builds_deterministic_annotation() {
        let annotation = Annotation::from_event(0, &event());

        assert_eq!(annotation.id, 0);
        assert_eq!(annotation.time_millis, 1_546_441_445_000);
        assert_eq!(
            annotation.tags,
            vec![
                "event=release",
                "heritage=chronologist",
                "release_type=rollout",
                "release_status=DEPLOYED",
                "release_name=foo",
                "release_revision=1",
                "release_namespace=default",
            ],
        );
        assert_eq!(annotation.text, "Rollout release foo");
    }

    #[test]
    fn unset_id_is_omitted_from_request_bodies() {
        let body = serde_json::to_value(Annotation::from_event(0, &event())).unwrap();
        assert!(body.get("id").is_none());

        let body = serde_json::to_value(Annotation::from_event(123, &event())).unwrap();
        assert_eq!(body["id"], 123);
        assert_eq!(body["time"], 1_546_441_445_000i64);
    }

    #[test]
    fn to_event_maps_unknown_release_type_to_unknown() {
        let mut annotation = Annotation::from_event(0, &event());
        annotation.tags[2] = "release_type=bluegreen".to_owned();

        assert_eq!(annotation.to_event().kind, ReleaseType::Unknown);
    }

    #[test]
    fn to_event_ignores_unrecognized_tags() {
        let mut annotation = Annotation::from_event(0, &event());
        annotation.tags.push("dashboard=42".to_owned());

        assert_eq!(annotation.to_event(), event());
    }

    #[test]
    fn by_release_scopes_query_to_ownership_and_key() {
        let params = GetAnnotationsParams::by_release("foo", "1");
        assert_eq!(
            params.tags,
            vec!["heritage=chronologist", "release_name=foo", "release_revision=1"],
        );
    }

    fn arb_event() -> impl Strategy<Value = ReleaseEvent> {
        (
            0i64..=4_102_444_800,
            prop::sample::select(vec![
                ReleaseType::Rollout,
                ReleaseType::Rollback,
                ReleaseType::Unknown,
            ]),
            "[A-Z]{1,12}",
            "[a-z][a-z0-9-]{0,20}",
            0u32..=100_000,
            "[a-z][a-z0-9-]{0,15}",
        )
            .prop_map(|(secs, kind, status, name, revision, namespace)| ReleaseEvent {
                time: DateTime::from_timestamp(secs, 0).unwrap(),
                kind,
                status,
                name,
                revision: revision.to_string(),
                namespace,
            })
    }

    proptest! {
        // Round-trip law: decoding an encoded event yields the event back,
        // for any store-assigned id.
        #[test]
        fn round_trips_through_annotation(event in arb_event(), id in prop::num::u64::ANY) {
            let annotation = Annotation::from_event(id, &event);
            prop_assert_eq!(annotation.to_event(), event);
        }
    }
}
