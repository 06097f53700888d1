//! The reconciling chronicle.

use anyhow::Context as _;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use chronologist::ReleaseEvent;

use crate::annotation::{Annotation, Annotator, GetAnnotationsParams};
use crate::client::ClientError;

/// Registers release events in the annotation store.
///
/// Implements [`chronologist::Chronicle`] over any [`Annotator`]. Each call
/// queries the store for the release key first and then issues the minimal
/// corrective write, so repeated calls with the same event converge without
/// duplicate records.
#[derive(Debug)]
pub struct Chronicle<A> {
    grafana: A,
}

impl<A> Chronicle<A> {
    /// Returns a new chronicle over the given annotation store.
    pub fn new(grafana: A) -> Self {
        Self { grafana }
    }
}

#[async_trait]
impl<A: Annotator> chronologist::Chronicle for Chronicle<A> {
    async fn register(&self, event: ReleaseEvent) -> anyhow::Result<()> {
        let params = GetAnnotationsParams::by_release(&event.name, &event.revision);
        let annotations = self
            .grafana
            .get_annotations(params)
            .await
            .context("get annotations from store")?;

        if annotations.len() > 1 {
            // More than one record per key is a state this engine does not
            // know how to merge; guessing which record is authoritative could
            // destroy data. Report and leave the store untouched.
            warn!(
                count = annotations.len(),
                release = %event.name,
                revision = %event.revision,
                "found multiple annotations for the release event, \
                 sync for this case is not implemented",
            );
            return Ok(());
        }

        let Some(existing) = annotations.into_iter().next() else {
            debug!(
                release = %event.name,
                revision = %event.revision,
                "no annotation found for the release event, creating a new one",
            );
            self.grafana
                .save_annotation(Annotation::from_event(0, &event))
                .await
                .context("create annotation in store")?;
            return Ok(());
        };

        let diffs = event.differences(&existing.to_event());
        if diffs.is_empty() {
            debug!(
                release = %event.name,
                revision = %event.revision,
                "annotation correctly reflects the release event, sync is not required",
            );
            return Ok(());
        }

        debug!(
            release = %event.name,
            revision = %event.revision,
            differences = ?diffs,
            "annotation differs from the release event, syncing",
        );
        self.grafana
            .save_annotation(Annotation::from_event(existing.id, &event))
            .await
            .context("update annotation in store")?;
        Ok(())
    }

    async fn unregister(&self, name: &str, revision: &str) -> anyhow::Result<()> {
        let params = GetAnnotationsParams::by_release(name, revision);
        let annotations = self
            .grafana
            .get_annotations(params)
            .await
            .context("get annotations from store")?;

        // Attempt every delete even when some fail, then surface the
        // collected failures as one error.
        let mut failures = Vec::new();
        for annotation in annotations {
            debug!(
                id = annotation.id,
                release = %name,
                revision = %revision,
                "deleting annotation",
            );
            if let Err(err) = self.grafana.delete_annotation(annotation.id).await {
                failures.push(err);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(DeleteAggregateError { failures }.into())
        }
    }
}

/// The failures collected while deleting a release's annotations.
#[derive(Debug, Error)]
#[error("delete annotations: {}", render_failures(.failures))]
pub struct DeleteAggregateError {
    /// One entry per failed delete.
    pub failures: Vec<ClientError>,
}

fn render_failures(failures: &[ClientError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
