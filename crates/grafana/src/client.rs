//! HTTP client for the annotation store API.

use thiserror::Error;

use async_trait::async_trait;

use crate::annotation::{Annotation, Annotator, GetAnnotationsParams};

const BASE_PATH: &str = "/api";

/// A failure talking to the annotation store.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The request could not be sent or the response body could not be read.
    #[error("annotation store request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("annotation store responded with status {status}")]
    Status {
        /// HTTP status carried by the response.
        status: reqwest::StatusCode,
    },
}

/// Annotation store HTTP API client.
///
/// Implements [`Annotator`] over the store's REST surface. Every request
/// carries the bearer credential and a JSON body where applicable.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl Client {
    /// Returns a new client for the store at `base_url`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::new(),
        }
    }

    fn annotations_url(&self) -> String {
        format!("{}{}/annotations", self.base_url, BASE_PATH)
    }

    fn annotation_url(&self, id: u64) -> String {
        format!("{}{}/annotations/{}", self.base_url, BASE_PATH, id)
    }

    async fn create_annotation(&self, annotation: &Annotation) -> Result<(), ClientError> {
        let response = self
            .http
            .post(self.annotations_url())
            .bearer_auth(&self.api_key)
            .json(annotation)
            .send()
            .await?;
        ensure_success(&response)?;
        Ok(())
    }

    async fn update_annotation(&self, annotation: &Annotation) -> Result<(), ClientError> {
        let response = self
            .http
            .put(self.annotation_url(annotation.id))
            .bearer_auth(&self.api_key)
            .json(annotation)
            .send()
            .await?;
        ensure_success(&response)?;
        Ok(())
    }
}

fn ensure_success(response: &reqwest::Response) -> Result<(), ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status { status });
    }
    Ok(())
}

#[async_trait]
impl Annotator for Client {
    async fn save_annotation(&self, annotation: Annotation) -> Result<(), ClientError> {
        // Create-or-update is dispatched solely by the presence of the
        // store-assigned id on the outgoing record.
        if annotation.id == 0 {
            self.create_annotation(&annotation).await
        } else {
            self.update_annotation(&annotation).await
        }
    }

    async fn get_annotations(
        &self,
        params: GetAnnotationsParams,
    ) -> Result<Vec<Annotation>, ClientError> {
        let query: Vec<(&str, &str)> = params
            .tags
            .iter()
            .map(|tag| ("tags", tag.as_str()))
            .collect();

        let response = self
            .http
            .get(self.annotations_url())
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await?;
        ensure_success(&response)?;

        Ok(response.json().await?)
    }

    async fn delete_annotation(&self, id: u64) -> Result<(), ClientError> {
        let response = self
            .http
            .delete(self.annotation_url(id))
            .bearer_auth(&self.api_key)
            .send()
            .await?;
        ensure_success(&response)?;
        Ok(())
    }
}
