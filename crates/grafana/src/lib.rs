//! Annotation store adapter.
//!
//! Implements the [`chronologist::Chronicle`] port against a Grafana-style
//! annotation HTTP API. Three pieces:
//!
//! - [`Annotation`] and its codec — the lossless mapping between a domain
//!   release event and the tag/text representation the store keeps.
//! - [`Client`] — the HTTP client implementing the [`Annotator`] port over
//!   `GET/POST /api/annotations` and `PUT/DELETE /api/annotations/{id}`.
//! - [`Chronicle`] — the reconciler: queries the store by release key and
//!   issues the minimal corrective write (create, update, delete, or none).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** All HTTP transport, authentication, and wire-format
//! details live here; the domain crate sees only its own port traits.
//!
//! ## Consistency model
//!
//! The chronicle holds no durable record of what it last wrote. Every
//! operation re-derives truth by querying the store first, which makes the
//! engine safe to crash and restart at any point, at the cost of one extra
//! round trip per operation.

mod annotation;
mod chronicle;
mod client;

pub use annotation::{Annotation, Annotator, GetAnnotationsParams, OWNERSHIP_TAG};
pub use chronicle::{Chronicle, DeleteAggregateError};
pub use client::{Client, ClientError};
