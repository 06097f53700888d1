//! Release payload decoding.
//!
//! The orchestration platform stores each release revision as an opaque
//! payload inside a carrier resource: a base64-encoded, usually gzipped JSON
//! document. This crate unwraps that envelope and assembles the neutral
//! [`chronologist::ReleaseEvent`] the reconciliation engine works with.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** The payload envelope and the release document schema
//! are external formats owned by the platform's deployment tooling; the
//! domain crate never sees them.

mod decoder;
mod release;

pub use decoder::{decode_release, event_from_raw_release, DecodeError};
pub use release::{event_from_release, Release, ReleaseInfo};
