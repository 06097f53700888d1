//! Queue-key parsing.

use thiserror::Error;

/// A queue key that does not name a release revision.
///
/// Key faults are structural: the same key fails the same way forever, so
/// they are dropped rather than retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The key carries no `<namespace>/` prefix.
    #[error("queue key {key:?} is not of the form <namespace>/<name>")]
    MissingNamespace {
        /// The offending key.
        key: String,
    },
    /// The resource name embeds no `.v<revision>` suffix.
    #[error("queue key {key:?} does not embed a release revision")]
    MissingRevision {
        /// The offending key.
        key: String,
    },
    /// The revision is not a non-negative decimal integer.
    #[error("queue key {key:?} carries a non-numeric release revision")]
    InvalidRevision {
        /// The offending key.
        key: String,
    },
}

/// Splits a queue key into release name and revision.
///
/// Carrier resources are named after the release revision they store, e.g.
/// `foo.v2` holds revision 2 of release `foo`, so keys look like
/// `<namespace>/<name>.v<revision>`. The split takes the *last* `.v` so
/// dotted release names parse correctly.
pub fn key_to_release(key: &str) -> Result<(String, String), KeyError> {
    let (_namespace, resource) = key
        .split_once('/')
        .ok_or_else(|| KeyError::MissingNamespace {
            key: key.to_owned(),
        })?;

    let (name, revision) = resource
        .rsplit_once(".v")
        .ok_or_else(|| KeyError::MissingRevision {
            key: key.to_owned(),
        })?;
    if name.is_empty() {
        return Err(KeyError::MissingRevision {
            key: key.to_owned(),
        });
    }
    if revision.is_empty() || !revision.bytes().all(|b| b.is_ascii_digit()) {
        return Err(KeyError::InvalidRevision {
            key: key.to_owned(),
        });
    }

    Ok((name.to_owned(), revision.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_name_and_revision() {
        assert_eq!(
            key_to_release("default/foo.v1"),
            Ok(("foo".to_owned(), "1".to_owned()))
        );
        assert_eq!(
            key_to_release("monitoring/bar-baz.v42"),
            Ok(("bar-baz".to_owned(), "42".to_owned()))
        );
    }

    #[test]
    fn dotted_names_split_on_the_last_revision_marker() {
        assert_eq!(
            key_to_release("default/sh.helm.release.v1.foo.v2"),
            Ok(("sh.helm.release.v1.foo".to_owned(), "2".to_owned()))
        );
    }

    #[test]
    fn rejects_malformed_keys() {
        assert_eq!(
            key_to_release("foo.v1"),
            Err(KeyError::MissingNamespace {
                key: "foo.v1".to_owned()
            })
        );
        assert_eq!(
            key_to_release("default/foo"),
            Err(KeyError::MissingRevision {
                key: "default/foo".to_owned()
            })
        );
        assert_eq!(
            key_to_release("default/foo.vNaN"),
            Err(KeyError::InvalidRevision {
                key: "default/foo.vNaN".to_owned()
            })
        );
        assert_eq!(
            key_to_release("default/foo.v"),
            Err(KeyError::InvalidRevision {
                key: "default/foo.v".to_owned()
            })
        );
    }
}
