//! Errors surfaced to callers of the engine.

use thiserror::Error;

use crate::resource::ResourceKey;
use crate::store::StoreError;

/// Outcome of a failed reconcile, get or status update.
///
/// The engine never retries or absorbs these; each one tells the caller what
/// kind of recovery is appropriate (see [`ReconcileError::disposition`]).
#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    /// The target did not exist at the time of the write.
    #[error("{0} not found")]
    NotFound(ResourceKey),

    /// A create raced with another creator.
    #[error("{0} already exists")]
    AlreadyExists(ResourceKey),

    /// The version token did not match the store's current token.
    #[error("{key} was modified concurrently: {message}")]
    Conflict { key: ResourceKey, message: String },

    /// The store or the engine rejected the payload.
    #[error("invalid {key}: {message}")]
    Invalid { key: ResourceKey, message: String },

    /// Network error, timeout or unavailable store.
    #[error("transient failure on {key}: {message}")]
    Transient { key: ResourceKey, message: String },
}

/// What a control loop should do after a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Re-read the resource and plan again.
    Replan,
    /// Retry the whole cycle later with backoff.
    Backoff,
    /// Needs operator attention; log it.
    Escalate,
}

impl ReconcileError {
    pub(crate) fn from_store(key: &ResourceKey, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => ReconcileError::NotFound(key.clone()),
            StoreError::AlreadyExists(_) => ReconcileError::AlreadyExists(key.clone()),
            StoreError::VersionMismatch { .. } => ReconcileError::Conflict {
                key: key.clone(),
                message: err.to_string(),
            },
            StoreError::Invalid(message) => ReconcileError::Invalid {
                key: key.clone(),
                message,
            },
            StoreError::Unavailable(_) | StoreError::Internal(_) => ReconcileError::Transient {
                key: key.clone(),
                message: err.to_string(),
            },
        }
    }

    pub(crate) fn invalid(key: &ResourceKey, message: impl Into<String>) -> Self {
        ReconcileError::Invalid {
            key: key.clone(),
            message: message.into(),
        }
    }

    pub(crate) fn transient(key: &ResourceKey, message: impl Into<String>) -> Self {
        ReconcileError::Transient {
            key: key.clone(),
            message: message.into(),
        }
    }

    /// Key of the resource the failed operation targeted.
    pub fn key(&self) -> &ResourceKey {
        match self {
            ReconcileError::NotFound(key) | ReconcileError::AlreadyExists(key) => key,
            ReconcileError::Conflict { key, .. }
            | ReconcileError::Invalid { key, .. }
            | ReconcileError::Transient { key, .. } => key,
        }
    }

    pub fn disposition(&self) -> Disposition {
        match self {
            ReconcileError::Conflict { .. } | ReconcileError::NotFound(_) => Disposition::Replan,
            ReconcileError::Transient { .. } => Disposition::Backoff,
            ReconcileError::Invalid { .. } | ReconcileError::AlreadyExists(_) => {
                Disposition::Escalate
            }
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ReconcileError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Transient { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ResourceKey {
        ResourceKey::new("Widget", "ns", "w1")
    }

    #[test]
    fn test_store_errors_map_to_distinct_outcomes() {
        let conflict = ReconcileError::from_store(
            &key(),
            StoreError::VersionMismatch {
                expected: "1".into(),
                actual: "2".into(),
            },
        );
        let not_found = ReconcileError::from_store(&key(), StoreError::NotFound("x".into()));

        assert!(conflict.is_conflict());
        assert!(!conflict.is_not_found());
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
    }

    #[test]
    fn test_unavailable_and_internal_are_transient() {
        for err in [
            StoreError::Unavailable("down".into()),
            StoreError::Internal("boom".into()),
        ] {
            assert!(ReconcileError::from_store(&key(), err).is_transient());
        }
    }

    #[test]
    fn test_disposition() {
        assert_eq!(
            ReconcileError::NotFound(key()).disposition(),
            Disposition::Replan
        );
        assert_eq!(
            ReconcileError::transient(&key(), "timeout").disposition(),
            Disposition::Backoff
        );
        assert_eq!(
            ReconcileError::AlreadyExists(key()).disposition(),
            Disposition::Escalate
        );
        assert_eq!(
            ReconcileError::invalid(&key(), "bad").disposition(),
            Disposition::Escalate
        );
    }

    #[test]
    fn test_error_message_names_key() {
        let err = ReconcileError::NotFound(key());
        assert_eq!(err.to_string(), "Widget/ns/w1 not found");
        assert_eq!(err.key(), &key());
    }
}
