//! Resource store abstraction
//!
//! The reconciler never talks to the cluster directly. It goes through
//! [`ResourceStore`], which addresses objects by (kind, namespace, name) and
//! reports failures through the [`StoreError`] taxonomy.
//!
//! - [`KubeStore`] backs the trait with a live `kube::Client`
//! - [`MemoryStore`] keeps everything in process (tests, dry runs)

mod kubernetes;
mod memory;

pub use kubernetes::KubeStore;
pub use memory::{MemoryStore, Mutation, Operation};

use async_trait::async_trait;
use thiserror::Error;

use crate::cluster::{ChildKind, ChildObject, WorkerPool};

/// Errors reported by a resource store
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflict on {key}: {message}")]
    Conflict { key: String, message: String },

    #[error("API rejected {key} ({code}): {message}")]
    Rejected {
        key: String,
        code: u16,
        message: String,
    },

    #[error("expected a {expected} but the store returned a {found}")]
    KindMismatch { expected: ChildKind, found: ChildKind },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Convenience constructor for an optimistic-concurrency failure
    pub fn conflict(key: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Conflict {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Human-readable address of an object, used in errors and logs
pub fn object_key(kind: &str, namespace: &str, name: &str) -> String {
    format!("{} {}/{}", kind, namespace, name)
}

/// Capability to read and mutate namespaced cluster objects
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch a WorkerPool by namespace and name
    async fn get_pool(&self, namespace: &str, name: &str) -> StoreResult<WorkerPool>;

    /// List WorkerPools in a namespace, or in every namespace when `None`
    async fn list_pools(&self, namespace: Option<&str>) -> StoreResult<Vec<WorkerPool>>;

    /// Fetch a child object by kind, namespace and name
    async fn get(&self, kind: ChildKind, namespace: &str, name: &str) -> StoreResult<ChildObject>;

    /// Create a child object; fails with `AlreadyExists` if the name is taken
    async fn create(&self, object: &ChildObject) -> StoreResult<ChildObject>;

    /// Replace a child object; fails with `Conflict` on a stale resourceVersion
    async fn update(&self, object: &ChildObject) -> StoreResult<ChildObject>;

    /// List child objects of one kind in a namespace
    async fn list(&self, kind: ChildKind, namespace: &str) -> StoreResult<Vec<ChildObject>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(StoreError::NotFound("Job default/a".into()).is_not_found());
        assert!(StoreError::AlreadyExists("Job default/a".into()).is_already_exists());
        assert!(StoreError::conflict("Job default/a", "stale").is_conflict());
        assert!(!StoreError::Unavailable("timeout".into()).is_conflict());
    }

    #[test]
    fn test_error_display() {
        let key = object_key("StatefulSet", "default", "g1-worker");
        assert_eq!(key, "StatefulSet default/g1-worker");

        let err = StoreError::conflict(key, "object has been modified");
        assert_eq!(
            err.to_string(),
            "conflict on StatefulSet default/g1-worker: object has been modified"
        );
    }
}
