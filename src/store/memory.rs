//! In-process resource store
//!
//! Mirrors the API server behaviour the reconciler depends on:
//! resourceVersion checks on update, `AlreadyExists` on duplicate create,
//! and garbage collection of owned objects when a pool is deleted. It also
//! keeps a log of mutations and supports one-shot fault injection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kube::ResourceExt;
use uuid::Uuid;

use super::{object_key, ResourceStore, StoreError, StoreResult};
use crate::cluster::{ChildKind, ChildObject, WorkerPool};

const DEFAULT_NAMESPACE: &str = "default";

/// Store operations that faults can be injected into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Get,
    Create,
    Update,
}

/// A recorded child mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Create { kind: ChildKind, name: String },
    Update { kind: ChildKind, name: String },
}

impl Mutation {
    pub fn kind(&self) -> ChildKind {
        match self {
            Mutation::Create { kind, .. } | Mutation::Update { kind, .. } => *kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ObjectKey {
    kind: ChildKind,
    namespace: String,
    name: String,
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    kind: ChildKind,
    error: StoreError,
}

/// [`ResourceStore`] holding every object in memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    pools: DashMap<(String, String), WorkerPool>,
    objects: DashMap<ObjectKey, ChildObject>,
    version: AtomicU64,
    mutations: Mutex<Vec<Mutation>>,
    faults: Mutex<Vec<Fault>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn record(&self, mutation: Mutation) {
        self.mutations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mutation);
    }

    fn take_fault(&self, operation: Operation, kind: ChildKind) -> Option<StoreError> {
        let mut faults = self.faults.lock().unwrap_or_else(|e| e.into_inner());
        let idx = faults
            .iter()
            .position(|f| f.operation == operation && f.kind == kind)?;
        Some(faults.remove(idx).error)
    }

    // =========================================================================
    // Pool management (what a user applying manifests would do)
    // =========================================================================

    /// Create or replace a pool, assigning a uid and namespace when missing.
    ///
    /// Replacing an existing pool keeps its uid, as a spec edit would.
    pub fn apply_pool(&self, mut pool: WorkerPool) -> WorkerPool {
        let namespace = pool
            .namespace()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let key = (namespace.clone(), pool.name_any());

        let uid = self
            .pools
            .get(&key)
            .and_then(|existing| existing.metadata.uid.clone())
            .or_else(|| pool.metadata.uid.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        pool.metadata.namespace = Some(namespace);
        pool.metadata.uid = Some(uid);
        pool.metadata.resource_version = Some(self.next_version());
        self.pools.insert(key, pool.clone());
        pool
    }

    /// Delete a pool and garbage-collect every object it owns.
    ///
    /// Returns the number of collected children, or `None` if the pool
    /// did not exist.
    pub fn delete_pool(&self, namespace: &str, name: &str) -> Option<usize> {
        let (_, pool) = self
            .pools
            .remove(&(namespace.to_string(), name.to_string()))?;
        let uid = pool.metadata.uid.unwrap_or_default();

        let before = self.objects.len();
        self.objects.retain(|_, object| !object.is_owned_by(&uid));
        Some(before - self.objects.len())
    }

    // =========================================================================
    // Inspection and tampering (bypass the mutation log)
    // =========================================================================

    /// Peek at an object without going through the trait
    pub fn object(&self, kind: ChildKind, namespace: &str, name: &str) -> Option<ChildObject> {
        self.objects
            .get(&ObjectKey {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
            .map(|r| r.clone())
    }

    /// Number of stored child objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Edit a stored object out of band, as a manual `kubectl edit` would.
    ///
    /// Bumps the resourceVersion. Returns false if the object does not exist.
    pub fn modify<F>(&self, kind: ChildKind, namespace: &str, name: &str, edit: F) -> bool
    where
        F: FnOnce(&mut ChildObject),
    {
        let key = ObjectKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        match self.objects.get_mut(&key) {
            Some(mut object) => {
                edit(&mut *object);
                object.metadata_mut().resource_version = Some(self.next_version());
                true
            }
            None => false,
        }
    }

    /// Make the next matching operation fail with `error`
    pub fn fail_next(&self, operation: Operation, kind: ChildKind, error: StoreError) {
        self.faults
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Fault {
                operation,
                kind,
                error,
            });
    }

    /// Every mutation recorded so far
    pub fn mutations(&self) -> Vec<Mutation> {
        self.mutations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn clear_mutations(&self) {
        self.mutations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn create_count(&self) -> usize {
        self.mutations()
            .iter()
            .filter(|m| matches!(m, Mutation::Create { .. }))
            .count()
    }

    pub fn update_count(&self) -> usize {
        self.mutations()
            .iter()
            .filter(|m| matches!(m, Mutation::Update { .. }))
            .count()
    }
}

fn key_of(object: &ChildObject) -> ObjectKey {
    ObjectKey {
        kind: object.kind(),
        namespace: object.namespace().to_string(),
        name: object.name().to_string(),
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_pool(&self, namespace: &str, name: &str) -> StoreResult<WorkerPool> {
        self.pools
            .get(&(namespace.to_string(), name.to_string()))
            .map(|r| r.clone())
            .ok_or_else(|| StoreError::NotFound(object_key("WorkerPool", namespace, name)))
    }

    async fn list_pools(&self, namespace: Option<&str>) -> StoreResult<Vec<WorkerPool>> {
        let mut pools: Vec<WorkerPool> = self
            .pools
            .iter()
            .filter(|r| namespace.map_or(true, |ns| r.key().0 == ns))
            .map(|r| r.clone())
            .collect();
        pools.sort_by_key(|p| (p.namespace(), p.name_any()));
        Ok(pools)
    }

    async fn get(&self, kind: ChildKind, namespace: &str, name: &str) -> StoreResult<ChildObject> {
        if let Some(err) = self.take_fault(Operation::Get, kind) {
            return Err(err);
        }
        self.object(kind, namespace, name)
            .ok_or_else(|| StoreError::NotFound(object_key(kind.as_str(), namespace, name)))
    }

    async fn create(&self, object: &ChildObject) -> StoreResult<ChildObject> {
        let key = key_of(object);
        if let Some(err) = self.take_fault(Operation::Create, key.kind) {
            return Err(err);
        }

        let mut stored = object.clone();
        let meta = stored.metadata_mut();
        meta.uid = Some(Uuid::new_v4().to_string());
        meta.resource_version = Some(self.next_version());

        match self.objects.entry(key.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(object_key(
                key.kind.as_str(),
                &key.namespace,
                &key.name,
            ))),
            Entry::Vacant(slot) => {
                slot.insert(stored.clone());
                self.record(Mutation::Create {
                    kind: key.kind,
                    name: key.name,
                });
                Ok(stored)
            }
        }
    }

    async fn update(&self, object: &ChildObject) -> StoreResult<ChildObject> {
        let key = key_of(object);
        let printable = object_key(key.kind.as_str(), &key.namespace, &key.name);
        if let Some(err) = self.take_fault(Operation::Update, key.kind) {
            return Err(err);
        }

        let mut current = self
            .objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(printable.clone()))?;

        let expected = current.metadata().resource_version.clone();
        let given = object.metadata().resource_version.clone();
        if given.is_some() && given != expected {
            return Err(StoreError::conflict(
                printable,
                "the object has been modified; please apply your changes to the latest version",
            ));
        }

        let mut stored = object.clone();
        let meta = stored.metadata_mut();
        meta.uid = current.metadata().uid.clone();
        meta.resource_version = Some(self.next_version());
        *current = stored.clone();
        drop(current);

        self.record(Mutation::Update {
            kind: key.kind,
            name: key.name,
        });
        Ok(stored)
    }

    async fn list(&self, kind: ChildKind, namespace: &str) -> StoreResult<Vec<ChildObject>> {
        let mut objects: Vec<ChildObject> = self
            .objects
            .iter()
            .filter(|r| r.key().kind == kind && r.key().namespace == namespace)
            .map(|r| r.value().clone())
            .collect();
        objects.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::WorkerPoolSpec;
    use k8s_openapi::api::core::v1::Service;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

    fn service(name: &str, owner_uid: Option<&str>) -> ChildObject {
        ChildObject::Service(Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                owner_references: owner_uid.map(|uid| {
                    vec![OwnerReference {
                        uid: uid.to_string(),
                        ..Default::default()
                    }]
                }),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemoryStore::new();
        let created = store.create(&service("svc", None)).await.unwrap();
        assert!(created.metadata().uid.is_some());
        assert!(created.metadata().resource_version.is_some());

        let fetched = store
            .get(ChildKind::Service, "default", "svc")
            .await
            .unwrap();
        assert_eq!(fetched, created);
        assert_eq!(store.create_count(), 1);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let store = MemoryStore::new();
        let err = store
            .get(ChildKind::Job, "default", "nope")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_duplicate_create() {
        let store = MemoryStore::new();
        store.create(&service("svc", None)).await.unwrap();
        let err = store.create(&service("svc", None)).await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(store.create_count(), 1);
    }

    #[tokio::test]
    async fn test_update_with_stale_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&service("svc", None)).await.unwrap();

        // Someone else edits the object in between
        assert!(store.modify(ChildKind::Service, "default", "svc", |_| {}));

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_conflict());

        let latest = store
            .get(ChildKind::Service, "default", "svc")
            .await
            .unwrap();
        assert!(store.update(&latest).await.is_ok());
        assert_eq!(store.update_count(), 1);
    }

    #[tokio::test]
    async fn test_fault_injection_is_one_shot() {
        let store = MemoryStore::new();
        store.create(&service("svc", None)).await.unwrap();
        store.fail_next(
            Operation::Get,
            ChildKind::Service,
            StoreError::Unavailable("connection reset".into()),
        );

        assert!(store
            .get(ChildKind::Service, "default", "svc")
            .await
            .is_err());
        assert!(store
            .get(ChildKind::Service, "default", "svc")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_apply_pool_keeps_uid() {
        let store = MemoryStore::new();
        let first = store.apply_pool(WorkerPool::new("graph", WorkerPoolSpec::new("g1", 3)));
        assert_eq!(first.namespace().as_deref(), Some("default"));

        let second = store.apply_pool(WorkerPool::new("graph", WorkerPoolSpec::new("g1", 5)));
        assert_eq!(first.metadata.uid, second.metadata.uid);

        let stored = store.get_pool("default", "graph").await.unwrap();
        assert_eq!(stored.spec.worker_count, 5);
    }

    #[tokio::test]
    async fn test_delete_pool_collects_owned_objects() {
        let store = MemoryStore::new();
        let pool = store.apply_pool(WorkerPool::new("graph", WorkerPoolSpec::new("g1", 3)));
        let uid = pool.metadata.uid.clone().unwrap();

        store.create(&service("owned", Some(&uid))).await.unwrap();
        store.create(&service("unrelated", None)).await.unwrap();

        assert_eq!(store.delete_pool("default", "graph"), Some(1));
        assert_eq!(store.object_count(), 1);
        assert!(store.get_pool("default", "graph").await.is_err());
        assert_eq!(store.delete_pool("default", "graph"), None);
    }

    #[tokio::test]
    async fn test_list_filters_kind_and_namespace() {
        let store = MemoryStore::new();
        store.create(&service("b", None)).await.unwrap();
        store.create(&service("a", None)).await.unwrap();

        let services = store.list(ChildKind::Service, "default").await.unwrap();
        let names: Vec<&str> = services.iter().map(|o| o.name()).collect();
        assert_eq!(names, vec!["a", "b"]);

        assert!(store
            .list(ChildKind::Job, "default")
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .list(ChildKind::Service, "other")
            .await
            .unwrap()
            .is_empty());
    }
}
