//! Resource store backed by the Kubernetes API

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use super::{object_key, ResourceStore, StoreError, StoreResult};
use crate::cluster::{ChildKind, ChildObject, WorkerPool};

/// [`ResourceStore`] talking to a live cluster through `kube`
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Wrap a ready-made client; connection resolution happens in the caller
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn get_typed<K>(&self, namespace: &str, name: &str) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        trace!("GET {}", object_key(&K::kind(&()), namespace, name));
        self.api::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| classify(e, object_key(&K::kind(&()), namespace, name)))
    }

    async fn create_typed<K>(&self, object: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let (namespace, name) = address(object);
        let key = object_key(&K::kind(&()), &namespace, &name);
        trace!("CREATE {}", key);
        self.api::<K>(&namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn replace_typed<K>(&self, object: &K) -> StoreResult<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let (namespace, name) = address(object);
        let key = object_key(&K::kind(&()), &namespace, &name);
        trace!("REPLACE {}", key);
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| classify(e, key))
    }

    async fn list_typed<K>(&self, namespace: &str) -> StoreResult<Vec<K>>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        self.api::<K>(namespace)
            .list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| classify(e, format!("{} list in {}", K::kind(&()), namespace)))
    }
}

fn address<K: Resource>(object: &K) -> (String, String) {
    let meta = object.meta();
    (
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    )
}

/// Map API status codes onto the store taxonomy
fn classify(err: kube::Error, key: String) -> StoreError {
    match err {
        kube::Error::Api(resp) if resp.code == 404 => StoreError::NotFound(key),
        kube::Error::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key)
        }
        kube::Error::Api(resp) if resp.code == 409 => StoreError::Conflict {
            key,
            message: resp.message,
        },
        kube::Error::Api(resp) if resp.code < 500 && resp.code != 429 => StoreError::Rejected {
            key,
            code: resp.code,
            message: resp.message,
        },
        other => StoreError::Unavailable(format!("{}: {}", key, other)),
    }
}

#[async_trait]
impl ResourceStore for KubeStore {
    async fn get_pool(&self, namespace: &str, name: &str) -> StoreResult<WorkerPool> {
        self.get_typed::<WorkerPool>(namespace, name).await
    }

    async fn list_pools(&self, namespace: Option<&str>) -> StoreResult<Vec<WorkerPool>> {
        let api: Api<WorkerPool> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        api.list(&ListParams::default())
            .await
            .map(|list| list.items)
            .map_err(|e| classify(e, "WorkerPool list".to_string()))
    }

    async fn get(&self, kind: ChildKind, namespace: &str, name: &str) -> StoreResult<ChildObject> {
        match kind {
            ChildKind::Service => self
                .get_typed::<Service>(namespace, name)
                .await
                .map(ChildObject::Service),
            ChildKind::StatefulSet => self
                .get_typed::<StatefulSet>(namespace, name)
                .await
                .map(ChildObject::StatefulSet),
            ChildKind::Job => self
                .get_typed::<Job>(namespace, name)
                .await
                .map(ChildObject::Job),
        }
    }

    async fn create(&self, object: &ChildObject) -> StoreResult<ChildObject> {
        match object {
            ChildObject::Service(o) => self.create_typed(o).await.map(ChildObject::Service),
            ChildObject::StatefulSet(o) => {
                self.create_typed(o).await.map(ChildObject::StatefulSet)
            }
            ChildObject::Job(o) => self.create_typed(o).await.map(ChildObject::Job),
        }
    }

    async fn update(&self, object: &ChildObject) -> StoreResult<ChildObject> {
        match object {
            ChildObject::Service(o) => self.replace_typed(o).await.map(ChildObject::Service),
            ChildObject::StatefulSet(o) => {
                self.replace_typed(o).await.map(ChildObject::StatefulSet)
            }
            ChildObject::Job(o) => self.replace_typed(o).await.map(ChildObject::Job),
        }
    }

    async fn list(&self, kind: ChildKind, namespace: &str) -> StoreResult<Vec<ChildObject>> {
        let objects = match kind {
            ChildKind::Service => self
                .list_typed::<Service>(namespace)
                .await?
                .into_iter()
                .map(ChildObject::Service)
                .collect(),
            ChildKind::StatefulSet => self
                .list_typed::<StatefulSet>(namespace)
                .await?
                .into_iter()
                .map(ChildObject::StatefulSet)
                .collect(),
            ChildKind::Job => self
                .list_typed::<Job>(namespace)
                .await?
                .into_iter()
                .map(ChildObject::Job)
                .collect(),
        };
        Ok(objects)
    }
}
