//! Watch-driven controller loop
//!
//! Wires the [`Reconciler`] into `kube::runtime::Controller`: WorkerPools are
//! watched directly, and changes to owned Services, StatefulSets and Jobs map
//! back to their owning pool. Keys are serialized per pool by the runtime;
//! distinct pools reconcile concurrently up to the configured limit.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use kube::api::ListParams;
use kube::runtime::controller::{self, Action, Controller};
use kube::runtime::watcher;
use kube::{Api, Client, ResourceExt};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::events::{EventRecorder, KubeEventRecorder, LogRecorder};
use super::reconciler::{ReconcileError, Reconciler};
use super::resources::WorkerPool;
use crate::config::OperatorConfig;
use crate::store::KubeStore;

/// Errors that stop the controller from starting
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("WorkerPool CRD is not queryable (is it installed? try `workerpool crd | kubectl apply -f -`): {0}")]
    CrdNotInstalled(#[source] kube::Error),
}

/// Shared state handed to every reconcile invocation
pub struct Context {
    pub reconciler: Reconciler,
    /// Requeue delay after a successful pass
    pub resync: Duration,
    /// Requeue delay after a retryable failure
    pub error_requeue: Duration,
}

impl Context {
    pub fn new(reconciler: Reconciler, resync: Duration, error_requeue: Duration) -> Self {
        Self {
            reconciler,
            resync,
            error_requeue,
        }
    }

    /// Build a cluster-backed context from operator configuration
    pub fn from_config(client: Client, config: &OperatorConfig) -> Self {
        let recorder: Arc<dyn EventRecorder> = if config.publish_events {
            Arc::new(KubeEventRecorder::new(
                client.clone(),
                KubeEventRecorder::reporter(&config.reporter),
            ))
        } else {
            Arc::new(LogRecorder)
        };

        let reconciler = Reconciler::new(
            Arc::new(KubeStore::new(client)),
            recorder,
            config.workload.clone(),
        )
        .with_max_conflict_retries(config.max_conflict_retries);

        Self::new(reconciler, config.resync_interval(), config.error_requeue())
    }
}

/// Reconcile entry point invoked by the runtime for one pool
pub async fn reconcile(pool: Arc<WorkerPool>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    let namespace = pool.namespace().unwrap_or_default();
    let name = pool.name_any();

    let outcome = ctx.reconciler.reconcile(&namespace, &name).await?;
    debug!(
        "WorkerPool {}/{}: {:?}, {} created, {} updated",
        namespace,
        name,
        outcome.phase,
        outcome.created(),
        outcome.updated()
    );
    Ok(Action::requeue(ctx.resync))
}

/// Decide what to do after a failed pass
pub fn error_policy(pool: Arc<WorkerPool>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    match err {
        ReconcileError::NotOwned { .. } => {
            // The other owner going away is not an event on this pool
            error!("WorkerPool {} conflicts with another owner: {}", pool.name_any(), err);
            Action::requeue(ctx.resync)
        }
        err if err.is_retryable() => {
            warn!("Reconcile of WorkerPool {} failed: {}", pool.name_any(), err);
            Action::requeue(ctx.error_requeue)
        }
        err => {
            // Only a spec edit can fix this
            error!("WorkerPool {} is invalid: {}", pool.name_any(), err);
            Action::await_change()
        }
    }
}

/// Run the controller until a shutdown signal is received
pub async fn run_controller(client: Client, config: OperatorConfig) -> Result<(), ControllerError> {
    let pools: Api<WorkerPool> = scoped_api(&client, config.namespace.as_deref());

    pools
        .list(&ListParams::default().limit(1))
        .await
        .map_err(ControllerError::CrdNotInstalled)?;

    info!(
        "Starting WorkerPool controller (namespace: {}, concurrency: {}, resync: {}s)",
        config.namespace.as_deref().unwrap_or("<all>"),
        config.concurrency,
        config.resync_interval_secs
    );

    let ctx = Arc::new(Context::from_config(client.clone(), &config));
    let namespace = config.namespace.as_deref();

    Controller::new(pools, watcher::Config::default())
        .owns(scoped_api::<Service>(&client, namespace), watcher::Config::default())
        .owns(scoped_api::<StatefulSet>(&client, namespace), watcher::Config::default())
        .owns(scoped_api::<Job>(&client, namespace), watcher::Config::default())
        .with_config(controller::Config::default().concurrency(config.concurrency))
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _)) => debug!("Reconciled {}", obj),
                Err(e) => warn!("Reconcile loop error: {}", e),
            }
        })
        .await;

    info!("WorkerPool controller stopped");
    Ok(())
}

fn scoped_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::events::MemoryRecorder;
    use crate::cluster::resources::WorkerPoolSpec;
    use crate::config::WorkloadSettings;
    use crate::store::MemoryStore;

    fn context(store: Arc<MemoryStore>) -> Arc<Context> {
        let reconciler = Reconciler::new(
            store,
            Arc::new(MemoryRecorder::new()),
            WorkloadSettings::default(),
        );
        Arc::new(Context::new(
            reconciler,
            Duration::from_secs(300),
            Duration::from_secs(15),
        ))
    }

    #[tokio::test]
    async fn test_reconcile_requeues_after_resync() {
        let store = Arc::new(MemoryStore::new());
        let pool = store.apply_pool(WorkerPool::new("graph", WorkerPoolSpec::new("g1", 3)));

        let action = reconcile(Arc::new(pool), context(store.clone()))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
        assert_eq!(store.object_count(), 4);
    }

    #[tokio::test]
    async fn test_invalid_spec_awaits_change() {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(store.apply_pool(WorkerPool::new("graph", WorkerPoolSpec::new("g1", 0))));
        let ctx = context(store);

        let err = reconcile(pool.clone(), ctx.clone()).await.unwrap_err();
        assert_eq!(error_policy(pool, &err, ctx), Action::await_change());
    }

    #[tokio::test]
    async fn test_name_clash_rechecks_on_resync() {
        let store = Arc::new(MemoryStore::new());
        store.apply_pool(WorkerPool::new("first", WorkerPoolSpec::new("g1", 3)));
        let second = Arc::new(store.apply_pool(WorkerPool::new("second", WorkerPoolSpec::new("g1", 5))));
        let ctx = context(store);
        ctx.reconciler.reconcile("default", "first").await.unwrap();

        let err = reconcile(second.clone(), ctx.clone()).await.unwrap_err();
        assert!(matches!(err, ReconcileError::NotOwned { .. }));
        assert_eq!(
            error_policy(second, &err, ctx),
            Action::requeue(Duration::from_secs(300))
        );
    }

    #[tokio::test]
    async fn test_store_error_requeues() {
        let store = Arc::new(MemoryStore::new());
        let pool = Arc::new(store.apply_pool(WorkerPool::new("graph", WorkerPoolSpec::new("g1", 3))));
        store.fail_next(
            crate::store::Operation::Create,
            crate::cluster::ChildKind::Service,
            crate::store::StoreError::Unavailable("timeout".into()),
        );
        let ctx = context(store);

        let err = reconcile(pool.clone(), ctx.clone()).await.unwrap_err();
        assert_eq!(
            error_policy(pool, &err, ctx),
            Action::requeue(Duration::from_secs(15))
        );
    }
}
