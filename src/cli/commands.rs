//! Command implementations for the CLI
//!
//! SBIO pattern: Commands return Results, I/O is handled by caller

use std::path::Path;
use std::sync::Arc;

use kube::{CustomResourceExt, ResourceExt};
use thiserror::Error;

use crate::cluster::{
    Algorithm, Child, ChildObject, ChildOutcome, MemoryRecorder, PoolEvent, PoolPhase,
    ReconcileError, Reconciler, WorkerPool,
};
use crate::config::WorkloadSettings;
use crate::store::{MemoryStore, ResourceStore, StoreError};

/// Errors that can occur during command execution
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error("Render error: {0}")]
    Render(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Result type for commands
pub type CommandResult<T> = Result<T, CommandError>;

// ============================================================================
// Manifests
// ============================================================================

/// Load and parse a WorkerPool manifest
pub fn load_pool_manifest(path: &Path) -> CommandResult<WorkerPool> {
    let content = std::fs::read_to_string(path)?;
    parse_pool_manifest(&content, path.extension().and_then(|e| e.to_str()))
}

/// Parse a manifest; YAML unless the extension says JSON
pub fn parse_pool_manifest(content: &str, extension: Option<&str>) -> CommandResult<WorkerPool> {
    let pool: WorkerPool = if extension == Some("json") {
        serde_json::from_str(content)?
    } else {
        serde_yaml::from_str(content).map_err(|e| CommandError::Manifest(e.to_string()))?
    };

    if pool.metadata.name.is_none() {
        return Err(CommandError::Manifest(
            "metadata.name is required".to_string(),
        ));
    }
    Ok(pool)
}

/// CustomResourceDefinition for WorkerPool as YAML
pub fn crd_yaml() -> CommandResult<String> {
    serde_yaml::to_string(&WorkerPool::crd()).map_err(|e| CommandError::Manifest(e.to_string()))
}

// ============================================================================
// Render (offline dry run)
// ============================================================================

/// Outcome of reconciling a manifest against an empty in-memory cluster
#[derive(Debug)]
pub struct RenderedPool {
    pub pool: WorkerPool,
    pub phase: PoolPhase,
    /// Each child's outcome with the object it left behind, in reconcile order
    pub children: Vec<(ChildOutcome, ChildObject)>,
    pub events: Vec<PoolEvent>,
}

/// Reconcile `pool` once against a fresh [`MemoryStore`]
pub async fn render_pool(
    mut pool: WorkerPool,
    namespace: &str,
    settings: WorkloadSettings,
) -> CommandResult<RenderedPool> {
    if pool.metadata.namespace.is_none() {
        pool.metadata.namespace = Some(namespace.to_string());
    }

    let store = Arc::new(MemoryStore::new());
    let recorder = Arc::new(MemoryRecorder::new());
    let pool = store.apply_pool(pool);
    let ns = pool.namespace().unwrap_or_default();

    let reconciler = Reconciler::new(store.clone(), recorder.clone(), settings);
    let outcome = reconciler.reconcile(&ns, &pool.name_any()).await?;

    let mut children = Vec::with_capacity(outcome.children.len());
    for child in outcome.children {
        let object = store.object(child.child.kind(), &ns, &child.name).ok_or_else(|| {
            CommandError::Render(format!("{} {} missing after reconcile", child.child, child.name))
        })?;
        children.push((child, object));
    }
    let events = recorder.events().into_iter().map(|(_, e)| e).collect();

    Ok(RenderedPool {
        pool,
        phase: outcome.phase,
        children,
        events,
    })
}

// ============================================================================
// Get
// ============================================================================

/// One row of `workerpool get`
#[derive(Debug, Clone, PartialEq)]
pub struct PoolStatusRow {
    pub namespace: String,
    pub name: String,
    pub workers: i32,
    pub algorithm: Algorithm,
    /// Which children exist, in [`Child::ALL`] order
    pub present: Vec<(Child, bool)>,
    /// Live replica count of the worker stateful set, if it exists
    pub replicas: Option<i32>,
}

impl PoolStatusRow {
    pub fn ready_children(&self) -> usize {
        self.present.iter().filter(|(_, ok)| *ok).count()
    }

    /// Converged when every child exists with the expected replica count
    pub fn is_converged(&self) -> bool {
        self.ready_children() == Child::ALL.len() && self.replicas == Some(self.workers - 1)
    }
}

/// Collect pool rows from any store
pub async fn pool_status(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
) -> CommandResult<Vec<PoolStatusRow>> {
    let pools = store.list_pools(namespace).await?;
    let mut rows = Vec::with_capacity(pools.len());

    for pool in pools {
        let ns = pool.namespace().unwrap_or_default();
        let base = &pool.spec.stateful_set_name;
        let mut present = Vec::with_capacity(Child::ALL.len());
        let mut replicas = None;

        for child in Child::ALL {
            let found = match store.get(child.kind(), &ns, &child.object_name(base)).await {
                Ok(object) => {
                    if let Some(sts) = object.as_stateful_set() {
                        replicas = Some(crate::cluster::builder::stateful_set_replicas(sts));
                    }
                    true
                }
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e.into()),
            };
            present.push((child, found));
        }

        rows.push(PoolStatusRow {
            namespace: ns,
            name: pool.name_any(),
            workers: pool.spec.worker_count,
            algorithm: pool.spec.algorithm,
            present,
            replicas,
        });
    }

    Ok(rows)
}

/// Names of the supported algorithms
pub fn algorithm_names() -> Vec<&'static str> {
    Algorithm::ALL.iter().map(|a| a.as_str()).collect()
}
