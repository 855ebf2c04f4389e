//! WorkerPool reconciler
//!
//! One pass of [`Reconciler::reconcile`] drives a single pool through
//!
//! ```text
//! Unknown ──fetch──▶ Missing ──create──▶ Provisioning ──next pass──▶ Converged
//!                       ▲                                              │
//!                       └─────────────── drift detected ───────────────┘
//! ```
//!
//! Every step is existence-checked first, so a pass can be re-run any number
//! of times. Children are handled in the fixed order of [`Child::ALL`].
//! Deletion is never issued here: children carry an owner reference and the
//! store's garbage collector removes them with the pool. A child that exists
//! under the derived name but is owned by something else is never modified.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::EnvVar;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::builder::{self, PoolTemplate, SpecError};
use super::events::{EventRecorder, PoolEvent};
use super::naming;
use super::resources::{Child, ChildKind, ChildObject, WorkerPool};
use crate::config::WorkloadSettings;
use crate::store::{ResourceStore, StoreError};

/// Default number of re-fetch-and-retry rounds after an update conflict
pub const DEFAULT_MAX_CONFLICT_RETRIES: u32 = 3;

/// Errors returned to the caller, which is expected to retry the key later
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("invalid WorkerPool {key}: {source}")]
    InvalidSpec {
        key: String,
        #[source]
        source: SpecError,
    },

    #[error("failed to fetch WorkerPool {key}: {source}")]
    FetchPool {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to {action} {child} for WorkerPool {key}: {source}")]
    Store {
        key: String,
        child: Child,
        action: &'static str,
        #[source]
        source: StoreError,
    },

    /// A child with the derived name exists but belongs to something else,
    /// typically another pool with the same `statefulSetName`
    #[error("{child} {name} for WorkerPool {key} exists but is not owned by it")]
    NotOwned {
        key: String,
        child: Child,
        name: String,
    },
}

impl ReconcileError {
    /// Whether retrying without a spec change can help
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::InvalidSpec { .. } | ReconcileError::NotOwned { .. }
        )
    }

    /// Underlying store error, if any
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ReconcileError::InvalidSpec { .. } | ReconcileError::NotOwned { .. } => None,
            ReconcileError::FetchPool { source, .. } | ReconcileError::Store { source, .. } => {
                Some(source)
            }
        }
    }
}

/// Where a pool stands after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// The pool no longer exists; its children are left to garbage collection
    Deleted,
    /// At least one child was created or corrected during this pass
    Provisioning,
    /// Every child existed and matched; nothing was mutated
    Converged,
}

/// What happened to one child during a pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChildAction {
    /// Missing and created
    Created,
    /// Missing on read, but a concurrent pass created it first
    AlreadyExisted,
    /// Replica count or worker list corrected in place
    Updated { from_replicas: i32, to_replicas: i32 },
    /// Present and nothing to correct
    Unchanged,
}

impl ChildAction {
    pub fn is_mutation(&self) -> bool {
        matches!(self, ChildAction::Created | ChildAction::Updated { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildOutcome {
    pub child: Child,
    pub name: String,
    pub action: ChildAction,
}

/// Result of one successful pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub phase: PoolPhase,
    pub children: Vec<ChildOutcome>,
}

impl ReconcileOutcome {
    fn deleted() -> Self {
        Self {
            phase: PoolPhase::Deleted,
            children: Vec::new(),
        }
    }

    fn from_children(children: Vec<ChildOutcome>) -> Self {
        let phase = if children.iter().any(|c| c.action.is_mutation()) {
            PoolPhase::Provisioning
        } else {
            PoolPhase::Converged
        };
        Self { phase, children }
    }

    pub fn created(&self) -> usize {
        self.count(|a| matches!(a, ChildAction::Created))
    }

    pub fn updated(&self) -> usize {
        self.count(|a| matches!(a, ChildAction::Updated { .. }))
    }

    pub fn action_for(&self, child: Child) -> Option<&ChildAction> {
        self.children
            .iter()
            .find(|c| c.child == child)
            .map(|c| &c.action)
    }

    fn count(&self, f: impl Fn(&ChildAction) -> bool) -> usize {
        self.children.iter().filter(|c| f(&c.action)).count()
    }
}

/// Converges the children of WorkerPool instances
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    recorder: Arc<dyn EventRecorder>,
    settings: WorkloadSettings,
    max_conflict_retries: u32,
}

impl Reconciler {
    /// Create a reconciler around a ready-made store and recorder
    pub fn new(
        store: Arc<dyn ResourceStore>,
        recorder: Arc<dyn EventRecorder>,
        settings: WorkloadSettings,
    ) -> Self {
        Self {
            store,
            recorder,
            settings,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    /// Builder: set how many conflicts are retried within one pass
    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Run one reconciliation pass for the pool `namespace/name`.
    ///
    /// A pool that no longer exists is not an error: the pass ends with
    /// [`PoolPhase::Deleted`] and no store mutations.
    pub async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        let key = format!("{}/{}", namespace, name);

        let pool = match self.store.get_pool(namespace, name).await {
            Ok(pool) => pool,
            Err(e) if e.is_not_found() => {
                debug!("WorkerPool {} not found, assuming it was deleted", key);
                return Ok(ReconcileOutcome::deleted());
            }
            Err(source) => return Err(ReconcileError::FetchPool { key, source }),
        };

        let template = PoolTemplate::new(&pool, &self.settings)
            .map_err(|source| ReconcileError::InvalidSpec {
                key: key.clone(),
                source,
            })?;

        let mut children = Vec::with_capacity(Child::ALL.len());
        for child in Child::ALL {
            let outcome = self.reconcile_child(&pool, &template, &key, child).await?;
            children.push(outcome);
        }

        let outcome = ReconcileOutcome::from_children(children);
        debug!("WorkerPool {} reconciled: {:?}", key, outcome.phase);
        Ok(outcome)
    }

    async fn reconcile_child(
        &self,
        pool: &WorkerPool,
        t: &PoolTemplate<'_>,
        key: &str,
        child: Child,
    ) -> Result<ChildOutcome, ReconcileError> {
        let name = t.object_name(child);
        let store_err = |action: &'static str, source: StoreError| ReconcileError::Store {
            key: key.to_string(),
            child,
            action,
            source,
        };

        let existing = match self.store.get(child.kind(), t.namespace(), &name).await {
            Ok(object) => Some(object),
            Err(e) if e.is_not_found() => None,
            Err(source) => return Err(store_err("get", source)),
        };

        let (live, action) = match existing {
            Some(object) => (object, ChildAction::Unchanged),
            None => {
                info!("Could not find existing {} {} for {}", child.describe(), name, key);
                match self.store.create(&t.build(child)).await {
                    Ok(_) => {
                        info!("Created {} {} for {}", child.describe(), name, key);
                        self.recorder
                            .record(
                                pool,
                                PoolEvent::normal(
                                    "Created",
                                    "Create",
                                    format!("Created {} {}", child.describe(), name),
                                ),
                            )
                            .await;
                        // A freshly built object needs no drift check
                        return Ok(ChildOutcome {
                            child,
                            name,
                            action: ChildAction::Created,
                        });
                    }
                    Err(e) if e.is_already_exists() => {
                        debug!("{} {} was created concurrently, treating as found", child.kind(), name);
                        let object = self
                            .store
                            .get(child.kind(), t.namespace(), &name)
                            .await
                            .map_err(|source| store_err("get", source))?;
                        (object, ChildAction::AlreadyExisted)
                    }
                    Err(source) => {
                        warn!("Unable to create {} {} for {}: {}", child.describe(), name, key, source);
                        return Err(store_err("create", source));
                    }
                }
            }
        };

        if !live.is_owned_by(t.owner_uid()) {
            warn!(
                "{} {} is not owned by WorkerPool {}, leaving it untouched",
                child.describe(),
                name,
                key
            );
            return Err(ReconcileError::NotOwned {
                key: key.to_string(),
                child,
                name,
            });
        }

        let action = match child {
            Child::WorkerStatefulSet => {
                let sts = expect_stateful_set(live).map_err(|source| store_err("get", source))?;
                match self.correct_drift(pool, t, key, sts).await? {
                    ChildAction::Unchanged => action,
                    corrected => corrected,
                }
            }
            Child::LauncherJob => {
                let job = expect_job(live).map_err(|source| store_err("get", source))?;
                self.check_launcher_job(pool, t, key, &job).await;
                action
            }
            Child::LauncherService | Child::WorkerService => action,
        };

        Ok(ChildOutcome {
            child,
            name,
            action,
        })
    }

    /// Bring the stateful set's replica count and worker list back in line.
    ///
    /// Both fields are rewritten in a single update. On a conflict the set is
    /// re-fetched and the check recomputed, up to `max_conflict_retries` times.
    async fn correct_drift(
        &self,
        pool: &WorkerPool,
        t: &PoolTemplate<'_>,
        key: &str,
        mut live: StatefulSet,
    ) -> Result<ChildAction, ReconcileError> {
        let child = Child::WorkerStatefulSet;
        let name = t.object_name(child);
        let desired = t.desired_replicas();
        let servers = t.ssh_servers();
        let store_err = |action: &'static str, source: StoreError| ReconcileError::Store {
            key: key.to_string(),
            child,
            action,
            source,
        };

        let mut attempt = 0;
        loop {
            let current = builder::stateful_set_replicas(&live);
            let replicas_drifted = current != desired;
            let servers_drifted = builder::stateful_set_ssh_servers(&live) != Some(servers.as_str());
            if !replicas_drifted && !servers_drifted {
                return Ok(ChildAction::Unchanged);
            }

            let mut changes = Vec::with_capacity(2);
            if replicas_drifted {
                changes.push(format!("replicas from {} to {}", current, desired));
            }
            if servers_drifted {
                changes.push(format!(
                    "{} to {} workers",
                    naming::SSH_SERVERS_ENV,
                    t.worker_count()
                ));
            }
            let changes = changes.join(" and ");

            info!("Updating StatefulSet {} for {}: {}", name, key, changes);
            let patched = apply_desired_workers(live, t);

            match self.store.update(&ChildObject::StatefulSet(patched)).await {
                Ok(_) => {
                    self.recorder
                        .record(
                            pool,
                            PoolEvent::normal(
                                "Updated",
                                "Update",
                                format!("Updated StatefulSet {} {}", name, changes),
                            ),
                        )
                        .await;
                    return Ok(ChildAction::Updated {
                        from_replicas: current,
                        to_replicas: desired,
                    });
                }
                Err(e) if e.is_conflict() && attempt < self.max_conflict_retries => {
                    attempt += 1;
                    warn!(
                        "Conflict updating StatefulSet {} (attempt {}/{}), re-fetching",
                        name, attempt, self.max_conflict_retries
                    );
                    let object = self
                        .store
                        .get(ChildKind::StatefulSet, t.namespace(), &name)
                        .await
                        .map_err(|source| store_err("get", source))?;
                    live = expect_stateful_set(object).map_err(|source| store_err("get", source))?;
                }
                Err(source) => {
                    warn!(
                        "Failed to update StatefulSet {} for {}: old_replica_count={} new_replica_count={}: {}",
                        name, key, current, desired, source
                    );
                    return Err(store_err("update", source));
                }
            }
        }
    }

    /// The launcher job's pod template is immutable once created, so a stale
    /// worker list is reported rather than corrected.
    ///
    /// No state is kept between passes, so the warning event is recorded on
    /// every pass until the job is recreated.
    async fn check_launcher_job(
        &self,
        pool: &WorkerPool,
        t: &PoolTemplate<'_>,
        key: &str,
        job: &Job,
    ) {
        let servers = t.ssh_servers();
        let current = builder::job_ssh_servers(job);
        if current == Some(servers.as_str()) {
            return;
        }

        let name = t.object_name(Child::LauncherJob);
        debug!(
            "Launcher Job {} for {} has stale {} ({:?}, want {:?})",
            name,
            key,
            naming::SSH_SERVERS_ENV,
            current,
            servers
        );
        self.recorder
            .record(
                pool,
                PoolEvent::warning(
                    "LauncherJobStale",
                    "Reconcile",
                    format!(
                        "Job {} was created for a different worker count; recreate it to pick up {} workers",
                        name,
                        t.worker_count()
                    ),
                ),
            )
            .await;
    }
}

fn expect_stateful_set(object: ChildObject) -> Result<StatefulSet, StoreError> {
    match object {
        ChildObject::StatefulSet(sts) => Ok(sts),
        other => Err(StoreError::KindMismatch {
            expected: ChildKind::StatefulSet,
            found: other.kind(),
        }),
    }
}

fn expect_job(object: ChildObject) -> Result<Job, StoreError> {
    match object {
        ChildObject::Job(job) => Ok(job),
        other => Err(StoreError::KindMismatch {
            expected: ChildKind::Job,
            found: other.kind(),
        }),
    }
}

/// Rewrite replicas and `SSH_SERVERS` on a live stateful set, keeping its
/// metadata (and therefore its resourceVersion) intact.
fn apply_desired_workers(mut live: StatefulSet, t: &PoolTemplate<'_>) -> StatefulSet {
    let servers = t.ssh_servers();
    let spec = live.spec.get_or_insert_with(Default::default);
    spec.replicas = Some(t.desired_replicas());

    let container = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut());

    match container {
        Some(container) => set_env(
            container.env.get_or_insert_with(Vec::new),
            naming::SSH_SERVERS_ENV,
            servers,
        ),
        None => {
            // No container to patch; fall back to the desired template
            if let Some(desired) = builder::build_worker_stateful_set(t).spec {
                spec.template = desired.template;
            }
        }
    }

    live
}

fn set_env(env: &mut Vec<EnvVar>, name: &str, value: String) {
    match env.iter_mut().find(|e| e.name == name) {
        Some(var) => {
            var.value = Some(value);
            var.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value),
            value_from: None,
        }),
    }
}
