//! Resource types for WorkerPool reconciliation
//!
//! - [`WorkerPool`] is the custom resource declared by users
//! - [`Child`] enumerates the four objects derived from a pool
//! - [`ChildObject`] is the tagged variant the store operates on

use std::fmt;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::naming;

/// Desired state of a distributed worker pool
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "pgas.github.com",
    version = "v1alpha1",
    kind = "WorkerPool",
    plural = "workerpools",
    shortname = "wp",
    namespaced,
    derive = "PartialEq",
    printcolumn = r#"{"name":"StatefulSet","type":"string","jsonPath":".spec.statefulSetName"}"#,
    printcolumn = r#"{"name":"Workers","type":"integer","jsonPath":".spec.workerCount"}"#,
    printcolumn = r#"{"name":"Algorithm","type":"string","jsonPath":".spec.algorithm"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolSpec {
    /// Base name every child object name is derived from
    pub stateful_set_name: String,

    /// Total number of workers, launcher peer included
    #[schemars(range(min = 1, max = 10000))]
    pub worker_count: i32,

    /// Algorithm the workers run (not interpreted by the operator)
    #[serde(default)]
    pub algorithm: Algorithm,
}

impl WorkerPoolSpec {
    /// Create a spec with the default algorithm
    pub fn new(stateful_set_name: impl Into<String>, worker_count: i32) -> Self {
        Self {
            stateful_set_name: stateful_set_name.into(),
            worker_count,
            algorithm: Algorithm::default(),
        }
    }

    /// Builder: set the algorithm
    pub fn with_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }
}

/// Graph algorithms the worker image knows how to run
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema,
)]
pub enum Algorithm {
    #[default]
    Kruskal,
    Prim,
}

impl Algorithm {
    /// Every supported algorithm
    pub const ALL: [Algorithm; 2] = [Algorithm::Kruskal, Algorithm::Prim];

    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Kruskal => "Kruskal",
            Algorithm::Prim => "Prim",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Object kinds a pool owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    Service,
    StatefulSet,
    Job,
}

impl ChildKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildKind::Service => "Service",
            ChildKind::StatefulSet => "StatefulSet",
            ChildKind::Job => "Job",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four children of a pool, in reconciliation order.
///
/// Services come first so their DNS names exist before the workloads
/// that resolve them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Child {
    LauncherService,
    WorkerService,
    WorkerStatefulSet,
    LauncherJob,
}

impl Child {
    /// Fixed reconciliation order
    pub const ALL: [Child; 4] = [
        Child::LauncherService,
        Child::WorkerService,
        Child::WorkerStatefulSet,
        Child::LauncherJob,
    ];

    pub fn kind(&self) -> ChildKind {
        match self {
            Child::LauncherService | Child::WorkerService => ChildKind::Service,
            Child::WorkerStatefulSet => ChildKind::StatefulSet,
            Child::LauncherJob => ChildKind::Job,
        }
    }

    /// Object name derived from the pool's base name
    pub fn object_name(&self, base: &str) -> String {
        match self {
            Child::LauncherService => naming::launcher_service_name(base),
            Child::WorkerService => naming::worker_service_name(base),
            Child::WorkerStatefulSet => naming::worker_stateful_set_name(base),
            Child::LauncherJob => naming::launcher_job_name(base),
        }
    }

    /// Human-readable description used in events and logs
    pub fn describe(&self) -> &'static str {
        match self {
            Child::LauncherService => "Service for launcher Job",
            Child::WorkerService => "Service for worker StatefulSet",
            Child::WorkerStatefulSet => "worker StatefulSet",
            Child::LauncherJob => "launcher Job",
        }
    }
}

impl fmt::Display for Child {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Child::LauncherService => "launcher-service",
            Child::WorkerService => "worker-service",
            Child::WorkerStatefulSet => "worker-statefulset",
            Child::LauncherJob => "launcher-job",
        };
        f.write_str(s)
    }
}

/// A concrete child object of one of the supported kinds
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ChildObject {
    Service(Service),
    StatefulSet(StatefulSet),
    Job(Job),
}

impl ChildObject {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildObject::Service(_) => ChildKind::Service,
            ChildObject::StatefulSet(_) => ChildKind::StatefulSet,
            ChildObject::Job(_) => ChildKind::Job,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ChildObject::Service(o) => &o.metadata,
            ChildObject::StatefulSet(o) => &o.metadata,
            ChildObject::Job(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildObject::Service(o) => &mut o.metadata,
            ChildObject::StatefulSet(o) => &mut o.metadata,
            ChildObject::Job(o) => &mut o.metadata,
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Whether an owner reference points at the given uid
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.metadata()
            .owner_references
            .as_ref()
            .is_some_and(|refs| refs.iter().any(|r| r.uid == uid))
    }

    pub fn as_stateful_set(&self) -> Option<&StatefulSet> {
        match self {
            ChildObject::StatefulSet(sts) => Some(sts),
            _ => None,
        }
    }

    pub fn as_job(&self) -> Option<&Job> {
        match self {
            ChildObject::Job(job) => Some(job),
            _ => None,
        }
    }
}
