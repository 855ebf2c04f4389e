//! Desired child objects for a WorkerPool
//!
//! Pure functions: no I/O, and the same pool always produces the same
//! objects, so a live object can be compared against a freshly built one.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec,
    PodTemplateSpec, Service, ServicePort, ServiceSpec, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use thiserror::Error;

use super::naming;
use super::resources::{Algorithm, Child, ChildObject, WorkerPool};
use crate::config::WorkloadSettings;

/// Port names are limited to 15 characters, so a fixed name is used
pub const PORT_NAME: &str = "pgas";

const HEADLESS: &str = "None";
const RESTART_NEVER: &str = "Never";
const READ_WRITE_ONCE: &str = "ReadWriteOnce";
const LAUNCHER_BACKOFF_LIMIT: i32 = 1;

/// A pool specification that cannot be turned into child objects
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SpecError {
    #[error("workerCount must be between 1 and {max}, got {0}", max = naming::MAX_WORKER_COUNT)]
    InvalidWorkerCount(i32),

    #[error("{0}")]
    InvalidName(String),

    #[error("WorkerPool is missing {0}")]
    MissingField(&'static str),
}

/// Validated view of a pool that the builders work from
#[derive(Debug, Clone)]
pub struct PoolTemplate<'a> {
    base: &'a str,
    namespace: String,
    worker_count: i32,
    algorithm: Algorithm,
    owner: OwnerReference,
    settings: &'a WorkloadSettings,
}

impl<'a> PoolTemplate<'a> {
    /// Validate a pool; nothing may be built from an invalid spec
    pub fn new(pool: &'a WorkerPool, settings: &'a WorkloadSettings) -> Result<Self, SpecError> {
        let spec = &pool.spec;
        if !(1..=naming::MAX_WORKER_COUNT).contains(&spec.worker_count) {
            return Err(SpecError::InvalidWorkerCount(spec.worker_count));
        }
        naming::validate_base_name(&spec.stateful_set_name).map_err(SpecError::InvalidName)?;

        let namespace = pool
            .namespace()
            .ok_or(SpecError::MissingField("metadata.namespace"))?;
        let owner = pool
            .controller_owner_ref(&())
            .ok_or(SpecError::MissingField("metadata.uid"))?;

        Ok(Self {
            base: &spec.stateful_set_name,
            namespace,
            worker_count: spec.worker_count,
            algorithm: spec.algorithm,
            owner,
            settings,
        })
    }

    /// Uid of the pool every child must be owned by
    pub fn owner_uid(&self) -> &str {
        &self.owner.uid
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn worker_count(&self) -> i32 {
        self.worker_count
    }

    pub fn desired_replicas(&self) -> i32 {
        self.worker_count - 1
    }

    /// Expected `SSH_SERVERS` value for the current worker count
    pub fn ssh_servers(&self) -> String {
        naming::ssh_servers(self.base, self.worker_count)
    }

    pub fn object_name(&self, child: Child) -> String {
        child.object_name(self.base)
    }

    /// Build the desired object for one child
    pub fn build(&self, child: Child) -> ChildObject {
        match child {
            Child::LauncherService => ChildObject::Service(build_launcher_service(self)),
            Child::WorkerService => ChildObject::Service(build_worker_service(self)),
            Child::WorkerStatefulSet => ChildObject::StatefulSet(build_worker_stateful_set(self)),
            Child::LauncherJob => ChildObject::Job(build_launcher_job(self)),
        }
    }

    fn env(&self) -> Vec<EnvVar> {
        naming::pool_env(
            self.base,
            self.worker_count,
            &self.settings.network,
            self.algorithm,
        )
    }

    fn metadata(&self, name: &str, labels: Option<BTreeMap<String, String>>) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels,
            owner_references: Some(vec![self.owner.clone()]),
            ..Default::default()
        }
    }

    fn container(&self, volume_mounts: Option<Vec<VolumeMount>>) -> Container {
        Container {
            name: self.settings.container_name.clone(),
            image: Some(self.settings.image.clone()),
            image_pull_policy: Some(self.settings.image_pull_policy.clone()),
            command: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            ports: Some(vec![ContainerPort {
                name: Some(PORT_NAME.to_string()),
                container_port: self.settings.port,
                ..Default::default()
            }]),
            env: Some(self.env()),
            volume_mounts,
            ..Default::default()
        }
    }
}

fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(naming::APP_LABEL.to_string(), app.to_string())])
}

// ============================================================================
// Services
// ============================================================================

/// Headless service giving each worker a stable DNS name
pub fn build_worker_service(t: &PoolTemplate<'_>) -> Service {
    headless_service(
        t,
        &naming::worker_service_name(t.base),
        &naming::worker_stateful_set_name(t.base),
    )
}

/// Headless service giving the launcher job a stable network identity
pub fn build_launcher_service(t: &PoolTemplate<'_>) -> Service {
    headless_service(
        t,
        &naming::launcher_service_name(t.base),
        &naming::launcher_job_name(t.base),
    )
}

fn headless_service(t: &PoolTemplate<'_>, name: &str, selects: &str) -> Service {
    Service {
        metadata: t.metadata(name, Some(app_labels(name))),
        spec: Some(ServiceSpec {
            cluster_ip: Some(HEADLESS.to_string()),
            ports: Some(vec![ServicePort {
                name: Some(PORT_NAME.to_string()),
                port: t.settings.port,
                ..Default::default()
            }]),
            selector: Some(app_labels(selects)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Workloads
// ============================================================================

/// Worker replicas: `workerCount - 1` pods, each with its own volume
pub fn build_worker_stateful_set(t: &PoolTemplate<'_>) -> StatefulSet {
    let name = naming::worker_stateful_set_name(t.base);
    let volume = naming::volume_name(t.base);

    let mount = VolumeMount {
        name: volume.clone(),
        mount_path: t.settings.mount_path.clone(),
        ..Default::default()
    };

    let claim = PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(volume),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec![READ_WRITE_ONCE.to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(t.settings.storage_request.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    StatefulSet {
        metadata: t.metadata(&name, None),
        spec: Some(StatefulSetSpec {
            // Optional on newer API versions, required on older ones
            service_name: naming::worker_service_name(t.base).into(),
            replicas: Some(t.desired_replicas()),
            selector: LabelSelector {
                match_labels: Some(app_labels(&name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.clone()),
                    labels: Some(app_labels(&name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![t.container(Some(vec![mount]))],
                    ..Default::default()
                }),
            },
            volume_claim_templates: Some(vec![claim]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Run-once launcher pod that waits for external orchestration
pub fn build_launcher_job(t: &PoolTemplate<'_>) -> Job {
    let name = naming::launcher_job_name(t.base);

    Job {
        metadata: t.metadata(&name, Some(app_labels(&name))),
        spec: Some(JobSpec {
            backoff_limit: Some(LAUNCHER_BACKOFF_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    name: Some(name.clone()),
                    labels: Some(app_labels(&name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![t.container(None)],
                    restart_policy: Some(RESTART_NEVER.to_string()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

// ============================================================================
// Live object accessors
// ============================================================================

/// Environment of the first container in a pod template
pub fn template_env(template: &PodTemplateSpec) -> &[EnvVar] {
    template
        .spec
        .as_ref()
        .and_then(|spec| spec.containers.first())
        .and_then(|c| c.env.as_deref())
        .unwrap_or_default()
}

/// `SSH_SERVERS` carried by a stateful set's pod template
pub fn stateful_set_ssh_servers(sts: &StatefulSet) -> Option<&str> {
    sts.spec
        .as_ref()
        .and_then(|spec| naming::env_value(template_env(&spec.template), naming::SSH_SERVERS_ENV))
}

/// `SSH_SERVERS` carried by a job's pod template
pub fn job_ssh_servers(job: &Job) -> Option<&str> {
    job.spec
        .as_ref()
        .and_then(|spec| naming::env_value(template_env(&spec.template), naming::SSH_SERVERS_ENV))
}

/// Replica count of a live stateful set (unset means 1)
pub fn stateful_set_replicas(sts: &StatefulSet) -> i32 {
    sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::resources::WorkerPoolSpec;

    fn pool(base: &str, workers: i32) -> WorkerPool {
        let mut pool = WorkerPool::new("graph", WorkerPoolSpec::new(base, workers));
        pool.metadata.namespace = Some("default".to_string());
        pool.metadata.uid = Some("uid-1234".to_string());
        pool
    }

    #[test]
    fn test_invalid_worker_count() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 0);
        let result = PoolTemplate::new(&p, &settings);
        assert!(matches!(result, Err(SpecError::InvalidWorkerCount(0))));
    }

    #[test]
    fn test_worker_count_upper_bound() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", naming::MAX_WORKER_COUNT);
        assert!(PoolTemplate::new(&p, &settings).is_ok());

        let p = pool("g1", naming::MAX_WORKER_COUNT + 1);
        let err = PoolTemplate::new(&p, &settings).unwrap_err();
        assert_eq!(err, SpecError::InvalidWorkerCount(naming::MAX_WORKER_COUNT + 1));
        assert_eq!(
            err.to_string(),
            "workerCount must be between 1 and 10000, got 10001"
        );

        let p = pool("g1", i32::MAX);
        assert!(PoolTemplate::new(&p, &settings).is_err());
    }

    #[test]
    fn test_owner_uid() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 3);
        let t = PoolTemplate::new(&p, &settings).unwrap();
        assert_eq!(t.owner_uid(), "uid-1234");
    }

    #[test]
    fn test_invalid_name() {
        let settings = WorkloadSettings::default();
        let p = pool("G_1", 3);
        assert!(matches!(
            PoolTemplate::new(&p, &settings),
            Err(SpecError::InvalidName(_))
        ));
    }

    #[test]
    fn test_missing_uid() {
        let settings = WorkloadSettings::default();
        let mut p = pool("g1", 3);
        p.metadata.uid = None;
        assert_eq!(
            PoolTemplate::new(&p, &settings).unwrap_err(),
            SpecError::MissingField("metadata.uid")
        );
    }

    #[test]
    fn test_services_are_headless() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 3);
        let t = PoolTemplate::new(&p, &settings).unwrap();

        let worker = build_worker_service(&t);
        assert_eq!(worker.metadata.name.as_deref(), Some("g1-worker-service"));
        let spec = worker.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.selector.unwrap()["app"], "g1-worker");
        assert_eq!(spec.ports.unwrap()[0].port, 80);

        let launcher = build_launcher_service(&t);
        assert_eq!(launcher.metadata.name.as_deref(), Some("g1-launcher-service"));
        assert_eq!(launcher.spec.unwrap().selector.unwrap()["app"], "g1-launcher-job");
    }

    #[test]
    fn test_stateful_set() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 3);
        let t = PoolTemplate::new(&p, &settings).unwrap();

        let sts = build_worker_stateful_set(&t);
        assert_eq!(sts.metadata.name.as_deref(), Some("g1-worker"));
        assert_eq!(stateful_set_replicas(&sts), 2);
        assert_eq!(stateful_set_ssh_servers(&sts), Some("g1-0,g1-1,g1-2"));

        let value = serde_json::to_value(&sts).unwrap();
        assert_eq!(value["spec"]["serviceName"], "g1-worker-service");

        let spec = sts.spec.unwrap();
        let claims = spec.volume_claim_templates.unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[0].metadata.name.as_deref(), Some("g1-vm"));
        let claim_spec = claims[0].spec.clone().unwrap();
        assert_eq!(claim_spec.access_modes.unwrap(), vec!["ReadWriteOnce"]);
        let requests = claim_spec.resources.unwrap().requests.unwrap();
        assert_eq!(requests["storage"], Quantity("500".to_string()));

        let env = template_env(&spec.template);
        assert_eq!(naming::env_value(env, naming::NETWORK_ENV), Some("udp"));
    }

    #[test]
    fn test_launcher_job() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 3);
        let t = PoolTemplate::new(&p, &settings).unwrap();

        let job = build_launcher_job(&t);
        assert_eq!(job.metadata.name.as_deref(), Some("g1-launcher-job"));
        assert_eq!(job_ssh_servers(&job), Some("g1-0,g1-1,g1-2"));

        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(1));
        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));
        assert_eq!(
            pod.containers[0].command.clone().unwrap(),
            vec!["sleep", "infinity"]
        );
    }

    #[test]
    fn test_owner_reference_on_every_child() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 2);
        let t = PoolTemplate::new(&p, &settings).unwrap();

        for child in Child::ALL {
            let object = t.build(child);
            assert_eq!(object.kind(), child.kind());
            assert_eq!(object.namespace(), "default");
            assert!(object.is_owned_by("uid-1234"));

            let owner = &object.metadata().owner_references.as_ref().unwrap()[0];
            assert_eq!(owner.kind, "WorkerPool");
            assert_eq!(owner.api_version, "pgas.github.com/v1alpha1");
            assert_eq!(owner.controller, Some(true));
        }
    }

    #[test]
    fn test_builders_are_deterministic() {
        let settings = WorkloadSettings::default();
        let p = pool("g1", 4);
        let first = PoolTemplate::new(&p, &settings).unwrap();
        let second = PoolTemplate::new(&p, &settings).unwrap();

        for child in Child::ALL {
            assert_eq!(first.build(child), second.build(child));
            assert_eq!(
                serde_json::to_string(&first.build(child)).unwrap(),
                serde_json::to_string(&second.build(child)).unwrap()
            );
        }
    }

    #[test]
    fn test_single_worker_pool() {
        let settings = WorkloadSettings::default();
        let p = pool("solo", 1);
        let t = PoolTemplate::new(&p, &settings).unwrap();

        let sts = build_worker_stateful_set(&t);
        assert_eq!(stateful_set_replicas(&sts), 0);
        assert_eq!(stateful_set_ssh_servers(&sts), Some("solo-0"));
    }
}
