//! Derived names and environment helpers for WorkerPool children
//!
//! Every child object name is a pure function of the pool's
//! `statefulSetName`, so two pools with distinct base names never collide.

use k8s_openapi::api::core::v1::EnvVar;
use regex::Regex;

use super::resources::Algorithm;

/// Suffix of the headless service fronting the launcher job
pub const LAUNCHER_SERVICE_SUFFIX: &str = "-launcher-service";

/// Suffix of the headless service fronting the worker pods
pub const WORKER_SERVICE_SUFFIX: &str = "-worker-service";

/// Suffix of the worker stateful set
pub const WORKER_SUFFIX: &str = "-worker";

/// Suffix of the launcher job
pub const LAUNCHER_JOB_SUFFIX: &str = "-launcher-job";

/// Suffix of the per-replica volume claim template
pub const VOLUME_SUFFIX: &str = "-vm";

/// Label key used for selectors
pub const APP_LABEL: &str = "app";

/// Comma-joined list of worker addresses consumed by the launcher
pub const SSH_SERVERS_ENV: &str = "SSH_SERVERS";

/// Network conduit used by the UPC++ runtime
pub const NETWORK_ENV: &str = "UPCXX_NETWORK";

/// Algorithm tag handed to the workers
pub const ALGORITHM_ENV: &str = "ALGORITHM";

/// Kubernetes object names are DNS-1123 labels
const MAX_NAME_LEN: usize = 63;

/// Largest accepted `workerCount`.
///
/// `SSH_SERVERS` grows with every worker and is embedded in both the stateful
/// set and the job; at this bound it stays around 520 KB for the longest
/// valid base name.
pub const MAX_WORKER_COUNT: i32 = 10_000;

pub fn launcher_service_name(base: &str) -> String {
    format!("{}{}", base, LAUNCHER_SERVICE_SUFFIX)
}

pub fn worker_service_name(base: &str) -> String {
    format!("{}{}", base, WORKER_SERVICE_SUFFIX)
}

pub fn worker_stateful_set_name(base: &str) -> String {
    format!("{}{}", base, WORKER_SUFFIX)
}

pub fn launcher_job_name(base: &str) -> String {
    format!("{}{}", base, LAUNCHER_JOB_SUFFIX)
}

pub fn volume_name(base: &str) -> String {
    format!("{}{}", base, VOLUME_SUFFIX)
}

/// Addresses of every worker in the pool: `<base>-0` .. `<base>-(count-1)`
pub fn ssh_servers(base: &str, worker_count: i32) -> String {
    (0..worker_count.max(0))
        .map(|idx| format!("{}-{}", base, idx))
        .collect::<Vec<_>>()
        .join(",")
}

/// Check that a base name yields valid object names for every child.
///
/// Returns a human-readable reason on failure.
pub fn validate_base_name(base: &str) -> Result<(), String> {
    let pattern = Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").map_err(|e| e.to_string())?;

    if !pattern.is_match(base) {
        return Err(format!(
            "statefulSetName '{}' must consist of lowercase alphanumerics and '-', \
             starting and ending with an alphanumeric",
            base
        ));
    }

    // The launcher service carries the longest suffix
    let longest = launcher_service_name(base);
    if longest.len() > MAX_NAME_LEN {
        return Err(format!(
            "statefulSetName '{}' is too long: derived name '{}' exceeds {} characters",
            base, longest, MAX_NAME_LEN
        ));
    }

    Ok(())
}

/// Environment shared by the launcher and every worker, in a fixed order.
pub fn pool_env(base: &str, worker_count: i32, network: &str, algorithm: Algorithm) -> Vec<EnvVar> {
    vec![
        env_var(SSH_SERVERS_ENV, ssh_servers(base, worker_count)),
        env_var(NETWORK_ENV, network.to_string()),
        env_var(ALGORITHM_ENV, algorithm.to_string()),
    ]
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value),
        value_from: None,
    }
}

/// Look up a plain environment value by name
pub fn env_value<'a>(env: &'a [EnvVar], name: &str) -> Option<&'a str> {
    env.iter()
        .find(|e| e.name == name)
        .and_then(|e| e.value.as_deref())
}
