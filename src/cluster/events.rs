//! Lifecycle events recorded against WorkerPool instances
//!
//! Recording is fire-and-forget: a failure to publish is logged and never
//! affects the reconciliation result.

use std::sync::Mutex;

use async_trait::async_trait;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource, ResourceExt};
use tracing::{info, warn};

use super::resources::WorkerPool;

/// Severity of a pool event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// A human-readable lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolEvent {
    pub severity: Severity,
    /// Short machine-friendly reason, e.g. "Created"
    pub reason: String,
    /// What the controller did, e.g. "Create"
    pub action: String,
    pub note: String,
}

impl PoolEvent {
    pub fn normal(
        reason: impl Into<String>,
        action: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Normal,
            reason: reason.into(),
            action: action.into(),
            note: note.into(),
        }
    }

    pub fn warning(
        reason: impl Into<String>,
        action: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            reason: reason.into(),
            action: action.into(),
            note: note.into(),
        }
    }
}

/// Sink for pool lifecycle events
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, pool: &WorkerPool, event: PoolEvent);
}

fn pool_key(pool: &WorkerPool) -> String {
    format!(
        "{}/{}",
        pool.namespace().unwrap_or_default(),
        pool.name_any()
    )
}

// ============================================================================
// Cluster events
// ============================================================================

/// Publishes `events.k8s.io` Events through the kube runtime recorder
pub struct KubeEventRecorder {
    recorder: Recorder,
}

impl KubeEventRecorder {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }

    /// Reporter identifying this controller instance
    pub fn reporter(controller: &str) -> Reporter {
        Reporter {
            controller: controller.to_string(),
            instance: hostname::get().ok().and_then(|h| h.into_string().ok()),
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(&self, pool: &WorkerPool, event: PoolEvent) {
        let reference = pool.object_ref(&());
        let ev = Event {
            type_: match event.severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: event.reason,
            note: Some(event.note),
            action: event.action,
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(&ev, &reference).await {
            warn!("Failed to publish event for WorkerPool {}: {}", pool_key(pool), e);
        }
    }
}

// ============================================================================
// Log-only and in-memory recorders
// ============================================================================

/// Writes events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

#[async_trait]
impl EventRecorder for LogRecorder {
    async fn record(&self, pool: &WorkerPool, event: PoolEvent) {
        match event.severity {
            Severity::Normal => info!(
                "[{}] {}: {}",
                pool_key(pool),
                event.reason,
                event.note
            ),
            Severity::Warning => warn!(
                "[{}] {}: {}",
                pool_key(pool),
                event.reason,
                event.note
            ),
        }
    }
}

/// Keeps every event in memory, keyed by `namespace/name` of the pool
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<(String, PoolEvent)>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, PoolEvent)> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Reasons of all recorded events, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|(_, event)| event.reason)
            .collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(&self, pool: &WorkerPool, event: PoolEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pool_key(pool), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::resources::WorkerPoolSpec;

    #[tokio::test]
    async fn test_memory_recorder_keeps_order() {
        let recorder = MemoryRecorder::new();
        let mut pool = WorkerPool::new("graph", WorkerPoolSpec::new("g1", 2));
        pool.metadata.namespace = Some("prod".to_string());

        recorder
            .record(&pool, PoolEvent::normal("Created", "Create", "first"))
            .await;
        recorder
            .record(&pool, PoolEvent::warning("LauncherJobStale", "Reconcile", "second"))
            .await;

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "prod/graph");
        assert_eq!(events[1].1.severity, Severity::Warning);
        assert_eq!(recorder.reasons(), vec!["Created", "LauncherJobStale"]);
    }

    #[test]
    fn test_reporter_name() {
        let reporter = KubeEventRecorder::reporter("workerpool-controller");
        assert_eq!(reporter.controller, "workerpool-controller");
    }
}
