//! # WorkerPool Cluster Management
//!
//! Desired-state reconciliation for `WorkerPool` custom resources. A pool
//! names a base and a worker count; the operator keeps four children in
//! line with it:
//!
//! | Child              | Kind        | Name                       |
//! |--------------------|-------------|----------------------------|
//! | launcher service   | Service     | `<base>-launcher-service`  |
//! | worker service     | Service     | `<base>-worker-service`    |
//! | worker stateful set| StatefulSet | `<base>-worker`            |
//! | launcher job       | Job         | `<base>-launcher-job`      |
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  controller (watch loop)                 │
//! │   WorkerPool / Service / StatefulSet / Job change events │
//! └────────────────────────────┬─────────────────────────────┘
//!                              ▼
//!                    ┌───────────────────┐      ┌───────────────┐
//!                    │    Reconciler     │─────▶│ EventRecorder │
//!                    └─────────┬─────────┘      └───────────────┘
//!              builder (pure)  │  ResourceStore (get/create/update)
//!                              ▼
//!                    ┌───────────────────┐
//!                    │ KubeStore / Memory│
//!                    └───────────────────┘
//! ```
//!
//! Children carry a controller owner reference to the pool; deleting the pool
//! lets the API server's garbage collector remove them.

pub mod builder;
pub mod controller;
pub mod events;
pub mod naming;
pub mod reconciler;
pub mod resources;

pub use builder::{PoolTemplate, SpecError};
pub use controller::{error_policy, reconcile, run_controller, Context, ControllerError};
pub use events::{
    EventRecorder, KubeEventRecorder, LogRecorder, MemoryRecorder, PoolEvent, Severity,
};
pub use reconciler::{
    ChildAction, ChildOutcome, PoolPhase, ReconcileError, ReconcileOutcome, Reconciler,
    DEFAULT_MAX_CONFLICT_RETRIES,
};
pub use resources::*;
