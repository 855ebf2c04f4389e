//! WorkerPool operator
//!
//! Keeps the launcher and worker objects of every `WorkerPool` custom
//! resource converged with its declared worker count.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod store;
