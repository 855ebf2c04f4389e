//! CLI module for workerpool
//!
//! Provides kubectl-style subcommands:
//! - `workerpool run` - Run the controller against the current kube context
//! - `workerpool crd` - Print the WorkerPool CustomResourceDefinition
//! - `workerpool render` - Reconcile a manifest offline and print the children
//! - `workerpool get` - List pools and the state of their children
//! - `workerpool algorithms` - List supported algorithms

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::OperatorConfig;

mod commands;
mod display;

pub use commands::*;
pub use display::*;

#[derive(Parser, Debug)]
#[command(name = "workerpool")]
#[command(about = "Kubernetes operator for distributed PGAS worker pools")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to config file (default: ~/.workerpool/config.yaml)
    #[arg(long, global = true, env = "WORKERPOOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file loaded before anything else
    #[arg(long, value_name = "FILE", global = true)]
    pub env_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the WorkerPool controller
    Run(RunArgs),

    /// Print the WorkerPool CustomResourceDefinition as YAML
    Crd,

    /// Reconcile a WorkerPool manifest offline and print the result
    Render(RenderArgs),

    /// List WorkerPools and their child objects
    Get(GetArgs),

    /// List supported graph algorithms
    Algorithms,
}

/// Arguments for the run command
#[derive(Parser, Debug, Default)]
pub struct RunArgs {
    /// Namespace to watch (omit for all namespaces)
    #[arg(short, long, env = "WORKERPOOL_NAMESPACE")]
    pub namespace: Option<String>,

    /// Maximum number of pools reconciled concurrently
    #[arg(long, env = "WORKERPOOL_CONCURRENCY")]
    pub concurrency: Option<u16>,

    /// Seconds between periodic resyncs of each pool
    #[arg(long, env = "WORKERPOOL_RESYNC_SECS")]
    pub resync_secs: Option<u64>,

    /// Seconds before retrying a pool whose reconcile failed
    #[arg(long, env = "WORKERPOOL_ERROR_REQUEUE_SECS")]
    pub error_requeue_secs: Option<u64>,

    /// Worker image override
    #[arg(long, env = "WORKERPOOL_IMAGE")]
    pub image: Option<String>,

    /// Log events instead of publishing them to the cluster
    #[arg(long)]
    pub no_events: bool,
}

impl RunArgs {
    /// Overlay flags onto file configuration
    pub fn apply(&self, config: &mut OperatorConfig) {
        if let Some(ns) = &self.namespace {
            config.namespace = Some(ns.clone());
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(secs) = self.resync_secs {
            config.resync_interval_secs = secs;
        }
        if let Some(secs) = self.error_requeue_secs {
            config.error_requeue_secs = secs;
        }
        if let Some(image) = &self.image {
            config.workload.image = image.clone();
        }
        if self.no_events {
            config.publish_events = false;
        }
    }
}

/// Arguments for the render command
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Path to the WorkerPool manifest (YAML or JSON)
    pub file: PathBuf,

    /// Namespace used when the manifest does not set one
    #[arg(short, long, default_value = "default")]
    pub namespace: String,
}

/// Arguments for the get command
#[derive(Parser, Debug)]
pub struct GetArgs {
    /// Namespace (omit for all namespaces)
    #[arg(short, long, env = "WORKERPOOL_NAMESPACE")]
    pub namespace: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let cli = Cli::try_parse_from([
            "workerpool",
            "-vv",
            "run",
            "--namespace",
            "graphs",
            "--concurrency",
            "8",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.namespace.as_deref(), Some("graphs"));
                assert_eq!(args.concurrency, Some(8));
                assert!(!args.no_events);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_render() {
        let cli = Cli::try_parse_from(["workerpool", "render", "pool.yaml"]).unwrap();
        match cli.command {
            Commands::Render(args) => {
                assert_eq!(args.file, PathBuf::from("pool.yaml"));
                assert_eq!(args.namespace, "default");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_render_requires_manifest() {
        assert!(Cli::try_parse_from(["workerpool", "render"]).is_err());
    }

    #[test]
    fn test_run_args_override_config() {
        let mut config = OperatorConfig::default();
        let args = RunArgs {
            namespace: Some("graphs".to_string()),
            resync_secs: Some(30),
            image: Some("registry.local/pgasgraph:v0.2".to_string()),
            no_events: true,
            ..Default::default()
        };
        args.apply(&mut config);

        assert_eq!(config.namespace.as_deref(), Some("graphs"));
        assert_eq!(config.resync_interval_secs, 30);
        assert_eq!(config.workload.image, "registry.local/pgasgraph:v0.2");
        assert!(!config.publish_events);
        // Unset flags leave file values alone
        assert_eq!(config.concurrency, 4);
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
