use anyhow::Context as _;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use workerpool::cli::{
    algorithm_names, crd_yaml, format_algorithms, format_pool_status, format_rendered,
    load_pool_manifest, pool_status, render_pool, Cli, Commands,
};
use workerpool::cluster::run_controller;
use workerpool::config::{default_config_path, load_config_from, OperatorConfig};
use workerpool::store::KubeStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut cli = Cli::parse();

    // Load .env file if specified, then re-parse so WORKERPOOL_* values apply
    if let Some(env_file) = cli.env_file.clone() {
        dotenvy::from_path(&env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
        cli = Cli::parse();
    }

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config: OperatorConfig = load_config_from(&config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;

    match cli.command {
        Commands::Run(args) => {
            args.apply(&mut config);
            config.validate()?;

            let client = kube::Client::try_default()
                .await
                .context("Failed to connect to the Kubernetes API")?;
            info!("Loaded config from {}", config_path.display());
            run_controller(client, config).await?;
        }

        Commands::Crd => {
            print!("{}", crd_yaml()?);
        }

        Commands::Render(args) => {
            let pool = load_pool_manifest(&args.file)
                .with_context(|| format!("Failed to load manifest {}", args.file.display()))?;
            let rendered = render_pool(pool, &args.namespace, config.workload).await?;
            print!("{}", format_rendered(&rendered)?);
        }

        Commands::Get(args) => {
            let namespace = args.namespace.or(config.namespace);
            let client = kube::Client::try_default()
                .await
                .context("Failed to connect to the Kubernetes API")?;
            let store = KubeStore::new(client);
            let rows = pool_status(&store, namespace.as_deref()).await?;
            print!("{}", format_pool_status(&rows));
        }

        Commands::Algorithms => {
            print!("{}", format_algorithms(&algorithm_names()));
        }
    }

    Ok(())
}
