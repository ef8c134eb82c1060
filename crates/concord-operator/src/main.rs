//! Concord operator entrypoint

use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;

use concord_common::telemetry::init_telemetry;
use concord_operator::config::{Cli, Commands, RunArgs};
use concord_operator::{controller_runner, crds};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Crds) => {
            let yaml = crds::render_crds_yaml()
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
            print!("{yaml}");
            Ok(())
        }
        Some(Commands::Run) | None => run(cli.run).await,
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let _telemetry =
        init_telemetry(args.telemetry_config(&controller_runner::CONTROLLER_NAMES))?;

    tracing::info!(namespace = %args.namespace, "Starting Concord operator");

    let issuer = args.load_issuer()?;
    let server_config = args.server_config()?;

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    if !args.skip_crd_install {
        crds::ensure_crds_installed(&client)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRDs: {}", e))?;
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown_signal().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    controller_runner::run(client, args, issuer, server_config, shutdown).await?;

    tracing::info!("Concord operator stopped");
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM where available
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
