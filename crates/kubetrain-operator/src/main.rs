//! kubetrain operator - per-replica endpoints for distributed training jobs

use clap::Parser;
use kube::CustomResourceExt;

use kubetrain_common::crd::TrainingJob;
use kubetrain_common::kube_utils::create_client;
use kubetrain_common::telemetry::{init_telemetry, TelemetryConfig};
use kubetrain_operator::config::{Cli, Commands, ControllerArgs};
use kubetrain_operator::controller_runner::build_endpoint_controllers;
use kubetrain_operator::startup::ensure_crds;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&TrainingJob::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "kubetrain-operator".to_string(),
        otlp_endpoint: cli.controller.otlp_endpoint.clone(),
    })?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.controller).await,
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = create_client(args.kubeconfig.as_deref()).await?;

    if args.skip_crd_install {
        tracing::info!("Skipping CRD installation");
    } else {
        ensure_crds(&client).await?;
    }

    tracing::info!("Starting kubetrain controllers...");
    let controllers = build_endpoint_controllers(client, &args);

    // The first future to finish (normally the controller on SIGTERM) ends the process
    let (_, index, _) = futures::future::select_all(controllers).await;
    tracing::info!(index, "controller task completed, shutting down");

    Ok(())
}
