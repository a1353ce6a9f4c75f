//! # Terraform Cloud Cluster Controller
//!
//! A Kubernetes controller that provisions cluster infrastructure through
//! Terraform Cloud.
//!
//! ## Overview
//!
//! The controller reconciles two custom resources:
//!
//! 1. **TfcManagedControlPlane** - renders a Terraform configuration for a
//!    cluster control plane, publishes it to a Terraform Cloud workspace,
//!    drives a run to completion, and surfaces the endpoint plus a kubeconfig
//!    secret from the run outputs
//! 2. **TfcManagedMachinePool** - the same flow for a worker pool, gated on
//!    the owning cluster's control plane being ready, surfacing the provider
//!    ID list
//!
//! ## Features
//!
//! - **Level-triggered**: every pass re-derives its action from persisted
//!   status, so interrupted passes resume cleanly
//! - **Change detection**: configurations are fingerprinted and only
//!   republished when the rendered content changes
//! - **One run at a time**: at most one Terraform Cloud run is outstanding
//!   per resource
//! - **Prometheus metrics**: exposes metrics for monitoring and observability
//! - **Health probes**: HTTP endpoints for liveness and readiness checks
//!
//! ## Configuration
//!
//! - `TFC_ADDRESS` - Terraform Cloud address (defaults to `https://app.terraform.io`)
//! - `METRICS_PORT` - port for the metrics/probe server (defaults to 8080)

use anyhow::Result;
use futures::StreamExt;
use kube::{Api, Client};
use kube_runtime::{watcher, Controller};
use std::sync::Arc;
use tracing::{error, info};

use tfc_cluster_controller::crd::{TfcManagedControlPlane, TfcManagedMachinePool};
use tfc_cluster_controller::reconciler::{self, Context};
use tfc_cluster_controller::server::{start_server, ServerState};
use tfc_cluster_controller::{metrics, tfc};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tfc_cluster_controller=info".into()),
        )
        .init();

    info!("Starting Terraform Cloud Cluster Controller");

    metrics::register_metrics()?;

    let server_state = Arc::new(ServerState {
        is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
    });

    let server_state_clone = server_state.clone();
    let server_port = std::env::var("METRICS_PORT")
        .unwrap_or_else(|_| "8080".to_string())
        .parse::<u16>()
        .unwrap_or(8080);

    tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });

    let client = Client::try_default().await?;

    let tfc_address =
        std::env::var("TFC_ADDRESS").unwrap_or_else(|_| tfc::http::DEFAULT_ADDRESS.to_string());

    // One HTTP client shared by every reconciliation pass.
    let http = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;
    let ctx = Arc::new(Context::new(client.clone(), http, tfc_address));

    let control_planes: Api<TfcManagedControlPlane> = Api::all(client.clone());
    let machine_pools: Api<TfcManagedMachinePool> = Api::all(client.clone());

    server_state
        .is_ready
        .store(true, std::sync::atomic::Ordering::Relaxed);

    let control_plane_controller = Controller::new(control_planes, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconciler::reconcile_control_plane,
            reconciler::error_policy,
            ctx.clone(),
        )
        .for_each(|_| std::future::ready(()));

    let machine_pool_controller = Controller::new(machine_pools, watcher::Config::default())
        .shutdown_on_signal()
        .run(
            reconciler::reconcile_machine_pool,
            reconciler::error_policy,
            ctx.clone(),
        )
        .for_each(|_| std::future::ready(()));

    futures::join!(control_plane_controller, machine_pool_controller);

    info!("Controller stopped");

    Ok(())
}
