// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use std::sync::Arc;
use tracing::{info, warn};

use cloud_operator::config::Config;
use cloud_operator::kubernetes::wait_for_crds;
use cloud_operator::provider::{CloudSessionResolver, SessionResolver};
use cloud_operator::reconcilers::{BindingReconciler, ServiceReconciler};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting cloud operator");

    // Load configuration
    let config = Arc::new(Config::from_env()?);
    info!(
        "Configuration loaded: control_namespace={}, sync_period={:?}",
        config.control_namespace, config.sync_period
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the Service and Binding CRDs before starting reconcilers
    info!("Waiting for Service and Binding CRDs to become available...");
    wait_for_crds(&client).await?;

    let sessions: Arc<dyn SessionResolver> = Arc::new(CloudSessionResolver::new(client.clone(), config.clone()));

    let service_reconciler = ServiceReconciler::new(client.clone(), config.clone(), sessions.clone());
    let binding_reconciler = BindingReconciler::new(client, config, sessions);

    info!("Starting reconcilers...");

    tokio::try_join!(service_reconciler.run(), binding_reconciler.run())?;

    // This should never be reached as reconcilers run forever
    warn!("All reconcilers stopped unexpectedly");
    Ok(())
}
