// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::Parser;
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service},
};
use kube::{
    runtime::{controller::Action, watcher::Config, Controller},
    Api, Client, Resource, ResourceExt,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use webmesh_operator::{
    compute::gce::{GceEndpoints, GceProvider},
    constants::{
        DEFAULT_READY_REQUEUE_SECS, ERROR_REQUEUE_DURATION_SECS, FIELD_MANAGER,
        HEALTH_SERVER_PATH, KIND_MESH, KIND_NODE_GROUP, METRICS_SERVER_BIND_ADDRESS,
        METRICS_SERVER_PATH, TOKIO_WORKER_THREADS,
    },
    context::Context,
    crd::{Mesh, NodeGroup},
    metrics,
    reconcilers::{reconcile_mesh, reconcile_node_group, Outcome},
    store::KubeStore,
};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ReconcileError(#[from] anyhow::Error);

/// Webmesh operator: runs the Mesh and NodeGroup controllers.
#[derive(Debug, Parser)]
#[command(name = "webmesh-operator", version, about)]
struct Args {
    /// Field manager used for server-side apply
    #[arg(long, env = "WEBMESH_FIELD_MANAGER", default_value = FIELD_MANAGER)]
    field_manager: String,

    /// Bind address of the metrics and health endpoints
    #[arg(long, env = "WEBMESH_METRICS_ADDR", default_value = METRICS_SERVER_BIND_ADDRESS)]
    metrics_addr: SocketAddr,

    /// Seconds between reconciliations of converged resources
    #[arg(long, env = "WEBMESH_REQUEUE_SECS", default_value_t = DEFAULT_READY_REQUEUE_SECS)]
    requeue_secs: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Build Tokio runtime with custom thread names
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(TOKIO_WORKER_THREADS)
        .thread_name("webmesh-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(args))
}

fn init_logging() {
    // Respects RUST_LOG if set, otherwise defaults to INFO.
    // RUST_LOG_FORMAT=json switches to structured output.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }
}

async fn async_main(args: Args) -> Result<()> {
    init_logging();

    info!("Starting Webmesh Operator");
    debug!(?args, "Parsed runtime configuration");

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;
    debug!("Kubernetes client initialized successfully");

    let compute = GceProvider::new(reqwest::Client::new(), GceEndpoints::google()?);
    let ctx = Arc::new(
        Context::new(Arc::new(KubeStore::new(client.clone())), Arc::new(compute))
            .with_field_manager(args.field_manager)
            .with_ready_requeue(Duration::from_secs(args.requeue_secs)),
    );

    info!("Starting all controllers");

    // Controllers should never exit - if one does, log it and exit the process
    tokio::select! {
        result = run_mesh_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: Mesh controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("Mesh controller exited unexpectedly without error")
        }
        result = run_node_group_controller(client.clone(), ctx.clone()) => {
            error!("CRITICAL: NodeGroup controller exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("NodeGroup controller exited unexpectedly without error")
        }
        result = serve_metrics(args.metrics_addr) => {
            error!("CRITICAL: metrics server exited unexpectedly: {:?}", result);
            result?;
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, stopping controllers");
            Ok(())
        }
    }
}

// ============================================================================
// Metrics and health endpoints
// ============================================================================

async fn metrics_handler() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn serve_metrics(addr: SocketAddr) -> Result<()> {
    let app = Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route(HEALTH_SERVER_PATH, get(|| async { "ok" }));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Serving metrics and health endpoints");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Controllers
// ============================================================================

/// Run the `Mesh` controller
async fn run_mesh_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting Mesh controller");

    let api = Api::<Mesh>::all(client.clone());

    Controller::new(api, Config::default())
        .owns(Api::<NodeGroup>::all(client.clone()), Config::default())
        .owns(Api::<Secret>::all(client), Config::default())
        .run(reconcile_mesh_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Run the `NodeGroup` controller
async fn run_node_group_controller(client: Client, ctx: Arc<Context>) -> Result<()> {
    info!("Starting NodeGroup controller");
    debug!("Initializing NodeGroup controller with cluster-wide watch");

    let api = Api::<NodeGroup>::all(client.clone());

    Controller::new(api, Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), Config::default())
        .owns(Api::<Service>::all(client.clone()), Config::default())
        .owns(Api::<StatefulSet>::all(client.clone()), Config::default())
        .owns(Api::<Pod>::all(client.clone()), Config::default())
        .owns(Api::<Deployment>::all(client.clone()), Config::default())
        .owns(
            Api::<PersistentVolumeClaim>::all(client),
            Config::default(),
        )
        .run(reconcile_node_group_wrapper, error_policy, ctx)
        .for_each(|_| futures::future::ready(()))
        .await;

    Ok(())
}

/// Record the outcome of a pass and turn it into a controller action.
fn finish(kind: &str, name: &str, outcome: Outcome, started: Instant, ctx: &Context) -> Action {
    match outcome {
        Outcome::Requeue { after, reason } => {
            debug!(kind, resource = name, reason, ?after, "Requeueing");
            metrics::record_reconciliation_requeue(kind, reason);
        }
        Outcome::Ready | Outcome::Deleted => {
            info!("Successfully reconciled {}: {}", kind, name);
            metrics::record_reconciliation_success(kind, started.elapsed());
        }
    }
    outcome.action(ctx.ready_requeue)
}

/// Reconcile wrapper for `Mesh`
async fn reconcile_mesh_wrapper(
    mesh: Arc<Mesh>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    debug!(
        mesh = %mesh.name_any(),
        namespace = ?mesh.namespace(),
        "Reconcile wrapper called for Mesh"
    );
    let started = Instant::now();

    match reconcile_mesh(&ctx, &mesh).await {
        Ok(outcome) => Ok(finish(KIND_MESH, &mesh.name_any(), outcome, started, &ctx)),
        Err(e) => {
            error!("Failed to reconcile Mesh {}: {:#}", mesh.name_any(), e);
            metrics::record_reconciliation_error(KIND_MESH, started.elapsed());
            Err(e.into())
        }
    }
}

/// Reconcile wrapper for `NodeGroup`
async fn reconcile_node_group_wrapper(
    group: Arc<NodeGroup>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    debug!(
        nodegroup = %group.name_any(),
        namespace = ?group.namespace(),
        "Reconcile wrapper called for NodeGroup"
    );
    let started = Instant::now();

    match reconcile_node_group(&ctx, &group).await {
        Ok(outcome) => Ok(finish(
            KIND_NODE_GROUP,
            &group.name_any(),
            outcome,
            started,
            &ctx,
        )),
        Err(e) => {
            error!("Failed to reconcile NodeGroup {}: {:#}", group.name_any(), e);
            metrics::record_reconciliation_error(KIND_NODE_GROUP, started.elapsed());
            Err(e.into())
        }
    }
}

/// Error policy shared by both controllers
fn error_policy<K>(resource: Arc<K>, err: &ReconcileError, _ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    let kind = K::kind(&());
    error!(
        "Reconciliation error for {} {}: {}",
        kind,
        resource.name_any(),
        err
    );
    metrics::record_error(&kind, "reconcile_error");
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_DURATION_SECS))
}
