//! CSI driver entry point.
//!
//! Starts the Identity service plus whichever of Controller/Node is enabled,
//! serving gRPC over a unix domain socket as required by the CSI spec.
//! Controller mode connects to the NAS backend once at startup; Node mode
//! never opens a backend connection, only host-local tooling via
//! [`csi_driver::platform`].

use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;

use clap::Parser;
use tonic::transport::Server;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use csi_driver::backend::{BackendClient, BackendConfig};
use csi_driver::csi::controller_server::ControllerServer;
use csi_driver::csi::identity_server::IdentityServer;
use csi_driver::csi::node_server::NodeServer;
use csi_driver::{ControllerService, IdentityService, NodeService};

/// CLI arguments for the CSI driver.
#[derive(Parser, Debug)]
#[command(name = "nas-csi-driver")]
#[command(about = "CSI driver for a ZFS-backed NAS storage appliance")]
struct Args {
    /// CSI gRPC endpoint (unix socket path)
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///var/run/csi/csi.sock")]
    endpoint: String,

    /// Node ID this instance reports to `NodeGetInfo`
    #[arg(long, env = "CSI_NODE_ID")]
    node_id: Option<String>,

    /// Run in controller mode (enables the Controller service)
    #[arg(long, env = "CSI_CONTROLLER", default_value = "false")]
    controller: bool,

    /// Run in node mode (enables the Node service)
    #[arg(long, env = "CSI_NODE", default_value = "true")]
    node: bool,

    /// NAS backend WebSocket URL, e.g. `wss://nas.example:443/websocket`
    /// (required in controller mode)
    #[arg(long, env = "NAS_BACKEND_URL")]
    backend_url: Option<String>,

    /// API key used to authenticate to the NAS backend
    #[arg(long, env = "NAS_API_KEY")]
    backend_api_key: Option<String>,

    /// Skip TLS certificate verification when connecting to the backend
    #[arg(long, env = "NAS_BACKEND_INSECURE_TLS", default_value = "false")]
    backend_insecure_tls: bool,

    /// Driver name reported by `GetPluginInfo`
    #[arg(long, default_value = "zfs.csi.io")]
    driver_name: String,

    /// Prometheus metrics listen address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9808")]
    metrics_addr: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let node_id = match args.node_id {
        Some(id) => id,
        None => hostname::get()?.to_string_lossy().to_string(),
    };

    if let Err(e) = csi_driver::metrics::init_metrics(args.metrics_addr) {
        tracing::warn!(error = %e, "failed to start metrics listener, continuing without it");
    }

    if !args.controller && !args.node {
        return Err("at least one of --controller or --node must be enabled".into());
    }

    info!(
        driver_name = %args.driver_name,
        endpoint = %args.endpoint,
        node_id = %node_id,
        controller_mode = args.controller,
        node_mode = args.node,
        "Starting CSI driver"
    );

    let incoming = bind_uds(&args.endpoint)?;

    // Controller and Node run as separate sidecar containers against the
    // same socket path in practice, so build each server shape explicitly
    // rather than threading a conditionally-populated router through.
    match (args.controller, args.node) {
        (true, true) => {
            let backend = connect_backend(&args).await?;
            let identity = IdentityServer::new(IdentityService::with_readiness(backend.readiness.clone()));
            let controller = ControllerServer::new(ControllerService::new(backend));
            let node = NodeServer::new(NodeService::new(node_id));
            Server::builder()
                .add_service(identity)
                .add_service(controller)
                .add_service(node)
                .serve_with_incoming(incoming)
                .await?;
        }
        (true, false) => {
            let backend = connect_backend(&args).await?;
            let identity = IdentityServer::new(IdentityService::with_readiness(backend.readiness.clone()));
            let controller = ControllerServer::new(ControllerService::new(backend));
            Server::builder()
                .add_service(identity)
                .add_service(controller)
                .serve_with_incoming(incoming)
                .await?;
        }
        (false, true) => {
            let identity = IdentityServer::new(IdentityService::new());
            let node = NodeServer::new(NodeService::new(node_id));
            Server::builder()
                .add_service(identity)
                .add_service(node)
                .serve_with_incoming(incoming)
                .await?;
        }
        (false, false) => unreachable!("checked above"),
    }

    Ok(())
}

async fn connect_backend(args: &Args) -> Result<std::sync::Arc<BackendClient>, Box<dyn std::error::Error>> {
    let backend_url = args
        .backend_url
        .clone()
        .ok_or("--backend-url (or NAS_BACKEND_URL) is required in controller mode")?;
    let backend_api_key = args
        .backend_api_key
        .clone()
        .ok_or("--backend-api-key (or NAS_API_KEY) is required in controller mode")?;

    let backend = BackendClient::connect(BackendConfig {
        url: backend_url,
        api_key: backend_api_key,
        tls_verify: !args.backend_insecure_tls,
    })
    .await?;
    Ok(backend)
}

/// Binds the CSI unix domain socket, removing a stale socket file left
/// behind by a previous instance.
fn bind_uds(
    endpoint: &str,
) -> Result<tokio_stream::wrappers::UnixListenerStream, Box<dyn std::error::Error>> {
    let path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);

    if let Some(parent) = std::path::Path::new(path).parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::remove_file(path) {
        Ok(_) => info!(path = %path, "removed stale CSI socket"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    let listener = tokio::net::UnixListener::bind(path)?;
    info!(path = %path, "CSI driver listening");
    Ok(tokio_stream::wrappers::UnixListenerStream::new(listener))
}
