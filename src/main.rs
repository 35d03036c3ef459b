//! csi-driver-lvm Extension Controller
//!
//! Watches Extension resources of type `csi-driver-lvm` and deploys the
//! csi-driver-lvm controller and node plugin as one managed resource.
//!
//! In standalone mode no cluster is contacted: the bundle for the given
//! provider config is rendered to stdout.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use csi_driver_lvm_extension::controller::{self, Actuator, Context, ExtensionActuator, Metrics};
use csi_driver_lvm_extension::{
    ControllerConfiguration, Error, Extension, ExtensionSpec, ImageVector,
    InMemoryManagedResourceClient, KubeManagedResourceClient, ManagedResourceSynchronizer,
    Result, BUNDLE_NAME, NAMESPACE,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// csi-driver-lvm extension controller
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Operator configuration file (ControllerConfiguration)
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Only watch Extensions in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run in standalone mode (no Kubernetes), rendering the bundle to stdout
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Provider config (YAML or JSON) rendered in standalone mode
    #[arg(long, env = "PROVIDER_CONFIG")]
    provider_config: Option<PathBuf>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting csi-driver-lvm extension controller");
    info!("  Version: {}", csi_driver_lvm_extension::VERSION);
    info!("  Standalone mode: {}", args.standalone);

    let config = match &args.config {
        Some(path) => {
            info!("  Config: {}", path.display());
            ControllerConfiguration::load(path)?
        }
        None => ControllerConfiguration::default(),
    };
    let config = Arc::new(config);
    let images = Arc::new(ImageVector::load()?);
    info!("Image vector loaded ({} images)", images.len());

    if args.standalone {
        return render(&args, config, images).await;
    }

    let client = kube::Client::try_default().await?;
    let synchronizer =
        ManagedResourceSynchronizer::new(Arc::new(KubeManagedResourceClient::new(client.clone())));

    let metrics = Metrics::new()?;
    metrics.register(prometheus::default_registry())?;

    let resync_period = config.health_check().sync_period;
    let actuator = Actuator::new(config, images, synchronizer).with_metrics(metrics);

    let shutdown = CancellationToken::new();
    let ready = Arc::new(AtomicBool::new(false));

    // Start health server
    let health_addr = args.health_addr.clone();
    let health_ready = ready.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr, health_ready).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    // Abort in-flight waits on termination
    tokio::spawn(controller::cancel_on(shutdown_signal(), shutdown.clone()));

    let ctx = Arc::new(Context {
        client,
        actuator: Arc::new(actuator),
        resync_period,
        shutdown,
    });

    ready.store(true, Ordering::SeqCst);
    controller::run(ctx, args.watch_namespace.as_deref()).await?;

    info!("Controller shutdown complete");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// =============================================================================
// Standalone Rendering
// =============================================================================

async fn render(
    args: &Args,
    config: Arc<ControllerConfiguration>,
    images: Arc<ImageVector>,
) -> Result<()> {
    let provider_config = match &args.provider_config {
        Some(path) => {
            let raw = std::fs::read(path)?;
            let value: serde_json::Value =
                serde_yaml::from_slice(&raw).map_err(|e| Error::Decode(e.to_string()))?;
            Some(value)
        }
        None => None,
    };

    let mut ext = Extension::new(
        "csi-driver-lvm",
        ExtensionSpec {
            type_: csi_driver_lvm_extension::crd::EXTENSION_TYPE.to_string(),
            provider_config,
        },
    );
    ext.metadata.namespace = Some(NAMESPACE.to_string());

    let client = Arc::new(InMemoryManagedResourceClient::new());
    let actuator = Actuator::new(
        config,
        images,
        ManagedResourceSynchronizer::new(client.clone()),
    );
    actuator.reconcile(&ext, &CancellationToken::new()).await?;

    let bundle = client
        .bundle(NAMESPACE, BUNDLE_NAME)
        .ok_or_else(|| Error::Internal("rendered bundle missing".into()))?;

    info!(checksum = %bundle.checksum, objects = bundle.data.len(), "Rendered bundle");
    for (key, document) in &bundle.data {
        println!("---");
        println!("# {}", key);
        print!("{}", String::from_utf8_lossy(document));
    }
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "tower=warn"] {
        if let Ok(directive) = directive.parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    // Standalone output goes to stdout, keep logs on stderr
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

async fn run_health_server(addr: &str, ready: Arc<AtomicBool>) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let ready = ready.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let ready = ready.load(Ordering::SeqCst);
                async move {
                    let mut response = Response::new(Body::from("ok"));
                    match req.uri().path() {
                        "/healthz" | "/livez" => {}
                        "/readyz" if ready => {}
                        "/readyz" => {
                            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
                            *response.body_mut() = Body::from("not ready");
                        }
                        _ => {
                            *response.status_mut() = StatusCode::NOT_FOUND;
                            *response.body_mut() = Body::from("not found");
                        }
                    }
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let mut response = Response::new(Body::empty());
            match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            if let Ok(value) =
                                hyper::header::HeaderValue::from_str(encoder.format_type())
                            {
                                response
                                    .headers_mut()
                                    .insert(hyper::header::CONTENT_TYPE, value);
                            }
                            *response.body_mut() = Body::from(buffer);
                        }
                        Err(e) => {
                            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                            *response.body_mut() = Body::from(e.to_string());
                        }
                    }
                }
                _ => {
                    *response.status_mut() = StatusCode::NOT_FOUND;
                    *response.body_mut() = Body::from("not found");
                }
            }
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Configuration(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
