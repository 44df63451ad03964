//! CStor Pool Auto
//!
//! Hook server that plans cStor pool clusters from cluster-wide intent. An
//! external orchestrator watches the resources and posts sync requests to
//! `/v1/sync/<hook>`; metrics are served on a separate listener.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cstor_pool_auto::controlplane::DEFAULT_LISTEN_ADDR;
use cstor_pool_auto::crd::owned_crds;
use cstor_pool_auto::{
    ApiServer, ApiServerConfig, Error, HookContext, InMemoryReservationLedger, Metrics,
    OperatorConfig, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CStor Pool Auto - declarative cStor pool cluster planning
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the sync hooks
    Serve {
        /// Hook API bind address
        #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
        listen_addr: String,

        /// Metrics server bind address
        #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:9090")]
        metrics_addr: String,

        /// Operator config file (YAML)
        #[arg(long, env = "OPERATOR_CONFIG")]
        config: Option<String>,
    },
    /// Print the definitions of the owned resources as YAML
    Crds,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Crds => print_crds(),
        Command::Serve {
            ref listen_addr,
            ref metrics_addr,
            ref config,
        } => {
            init_logging(&args);
            serve(listen_addr, metrics_addr, config.as_deref()).await
        }
    }
}

async fn serve(listen_addr: &str, metrics_addr: &str, config_path: Option<&str>) -> Result<()> {
    info!(version = cstor_pool_auto::VERSION, "starting cstor pool auto");

    let config = match config_path {
        Some(path) => OperatorConfig::from_file(path)?,
        None => OperatorConfig::default(),
    };
    info!(
        resync_after_seconds = config.resync_after_seconds,
        default_min_pool_count = config.default_min_pool_count,
        default_min_disk_capacity = %config.default_min_disk_capacity,
        "operator config"
    );

    let metrics = Metrics::new()?;
    let ctx = HookContext::new(config, Arc::new(InMemoryReservationLedger::new()));

    // Start metrics server
    let metrics_addr: SocketAddr = metrics_addr
        .parse()
        .map_err(|e| Error::Configuration(format!("invalid metrics address: {}", e)))?;
    let exported = metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(metrics_addr, exported).await {
            error!("Metrics server error: {}", e);
        }
    });

    let server = ApiServer::new(ApiServerConfig::parse(listen_addr)?, ctx, metrics);
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received");
            let _ = shutdown.send(());
        }
    });

    server.run().await?;

    info!("shutdown complete");
    Ok(())
}

fn print_crds() -> Result<()> {
    for crd in owned_crds() {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
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
    for directive in ["hyper=warn", "kube=info", "tower=warn", "axum=info"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: SocketAddr, metrics: Metrics) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    fn respond(status: StatusCode, content_type: &str, body: Vec<u8>) -> Response<Body> {
        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;
        if let Ok(value) = HeaderValue::from_str(content_type) {
            response.headers_mut().insert(CONTENT_TYPE, value);
        }
        response
    }

    let make_svc = make_service_fn(move |_conn| {
        let metrics = metrics.clone();
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = metrics.clone();
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                respond(StatusCode::OK, &content_type, buffer)
                            }
                            Err(e) => respond(
                                StatusCode::INTERNAL_SERVER_ERROR,
                                "text/plain",
                                e.to_string().into_bytes(),
                            ),
                        },
                        _ => respond(StatusCode::NOT_FOUND, "text/plain", b"not found".to_vec()),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
