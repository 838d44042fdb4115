//! Forward-auth sidecar daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use warden_feed::{FetcherConfig, Updater, UpdaterConfig};
use warden_logs::{LogShipper, MetricsCollector, ShipperConfig, TokenProvider};
use warden_matcher::Matcher;
use warden_metrics::ForwardAuthMetrics;
use wardend::routes::{create_metrics_router, create_router};
use wardend::{server, version, AppState, DaemonError, DaemonResult, EnvConfig, RuntimeConfig};

/// Budget for each listener to finish in-flight requests.
const SERVER_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if std::env::args().any(|arg| arg == "--version") {
        println!("warden forward-auth");
        println!("Version:    {}", version::VERSION);
        println!("Git Commit: {}", version::GIT_COMMIT);
        println!("Build Date: {}", version::BUILD_DATE);
        return;
    }

    let env = EnvConfig::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(env.log_level.clone())),
        )
        .init();

    info!(
        version = version::VERSION,
        commit = version::GIT_COMMIT,
        built = version::BUILD_DATE,
        "starting warden forward-auth"
    );

    if let Err(err) = run(env).await {
        error!(error = %err, "fatal error");
        std::process::exit(1);
    }
}

async fn run(env: EnvConfig) -> DaemonResult<()> {
    let config = RuntimeConfig::initialize(env).await?;

    info!(
        port = config.env.port,
        metrics_port = config.env.metrics_port,
        "starting forward-auth server"
    );
    if config.deployment_enabled {
        debug!(
            url = %config.edl_url,
            mode = %config.edl_mode,
            update_frequency = ?config.update_frequency,
            "EDL configuration"
        );
    } else {
        info!("deployment is disabled - allowing all traffic");
    }

    let metrics = ForwardAuthMetrics::new();
    let matcher = Arc::new(Matcher::new());

    let updater = Arc::new(Updater::new(
        UpdaterConfig {
            fetcher: FetcherConfig {
                url: config.edl_url.clone(),
                max_retry_attempts: config.env.max_retry_attempts,
                retry_delay: config.env.retry_delay,
            },
            update_frequency: config.update_frequency,
            deployment_enabled: config.deployment_enabled,
        },
        Arc::clone(&matcher),
        metrics.edl().clone(),
    ));

    if config.deployment_enabled {
        debug!("fetching initial EDL");
        Arc::clone(&updater).start().await?;
    } else {
        metrics.edl().set_entries(0);
    }

    let (shipper, collector) = init_log_shipping(&config, &metrics);

    let state = Arc::new(AppState {
        matcher,
        mode: config.edl_mode,
        deployment_enabled: config.deployment_enabled,
        device_id: config.device_id.clone(),
        ip_header_override: config.env.ip_header_override.clone(),
        shipper: shipper.clone(),
        updater: Arc::clone(&updater),
        metrics: metrics.clone(),
        static_dir: config.env.static_dir.clone(),
    });

    let (shutdown_tx, _) = watch::channel(false);

    let main_addr = SocketAddr::from(([0, 0, 0, 0], config.env.port));
    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.env.metrics_port));

    let mut main_server = tokio::spawn(server::serve(
        main_addr,
        create_router(state),
        "auth",
        shutdown_tx.subscribe(),
    ));
    let mut metrics_server = tokio::spawn(server::serve(
        metrics_addr,
        create_metrics_router(metrics.clone()),
        "metrics",
        shutdown_tx.subscribe(),
    ));

    tokio::select! {
        () = shutdown_signal() => {}
        result = &mut main_server => return flatten_server_exit(result),
        result = &mut metrics_server => return flatten_server_exit(result),
    }

    info!("shutting down servers");

    // Shipping first: it holds the only copy of undelivered deny events.
    if let Some(shipper) = &shipper {
        debug!("flushing log events");
        if let Err(err) = shipper.stop().await {
            error!(error = %err, "error stopping log shipper");
        }
    }
    if let Some(collector) = &collector {
        collector.stop();
    }
    updater.stop();
    config.token_manager.stop();

    let _ = shutdown_tx.send(true);
    for (handle, name) in [(main_server, "auth"), (metrics_server, "metrics")] {
        match tokio::time::timeout(SERVER_SHUTDOWN_TIMEOUT, handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => error!(server = name, error = %err, "server shutdown error"),
            Ok(Err(err)) => error!(server = name, error = %err, "server task panicked"),
            Err(_) => error!(server = name, "server shutdown timed out"),
        }
    }

    info!("server stopped");
    Ok(())
}

/// Wires up the shipper and its metrics collector when the control plane
/// provided a logs endpoint.
fn init_log_shipping(
    config: &RuntimeConfig,
    metrics: &ForwardAuthMetrics,
) -> (Option<Arc<LogShipper>>, Option<MetricsCollector>) {
    let logs_url = config.token_manager.logs_url();
    if logs_url.is_empty() {
        return (None, None);
    }

    debug!(url = %logs_url, "initializing log shipping");

    let tokens: Arc<dyn TokenProvider> = Arc::clone(&config.token_manager) as Arc<dyn TokenProvider>;
    let shipper = Arc::new(LogShipper::new(
        tokens,
        ShipperConfig {
            batch_size: config.env.log_batch_size,
            flush_interval: config.env.log_flush_interval,
            bucket_capacity: config.env.leaky_bucket_capacity,
            refill_rate: config.env.leaky_bucket_refill_rate,
            buffer_size: config.env.log_buffer_size,
        },
    ));
    shipper.start();

    let collector = MetricsCollector::start(Arc::clone(&shipper), metrics.shipping().clone());

    debug!(
        batch_size = config.env.log_batch_size,
        flush_interval = ?config.env.log_flush_interval,
        "log shipping initialized"
    );

    (Some(shipper), Some(collector))
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// A listener returning before any shutdown signal is a startup failure.
fn flatten_server_exit(
    result: Result<DaemonResult<()>, tokio::task::JoinError>,
) -> DaemonResult<()> {
    match result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err),
        Err(join_err) => Err(DaemonError::Server(std::io::Error::other(join_err))),
    }
}
