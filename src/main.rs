use std::sync::Arc;
use std::time::Duration;

use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use availd::catalog::ScheduleKind;
use availd::config::ServerConfig;
use availd::observability;
use availd::tenant::{TenantManager, TenantSettings};
use availd::wire;

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = ServerConfig::from_env()?;
    observability::init(config.metrics_port)?;
    let tls = availd::tls::load_tls_acceptor(config.tls_cert.as_deref(), config.tls_key.as_deref())?;
    std::fs::create_dir_all(&config.data_dir)?;

    let tenants = Arc::new(TenantManager::new(
        config.data_dir.clone(),
        TenantSettings {
            catalog: Arc::new(config.catalog.clone()),
            timezone: config.timezone,
            compact_threshold: config.compact_threshold,
            retention_days: config.retention_days,
        },
    ));
    let permits = Arc::new(Semaphore::new(config.max_connections));

    let listener = TcpListener::bind(config.listen_addr()).await?;
    log_startup(&config, tls.is_some());

    serve(listener, &config, tenants, tls, permits.clone(), shutdown_signal()?).await;
    drain(&permits, config.max_connections).await;

    info!("availd stopped");
    Ok(())
}

fn log_startup(config: &ServerConfig, tls: bool) {
    info!("availd listening on {}", config.listen_addr());
    info!(
        "  data_dir={} timezone={} retention={}d",
        config.data_dir.display(),
        config.timezone,
        config.retention_days
    );
    info!(
        "  catalog: {} weekday slots, {} weekend slots",
        config.catalog.schedule(ScheduleKind::Weekday).len(),
        config.catalog.schedule(ScheduleKind::Weekend).len()
    );
    info!(
        "  max_connections={} tls={} metrics={}",
        config.max_connections,
        if tls { "on" } else { "off" },
        config
            .metrics_port
            .map_or("off".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
}

/// Resolves on ctrl-c, or SIGTERM on unix.
fn shutdown_signal() -> std::io::Result<impl std::future::Future<Output = ()>> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    Ok(async move {
        #[cfg(unix)]
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        #[cfg(not(unix))]
        tokio::signal::ctrl_c().await.ok();
    })
}

/// Accept staff and booking-page connections until `shutdown` fires.
async fn serve(
    listener: TcpListener,
    config: &ServerConfig,
    tenants: Arc<TenantManager>,
    tls: Option<TlsAcceptor>,
    permits: Arc<Semaphore>,
    shutdown: impl std::future::Future<Output = ()>,
) {
    tokio::pin!(shutdown);
    loop {
        let (socket, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::error!("accept error: {e}");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("shutdown requested, no longer accepting connections");
                return;
            }
        };

        let Ok(permit) = permits.clone().try_acquire_owned() else {
            tracing::warn!("at {} connections, turning away {peer}", config.max_connections);
            metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
            continue;
        };

        tracing::debug!("connection from {peer}");
        metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
        metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
        let tenants = tenants.clone();
        let password = config.password.clone();
        let tls = tls.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = wire::process_connection(socket, tenants, password, tls).await {
                tracing::error!("connection from {peer} failed: {e}");
            }
            metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
        });
    }
}

/// Wait for open connections to finish, giving up after `DRAIN_TIMEOUT`.
/// Every acknowledged block is already fsynced, so a cut-off client only
/// loses its in-flight statement.
async fn drain(permits: &Semaphore, max_connections: usize) {
    let open = max_connections - permits.available_permits();
    if open == 0 {
        return;
    }
    info!("waiting for {open} open connections to finish");
    match tokio::time::timeout(DRAIN_TIMEOUT, permits.acquire_many(max_connections as u32)).await {
        Ok(_) => info!("all connections closed"),
        Err(_) => {
            let remaining = max_connections - permits.available_permits();
            tracing::warn!("gave up after {DRAIN_TIMEOUT:?} with {remaining} connections open");
        }
    }
}
