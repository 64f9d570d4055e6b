use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use roomdesk::config::Config;
use roomdesk::engine::{Engine, RateSchedule};
use roomdesk::store::JournaledStore;
use roomdesk::{compactor, seed, wire};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env()?;
    roomdesk::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let store = Arc::new(JournaledStore::open(&config.wal_path())?);
    let rooms = match &config.rooms_file {
        Some(path) => seed::load_rooms(path)?,
        None => seed::default_rooms(),
    };
    seed::seed_rooms(store.as_ref(), rooms).await?;

    let engine = Arc::new(
        Engine::new(store.clone(), RateSchedule::new(config.utc_offset))
            .with_store_timeout(config.store_timeout),
    );

    let compactor_store = store.clone();
    let threshold = config.compact_threshold;
    tokio::spawn(async move {
        compactor::run_compactor(compactor_store, threshold).await;
    });

    let max_connections = config.max_connections;
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = config.addr();
    let listener = TcpListener::bind(&addr).await?;
    info!("roomdesk listening on {addr}");
    info!("  data_dir: {}", config.data_dir.display());
    info!("  max_connections: {max_connections}");
    info!("  utc_offset: {}", config.utc_offset);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = ctrl_c => {}
                        _ = sigterm.recv() => {}
                    }
                }
                Err(e) => {
                    tracing::warn!("no SIGTERM handler ({e}), waiting for ctrl-c only");
                    ctrl_c.await.ok();
                }
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(roomdesk::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(roomdesk::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(roomdesk::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, engine).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(roomdesk::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("roomdesk stopped");
    Ok(())
}
