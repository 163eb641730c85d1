use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;
use tracing_subscriber::EnvFilter;

use parkpredict::arrival::{ArrivalResolver, DEFAULT_BUFFER_LOT};
use parkpredict::catalog::Catalog;
use parkpredict::engine::Engine;
use parkpredict::notify::NotifyHub;
use parkpredict::overstay::{
    MAX_OVERSTAY_MINUTES, MIN_OVERSTAY_MINUTES, OVERSTAY_PROBABILITY, OverstaySimulator,
};
use parkpredict::predictor::{HttpPredictor, OverstayPredictor, UnavailablePredictor};
use parkpredict::{observability, wire};

const DEFAULT_PREDICTOR_URL: &str = "http://localhost:5002/api/predict/overstay";

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let metrics_port: Option<u16> = std::env::var("PARKPREDICT_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    observability::init(metrics_port)?;

    let port = std::env::var("PARKPREDICT_PORT").unwrap_or_else(|_| "5433".into());
    let bind = std::env::var("PARKPREDICT_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let max_connections: usize = env_or("PARKPREDICT_MAX_CONNECTIONS", 256);
    let predictor_url =
        std::env::var("PARKPREDICT_PREDICTOR_URL").unwrap_or_else(|_| DEFAULT_PREDICTOR_URL.into());
    let predictor_timeout =
        Duration::from_millis(env_or("PARKPREDICT_PREDICTOR_TIMEOUT_MS", 2000));
    let buffer_lot =
        std::env::var("PARKPREDICT_BUFFER_LOT").unwrap_or_else(|_| DEFAULT_BUFFER_LOT.into());
    let seed: Option<u64> = std::env::var("PARKPREDICT_SEED")
        .ok()
        .and_then(|s| s.parse().ok());

    let catalog = match std::env::var("PARKPREDICT_CATALOG") {
        Ok(path) => Catalog::load(Path::new(&path))?,
        Err(_) => Catalog::builtin(),
    };
    if catalog.lot(&buffer_lot).is_none() {
        tracing::warn!("buffer lot {buffer_lot} is not in the catalog, rebooking is disabled");
    }

    let simulator = OverstaySimulator::new(
        env_or("PARKPREDICT_OVERSTAY_PROBABILITY", OVERSTAY_PROBABILITY),
        env_or("PARKPREDICT_OVERSTAY_MIN_MINUTES", MIN_OVERSTAY_MINUTES),
        env_or("PARKPREDICT_OVERSTAY_MAX_MINUTES", MAX_OVERSTAY_MINUTES),
        seed,
    );
    let overstay_probability = simulator.probability();

    let lots = catalog.lots().len();
    let spots = catalog.total_spots();
    let engine = Arc::new(Engine::new(Arc::new(catalog), simulator));

    let predictor: Arc<dyn OverstayPredictor> = if predictor_url.is_empty() {
        Arc::new(UnavailablePredictor)
    } else {
        Arc::new(HttpPredictor::new(predictor_url.clone(), predictor_timeout)?)
    };
    let resolver = Arc::new(
        ArrivalResolver::new(engine, predictor, Arc::new(NotifyHub::new()))
            .with_buffer_lot(buffer_lot.clone())
            .with_predictor_timeout(predictor_timeout),
    );

    let semaphore = Arc::new(Semaphore::new(max_connections));

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("parkpredict listening on {addr}");
    info!("  catalog: {lots} lots, {spots} spots, buffer lot {buffer_lot}");
    info!("  overstay probability: {overstay_probability}");
    info!(
        "  predictor: {} (timeout {}ms)",
        if predictor_url.is_empty() { "disabled" } else { predictor_url.as_str() },
        predictor_timeout.as_millis()
    );
    info!("  max_connections: {max_connections}");
    info!("  metrics: {}", metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
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
                        metrics::counter!(observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(observability::CONNECTIONS_ACTIVE).increment(1.0);
                let resolver = resolver.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::process_connection(socket, resolver).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(observability::CONNECTIONS_ACTIVE).decrement(1.0);
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
    let drain_deadline = tokio::time::sleep(Duration::from_secs(10));
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
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }

    info!("parkpredict stopped");
    Ok(())
}
