//! sumika-server: wires the stores, the rate gate, the worker, the
//! scheduler, and the control surface together.
//!
//! Run with an optional config path:
//!
//! ```sh
//! sumika-server sumika.toml
//! ```

mod config;
mod error;
mod routes;
mod state;

use config::Settings;
use state::AppState;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use sumika_core::clock::{Clock, SystemClock};
use sumika_extract::{PortalClient, PortalExtractor, SelectorConfig};
use sumika_rategate::RateGateConfig;
use sumika_store::{MemStore, PgStore, PropertyStore, QueueStore};
use sumika_worker::{DiffProducer, Healthcheck, Scheduler, Worker};
use tokio::net::TcpListener;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let settings = Settings::load(std::env::args().nth(1).as_deref())?;
    settings.validate()?;

    let (queue, properties): (Arc<dyn QueueStore>, Arc<dyn PropertyStore>) =
        match settings.database.backend.as_str() {
            "postgres" => {
                let url = settings
                    .database
                    .url
                    .as_deref()
                    .ok_or("database.url is required for the postgres backend")?;
                let store = PgStore::connect(url).await?;
                store.ensure_schema().await?;
                let store = Arc::new(store);
                (store.clone(), store)
            }
            _ => {
                tracing::warn!("using the in-memory backend; state is lost on restart");
                let store = Arc::new(MemStore::new());
                (store.clone(), store)
            }
        };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gate = Arc::new(
        RateGateConfig::builder()
            .name(settings.source.name.clone())
            .per_hour_limit(settings.rate.per_hour_limit)
            .human_pace(
                std::time::Duration::from_secs(settings.rate.human_pace_min_sec),
                std::time::Duration::from_secs(settings.rate.human_pace_max_sec),
            )
            .cooldown_on_hostile(std::time::Duration::from_secs(
                settings.rate.cooldown_on_hostile_sec,
            ))
            .clock(clock.clone())
            .build()?,
    );

    let client = PortalClient::new(settings.portal_client_config())?;
    let extractor = Arc::new(PortalExtractor::new(
        client,
        settings.portal_source(),
        &SelectorConfig::default(),
    )?);

    let diff = Arc::new(DiffProducer::new(
        gate.clone(),
        extractor.clone(),
        queue.clone(),
        properties.clone(),
        clock.clone(),
    ));

    let is_running = Arc::new(AtomicBool::new(false));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let healthcheck = Healthcheck::new(
        gate.clone(),
        extractor.clone(),
        clock.clone(),
        settings.healthcheck_config(),
    );
    let worker = Worker::new(
        queue.clone(),
        properties.clone(),
        gate.clone(),
        extractor.clone(),
        clock.clone(),
        settings.worker_config(),
        is_running.clone(),
        shutdown_rx.clone(),
    );
    let worker_handle = tokio::spawn(async move {
        if let Err(e) = worker.run(healthcheck).await {
            tracing::error!(error = %e, "worker exited with error");
        }
    });

    let scheduler = Scheduler::new(
        diff.clone(),
        clock.clone(),
        settings.scheduler_config()?,
        shutdown_rx.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    let app_state = AppState {
        queue,
        properties,
        gate,
        diff,
        index_urls: Arc::new(settings.scheduler.index_urls.clone()),
        is_running,
    };

    let listener = TcpListener::bind(&settings.http.bind).await?;
    tracing::info!(addr = %settings.http.bind, "control surface listening");

    axum::serve(listener, routes::router(app_state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("termination signal received");
        })
        .await?;

    // Endpoints are closed. Stop the scheduler's timer and let the worker
    // finish its in-flight item; interrupting mid-fetch wastes the budget.
    let _ = shutdown_tx.send(true);
    let _ = scheduler_handle.await;
    let _ = worker_handle.await;
    tracing::info!("shutdown complete");
    Ok(())
}
