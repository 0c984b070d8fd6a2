// SPDX-License-Identifier: MIT

//! Process entry point: load configuration from the environment, wire the
//! artifact store, invoker, scheduler, and `Service` facade, spawn the
//! heartbeat monitor and cleanup sweeper, and idle until shutdown.

use rst_adapters::{ArtifactStore, ProcessInvoker, WorkerInvoker};
use rst_core::{SystemClock, UuidIdGen};
use rst_daemon::{env, Service};
use rst_engine::{CleanupSweeper, HeartbeatMonitor, PhotoStore, Scheduler, StageRegistry};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    setup_logging();

    let artifacts = match ArtifactStore::new(env::uploads_dir(), env::results_dir()) {
        Ok(store) => store,
        Err(err) => {
            tracing::error!(?err, "failed to initialize artifact store");
            std::process::exit(1);
        }
    };

    let invoker: Arc<dyn WorkerInvoker> = Arc::new(ProcessInvoker::new(env::worker_interpreter()));
    let max_concurrent_limit = env::max_concurrent_limit();
    let scheduler = Scheduler::new(
        StageRegistry::new(),
        artifacts,
        invoker.clone(),
        SystemClock,
        max_concurrent_limit,
        max_concurrent_limit,
        env::heartbeat_timeout(),
    );

    let photos = Arc::new(parking_lot::Mutex::new(PhotoStore::new()));
    // Held for the lifetime of the process; the (out-of-scope) HTTP edge
    // would take a clone of this to dispatch requests onto.
    let _service = Arc::new(Service::new(
        scheduler.clone(),
        photos.clone(),
        invoker,
        UuidIdGen,
        SystemClock,
    ));
    tracing::info!(
        max_concurrent = max_concurrent_limit,
        port = env::port(),
        "service ready"
    );

    tokio::spawn(HeartbeatMonitor::new(scheduler.clone()).run());
    tokio::spawn(CleanupSweeper::new(
        scheduler,
        photos,
        env::cleanup_interval(),
        env::cleanup_max_age(),
    )
    .run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(err) => tracing::error!(?err, "failed to listen for shutdown signal"),
    }
}

fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
