//! Watchtower - replica watcher for community spaces

use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use watchtower::{
    config::{Args, LogFormat},
    db::{schemas, DocumentCache, DocumentStore},
    events::{Broadcaster, EventSink},
    reconcile::{spawn_reconciler, HttpObjectReader, ObjectReader, Reconciler, ReconcilerSet},
    server,
    space::{IdentityContext, SpaceRouter},
    sync::PushSubscriber,
    WatchError,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("watchtower={},info", args.log_level).into());
    match args.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Watchtower - replica watcher");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Cache: {}", args.cache_path.display());
    info!("Replica: {}", args.replica_url);
    info!(
        "Push: {}",
        args.replica_events_url.as_deref().unwrap_or("disabled")
    );
    info!("Interval: {}s", args.reconcile_interval_secs);
    info!("======================================");

    // The cache is the one hard dependency
    let cache = match DocumentCache::open(args.cache_config()) {
        Ok(cache) => cache,
        Err(e @ WatchError::StorageUnavailable(_)) => {
            error!("Cache unavailable: {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };
    let created = schemas::declare_indexes(&cache)?;
    info!(created = created, "Cache ready");

    let identity: Arc<dyn IdentityContext> = Arc::new(args.identity());
    let router = Arc::new(SpaceRouter::with_cache(Arc::clone(&identity), &cache)?);
    let recorded = router.record_own_spaces()?;
    if identity.own_aid().is_none() {
        warn!("No OWN_AID configured, every credential counts as community");
    }

    let broadcaster = Arc::new(Broadcaster::new(args.broadcaster_config()));
    let reader: Arc<dyn ObjectReader> = Arc::new(HttpObjectReader::new(args.reader_config()));
    let store: Arc<dyn DocumentStore> = Arc::new(cache.clone());
    let sink: Arc<dyn EventSink> = broadcaster.clone();

    let targets = router.targets(&args.watched_types());
    if targets.is_empty() {
        warn!("No space configured for any watched type, nothing to reconcile");
    }

    let mut reconcilers = ReconcilerSet::new();
    for target in targets {
        let reconciler = Reconciler::new(
            target,
            Arc::clone(&reader),
            Arc::clone(&store),
            Arc::clone(&sink),
            Arc::clone(&identity),
            args.reconcile_config(),
        )
        .with_router(Arc::clone(&router));
        reconcilers.insert(spawn_reconciler(Arc::new(reconciler)));
    }
    let reconcilers = Arc::new(reconcilers);
    info!(
        targets = reconcilers.len(),
        space_records = recorded,
        "Reconcilers started"
    );

    let push = args.push_config().map(|config| {
        let subscriber = Arc::new(PushSubscriber::new(config, Arc::clone(&reconcilers)));
        let task = tokio::spawn({
            let subscriber = Arc::clone(&subscriber);
            async move { subscriber.run().await }
        });
        (subscriber, task)
    });

    let state = Arc::new(server::AppState::new(
        args.clone(),
        cache.clone(),
        Arc::clone(&broadcaster),
        Arc::clone(&reconcilers),
        Arc::clone(&router),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server_task = tokio::spawn(server::run(state, shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Shutdown requested"),
        result = server_task => match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Server error: {}", e),
            Err(e) => error!("Server task failed: {}", e),
        },
    }
    let _ = shutdown_tx.send(true);

    if let Some((subscriber, task)) = push {
        subscriber.shutdown();
        let _ = task.await;
    }

    let stopped = reconcilers.stop_all().await;
    if stopped < reconcilers.len() {
        warn!(
            stopped = stopped,
            total = reconcilers.len(),
            "Some reconcilers did not stop in time"
        );
    }

    match cache.flush().await {
        Ok(bytes) => info!(bytes = bytes, "Cache flushed"),
        Err(e) => error!("Cache flush failed: {}", e),
    }

    info!("Watchtower stopped");
    Ok(())
}
