use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seedsync_core::config::{LogFormat, LoggingConfig, TorrentClientBackend};
use seedsync_core::library::{ArrClient, PlexClient};
use seedsync_core::remote::SshConnector;
use seedsync_core::store::{AppType, LockedDocument};
use seedsync_core::torrent_client::QBittorrentClient;
use seedsync_core::{
    load_config, open_state_store, validate_config, BulkMoveCoordinator, Catalogs, CleanupGuard,
    CompletionScanner, Config, LibraryCatalog, MediaServer, Operator, RunLocks, Scheduler,
    SeedboxSpaceController, StagingProcessor, TorrentClient,
};

use seedsync_server::api::create_router;
use seedsync_server::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("SEEDSYNC_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    init_tracing(&config.logging);
    info!("Configuration loaded from {:?}", config_path);
    info!("State backend: {:?} in {:?}", config.state.backend, config.state.dir);

    let store = open_state_store(&config.state).context("Failed to open state store")?;
    let locks = RunLocks::new(
        config.state.dir.join("locks"),
        Duration::from_secs(config.scheduler.stale_lock_secs),
    );

    let torrents = create_torrent_client(&config)?;
    let connector = Arc::new(SshConnector::new(config.seedbox.clone()));
    info!(
        "Seedbox SFTP at {}@{}:{}",
        config.seedbox.username, config.seedbox.host, config.seedbox.port
    );

    let catalogs = create_catalogs(&config)?;
    if catalogs.is_empty() {
        warn!("No catalogs configured: new arrivals cannot be resolved");
    }

    let media_server: Option<Arc<dyn MediaServer>> = match config
        .media_server
        .as_ref()
        .and_then(|m| m.plex.as_ref())
    {
        Some(plex) => {
            info!("Initializing Plex client at {}", plex.url);
            Some(Arc::new(
                PlexClient::new(plex.clone()).context("Failed to create Plex client")?,
            ))
        }
        None => {
            info!("No media server configured, section refreshes will be skipped");
            None
        }
    };

    let scanner = Arc::new(CompletionScanner::new(
        Arc::clone(&store),
        Arc::clone(&torrents),
        catalogs.clone(),
        config.labels.clone(),
        locks.clone(),
    ));
    let staging = Arc::new(StagingProcessor::new(
        Arc::clone(&store),
        connector.clone(),
        catalogs.clone(),
        CleanupGuard::new(config.cleanup.clone()),
        config.labels.clone(),
        config.staging.clone(),
        locks.clone(),
    ));
    let eviction = Arc::new(SeedboxSpaceController::new(
        Arc::clone(&torrents),
        connector,
        config.eviction.clone(),
        LockedDocument::new(
            config.state.dir.join("eviction_summary.json"),
            Duration::from_millis(config.state.lock_timeout_ms),
        ),
        locks,
    ));

    let mut scheduler = Scheduler::new(config.scheduler.clone());
    scheduler.register(
        scanner.clone(),
        Duration::from_secs(config.scheduler.scan_interval_secs),
    );
    scheduler.register(
        staging.clone(),
        Duration::from_secs(config.scheduler.staging_interval_secs),
    );
    scheduler.register(
        eviction.clone(),
        Duration::from_secs(config.scheduler.eviction_interval_secs),
    );
    let scheduler = Arc::new(scheduler);
    scheduler.start().await;

    let operator = Operator::new(
        Arc::clone(&store),
        catalogs.clone(),
        CleanupGuard::new(config.cleanup.clone()),
    );
    let bulk_move = BulkMoveCoordinator::new(catalogs, media_server, config.bulk_move.clone());

    let state = Arc::new(AppState::new(
        config.clone(),
        store,
        scanner,
        staging,
        eviction,
        operator,
        bulk_move,
        Arc::clone(&scheduler),
    ));

    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    scheduler.stop().await;

    Ok(())
}

fn create_torrent_client(config: &Config) -> Result<Arc<dyn TorrentClient>> {
    match config.torrent_client.backend {
        TorrentClientBackend::QBittorrent => {
            let qbit = config
                .torrent_client
                .qbittorrent
                .as_ref()
                .context("qBittorrent backend selected but no qbittorrent config provided")?;
            info!("Initializing qBittorrent client at {}", qbit.url);
            let client =
                QBittorrentClient::new(qbit.clone()).context("Failed to create qBittorrent client")?;
            Ok(Arc::new(client))
        }
    }
}

fn create_catalogs(config: &Config) -> Result<Catalogs> {
    let build = |app_type: AppType| -> Result<Option<Arc<dyn LibraryCatalog>>> {
        let section = match app_type {
            AppType::Sonarr => config.catalogs.sonarr.as_ref(),
            AppType::Radarr => config.catalogs.radarr.as_ref(),
        };
        let Some(section) = section else {
            info!("{} not configured", app_type);
            return Ok(None);
        };
        info!("Initializing {} client at {}", app_type, section.url);
        let client = ArrClient::new(app_type, section.clone())
            .with_context(|| format!("Failed to create {} client", app_type))?;
        Ok(Some(Arc::new(client)))
    };

    Ok(Catalogs::new(build(AppType::Sonarr)?, build(AppType::Radarr)?))
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
