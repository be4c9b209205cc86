#![doc = include_str!("../README.md")]

mod daemon;

use anyhow::Context;
use clap::Parser;
use daemon::admin;
use daemon::config::{CliArgs, Command, DaemonConfig, MinterCommand, QueueCommand, Settings};
use daemon::linkcheck::LinkChecker;
use daemon::queue::QueueService;
use daemon::sweep::{cleanup, expunge, run_every};
use daemon::telemetry::init_telemetry;
use ezid::{FileMinterStore, SqliteStore, Store, SystemClock, TimeSource};
use ezid_daemon_core::{
    BinderClient, CrossrefClient, DataciteClient, Handler, SearchIndexClient, build_client,
};
use std::{path::Path, sync::Arc};
use tokio::{signal, task::JoinSet};
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let providers = init_telemetry()?;

    let result = match args.command.unwrap_or(Command::Run) {
        Command::Run => run(args.settings).await,
        Command::Minter(command) => run_minter(&args.settings, command),
        Command::Queue(command) => run_queue(&args.settings, command),
    };

    providers.shutdown();
    result
}

fn open_store(path: &Path) -> anyhow::Result<Arc<dyn Store>> {
    let store = SqliteStore::open(path).with_context(|| format!("opening {}", path.display()))?;
    Ok(Arc::new(store))
}

fn run_minter(settings: &Settings, command: MinterCommand) -> anyhow::Result<()> {
    let minters = FileMinterStore::new(&settings.minter_root);
    match command {
        MinterCommand::Create { shoulder, mask } => admin::minter_create(&minters, &shoulder, &mask),
        MinterCommand::Mint {
            shoulder,
            count,
            dry_run,
        } => admin::minter_mint(&minters, &shoulder, count, dry_run, &mut std::io::stdout().lock()),
        MinterCommand::Import { path, shoulder } => {
            admin::minter_import(&minters, &path, &shoulder)
        }
    }
}

fn run_queue(settings: &Settings, command: QueueCommand) -> anyhow::Result<()> {
    let store = open_store(&settings.database_path)?;
    match command {
        QueueCommand::List { destination } => {
            admin::queue_list(store.as_ref(), destination, &mut std::io::stdout().lock())
        }
        QueueCommand::Clear { destination, seq } => {
            admin::queue_clear(store.as_ref(), &SystemClock, destination, seq)
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let config = DaemonConfig::try_from(settings)?;
    log_startup_info(&config);

    let store = open_store(&config.database_path)?;
    let clock: Arc<dyn TimeSource> = Arc::new(SystemClock);
    let handlers = build_handlers(&config, &store, &clock)?;

    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    let mut queues = Vec::with_capacity(handlers.len());
    for handler in handlers {
        let service = Arc::new(QueueService::new(
            handler,
            Arc::clone(&store),
            Arc::clone(&clock),
            config.queue.clone(),
        ));
        queues.push(Arc::clone(&service));
        let token = token.clone();
        tasks.spawn(async move { service.run(token).await });
    }

    if let Some(linkcheck) = config.linkcheck.clone() {
        let checker = LinkChecker::new(Arc::clone(&store), Arc::clone(&clock), linkcheck)?;
        tasks.spawn(checker.run(token.clone()));
    }

    if let Some(settings) = config.expunge.clone() {
        tasks.spawn(run_every(
            "expunge",
            settings.interval,
            Arc::clone(&store),
            Arc::clone(&clock),
            token.clone(),
            move |store, now| expunge::run_once(store, &settings, now),
        ));
    }

    if let Some(settings) = config.cleanup.clone() {
        tasks.spawn(run_every(
            "cleanup",
            settings.interval,
            Arc::clone(&store),
            Arc::clone(&clock),
            token.clone(),
            move |store, now| cleanup::run_once(store, &settings, now),
        ));
    }

    if tasks.is_empty() {
        tracing::warn!("No component is enabled; nothing to do");
        return Ok(());
    }

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, terminating gracefully...");

    // 1. Stop claiming, checking and sweeping
    token.cancel();
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!("Component task failed: {e:?}");
        }
    }

    // 2. Let the workers finish their rows
    for queue in queues {
        if let Err(e) = queue.shutdown().await {
            tracing::error!(destination = %queue.destination(), "Error during queue shutdown: {e:?}");
        }
    }

    tracing::info!("Daemon shut down successfully");
    Ok(())
}

fn build_handlers(
    config: &DaemonConfig,
    store: &Arc<dyn Store>,
    clock: &Arc<dyn TimeSource>,
) -> anyhow::Result<Vec<Arc<dyn Handler>>> {
    let user_agent = concat!("ezid-daemon/", env!("CARGO_PKG_VERSION"));
    let http = build_client(config.remote_timeout, user_agent)?;

    let mut handlers: Vec<Arc<dyn Handler>> = Vec::new();
    if let Some(binder) = &config.binder {
        handlers.push(Arc::new(BinderClient::new(http.clone(), binder)));
    }
    if let Some(datacite) = &config.datacite {
        handlers.push(Arc::new(DataciteClient::new(http.clone(), datacite)));
    }
    if let Some(crossref) = &config.crossref {
        handlers.push(Arc::new(CrossrefClient::new(
            http.clone(),
            crossref,
            Arc::clone(store),
            Arc::clone(clock),
        )));
    }
    if let Some(search) = &config.search {
        handlers.push(Arc::new(SearchIndexClient::new(
            http,
            search,
            Arc::clone(store),
        )));
    }
    Ok(handlers)
}

fn log_startup_info(config: &DaemonConfig) {
    if cfg!(debug_assertions) {
        tracing::info!("Starting EZID daemon with full config: {:#?}", config);
    } else {
        tracing::info!(
            "Starting EZID daemon: destinations {:?}, {} workers each, link checker {}, expunge {}, cleanup {}",
            config.enabled_destinations(),
            config.queue.workers,
            config.linkcheck.is_some(),
            config.expunge.is_some(),
            config.cleanup.is_some(),
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
