mod config;
mod native;
mod server;
mod status;

use anyhow::{Context, Result};
use clap::Parser;
use clipkeep_core::clipboard::{ClipboardSource, ClipboardWriter, NoopClipboard};
use clipkeep_core::debounce::Debouncer;
use clipkeep_core::notify::Notifier;
use clipkeep_core::vault::ImageVault;
use clipkeep_core::{
    CaptureOptions, CapturePipeline, GroupFilter, HistoryStore, MemStore, SqliteStore,
    VisibleHistory,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const PRUNE_EVERY: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "clipkeep-clipd", version, about = "clipkeep clipboard history daemon")]
struct Cli {
    /// Optional database path (overrides settings)
    #[arg(long)]
    db: Option<PathBuf>,
    /// Listening port on 127.0.0.1 (0 = auto)
    #[arg(long, default_value_t = 0)]
    port: u16,
    /// Settings file (default: <config>/clipkeep/settings.toml)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Keep history in memory only
    #[arg(long, default_value_t = false)]
    memory: bool,
    /// Disable the clipboard watcher
    #[arg(long, default_value_t = false)]
    no_watch: bool,
    /// Exit automatically after N milliseconds (for CI/testing)
    #[arg(long)]
    exit_after_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DaemonInfo {
    port: u16,
    started_at: i64,
    pid: u32,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn write_daemon_info(port: u16) -> Result<()> {
    let info = DaemonInfo {
        port,
        started_at: chrono::Utc::now().timestamp(),
        pid: std::process::id(),
    };
    let path = config::config_dir().join("clipd.json");
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, serde_json::to_vec_pretty(&info)?)?;
    Ok(())
}

fn open_store(cli: &Cli, settings: &config::Settings) -> Result<Arc<dyn HistoryStore>> {
    if cli.memory {
        info!("keeping history in memory");
        return Ok(Arc::new(MemStore::new()));
    }
    let db_path = cli.db.clone().unwrap_or_else(|| settings.db_path());
    if let Some(dir) = db_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let store = SqliteStore::new(&db_path)
        .with_context(|| format!("opening history database {}", db_path.display()))?;
    info!(db = %store.path().display(), "opened history database");
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = config::load_settings(cli.config.as_deref())?;
    init_tracing(settings.log_level());

    let store = open_store(&cli, &settings)?;
    store.init().await?;

    let vault = ImageVault::new(settings.images_dir());
    let (source, writer, native_ok): (Arc<dyn ClipboardSource>, Arc<dyn ClipboardWriter>, bool) =
        match native::NativeClipboard::new(vault.clone()) {
            Ok(cb) => {
                let cb = Arc::new(cb);
                (
                    cb.clone() as Arc<dyn ClipboardSource>,
                    cb as Arc<dyn ClipboardWriter>,
                    true,
                )
            }
            Err(e) => {
                error!(error = %e, "native clipboard unavailable; capture disabled");
                (
                    Arc::new(NoopClipboard) as Arc<dyn ClipboardSource>,
                    Arc::new(NoopClipboard) as Arc<dyn ClipboardWriter>,
                    false,
                )
            }
        };
    let watch = !cli.no_watch && native_ok;

    let view = VisibleHistory::shared(GroupFilter::All);
    let status = Arc::new(status::StatusNotifier::default());
    let pipeline = Arc::new(
        CapturePipeline::new(
            source,
            store.clone(),
            view.clone(),
            status.clone(),
            CaptureOptions {
                retry: settings.retry_policy(),
                copy_plain: settings.copy_plain(),
            },
        )
        .with_vault(vault),
    );
    let daemon = Arc::new(server::Daemon {
        store: store.clone(),
        view,
        pipeline: pipeline.clone(),
        writer,
        paster: Arc::new(native::KeyPaster),
        status: status.clone(),
    });
    if let Some(max) = settings.max_items() {
        daemon.prune(max).await?;
    }
    daemon.reload_view().await?;

    let feedback = status.clone();
    let debouncer = Arc::new(
        Debouncer::new(settings.debounce(), pipeline).with_feedback(Arc::new(move || {
            feedback.feedback();
        })),
    );

    let watcher = if watch {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let watcher = native::spawn_watcher(tx)?;
        let d = debouncer.clone();
        tokio::spawn(async move {
            while rx.recv().await.is_some() {
                d.notify();
            }
        });
        Some(watcher)
    } else {
        info!("clipboard watcher disabled");
        None
    };

    if let Some(max) = settings.max_items() {
        let d = daemon.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PRUNE_EVERY);
            tick.tick().await;
            loop {
                tick.tick().await;
                if let Err(e) = d.prune(max).await {
                    warn!(error = %e, "prune failed");
                }
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", cli.port)).await?;
    let port = listener.local_addr()?.port();
    write_daemon_info(port)?;
    info!(port, "clipd listening on 127.0.0.1");
    let server = tokio::spawn(server::serve(listener, daemon));

    let exit_after = async {
        match cli.exit_after_ms {
            Some(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = exit_after => info!("exit timer elapsed"),
    }

    server.abort();
    if let Some(w) = watcher {
        w.stop().await;
    }
    drop(debouncer);
    Ok(())
}
