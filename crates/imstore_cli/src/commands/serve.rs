//! Serve command implementation.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use imstore_core::Storage;
use imstore_replication::{ReplicationMaster, ReplicationSlave};
use imstore_server::{RpcHandler, RpcServer};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::{FileConfig, Overrides, Settings};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// How long background tasks get to finish after shutdown is signalled.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Flags for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// JSON config file; explicit flags win over its keys
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// RPC listen address
    #[arg(long)]
    rpc_listen: Option<SocketAddr>,

    /// Replication listen address (master only)
    #[arg(long)]
    sync_listen: Option<SocketAddr>,

    /// Master address; when set this node is a read-only replica
    #[arg(long)]
    master: Option<String>,

    /// Messages per offline sync
    #[arg(long)]
    limit: Option<usize>,

    /// Offline records examined per sync (0 = unbounded)
    #[arg(long)]
    hard_limit: Option<usize>,

    /// Messages per group sync
    #[arg(long)]
    group_limit: Option<usize>,

    /// Block file size in bytes; must match existing data
    #[arg(long)]
    block_size: Option<u64>,
}

/// Runs the serve command until SIGINT or SIGTERM.
pub fn run(root: Option<PathBuf>, args: &ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let flags = Overrides {
        root,
        rpc_listen: args.rpc_listen,
        sync_listen: args.sync_listen,
        master: args.master.clone(),
        limit: args.limit,
        hard_limit: args.hard_limit,
        group_limit: args.group_limit,
        block_size: args.block_size,
    };
    let settings = Settings::resolve(flags, file)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("imstore")
        .build()?;
    runtime.block_on(serve(settings)).map_err(|err| -> Box<dyn std::error::Error> { err })
}

async fn serve(settings: Settings) -> Result<(), BoxError> {
    let root = settings.root.clone();
    let storage = {
        let config = settings.storage.clone();
        let storage = tokio::task::spawn_blocking(move || Storage::open(&root, config)).await??;
        Arc::new(storage)
    };
    let is_slave = settings.replication.is_slave();
    info!(
        root = %settings.root.display(),
        next_id = storage.next_id(),
        role = if is_slave { "slave" } else { "master" },
        "storage opened"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut tasks: JoinSet<Result<&'static str, BoxError>> = JoinSet::new();

    let handler = RpcHandler::new(Arc::clone(&storage)).with_read_only(is_slave);
    let rpc = Arc::new(RpcServer::new(handler, settings.server.clone()));
    let rpc_listener = TcpListener::bind(settings.server.bind_addr).await?;
    {
        let shutdown = stop_rx.clone();
        tasks.spawn(async move {
            rpc.serve(rpc_listener, shutdown).await?;
            Ok("rpc server")
        });
    }

    let master = if is_slave {
        let slave = ReplicationSlave::new(Arc::clone(&storage), settings.replication.clone())?;
        let shutdown = stop_rx.clone();
        tasks.spawn(async move {
            slave.run(shutdown).await?;
            Ok("replication slave")
        });
        None
    } else {
        let master = ReplicationMaster::start(Arc::clone(&storage), settings.replication.clone())?;
        let listener = TcpListener::bind(settings.replication.listen_addr).await?;
        let shutdown = stop_rx.clone();
        let serving = Arc::clone(&master);
        tasks.spawn(async move {
            serving.serve(listener, shutdown).await?;
            Ok("replication master")
        });
        Some(master)
    };

    {
        let storage = Arc::clone(&storage);
        let shutdown = stop_rx.clone();
        tasks.spawn(async move {
            maintenance(storage, !is_slave, shutdown).await?;
            Ok("maintenance")
        });
    }

    // Any task ending before a signal is a failure.
    let mut failure: Option<BoxError> = None;
    tokio::select! {
        signal = shutdown_signal() => {
            let name = signal?;
            info!(signal = name, "shutting down");
        }
        Some(joined) = tasks.join_next() => {
            let err: BoxError = match joined {
                Ok(Ok(name)) => format!("{name} stopped unexpectedly").into(),
                Ok(Err(err)) => err,
                Err(err) => err.into(),
            };
            error!(%err, "background task failed, shutting down");
            failure = Some(err);
        }
    }

    let _ = stop_tx.send(true);
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(%err, "task failed during shutdown"),
                Err(err) => warn!(%err, "task panicked during shutdown"),
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!("background tasks did not stop in time");
        tasks.abort_all();
    }

    if let Some(master) = master {
        tokio::task::spawn_blocking(move || master.stop()).await?;
    }
    tokio::task::spawn_blocking(move || storage.close()).await??;

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Flushes blocks and ack cursors, and writes checkpoints, until shutdown.
///
/// A replica never flushes ack cursors: its log only grows through
/// replication.
async fn maintenance(
    storage: Arc<Storage>,
    flush_received: bool,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), BoxError> {
    let config = storage.config().clone();
    let mut flush = tokio::time::interval(config.flush_interval);
    let mut checkpoint = tokio::time::interval(config.checkpoint_interval);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);
    checkpoint.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Both fire immediately once; skip that.
    flush.tick().await;
    checkpoint.tick().await;

    loop {
        tokio::select! {
            _ = flush.tick() => {
                let storage = Arc::clone(&storage);
                tokio::task::spawn_blocking(move || {
                    if flush_received {
                        storage.flush_received()?;
                    }
                    storage.flush()
                })
                .await??;
            }
            _ = checkpoint.tick() => {
                let storage = Arc::clone(&storage);
                tokio::task::spawn_blocking(move || storage.checkpoint()).await??;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
}
