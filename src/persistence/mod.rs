//! Durability: periodic snapshots plus an append-only log of the commands
//! issued since the last snapshot.
//!
//! Startup loads the snapshot, replays the log on top of it, then starts a
//! fresh log. File work happens on a dedicated blocking worker fed through a
//! channel, so command execution never waits on disk. A timer asks the
//! worker to take a snapshot (and restart the log) every sync period.

pub mod aof;
pub mod snapshot;

use bytes::Bytes;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::config::PersistenceConfig;
use crate::metrics::{Metrics, Timer};
use crate::protocol::ProtocolError;
use crate::server::ServerContext;
use crate::session::Session;
use aof::AofWriter;

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("not a snapshot file")]
    InvalidHeader,
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(i64),
    #[error("unexpected token, expected {0}")]
    UnexpectedToken(&'static str),
    #[error("unknown value type '{0}'")]
    UnknownType(String),
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("file ends in the middle of a record")]
    Truncated,
    #[error("append-only log is closed")]
    Closed,
    #[error("persistence worker is not running")]
    WorkerGone,
}

/// Work items for the persistence worker.
#[derive(Debug)]
enum Job {
    Append(Vec<Bytes>),
    Sync,
    Shutdown(oneshot::Sender<()>),
}

/// Handle used by the dispatch pipeline to log mutating commands.
#[derive(Debug, Clone)]
pub struct AofSink {
    tx: mpsc::UnboundedSender<Job>,
}

impl AofSink {
    /// Queues a command for the log. Dropped with a debug line once the
    /// worker has stopped.
    pub fn append(&self, args: &[Bytes]) {
        if self.tx.send(Job::Append(args.to_vec())).is_err() {
            tracing::debug!("append-only log closed, command not logged");
        }
    }

    fn sync(&self) -> Result<(), PersistenceError> {
        self.tx.send(Job::Sync).map_err(|_| PersistenceError::WorkerGone)
    }
}

/// Outcome of the startup recovery.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryStats {
    pub snapshot_entries: usize,
    pub replayed_commands: usize,
    pub discarded_bytes: usize,
}

/// Owns the persistence worker and the sync timer.
pub struct PersistenceManager {
    server: Arc<ServerContext>,
    config: PersistenceConfig,
    sink: Mutex<Option<AofSink>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl PersistenceManager {
    pub fn new(server: Arc<ServerContext>, config: PersistenceConfig) -> Self {
        Self {
            server,
            config,
            sink: Mutex::new(None),
            worker: Mutex::new(None),
            timer: Mutex::new(None),
        }
    }

    /// Recovers state from disk, then starts logging and the sync timer.
    /// Must be called from within a tokio runtime.
    ///
    /// Unreadable files are returned as errors. A corrupt snapshot is
    /// logged and ignored; a corrupt log is replayed up to the last
    /// complete record.
    pub fn start(&self) -> Result<RecoveryStats, PersistenceError> {
        let stats = self.recover()?;
        // The log is truncated below, so whatever it contributed must be in
        // the snapshot first.
        if stats.replayed_commands > 0 {
            snapshot::export_file(&self.config.rdb_file, &self.server.databases())?;
        }
        let writer = AofWriter::create(&self.config.aof_file)?;

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = AofSink { tx };
        if !self.server.attach_log(sink.clone()) {
            tracing::warn!("append-only log sink was already attached");
        }

        let server = Arc::clone(&self.server);
        let rdb_file = self.config.rdb_file.clone();
        let worker = tokio::task::spawn_blocking(move || run_worker(server, writer, rdb_file, rx));
        *lock(&self.worker) = Some(worker);

        let (stop_tx, stop_rx) = oneshot::channel();
        let timer = tokio::spawn(run_timer(sink.clone(), self.config.sync_period(), stop_rx));
        *lock(&self.timer) = Some((stop_tx, timer));
        *lock(&self.sink) = Some(sink);

        tracing::info!(
            rdb = %self.config.rdb_file.display(),
            aof = %self.config.aof_file.display(),
            period_secs = self.config.sync_period_secs,
            "persistence started"
        );
        Ok(stats)
    }

    fn recover(&self) -> Result<RecoveryStats, PersistenceError> {
        let mut stats = RecoveryStats::default();

        match snapshot::read_file(&self.config.rdb_file) {
            Ok(Some(entries)) => {
                stats.snapshot_entries = snapshot::load(&self.server.databases(), entries);
                tracing::info!(entries = stats.snapshot_entries, "snapshot loaded");
            }
            Ok(None) => tracing::info!("no snapshot found, starting empty"),
            Err(PersistenceError::Io(e)) => return Err(PersistenceError::Io(e)),
            Err(e) => {
                tracing::error!(error = %e, "snapshot is corrupt, starting empty");
                for db in self.server.databases() {
                    db.clear();
                }
            }
        }

        let log = aof::read_file(&self.config.aof_file)?;
        let session = Session::detached("aof-replay");
        for args in &log.commands {
            let reply = self.server.replay(&session, args);
            if reply.is_error() {
                tracing::warn!(?reply, "replayed command failed");
            }
        }
        stats.replayed_commands = log.commands.len();
        stats.discarded_bytes = log.discarded;
        if log.discarded > 0 {
            tracing::warn!(bytes = log.discarded, "discarded incomplete append-only log tail");
        }
        tracing::info!(commands = stats.replayed_commands, "append-only log replayed");

        Ok(stats)
    }

    /// Asks the worker to take a snapshot now.
    pub fn sync(&self) -> Result<(), PersistenceError> {
        match lock(&self.sink).as_ref() {
            Some(sink) => sink.sync(),
            None => Err(PersistenceError::WorkerGone),
        }
    }

    /// Stops the timer, closes the log and writes a final snapshot.
    pub async fn stop(&self) {
        let timer = lock(&self.timer).take();
        if let Some((stop, handle)) = timer {
            let _ = stop.send(());
            let _ = handle.await;
        }

        let sink = lock(&self.sink).take();
        if let Some(sink) = sink {
            let (done_tx, done_rx) = oneshot::channel();
            if sink.tx.send(Job::Shutdown(done_tx)).is_ok() {
                let _ = done_rx.await;
            }
        }

        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "persistence worker panicked");
            }
        }
        tracing::info!("persistence stopped");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_timer(sink: AofSink, period: Duration, mut stop: oneshot::Receiver<()>) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if sink.sync().is_err() {
                    break;
                }
            }
            _ = &mut stop => break,
        }
    }
}

fn run_worker(
    server: Arc<ServerContext>,
    mut writer: AofWriter,
    rdb_file: PathBuf,
    mut rx: mpsc::UnboundedReceiver<Job>,
) {
    while let Some(job) = rx.blocking_recv() {
        match job {
            Job::Append(args) => {
                let timer = Timer::new();
                match writer.append(&args) {
                    Ok(()) => Metrics::get().record_persistence("append", timer.elapsed_seconds()),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to append to log");
                        Metrics::get().record_persistence_error("append");
                    }
                }
            }
            Job::Sync => {
                let expired = server.purge_expired();
                Metrics::get().record_expired(expired as u64);
                // The log may only restart once its commands are covered by
                // a snapshot.
                if export_snapshot(&server, &rdb_file) {
                    if let Err(e) = writer.recreate() {
                        tracing::error!(error = %e, "failed to restart log");
                        Metrics::get().record_persistence_error("aof_rotate");
                    }
                }
            }
            Job::Shutdown(done) => {
                // Leave an empty log behind when the final snapshot already
                // covers it, so the next start does not apply it twice.
                let result = if export_snapshot(&server, &rdb_file) {
                    writer.recreate().and_then(|()| writer.close())
                } else {
                    writer.close()
                };
                if let Err(e) = result {
                    tracing::error!(error = %e, "failed to close log");
                }
                let _ = done.send(());
                break;
            }
        }
    }
}

fn export_snapshot(server: &ServerContext, path: &std::path::Path) -> bool {
    let timer = Timer::new();
    match snapshot::export_file(path, &server.databases()) {
        Ok(entries) => {
            Metrics::get().record_persistence("snapshot", timer.elapsed_seconds());
            tracing::debug!(entries, path = %path.display(), "snapshot written");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, path = %path.display(), "failed to write snapshot");
            Metrics::get().record_persistence_error("snapshot");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RespValue;

    fn config(dir: &tempfile::TempDir, period: u64) -> PersistenceConfig {
        PersistenceConfig {
            enabled: true,
            rdb_file: dir.path().join("dump.rdb"),
            aof_file: dir.path().join("appendonly.aof"),
            sync_period_secs: period,
        }
    }

    fn exec(server: &ServerContext, session: &Session, args: &[&str]) -> RespValue {
        let args: Vec<Bytes> = args.iter().map(|a| Bytes::copy_from_slice(a.as_bytes())).collect();
        server.execute(session, &args)
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::detached("test");

        let server = Arc::new(ServerContext::new());
        let manager = PersistenceManager::new(Arc::clone(&server), config(&dir, 3600));
        manager.start().unwrap();
        exec(&server, &session, &["SET", "a", "1"]);
        exec(&server, &session, &["RPUSH", "l", "x", "y"]);
        exec(&server, &session, &["GET", "a"]);
        manager.stop().await;

        let restarted = Arc::new(ServerContext::new());
        let manager = PersistenceManager::new(Arc::clone(&restarted), config(&dir, 3600));
        let stats = manager.start().unwrap();
        assert_eq!(stats.snapshot_entries, 2);
        assert_eq!(stats.replayed_commands, 0);
        assert_eq!(exec(&restarted, &session, &["GET", "a"]), RespValue::bulk("1"));
        assert_eq!(exec(&restarted, &session, &["LLEN", "l"]), RespValue::integer(2));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_log_is_replayed_on_top_of_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 3600);

        let seed = ServerContext::new();
        seed.database().put("a".into(), crate::storage::DatabaseValue::string("old"));
        seed.database().put("b".into(), crate::storage::DatabaseValue::string("kept"));
        snapshot::export_file(&cfg.rdb_file, &seed.databases()).unwrap();

        let mut writer = AofWriter::create(&cfg.aof_file).unwrap();
        writer.append(&[Bytes::from("SET"), Bytes::from("a"), Bytes::from("new")]).unwrap();
        writer.append(&[Bytes::from("INCR"), Bytes::from("n")]).unwrap();
        writer.close().unwrap();

        let server = Arc::new(ServerContext::new());
        let manager = PersistenceManager::new(Arc::clone(&server), cfg);
        let stats = manager.start().unwrap();
        assert_eq!(stats.snapshot_entries, 2);
        assert_eq!(stats.replayed_commands, 2);

        let session = Session::detached("test");
        assert_eq!(exec(&server, &session, &["GET", "a"]), RespValue::bulk("new"));
        assert_eq!(exec(&server, &session, &["GET", "b"]), RespValue::bulk("kept"));
        assert_eq!(exec(&server, &session, &["GET", "n"]), RespValue::bulk("1"));
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 3600);
        std::fs::write(&cfg.rdb_file, b"*2\r\n$3\r\nfoo\r\n:1\r\n").unwrap();

        let server = Arc::new(ServerContext::new());
        let manager = PersistenceManager::new(Arc::clone(&server), cfg);
        let stats = manager.start().unwrap();
        assert_eq!(stats.snapshot_entries, 0);
        assert!(server.database().is_empty());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_explicit_sync_restarts_log() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 3600);
        let session = Session::detached("test");

        let server = Arc::new(ServerContext::new());
        let manager = PersistenceManager::new(Arc::clone(&server), cfg.clone());
        manager.start().unwrap();
        exec(&server, &session, &["SET", "a", "1"]);
        manager.sync().unwrap();
        exec(&server, &session, &["SET", "b", "2"]);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let entries = snapshot::read_file(&cfg.rdb_file).unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        let log = aof::read_file(&cfg.aof_file).unwrap();
        assert_eq!(log.commands.len(), 1);

        // The final snapshot covers everything and leaves an empty log.
        manager.stop().await;
        let entries = snapshot::read_file(&cfg.rdb_file).unwrap().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(aof::read_file(&cfg.aof_file).unwrap().commands.is_empty());
    }

    #[tokio::test]
    async fn test_timer_takes_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(&dir, 1);
        let session = Session::detached("test");

        let server = Arc::new(ServerContext::new());
        let manager = PersistenceManager::new(Arc::clone(&server), cfg.clone());
        manager.start().unwrap();
        exec(&server, &session, &["SET", "a", "1"]);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let entries = snapshot::read_file(&cfg.rdb_file).unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::metadata(&cfg.aof_file).unwrap().len(), 0);
        manager.stop().await;
    }
}
