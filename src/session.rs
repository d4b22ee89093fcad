//! Per-client session: identity, mutable state slot and push queue.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

use crate::protocol::RespValue;

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// Startup time in epoch millis. Subscriber sets outlive the process through
/// snapshots, so ids must not repeat across restarts.
fn process_epoch() -> u64 {
    static EPOCH: OnceLock<u64> = OnceLock::new();
    *EPOCH.get_or_init(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default()
    })
}

/// Mutable per-session state.
#[derive(Debug, Default)]
pub struct SessionState {
    subscriptions: BTreeSet<Bytes>,
}

impl SessionState {
    pub fn subscriptions(&self) -> impl Iterator<Item = &Bytes> {
        self.subscriptions.iter()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Subscriber mode: only pub/sub commands are accepted.
    pub fn is_subscriber(&self) -> bool {
        !self.subscriptions.is_empty()
    }

    pub fn add_subscription(&mut self, channel: Bytes) -> bool {
        self.subscriptions.insert(channel)
    }

    pub fn remove_subscription(&mut self, channel: &[u8]) -> bool {
        self.subscriptions.remove(channel)
    }
}

/// A client session.
///
/// Network sessions carry a push queue for messages the client did not ask
/// for (pub/sub deliveries). Detached sessions, such as the one used to
/// replay the append-only log, have none and silently drop pushes.
#[derive(Debug)]
pub struct Session {
    id: String,
    addr: Option<String>,
    state: Mutex<SessionState>,
    push: Option<mpsc::UnboundedSender<RespValue>>,
}

impl Session {
    /// A session attached to a client, returned with the receiving end of
    /// its push queue.
    pub fn connected(addr: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RespValue>) {
        let addr = addr.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Self {
            id: format!(
                "{}#{}.{}",
                addr,
                process_epoch(),
                NEXT_SESSION.fetch_add(1, Ordering::Relaxed)
            ),
            addr: Some(addr),
            state: Mutex::new(SessionState::default()),
            push: Some(tx),
        };
        (session, rx)
    }

    /// A session with no client behind it.
    pub fn detached(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: None,
            state: Mutex::new(SessionState::default()),
            push: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn addr(&self) -> Option<&str> {
        self.addr.as_deref()
    }

    /// Locks the session state slot.
    pub fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an out-of-band message for the client. Returns false when the
    /// client is gone or the session is detached.
    pub fn push(&self, message: RespValue) -> bool {
        match &self.push {
            Some(tx) => tx.send(message).is_ok(),
            None => false,
        }
    }
}
