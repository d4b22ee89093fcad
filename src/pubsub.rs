//! Pub/sub bookkeeping and message delivery.
//!
//! Subscribers of a channel are stored in the admin database as a SET of
//! session ids under `subscriptions:<channel>`, so they are mutated through
//! `merge` like any other value and travel with snapshots. Each session also
//! tracks its own channels in its state slot.
//!
//! Published messages go through [`NotificationManager`]: a single consumer
//! task that pushes `[message, channel, payload]` to every live subscriber in
//! publish order.

use bytes::{BufMut, Bytes, BytesMut};
use std::sync::{Mutex, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::metrics::Metrics;
use crate::protocol::RespValue;
use crate::server::ServerContext;
use crate::storage::{DataType, Database, DatabaseValue, StorageError};

pub const SUBSCRIPTIONS_PREFIX: &str = "subscriptions:";
/// Channel prefix for events on one key; the message is the event name.
pub const KEYSPACE_PREFIX: &str = "__keyspace@0__:";
/// Channel prefix for one event name; the message is the key.
pub const KEYEVENT_PREFIX: &str = "__keyevent@0__:";

fn prefixed(prefix: &str, suffix: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(prefix.len() + suffix.len());
    out.put_slice(prefix.as_bytes());
    out.put_slice(suffix);
    out.freeze()
}

/// Admin key holding the subscriber set of `channel`.
pub fn subscriptions_key(channel: &[u8]) -> Bytes {
    prefixed(SUBSCRIPTIONS_PREFIX, channel)
}

pub fn keyspace_channel(key: &[u8]) -> Bytes {
    prefixed(KEYSPACE_PREFIX, key)
}

pub fn keyevent_channel(event: &str) -> Bytes {
    prefixed(KEYEVENT_PREFIX, event.as_bytes())
}

/// Adds `session_id` to the subscribers of `channel`. Returns the number of
/// subscribers afterwards.
pub fn subscribe(admin: &Database, channel: &[u8], session_id: &str) -> Result<usize, StorageError> {
    let member = Bytes::copy_from_slice(session_id.as_bytes());
    let merged = admin.merge(&subscriptions_key(channel), DataType::Set.empty(), |current, _| {
        let mut members = current.as_set()?.clone();
        members.insert(member);
        Ok::<_, StorageError>(DatabaseValue::Set(members))
    })?;
    Ok(merged.size())
}

/// Removes `session_id` from the subscribers of `channel`, dropping the
/// admin key once nobody is left. Returns the number of subscribers
/// afterwards.
pub fn unsubscribe(admin: &Database, channel: &[u8], session_id: &str) -> Result<usize, StorageError> {
    let key = subscriptions_key(channel);
    let merged = admin.merge(&key, DataType::Set.empty(), |current, _| {
        let mut members = current.as_set()?.clone();
        members.remove(session_id.as_bytes());
        Ok::<_, StorageError>(DatabaseValue::Set(members))
    })?;
    if merged.is_empty() {
        admin.remove_if(&key, DatabaseValue::is_empty);
    }
    Ok(merged.size())
}

/// Session ids subscribed to `channel`.
pub fn subscribers(admin: &Database, channel: &[u8]) -> Vec<Bytes> {
    match admin.get(&subscriptions_key(channel)) {
        Some(DatabaseValue::Set(members)) => members.into_iter().collect(),
        _ => Vec::new(),
    }
}

pub fn subscriber_count(admin: &Database, channel: &[u8]) -> usize {
    admin
        .get(&subscriptions_key(channel))
        .map(|value| value.size())
        .unwrap_or(0)
}

/// A published message waiting for delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub channel: Bytes,
    pub message: Bytes,
}

impl Notification {
    fn to_resp(&self) -> RespValue {
        RespValue::array(vec![
            RespValue::bulk("message"),
            RespValue::bulk(self.channel.clone()),
            RespValue::bulk(self.message.clone()),
        ])
    }
}

/// Queue of published messages with a single delivery task.
#[derive(Debug)]
pub struct NotificationManager {
    tx: mpsc::UnboundedSender<Notification>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Queues a message. Never blocks; messages queued before [`start`]
    /// are delivered once the task runs.
    ///
    /// [`start`]: NotificationManager::start
    pub fn enqueue(&self, channel: Bytes, message: Bytes) {
        if self.tx.send(Notification { channel, message }).is_err() {
            tracing::debug!("notification queue closed, message dropped");
        }
    }

    /// Queues the keyspace and keyevent notifications for `event` on `key`.
    pub fn enqueue_key_event(&self, event: &'static str, key: &Bytes) {
        self.enqueue(keyspace_channel(key), Bytes::from_static(event.as_bytes()));
        self.enqueue(keyevent_channel(event), key.clone());
    }

    /// Spawns the delivery task. Only the first call starts anything.
    pub fn start(&self, server: Weak<ServerContext>) -> Option<JoinHandle<()>> {
        let rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner).take()?;
        Some(tokio::spawn(dispatch(server, rx)))
    }
}

async fn dispatch(server: Weak<ServerContext>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(notification) = rx.recv().await {
        let Some(server) = server.upgrade() else {
            break;
        };
        let delivered = deliver(&server, &notification);
        tracing::trace!(
            channel = %String::from_utf8_lossy(&notification.channel),
            delivered,
            "message delivered"
        );
    }
    tracing::debug!("notification worker stopped");
}

/// Pushes `notification` to every registered subscriber session and
/// returns how many accepted it.
pub(crate) fn deliver(server: &ServerContext, notification: &Notification) -> usize {
    let message = notification.to_resp();
    let mut delivered = 0;
    for id in subscribers(server.admin(), &notification.channel) {
        let Ok(id) = std::str::from_utf8(&id) else {
            continue;
        };
        if let Some(session) = server.session(id) {
            if session.push(message.clone()) {
                delivered += 1;
            }
        }
    }
    Metrics::get().record_delivered(delivered as u64);
    delivered
}
