//! Shared server state and the command dispatch pipeline.

pub mod handler;

pub use handler::Handler;

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::{CommandError, CommandRegistry, CommandSpec, Request};
use crate::metrics::{Metrics, Timer};
use crate::persistence::AofSink;
use crate::protocol::RespValue;
use crate::pubsub::{self, NotificationManager};
use crate::session::Session;
use crate::storage::Database;

/// Everything a command can reach: the regular keyspace, the admin keyspace
/// holding pub/sub bookkeeping, the command registry, the live sessions and
/// the outbound queues (notifications and the append-only log).
#[derive(Debug)]
pub struct ServerContext {
    database: Database,
    admin: Database,
    registry: CommandRegistry,
    sessions: DashMap<String, Arc<Session>>,
    notifications: NotificationManager,
    keyspace_events: AtomicBool,
    log: OnceLock<AofSink>,
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerContext {
    /// Creates the context. No background task runs until [`start`].
    ///
    /// [`start`]: ServerContext::start
    pub fn new() -> Self {
        Self {
            database: Database::new(),
            admin: Database::new(),
            registry: CommandRegistry::new(),
            sessions: DashMap::new(),
            notifications: NotificationManager::new(),
            keyspace_events: AtomicBool::new(false),
            log: OnceLock::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn admin(&self) -> &Database {
        &self.admin
    }

    /// Both keyspaces, in snapshot order.
    pub fn databases(&self) -> [&Database; 2] {
        [&self.database, &self.admin]
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.notifications
    }

    /// Starts the notification worker. Requires a tokio runtime.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.notifications.start(Arc::downgrade(self))
    }

    /// Turns keyspace notifications for successful writes on or off.
    pub fn set_keyspace_events(&self, enabled: bool) {
        self.keyspace_events.store(enabled, Ordering::Relaxed);
    }

    pub fn keyspace_events(&self) -> bool {
        self.keyspace_events.load(Ordering::Relaxed)
    }

    /// Routes mutating commands to the append-only log from now on.
    /// Returns false if a log was already attached.
    pub fn attach_log(&self, sink: AofSink) -> bool {
        self.log.set(sink).is_ok()
    }

    pub fn register_session(&self, session: Arc<Session>) {
        self.sessions.insert(session.id().to_string(), session);
    }

    pub fn session(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Leaves every channel the session is subscribed to and forgets it.
    pub fn close_session(&self, session: &Session) {
        let channels: Vec<Bytes> = session.state().subscriptions().cloned().collect();
        for channel in channels {
            if let Err(e) = pubsub::unsubscribe(&self.admin, &channel, session.id()) {
                warn!(session = session.id(), error = %e, "failed to drop subscription");
            }
            session.state().remove_subscription(&channel);
        }
        self.sessions.remove(session.id());
        debug!(session = session.id(), "session closed");
    }

    /// Drops expired entries from both keyspaces.
    pub fn purge_expired(&self) -> usize {
        self.database.purge_expired() + self.admin.purge_expired()
    }

    /// Executes a decoded request token.
    pub fn execute_value(&self, session: &Session, value: RespValue) -> RespValue {
        match value.into_command_parts() {
            Some(args) => self.execute(session, &args),
            None => {
                Metrics::get().record_error(CommandError::InvalidRequest.kind(), None);
                CommandError::InvalidRequest.into()
            }
        }
    }

    /// Executes `args` (command name followed by its parameters) on behalf
    /// of `session`. Errors come back as error tokens.
    pub fn execute(&self, session: &Session, args: &[Bytes]) -> RespValue {
        self.dispatch(session, args, true)
    }

    /// Executes a command recovered from the append-only log. Replayed
    /// commands are never logged again and raise no keyspace events.
    pub(crate) fn replay(&self, session: &Session, args: &[Bytes]) -> RespValue {
        self.dispatch(session, args, false)
    }

    fn dispatch(&self, session: &Session, args: &[Bytes], live: bool) -> RespValue {
        let metrics = Metrics::get();

        let Some((name, params)) = args.split_first() else {
            metrics.record_error(CommandError::InvalidRequest.kind(), None);
            return CommandError::InvalidRequest.into();
        };
        let Some(spec) = self.registry.lookup(name) else {
            let err = CommandError::UnknownCommand(String::from_utf8_lossy(name).into_owned());
            debug!(error = %err, "rejected command");
            metrics.record_error(err.kind(), None);
            return err.into();
        };

        let timer = Timer::new();
        let result = self.validate(spec, session, params).and_then(|()| {
            let request = Request::new(spec.name, params, self, session);
            spec.execute(&self.database, &request)
        });
        metrics.record_command(spec.name, timer.elapsed_seconds());

        match result {
            Ok(reply) => {
                if live && !spec.read_only {
                    if let Some(sink) = self.log.get() {
                        sink.append(args);
                    }
                    if self.keyspace_events() {
                        for key in spec.keys.select(params) {
                            self.notifications.enqueue_key_event(spec.name, key);
                        }
                    }
                }
                reply
            }
            Err(err) => {
                debug!(command = spec.name, error = %err, "command failed");
                metrics.record_error(err.kind(), Some(spec.name));
                err.into()
            }
        }
    }

    fn validate(&self, spec: &CommandSpec, session: &Session, params: &[Bytes]) -> Result<(), CommandError> {
        if !spec.pubsub_allowed && session.state().is_subscriber() {
            return Err(CommandError::SubscriberMode);
        }
        if !spec.arity.accepts(params.len()) {
            return Err(CommandError::WrongArity(spec.name.to_string()));
        }
        if let (Some(expected), Some(key)) = (spec.required_type, params.first()) {
            match self.database.data_type(key) {
                Some(found) if found != expected => return Err(CommandError::WrongType),
                _ => {}
            }
        }
        Ok(())
    }
}
