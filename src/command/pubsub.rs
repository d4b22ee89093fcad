//! SUBSCRIBE, UNSUBSCRIBE and PUBLISH.
//!
//! These never touch the regular keyspace: subscriber sets live in the admin
//! database and are maintained by [`crate::pubsub`].

use bytes::Bytes;

use super::{replies, Arity, CommandResult, CommandSpec, Request};
use crate::metrics::Metrics;
use crate::protocol::RespValue;
use crate::pubsub;
use crate::storage::Database;

pub static COMMANDS: &[CommandSpec] = &[
    CommandSpec::new("subscribe", Arity::AtLeast(1), subscribe).read_only().pubsub(),
    CommandSpec::new("unsubscribe", Arity::AtLeast(0), unsubscribe).read_only().pubsub(),
    CommandSpec::new("publish", Arity::Exact(2), publish).read_only(),
];

fn confirmation(kind: &'static str, channel: Option<Bytes>, count: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk(kind),
        channel.map(RespValue::bulk).unwrap_or_else(RespValue::null),
        RespValue::integer(count as i64),
    ])
}

fn subscribe(_db: &Database, request: &Request<'_>) -> CommandResult {
    let admin = request.server().admin();
    let session = request.session();

    let mut out = Vec::with_capacity(request.len());
    for channel in request.params() {
        pubsub::subscribe(admin, channel, session.id())?;
        let count = {
            let mut state = session.state();
            state.add_subscription(channel.clone());
            state.subscription_count()
        };
        out.push(confirmation("subscribe", Some(channel.clone()), count));
    }
    Ok(replies(out))
}

/// Without arguments, leaves every channel of the session.
fn unsubscribe(_db: &Database, request: &Request<'_>) -> CommandResult {
    let admin = request.server().admin();
    let session = request.session();

    let channels: Vec<Bytes> = if request.is_empty() {
        session.state().subscriptions().cloned().collect()
    } else {
        request.params().to_vec()
    };
    if channels.is_empty() {
        return Ok(confirmation("unsubscribe", None, 0));
    }

    let mut out = Vec::with_capacity(channels.len());
    for channel in channels {
        pubsub::unsubscribe(admin, &channel, session.id())?;
        let count = {
            let mut state = session.state();
            state.remove_subscription(&channel);
            state.subscription_count()
        };
        out.push(confirmation("unsubscribe", Some(channel), count));
    }
    Ok(replies(out))
}

/// Replies with the number of subscribers; delivery happens afterwards on
/// the notification worker.
fn publish(_db: &Database, request: &Request<'_>) -> CommandResult {
    let server = request.server();
    let channel = request.param(0)?;
    let count = pubsub::subscriber_count(server.admin(), channel);

    server
        .notifications()
        .enqueue(channel.clone(), request.param(1)?.clone());
    Metrics::get().record_publish();
    Ok(RespValue::integer(count as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::Harness;
    use crate::session::Session;
    use crate::server::ServerContext;
    use std::sync::Arc;
    use std::time::Duration;

    fn confirm(kind: &'static str, channel: &'static str, count: i64) -> RespValue {
        RespValue::array(vec![
            RespValue::bulk(kind),
            RespValue::bulk(channel),
            RespValue::integer(count),
        ])
    }

    #[test]
    fn test_subscribe_replies_per_channel() {
        let h = Harness::new();
        assert_eq!(h.run(&["SUBSCRIBE", "a"]), confirm("subscribe", "a", 1));
        assert_eq!(
            h.run(&["SUBSCRIBE", "b", "c"]),
            RespValue::Sequence(vec![confirm("subscribe", "b", 2), confirm("subscribe", "c", 3)])
        );
        assert_eq!(pubsub::subscriber_count(h.server.admin(), b"b"), 1);
        assert!(h.db().is_empty());
    }

    #[test]
    fn test_unsubscribe() {
        let h = Harness::new();
        h.run(&["SUBSCRIBE", "a", "b"]);
        assert_eq!(h.run(&["UNSUBSCRIBE", "a"]), confirm("unsubscribe", "a", 1));
        assert_eq!(h.run(&["UNSUBSCRIBE"]), confirm("unsubscribe", "b", 0));
        assert_eq!(
            h.run(&["UNSUBSCRIBE"]),
            RespValue::array(vec![
                RespValue::bulk("unsubscribe"),
                RespValue::null(),
                RespValue::integer(0),
            ])
        );
        assert_eq!(pubsub::subscriber_count(h.server.admin(), b"a"), 0);
        // Back to normal mode.
        assert_eq!(h.run(&["GET", "k"]), RespValue::null());
    }

    #[test]
    fn test_publish_counts_subscribers() {
        let h = Harness::new();
        assert_eq!(h.run(&["PUBLISH", "news", "hi"]), RespValue::integer(0));
        let other = Session::detached("other");
        h.server.execute(&other, &[Bytes::from("SUBSCRIBE"), Bytes::from("news")]);
        assert_eq!(h.run(&["PUBLISH", "news", "hi"]), RespValue::integer(1));
    }

    #[tokio::test]
    async fn test_publish_delivers_once_after_reply() {
        let server = Arc::new(ServerContext::new());
        server.start();

        let (subscriber, mut inbox) = Session::connected("sub");
        let subscriber = Arc::new(subscriber);
        server.register_session(Arc::clone(&subscriber));
        server.execute(&subscriber, &[Bytes::from("SUBSCRIBE"), Bytes::from("news")]);

        let publisher = Session::detached("pub");
        let reply = server.execute(
            &publisher,
            &[Bytes::from("PUBLISH"), Bytes::from("news"), Bytes::from("hello")],
        );
        assert_eq!(reply, RespValue::integer(1));

        let message = tokio::time::timeout(Duration::from_secs(2), inbox.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            message,
            RespValue::array(vec![
                RespValue::bulk("message"),
                RespValue::bulk("news"),
                RespValue::bulk("hello"),
            ])
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(inbox.try_recv().is_err());
    }
}
