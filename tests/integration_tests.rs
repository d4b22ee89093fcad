use bytes::Bytes;
use coral_db::{Handler, RespParser, RespValue, ServerContext, Session};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

fn command(parts: &[&str]) -> Vec<Bytes> {
    parts
        .iter()
        .map(|p| Bytes::copy_from_slice(p.as_bytes()))
        .collect()
}

async fn start_server() -> (Arc<ServerContext>, String) {
    let server = Arc::new(ServerContext::new());
    server.start();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let accept_server = Arc::clone(&server);
    tokio::spawn(async move {
        loop {
            let (mut socket, peer) = listener.accept().await.unwrap();
            let handler = Handler::new(Arc::clone(&accept_server));
            tokio::spawn(async move {
                let _ = handler.handle_stream(&mut socket, &peer.to_string()).await;
            });
        }
    });
    (server, addr)
}

async fn send(stream: &mut TcpStream, parts: &[&str]) {
    stream
        .write_all(&RespValue::command(command(parts)).to_bytes())
        .await
        .unwrap();
}

async fn receive(stream: &mut TcpStream, parser: &mut RespParser) -> RespValue {
    let mut buffer = [0; 1024];
    loop {
        if let Some(value) = parser.parse().unwrap() {
            return value;
        }
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buffer))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert!(n > 0, "server closed the connection");
        parser.add_data(&buffer[..n]);
    }
}

#[tokio::test]
async fn test_server_integration_basic_commands() {
    let (_server, addr) = start_server().await;
    let mut client = TcpStream::connect(&addr).await.unwrap();
    let mut parser = RespParser::new();

    send(&mut client, &["PING"]).await;
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::simple("PONG"));

    send(&mut client, &["SET", "testkey", "testvalue"]).await;
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::ok());

    send(&mut client, &["GET", "testkey"]).await;
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::bulk("testvalue"));

    send(&mut client, &["EXPIRE", "testkey", "0"]).await;
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::integer(1));

    send(&mut client, &["GET", "testkey"]).await;
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::null());
}

#[tokio::test]
async fn test_pipelined_requests_answer_in_order() {
    let (_server, addr) = start_server().await;
    let mut client = TcpStream::connect(&addr).await.unwrap();
    let mut parser = RespParser::new();

    let mut batch = Vec::new();
    for parts in [&["SADD", "s", "a", "b", "c"][..], &["SCARD", "s"], &["SCARD", "missing"]] {
        RespValue::command(command(parts)).write_to(&mut batch);
    }
    client.write_all(&batch).await.unwrap();

    assert_eq!(receive(&mut client, &mut parser).await, RespValue::integer(3));
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::integer(3));
    assert_eq!(receive(&mut client, &mut parser).await, RespValue::integer(0));
}

#[tokio::test]
async fn test_pubsub_between_clients() {
    let (_server, addr) = start_server().await;
    let mut subscriber = TcpStream::connect(&addr).await.unwrap();
    let mut publisher = TcpStream::connect(&addr).await.unwrap();
    let mut sub_parser = RespParser::new();
    let mut pub_parser = RespParser::new();

    send(&mut subscriber, &["SUBSCRIBE", "news"]).await;
    receive(&mut subscriber, &mut sub_parser).await;

    send(&mut subscriber, &["GET", "k"]).await;
    assert!(receive(&mut subscriber, &mut sub_parser).await.is_error());

    send(&mut publisher, &["PUBLISH", "news", "hello"]).await;
    assert_eq!(receive(&mut publisher, &mut pub_parser).await, RespValue::integer(1));
    assert_eq!(
        receive(&mut subscriber, &mut sub_parser).await,
        RespValue::array(vec![
            RespValue::bulk("message"),
            RespValue::bulk("news"),
            RespValue::bulk("hello"),
        ])
    );

    send(&mut subscriber, &["UNSUBSCRIBE"]).await;
    receive(&mut subscriber, &mut sub_parser).await;
    send(&mut publisher, &["PUBLISH", "news", "again"]).await;
    assert_eq!(receive(&mut publisher, &mut pub_parser).await, RespValue::integer(0));
}

#[tokio::test]
async fn test_keyspace_notifications_reach_subscribers() {
    let (server, addr) = start_server().await;
    server.set_keyspace_events(true);
    let mut subscriber = TcpStream::connect(&addr).await.unwrap();
    let mut writer = TcpStream::connect(&addr).await.unwrap();
    let mut sub_parser = RespParser::new();
    let mut writer_parser = RespParser::new();

    send(&mut subscriber, &["SUBSCRIBE", "__keyevent@0__:set", "__keyspace@0__:b"]).await;
    receive(&mut subscriber, &mut sub_parser).await;
    receive(&mut subscriber, &mut sub_parser).await;

    send(&mut writer, &["MSET", "a", "1", "b", "2"]).await;
    assert_eq!(receive(&mut writer, &mut writer_parser).await, RespValue::ok());
    send(&mut writer, &["SET", "a", "3"]).await;
    assert_eq!(receive(&mut writer, &mut writer_parser).await, RespValue::ok());

    let message = |channel: &'static str, payload: &'static str| {
        RespValue::array(vec![
            RespValue::bulk("message"),
            RespValue::bulk(channel),
            RespValue::bulk(payload),
        ])
    };
    assert_eq!(
        receive(&mut subscriber, &mut sub_parser).await,
        message("__keyspace@0__:b", "mset")
    );
    assert_eq!(
        receive(&mut subscriber, &mut sub_parser).await,
        message("__keyevent@0__:set", "a")
    );
}

#[tokio::test]
async fn test_handler_with_mock_stream() {
    let server = Arc::new(ServerContext::new());
    let handler = Handler::new(server);

    let mut stream = tokio_test::io::Builder::new()
        .read(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n")
        .write(b"+OK\r\n")
        .read(b"GET k\r\nNOPE\r\n")
        .write(b"$1\r\nv\r\n-ERR unknown command 'NOPE'\r\n")
        .build();

    handler.handle_stream(&mut stream, "mock").await.unwrap();
}

#[test]
fn test_concurrent_increments_from_many_sessions() {
    let server = Arc::new(ServerContext::new());
    let seed = Session::detached("seed");
    server.execute(&seed, &command(&["SET", "counter", "10"]));

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let server = Arc::clone(&server);
            thread::spawn(move || {
                let session = Session::detached(format!("worker-{}", i));
                for _ in 0..100 {
                    let reply = server.execute(&session, &command(&["INCR", "counter"]));
                    assert!(!reply.is_error());
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(
        server.execute(&seed, &command(&["GET", "counter"])),
        RespValue::bulk("410")
    );
}

#[test]
fn test_error_replies_have_no_side_effects() {
    let server = ServerContext::new();
    let session = Session::detached("client");

    let unknown = server.execute(&session, &command(&["FROB", "k"]));
    assert_eq!(unknown, RespValue::error("ERR unknown command 'FROB'"));

    let arity = server.execute(&session, &command(&["GET"]));
    assert_eq!(
        arity,
        RespValue::error("ERR wrong number of arguments for 'get' command")
    );

    server.execute(&session, &command(&["RPUSH", "l", "a"]));
    let wrong_type = server.execute(&session, &command(&["SADD", "l", "x"]));
    assert!(matches!(wrong_type, RespValue::Error(e) if e.starts_with("WRONGTYPE")));
    assert_eq!(
        server.execute(&session, &command(&["LRANGE", "l", "0", "-1"])),
        RespValue::array(vec![RespValue::bulk("a")])
    );
    assert_eq!(server.database().len(), 1);
}
