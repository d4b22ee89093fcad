use crate::metrics::Metrics;
use crate::protocol::{RespParser, RespValue};
use crate::server::ServerContext;
use crate::session::Session;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Serves one client connection.
///
/// Owns the connection's session: requests are parsed from the stream,
/// executed through the shared [`ServerContext`] and answered in order,
/// while pub/sub messages pushed to the session are written between
/// replies.
pub struct Handler {
    server: Arc<ServerContext>,
}

impl Handler {
    pub fn new(server: Arc<ServerContext>) -> Self {
        Self { server }
    }

    /// Process commands from a connection until it closes.
    pub async fn handle_stream<S>(&self, stream: &mut S, peer: &str) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Metrics::get().increment_connections();

        let (session, mut pushes) = Session::connected(peer);
        let session = Arc::new(session);
        self.server.register_session(Arc::clone(&session));
        debug!(session = session.id(), "session opened");

        let result = self.serve(stream, &session, &mut pushes).await;
        self.server.close_session(&session);
        result
    }

    async fn serve<S>(
        &self,
        stream: &mut S,
        session: &Session,
        pushes: &mut mpsc::UnboundedReceiver<RespValue>,
    ) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut parser = RespParser::new();
        let mut buffer = [0; 4096];
        let mut out = Vec::new();

        loop {
            tokio::select! {
                read = stream.read(&mut buffer) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(()); // Connection closed
                    }
                    parser.add_data(&buffer[..n]);

                    out.clear();
                    self.drain_requests(&mut parser, session, &mut out);
                    if !out.is_empty() {
                        stream.write_all(&out).await?;
                        stream.flush().await?;
                    }
                }
                Some(message) = pushes.recv() => {
                    stream.write_all(&message.to_bytes()).await?;
                    stream.flush().await?;
                }
            }
        }
    }

    /// Executes every complete request in the parser and serializes the
    /// replies into `out`.
    fn drain_requests(&self, parser: &mut RespParser, session: &Session, out: &mut Vec<u8>) {
        loop {
            match parser.parse() {
                // Blank inline line.
                Ok(Some(RespValue::Array(None))) => continue,
                Ok(Some(value)) => {
                    debug!(session = session.id(), ?value, "received command");
                    self.server.execute_value(session, value).write_to(out);
                }
                Ok(None) => break,
                Err(e) => {
                    // Protocol error - send error response but keep connection alive
                    warn!("Protocol error: {}", e);
                    Metrics::get().record_error("protocol_error", None);
                    RespValue::error(format!("ERR Protocol error: {}", e)).write_to(out);
                    parser.reset();
                    break;
                }
            }
        }
    }
}
