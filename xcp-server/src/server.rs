//! TCP server: accepts connections, runs one state machine per connection.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::{ConnectionHandler, HandshakeOutcome};
use crate::session::{ConnectionPhase, Session};
use bytes::BytesMut;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use xcp_protocol::{msg_type, CodecRegistry, Frame};

/// Server-wide connection counters.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub errors_total: AtomicU64,
}

/// Binds a listener, accepts connections, and runs one `ConnectionHandler`
/// state machine per connection. No state is shared across connections.
pub struct Server {
    config: ServerConfig,
    handler: Arc<ConnectionHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    pub fn new(config: ServerConfig, registry: CodecRegistry) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let handler = ConnectionHandler::new(Arc::new(registry), config.max_frame_bytes);
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_handler(config: ServerConfig, handler: ConnectionHandler) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds and accepts connections until `stop()` is called.
    pub async fn serve_forever(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.running.store(true, Ordering::SeqCst);
        tracing::info!(addr = %self.config.bind_addr, "server listening");

        let mut shutdown_rx = self.shutdown.subscribe();
        let mut next_session_id: u64 = 1;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!(%addr, "connection limit reached, rejecting");
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            let session_id = next_session_id;
                            next_session_id += 1;

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                tracing::info!(%addr, session_id, "connection accepted");
                                let result = Self::handle_connection(
                                    stream,
                                    addr,
                                    session_id,
                                    handler,
                                    &config,
                                    &mut conn_shutdown,
                                )
                                .await;

                                if let Err(ref e) = result {
                                    tracing::debug!(%addr, session_id, error = %e, "connection closed with error");
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                } else {
                                    tracing::info!(%addr, session_id, "connection closed");
                                }
                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => tracing::error!(error = %e, "accept error"),
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn handle_connection(
        mut stream: TcpStream,
        addr: std::net::SocketAddr,
        session_id: u64,
        handler: Arc<ConnectionHandler>,
        config: &ServerConfig,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<(), ServerError> {
        let mut session = Session::new(session_id, addr, config.max_frame_bytes);
        let mut buf = BytesMut::with_capacity(8192);
        let mut read_buf = [0u8; 8192];

        loop {
            tokio::select! {
                biased;

                result = stream.read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!(session_id, "peer closed connection");
                            return Ok(());
                        }
                        Ok(n) => buf.extend_from_slice(&read_buf[..n]),
                        Err(e) => return Err(ServerError::Io(e)),
                    }
                }

                _ = tokio::time::sleep(config.idle_timeout) => {
                    if session.idle_duration() > config.idle_timeout {
                        tracing::debug!(session_id, "idle timeout");
                        return Ok(());
                    }
                    continue;
                }

                _ = shutdown.recv() => {
                    session.set_phase(ConnectionPhase::Closing);
                    return Err(ServerError::ShuttingDown);
                }
            }

            loop {
                let frame = match Frame::decode(&mut buf, session.max_frame_bytes()) {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!(session_id, error = %e, "frame-layer error, closing connection");
                        return Err(ServerError::Protocol(e));
                    }
                };

                tracing::debug!(
                    session_id,
                    msg_type = frame.header.msg_type,
                    msg_id = frame.header.msg_id,
                    payload_len = frame.payload.len(),
                    "dispatching frame"
                );

                let reply = if session.phase() == ConnectionPhase::Opening {
                    if frame.header.msg_type != msg_type::HELLO {
                        return Err(ServerError::HandshakeFailed(
                            "first frame on a connection must be HELLO".into(),
                        ));
                    }
                    match handler.handle_hello(&mut session, &frame)? {
                        HandshakeOutcome::Established(reply) => {
                            tracing::info!(
                                session_id,
                                max_frame_bytes = session.max_frame_bytes(),
                                "handshake established"
                            );
                            reply
                        }
                        HandshakeOutcome::Rejected(nack) => {
                            Self::write_frame(&mut stream, &nack).await?;
                            return Err(ServerError::HandshakeFailed(
                                "empty codec intersection".into(),
                            ));
                        }
                    }
                } else {
                    handler.dispatch(&mut session, &frame)?
                };

                Self::write_frame(&mut stream, &reply).await?;
            }
        }
    }

    async fn write_frame(stream: &mut TcpStream, frame: &Frame) -> Result<(), ServerError> {
        let encoded = frame.encode().map_err(ServerError::Protocol)?;
        stream.write_all(&encoded).await?;
        Ok(())
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xcp_protocol::CodecRegistry;

    #[tokio::test]
    async fn test_server_starts_not_running() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let server = Server::new(config, CodecRegistry::with_defaults());
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_server_handshake_and_echo_over_loopback() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        let listener = TcpListener::bind(config.bind_addr).await.unwrap();
        let bound_addr = listener.local_addr().unwrap();
        drop(listener);

        let config = ServerConfig::new(bound_addr);
        let server = Arc::new(Server::new(config, CodecRegistry::with_defaults()));
        let server_task = {
            let server = server.clone();
            tokio::spawn(async move {
                let _ = server.serve_forever().await;
            })
        };

        // Give the listener a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let mut client = TcpStream::connect(bound_addr).await.unwrap();

        use xcp_protocol::{codec_id, msg_type, Capabilities, Ether, Frame, FrameHeader};

        let hello = Capabilities {
            codecs: vec![codec_id::JSON, codec_id::BINARY],
            max_frame_bytes: 1024 * 1024,
            shared_mem: false,
            accepts: vec![],
            emits: vec![],
        };
        let hello_frame = Frame::new(
            FrameHeader::new(msg_type::HELLO, codec_id::JSON, 1),
            serde_json::to_vec(&hello).unwrap(),
        );
        client.write_all(&hello_frame.encode().unwrap()).await.unwrap();

        let mut read_buf = BytesMut::with_capacity(4096);
        let mut scratch = [0u8; 4096];
        let caps_frame = loop {
            let n = client.read(&mut scratch).await.unwrap();
            read_buf.extend_from_slice(&scratch[..n]);
            if let Some(frame) = Frame::decode(&mut read_buf, 1024 * 1024).unwrap() {
                break frame;
            }
        };
        assert_eq!(caps_frame.header.msg_type, msg_type::CAPS);

        let data_frame = Frame::new(
            FrameHeader::new(msg_type::DATA, codec_id::JSON, 2),
            serde_json::to_vec(&Ether::text("ping")).unwrap(),
        );
        client.write_all(&data_frame.encode().unwrap()).await.unwrap();

        let echoed = loop {
            let n = client.read(&mut scratch).await.unwrap();
            read_buf.extend_from_slice(&scratch[..n]);
            if let Some(frame) = Frame::decode(&mut read_buf, 1024 * 1024).unwrap() {
                break frame;
            }
        };
        assert_eq!(echoed.header.msg_type, msg_type::DATA);
        let ether: Ether = serde_json::from_slice(&echoed.payload).unwrap();
        assert_eq!(ether, Ether::text("ping"));

        server.stop();
        let _ = server_task.await;
    }
}
