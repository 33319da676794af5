//! TCP server implementation.

use crate::connection::BoltConnection;
use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::metrics::Metrics;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("127.0.0.1:{}", boltd_protocol::DEFAULT_PORT)
                .parse()
                .unwrap(),
            max_connections: 1000,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server hosting the Bolt endpoint.
pub struct Server<H: RequestHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl<H: RequestHandler> Server<H> {
    /// Creates a new server.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Runs the server, binding to the configured address.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already-bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Bolt endpoint listening on {}", listener.local_addr()?);

        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            stream.set_nodelay(true).ok();

                            tracing::info!("Client connected: {}", addr);
                            let conn = BoltConnection::new(stream, addr, self.handler.clone())
                                .with_metrics(self.config.metrics.clone());
                            let conn_shutdown = self.shutdown.subscribe();
                            let stats = self.stats.clone();
                            let metrics = self.config.metrics.clone();

                            tokio::spawn(async move {
                                if let Err(e) = conn.run(conn_shutdown).await {
                                    tracing::debug!("Connection {} error: {}", addr, e);
                                    stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = metrics {
                                    metrics.connections_active.dec();
                                }
                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{NullSession, ServerInfo};
    use boltd_protocol::{
        BoltMsg, ChunkDecoder, Encoder, Hydrator, Reply, Value, BOLT_MAGIC,
    };
    use bytes::BytesMut;
    use std::collections::HashMap;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn test_server() -> Server<NullSession> {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap());
        Server::new(config, NullSession::new(ServerInfo::default()))
    }

    #[tokio::test]
    async fn test_server_basic() {
        let server = test_server();
        assert!(!server.is_running());
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_server_config_debug() {
        let config = ServerConfig::default();
        let debug = format!("{config:?}");
        assert!(debug.contains("metrics_enabled: false"));
    }

    #[tokio::test]
    async fn test_end_to_end_hello_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(test_server());

        let serving = server.clone();
        let task = tokio::spawn(async move { serving.serve(listener).await });

        let mut client = TcpStream::connect(addr).await.unwrap();

        // Handshake
        let mut handshake = BOLT_MAGIC.to_vec();
        handshake.extend_from_slice(&[0, 0, 4, 4]);
        handshake.extend_from_slice(&[0u8; 12]);
        client.write_all(&handshake).await.unwrap();
        let mut accepted = [0u8; 4];
        client.read_exact(&mut accepted).await.unwrap();
        assert_eq!(accepted, [0, 0, 4, 4]);

        // Hello
        let mut enc = Encoder::new();
        enc.append_hello(&HashMap::from([(
            "user_agent".to_owned(),
            Value::from("test/1.0"),
        )]))
        .unwrap();
        client.write_all(&enc.take()).await.unwrap();

        // Read the Success reply.
        let mut dec = ChunkDecoder::new();
        let mut buf = BytesMut::new();
        let mut chunk = [0u8; 1024];
        let reply = loop {
            if let Some(msg) = dec.decode(&mut buf) {
                break Hydrator::new(4).hydrate(&msg).unwrap();
            }
            let n = client.read(&mut chunk).await.unwrap();
            assert!(n > 0);
            buf.extend_from_slice(&chunk[..n]);
        };
        match reply {
            Reply::Success(s) => assert!(s.server.starts_with("boltd/")),
            other => panic!("expected success, got {other:?}"),
        }

        // Goodbye, then stop the server.
        let mut enc = Encoder::new();
        enc.append_empty_struct_message(BoltMsg::Goodbye).unwrap();
        client.write_all(&enc.take()).await.unwrap();
        drop(client);

        server.shutdown();
        task.await.unwrap().unwrap();
    }
}
