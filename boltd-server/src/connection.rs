//! The Bolt connection state machine.
//!
//! A connection moves through handshake (fixed 20-byte exchange) into the
//! steady chunk loop: raw socket bytes are reassembled into messages,
//! decoded, and dispatched synchronously to the injected handler. Responses
//! are queued FIFO and flushed in vectored-write batches. A cloneable
//! [`ConnectionHandle`] lets non-connection threads post responses with
//! backpressure.
//!
//! Each connection's queue, reassembly buffer and decoder state are owned by
//! its own task; the only cross-thread entry point is
//! [`ConnectionHandle::post_response`], which marshals the buffer onto the
//! connection task through a channel instead of touching shared state.

use crate::error::ServerError;
use crate::handler::RequestHandler;
use crate::metrics::Metrics;
use boltd_protocol::{
    unpack_request, BoltMsg, ChunkDecoder, Encoder, Value, BOLT_MAGIC, HANDSHAKE_LEN,
    SUPPORTED_MAJOR,
};
use bytes::{Bytes, BytesMut};
use std::collections::{HashMap, VecDeque};
use std::io::IoSlice;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

/// Queue depth above which cross-thread senders are throttled.
pub const OUTBOUND_HIGH_WATER: usize = 1024;

/// Maximum buffers handed to one vectored write.
const MAX_WRITE_BATCH: usize = 5;

/// State shared between the connection task and its handles.
#[derive(Debug, Default)]
struct ConnShared {
    closed: AtomicBool,
    /// Messages enqueued (on the queue or in the channel) but not yet written.
    queued: AtomicUsize,
}

impl ConnShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Cloneable cross-thread sender for a connection.
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::UnboundedSender<Bytes>,
    shared: Arc<ConnShared>,
}

impl ConnectionHandle {
    /// Whether the connection has closed.
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Messages currently pending on the outbound side.
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::Acquire)
    }

    /// Posts a framed message from a non-connection thread.
    ///
    /// Blocks the calling thread with short sleeps while the outbound depth
    /// exceeds [`OUTBOUND_HIGH_WATER`]; once the connection closes the
    /// message is dropped with a warning instead. Must not be called from
    /// the connection's own task.
    pub fn post_response(&self, msg: Bytes) {
        while !self.is_closed() && self.queued() > OUTBOUND_HIGH_WATER {
            std::thread::sleep(Duration::from_millis(1));
        }
        if self.is_closed() {
            tracing::warn!("connection is closed, drop this message");
            return;
        }
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(msg).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::AcqRel);
            tracing::warn!("connection is gone, drop this message");
        }
    }

    #[cfg(test)]
    pub(crate) fn new_detached() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self {
            tx,
            shared: Arc::new(ConnShared::default()),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn force_depth(&self, depth: usize) {
        self.shared.queued.store(depth, Ordering::Release);
    }
}

/// What the handler sees while a message is being dispatched: the typed
/// per-connection context plus the connection's send side.
pub struct Exchange<'a, C> {
    ctx: &'a mut C,
    queue: &'a mut VecDeque<Bytes>,
    shared: &'a Arc<ConnShared>,
    handle: &'a ConnectionHandle,
    remote: SocketAddr,
    version: [u8; 4],
}

impl<'a, C> Exchange<'a, C> {
    /// The per-connection application context.
    pub fn context(&mut self) -> &mut C {
        self.ctx
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// The accepted version record from the handshake.
    pub fn negotiated_version(&self) -> [u8; 4] {
        self.version
    }

    pub fn protocol_major(&self) -> u8 {
        self.version[3]
    }

    pub fn protocol_minor(&self) -> u8 {
        self.version[2]
    }

    /// A handle usable from other threads after this dispatch returns.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Enqueues a framed message for writing, in FIFO order.
    pub fn respond(&mut self, msg: Bytes) {
        if self.shared.is_closed() {
            tracing::warn!("connection is not available, drop this message");
            return;
        }
        self.shared.queued.fetch_add(1, Ordering::AcqRel);
        self.queue.push_back(msg);
    }

    /// Requests connection close once this dispatch returns.
    pub fn close(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

/// A single client connection.
pub struct BoltConnection<S, H: RequestHandler> {
    stream: S,
    remote: SocketAddr,
    handler: Arc<H>,
    context: H::Context,
    decoder: ChunkDecoder,
    inbound: BytesMut,
    queue: VecDeque<Bytes>,
    shared: Arc<ConnShared>,
    handle: ConnectionHandle,
    outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    version: [u8; 4],
    metrics: Option<Arc<Metrics>>,
}

impl<S, H> BoltConnection<S, H>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: RequestHandler,
{
    pub fn new(stream: S, remote: SocketAddr, handler: Arc<H>) -> Self {
        let shared = Arc::new(ConnShared::default());
        let (tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle {
            tx,
            shared: shared.clone(),
        };
        let context = handler.on_connect(remote, handle.clone());
        Self {
            stream,
            remote,
            handler,
            context,
            decoder: ChunkDecoder::new(),
            inbound: BytesMut::with_capacity(8192),
            queue: VecDeque::new(),
            shared,
            handle,
            outbound_rx,
            version: [0; 4],
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Option<Arc<Metrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    /// A cross-thread handle to this connection.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Drives the connection until disconnect, error or shutdown.
    pub async fn run(mut self, shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        let result = self.drive(shutdown).await;
        self.close();
        let handler = self.handler.clone();
        handler.on_disconnect(&mut self.context);
        result
    }

    async fn drive(&mut self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServerError> {
        self.handshake().await?;

        let mut buf = [0u8; 8192];
        loop {
            tokio::select! {
                biased;

                // Messages marshaled in from other threads.
                posted = self.outbound_rx.recv() => {
                    if let Some(msg) = posted {
                        // Depth was counted at post time.
                        self.queue.push_back(msg);
                    }
                }

                _ = shutdown.recv() => {
                    tracing::debug!("[{}] shutdown signal received", self.remote);
                    return Err(ServerError::ShuttingDown);
                }

                result = self.stream.read(&mut buf) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("[{}] connection closed by peer", self.remote);
                            return Ok(());
                        }
                        Ok(n) => {
                            if let Some(ref metrics) = self.metrics {
                                metrics.bytes_received_total.inc_by(n as f64);
                            }
                            self.inbound.extend_from_slice(&buf[..n]);
                        }
                        Err(e) => {
                            tracing::debug!("[{}] read error: {}", self.remote, e);
                            return Err(ServerError::Io(e));
                        }
                    }
                }
            }

            // Dispatch every message completed by the bytes just received.
            while let Some(msg) = self.decoder.decode(&mut self.inbound) {
                self.dispatch(msg)?;
                if self.shared.is_closed() {
                    return Ok(());
                }
            }

            if let Err(e) = self.flush().await {
                tracing::warn!(
                    "[{}] async write error: {}, clear {} pending message",
                    self.remote,
                    e,
                    self.queue.len()
                );
                return Err(ServerError::Io(e));
            }
        }
    }

    /// Reads the fixed 20-byte handshake, validates the magic, negotiates a
    /// version and writes the accepted version record back.
    async fn handshake(&mut self) -> Result<(), ServerError> {
        let mut buf = [0u8; HANDSHAKE_LEN];
        self.stream.read_exact(&mut buf).await?;

        let magic: [u8; 4] = buf[..4].try_into().expect("fixed slice");
        if magic != BOLT_MAGIC {
            tracing::warn!("[{}] unknown protocol magic", self.remote);
            return Err(ServerError::InvalidMagic(magic));
        }

        let mut accepted = [0u8; 4];
        let mut matched = false;
        for (i, proposal) in buf[4..].chunks_exact(4).enumerate() {
            tracing::debug!(
                "[{}] protocol version {}: major: {}, minor: {}",
                self.remote,
                i,
                proposal[3],
                proposal[2]
            );
            if !matched && proposal[3] == SUPPORTED_MAJOR {
                accepted.copy_from_slice(proposal);
                matched = true;
            }
        }
        if !matched {
            // Answer with the zero version and let the peer decide.
            tracing::warn!("[{}] no matching bolt version found", self.remote);
        }

        self.stream.write_all(&accepted).await?;
        self.stream.flush().await?;
        self.version = accepted;
        Ok(())
    }

    /// Decodes one reassembled message and hands it to the handler.
    fn dispatch(&mut self, msg: Bytes) -> Result<(), ServerError> {
        let (tag_byte, fields) = match unpack_request(&msg) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!("[{}] undecodable message: {}", self.remote, e);
                if let Some(ref metrics) = self.metrics {
                    metrics.errors_total.with_label_values(&["decode"]).inc();
                }
                return Err(e.into());
            }
        };

        let tag = match BoltMsg::try_from(tag_byte) {
            Ok(tag) => tag,
            Err(e) => {
                // The stream itself is still synchronized; reject the message
                // and keep the connection.
                tracing::warn!("[{}] {}", self.remote, e);
                if let Some(ref metrics) = self.metrics {
                    metrics.errors_total.with_label_values(&["unknown-tag"]).inc();
                }
                self.reject(
                    "Neo.ClientError.Request.Invalid",
                    &format!("unknown message tag {tag_byte:#04x}"),
                );
                return Ok(());
            }
        };

        tracing::debug!("[{}] msg: {}, {} fields", self.remote, tag, fields.len());
        if let Some(ref metrics) = self.metrics {
            metrics
                .messages_total
                .with_label_values(&[&tag.to_string()])
                .inc();
        }

        let mut exchange = Exchange {
            ctx: &mut self.context,
            queue: &mut self.queue,
            shared: &self.shared,
            handle: &self.handle,
            remote: self.remote,
            version: self.version,
        };
        if let Err(e) = self.handler.handle(&mut exchange, tag, fields) {
            tracing::error!("[{}] handler error on {}: {}", self.remote, tag, e);
            if let Some(ref metrics) = self.metrics {
                metrics.errors_total.with_label_values(&["handler"]).inc();
            }
            return Err(e);
        }
        Ok(())
    }

    /// Enqueues a Failure reply built by the connection itself.
    fn reject(&mut self, code: &str, message: &str) {
        let mut enc = Encoder::new();
        let meta = HashMap::from([
            ("code".to_owned(), Value::from(code)),
            ("message".to_owned(), Value::from(message)),
        ]);
        if enc.append_failure(&meta).is_ok() {
            self.shared.queued.fetch_add(1, Ordering::AcqRel);
            self.queue.push_back(enc.take());
        }
    }

    /// Writes queued messages in vectored batches of up to
    /// [`MAX_WRITE_BATCH`], dequeuing each batch only once fully written.
    async fn flush(&mut self) -> std::io::Result<()> {
        while !self.queue.is_empty() {
            let count = self.queue.len().min(MAX_WRITE_BATCH);
            let total: usize = self.queue.iter().take(count).map(Bytes::len).sum();

            let mut written = 0usize;
            while written < total {
                let mut skip = written;
                let mut slices: Vec<IoSlice<'_>> = Vec::with_capacity(count);
                for buf in self.queue.iter().take(count) {
                    if skip >= buf.len() {
                        skip -= buf.len();
                        continue;
                    }
                    slices.push(IoSlice::new(&buf[skip..]));
                    skip = 0;
                }
                let n = self.stream.write_vectored(&slices).await?;
                if n == 0 {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "socket write returned zero",
                    ));
                }
                written += n;
            }
            self.stream.flush().await?;

            self.queue.drain(..count);
            self.shared.queued.fetch_sub(count, Ordering::AcqRel);
            if let Some(ref metrics) = self.metrics {
                metrics.bytes_sent_total.inc_by(total as f64);
            }
        }
        Ok(())
    }

    /// Idempotent close: marks the connection unusable and discards the
    /// outbound queue. Further sends are dropped, not errors.
    fn close(&mut self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            tracing::debug!("[{}] connection closed", self.remote);
        }
        self.queue.clear();
        self.shared.queued.store(0, Ordering::Release);
    }
}
