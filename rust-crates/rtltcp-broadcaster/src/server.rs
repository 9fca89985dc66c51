use parking_lot::{Mutex, RwLock};
use rtltcp_proto::{iq, Command, DongleInfo, IqSample, COMMAND_SIZE};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{even_segment, ServerConfig};
use crate::error::{Result, ServerError};
use crate::fifo::{Chunk, ChunkFifo};
use crate::session::{CloseReason, Delivery, Session, SessionId};
use crate::stats::{Counters, ServerStats};

type CommandHandler = dyn Fn(SessionId, Command) -> bool + Send + Sync;
type ConnectHandler = dyn Fn(SessionId, SocketAddr) + Send + Sync;

/// State shared by the accept loop, session readers and the transmit loop
struct Shared {
    config: ServerConfig,
    dongle_info: RwLock<DongleInfo>,
    sessions: Mutex<HashMap<SessionId, Session>>,
    fifo: ChunkFifo,
    counters: Counters,
    on_command: RwLock<Option<Arc<CommandHandler>>>,
    on_connect: RwLock<Option<Arc<ConnectHandler>>>,
    /// Cleared when the accept loop exits, whatever the reason
    accepting: AtomicBool,
}

/// Handles kept while the listener is up
struct Running {
    shutdown: watch::Sender<bool>,
    accept_done: oneshot::Receiver<()>,
    local_addr: SocketAddr,
}

/// rtl_tcp server
///
/// The transmit loop is spawned by the first `start()` and outlives `stop()`
/// so sessions that are still connected keep receiving samples. It ends on
/// [`shutdown`](Self::shutdown) or when the server is dropped.
pub struct RtlTcpServer {
    shared: Arc<Shared>,
    running: tokio::sync::Mutex<Option<Running>>,
    transmit: tokio::sync::Mutex<Option<watch::Sender<bool>>>,
}

impl RtlTcpServer {
    pub fn new(mut config: ServerConfig) -> Self {
        config.segment_size = even_segment(config.segment_size);
        let fifo = ChunkFifo::new(config.fifo_depth);

        Self {
            shared: Arc::new(Shared {
                config,
                dongle_info: RwLock::new(DongleInfo::default()),
                sessions: Mutex::new(HashMap::new()),
                fifo,
                counters: Counters::default(),
                on_command: RwLock::new(None),
                on_connect: RwLock::new(None),
                accepting: AtomicBool::new(false),
            }),
            running: tokio::sync::Mutex::new(None),
            transmit: tokio::sync::Mutex::new(None),
        }
    }

    /// Set the handshake record. The magic is always reset to `RTL0`.
    pub fn set_dongle_info(&self, info: DongleInfo) {
        *self.shared.dongle_info.write() = info.with_forced_magic();
    }

    pub fn dongle_info(&self) -> DongleInfo {
        *self.shared.dongle_info.read()
    }

    /// Install the command handler
    ///
    /// Runs on the reader task of the session that sent the frame. Returning
    /// `false` closes that session. Without a handler every frame keeps the
    /// session open.
    pub fn set_on_command<F>(&self, handler: F)
    where
        F: Fn(SessionId, Command) -> bool + Send + Sync + 'static,
    {
        *self.shared.on_command.write() = Some(Arc::new(handler));
    }

    /// Install the hook called once per session after it is registered
    pub fn set_on_connect<F>(&self, handler: F)
    where
        F: Fn(SessionId, SocketAddr) + Send + Sync + 'static,
    {
        *self.shared.on_connect.write() = Some(Arc::new(handler));
    }

    /// Bind and start the accept and transmit loops
    ///
    /// Returns the bound address (useful with port 0) without waiting for clients.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if running.is_some() && self.shared.accepting.load(Ordering::Acquire) {
            return Err(ServerError::AlreadyRunning);
        }
        // Accept loop died on its own; its handles are stale
        running.take();

        let address = self.shared.config.listen_address.clone();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        info!("Listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (done_tx, done_rx) = oneshot::channel();

        self.shared.accepting.store(true, Ordering::Release);
        tokio::spawn(accept_loop(
            Arc::clone(&self.shared),
            listener,
            shutdown_rx,
            done_tx,
        ));

        let mut transmit = self.transmit.lock().await;
        if transmit.is_none() {
            let (transmit_tx, transmit_rx) = watch::channel(false);
            tokio::spawn(transmit_loop(Arc::clone(&self.shared), transmit_rx));
            *transmit = Some(transmit_tx);
        }

        *running = Some(Running {
            shutdown: shutdown_tx,
            accept_done: done_rx,
            local_addr,
        });

        Ok(local_addr)
    }

    /// Close the listener and wait for the accept loop to finish
    ///
    /// Connected sessions are left alone and keep receiving broadcasts until
    /// their clients disconnect. No-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        info!("Sent close signal to server. Waiting for it to finish");
        let _ = running.shutdown.send(true);

        // Err only if the accept task panicked
        let _ = running.accept_done.await;
    }

    /// [`stop`](Self::stop), then end the transmit loop
    ///
    /// Queued chunks are no longer sent. A later `start()` spawns a fresh
    /// transmit loop.
    pub async fn shutdown(&self) {
        self.stop().await;

        if let Some(transmit) = self.transmit.lock().await.take() {
            let _ = transmit.send(true);
            debug!("Sent stop signal to transmit loop");
        }
    }

    /// Whether the accept loop is up
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some() && self.shared.accepting.load(Ordering::Acquire)
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        if !self.shared.accepting.load(Ordering::Acquire) {
            return None;
        }
        self.running.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Quantize a block of complex samples and queue it for every client
    ///
    /// Never blocks. When the FIFO is full the block is dropped and counted.
    pub fn complex_broadcast(&self, samples: &[IqSample]) {
        self.enqueue(iq::quantize(samples));
    }

    /// Same as [`complex_broadcast`](Self::complex_broadcast) for interleaved
    /// signed 16-bit I/Q producers
    pub fn i16_broadcast(&self, samples: &[i16]) {
        self.enqueue(iq::quantize_i16(samples));
    }

    /// Queue already quantized bytes
    pub fn raw_broadcast(&self, bytes: Vec<u8>) {
        self.enqueue(bytes);
    }

    fn enqueue(&self, chunk: Chunk) {
        if chunk.is_empty() {
            return;
        }

        let fifo = &self.shared.fifo;
        if !fifo.push(chunk) {
            let dropped = fifo.dropped();
            // Log sparsely under sustained overrun
            if dropped.is_power_of_two() {
                warn!("TX fifo full, dropping chunk ({} dropped so far)", dropped);
            }
        }
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    pub fn session_ids(&self) -> Vec<SessionId> {
        self.shared.sessions.lock().keys().copied().collect()
    }

    /// Remote address of a connected session
    pub fn session_peer(&self, id: SessionId) -> Option<SocketAddr> {
        self.shared.sessions.lock().get(&id).map(Session::peer)
    }

    /// Chunks waiting for the transmit loop
    pub fn pending_chunks(&self) -> usize {
        self.shared.fifo.len()
    }

    pub fn stats(&self) -> ServerStats {
        let shared = &self.shared;
        let counters = &shared.counters;

        ServerStats {
            chunks_enqueued: shared.fifo.enqueued(),
            chunks_dropped: shared.fifo.dropped(),
            chunks_sent: Counters::get(&counters.chunks_sent),
            bytes_sent: Counters::get(&counters.bytes_sent),
            write_errors: Counters::get(&counters.write_errors),
            sessions_total: Counters::get(&counters.sessions_total),
            sessions_active: shared.sessions.lock().len() as u64,
        }
    }
}

impl Shared {
    fn register(&self, session: Session) {
        let mut sessions = self.sessions.lock();
        sessions.insert(session.id(), session);
        Counters::add(&self.counters.sessions_total, 1);
        debug!("Session registered. Total: {}", sessions.len());
    }

    fn unregister(&self, id: SessionId) -> Option<Session> {
        let mut sessions = self.sessions.lock();
        let removed = sessions.remove(&id);
        debug!("Session removed. Remaining: {}", sessions.len());
        removed
    }

    fn dispatch(&self, id: SessionId, command: Command) -> bool {
        debug!("Received {}", command);

        // Clone out of the lock so a slow handler does not hold it
        let handler = self.on_command.read().clone();
        match handler {
            Some(handler) => handler(id, command),
            None => true,
        }
    }

    /// Write one chunk to every session, segment by segment
    fn fan_out(&self, chunk: &[u8]) {
        let mut sessions = self.sessions.lock();
        let mut sent = 0u64;

        for segment in chunk.chunks(self.config.segment_size) {
            for session in sessions.values_mut() {
                match session.try_send(segment) {
                    Ok(Delivery::Complete(n)) => sent += n as u64,
                    Ok(Delivery::Deferred(n)) => {
                        sent += n as u64;
                        debug!(session = %session.id(), "Short write, {} bytes deferred", segment.len() - n);
                    }
                    Ok(Delivery::Skipped(n)) => {
                        sent += n as u64;
                        Counters::add(&self.counters.write_errors, 1);
                        debug!(session = %session.id(), "Client not keeping up, segment skipped");
                    }
                    Err(e) => {
                        Counters::add(&self.counters.write_errors, 1);
                        warn!(session = %session.id(), peer = %session.peer(), "Error sending samples: {}", e);
                    }
                }
            }
        }

        Counters::add(&self.counters.bytes_sent, sent);
        Counters::add(&self.counters.chunks_sent, 1);
    }
}

async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    mut shutdown: watch::Receiver<bool>,
    done: oneshot::Sender<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let id = Uuid::new_v4();
                    let span = info_span!("session", %id, %peer);
                    tokio::spawn(handle_session(Arc::clone(&shared), stream, id, peer).instrument(span));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            },
        }
    }

    drop(listener);
    shared.accepting.store(false, Ordering::Release);
    info!("Server finished listening");
    let _ = done.send(());
}

async fn handle_session(shared: Arc<Shared>, mut stream: TcpStream, id: SessionId, peer: SocketAddr) {
    info!("Received connection");
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to disable Nagle: {}", e);
    }

    debug!("Sending greeting with dongle info");
    let greeting = shared.dongle_info.read().encode();
    match timeout(shared.config.read_timeout, stream.write_all(&greeting)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!("Error sending greeting: {}", e);
            return;
        }
        Err(_) => {
            warn!("Timed out sending greeting");
            return;
        }
    }

    let (reader, writer) = stream.into_split();
    shared.register(Session::new(id, peer, writer));

    let on_connect = shared.on_connect.read().clone();
    if let Some(on_connect) = on_connect {
        on_connect(id, peer);
    }

    let reason = read_commands(&shared, id, reader).await;

    // Dropping the session closes the write half; the read half went with read_commands
    drop(shared.unregister(id));
    info!("Connection closed: {}", reason);
}

/// Read command frames until the peer goes away or the handler closes the session
async fn read_commands(shared: &Shared, id: SessionId, mut reader: OwnedReadHalf) -> CloseReason {
    let mut frame = [0u8; COMMAND_SIZE];
    let mut filled = 0;

    loop {
        let read = match timeout(shared.config.read_timeout, reader.read(&mut frame[filled..])).await {
            Ok(read) => read,
            // Deadline only re-arms the read
            Err(_) => continue,
        };

        match read {
            Ok(0) => {
                if filled > 0 {
                    warn!("Discarding partial command frame ({} of {} bytes)", filled, COMMAND_SIZE);
                }
                return CloseReason::Eof;
            }
            Ok(n) => {
                filled += n;
                if filled < COMMAND_SIZE {
                    continue;
                }
                filled = 0;

                match Command::decode(&frame) {
                    Ok(command) => {
                        if !shared.dispatch(id, command) {
                            return CloseReason::Handler;
                        }
                    }
                    Err(e) => error!("Error parsing command frame: {}", e),
                }
            }
            Err(e) => {
                warn!("Error receiving data: {}", e);
                return CloseReason::ReadError;
            }
        }
    }
}

async fn transmit_loop(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    // Let the FIFO fill a little to absorb producer jitter
    tokio::select! {
        _ = shared.fifo.wait_for(shared.config.prime_chunks) => {}
        _ = shutdown.changed() => return,
    }
    debug!("TX fifo primed, transmitting");

    loop {
        let stopping = *shutdown.borrow();
        if stopping {
            break;
        }

        match shared.fifo.pop() {
            Some(chunk) => {
                shared.fan_out(&chunk);
                tokio::task::yield_now().await;
            }
            None => {
                tokio::select! {
                    _ = shared.fifo.notified() => {}
                    _ = tokio::time::sleep(shared.config.idle_interval) => {}
                    changed = shutdown.changed() => {
                        // Server handle dropped without shutdown()
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    debug!("Transmit loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dongle_info_magic_forced() {
        let server = RtlTcpServer::new(ServerConfig::default());
        server.set_dongle_info(DongleInfo {
            magic: *b"ABCD",
            tuner_type: rtltcp_proto::TunerType::E4000,
            gain_count: 14,
        });

        let info = server.dongle_info();
        assert_eq!(&info.magic, b"RTL0");
        assert_eq!(info.gain_count, 14);
    }

    #[test]
    fn test_broadcast_overrun_is_counted() {
        let server = RtlTcpServer::new(ServerConfig::default().with_fifo_depth(4));
        let block = vec![IqSample::new(0.25, -0.25); 16];

        for _ in 0..10 {
            server.complex_broadcast(&block);
        }

        assert_eq!(server.pending_chunks(), 4);
        let stats = server.stats();
        assert_eq!(stats.chunks_enqueued, 4);
        assert_eq!(stats.chunks_dropped, 6);
        assert_eq!(stats.chunks_sent, 0);
    }

    #[test]
    fn test_empty_broadcast_ignored() {
        let server = RtlTcpServer::new(ServerConfig::default());
        server.complex_broadcast(&[]);
        server.i16_broadcast(&[]);
        assert_eq!(server.pending_chunks(), 0);
    }

    #[test]
    fn test_i16_broadcast_quantizes() {
        let server = RtlTcpServer::new(ServerConfig::default());
        server.i16_broadcast(&[0, i16::MIN, i16::MAX, 0]);

        assert_eq!(server.shared.fifo.pop(), Some(vec![128, 1, 255, 128]));
    }

    #[test]
    fn test_dispatch_defaults_to_keep_open() {
        let server = RtlTcpServer::new(ServerConfig::default());
        assert!(server.shared.dispatch(Uuid::new_v4(), Command::set_frequency(1)));

        server.set_on_command(|_, cmd| cmd.param != 0);
        assert!(server.shared.dispatch(Uuid::new_v4(), Command::set_frequency(1)));
        assert!(!server.shared.dispatch(Uuid::new_v4(), Command::set_frequency(0)));
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let server = RtlTcpServer::new(ServerConfig::new("127.0.0.1:0"));
        server.start().await.unwrap();
        assert!(matches!(server.start().await, Err(ServerError::AlreadyRunning)));
        server.stop().await;
        assert!(!server.is_running().await);
    }

    #[test]
    fn test_odd_segment_size_rounded_down() {
        let config = ServerConfig {
            segment_size: 4095,
            ..ServerConfig::default()
        };
        let server = RtlTcpServer::new(config);
        assert_eq!(server.shared.config.segment_size, 4094);
    }

    #[tokio::test]
    async fn test_dead_accept_loop_is_not_running() {
        let server = RtlTcpServer::new(ServerConfig::new("127.0.0.1:0"));
        server.start().await.unwrap();

        // End the accept loop without going through stop()
        if let Some(running) = server.running.lock().await.as_ref() {
            running.shutdown.send(true).unwrap();
        }
        for _ in 0..100 {
            if !server.shared.accepting.load(Ordering::Acquire) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        assert!(!server.is_running().await);
        assert!(server.local_addr().await.is_none());

        // Stale handles do not block a restart
        let addr = server.start().await.unwrap();
        assert!(server.is_running().await);
        assert_eq!(server.local_addr().await, Some(addr));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_shutdown_ends_transmit_loop() {
        let server = RtlTcpServer::new(ServerConfig::new("127.0.0.1:0").with_prime_chunks(1));
        server.start().await.unwrap();
        server.shutdown().await;
        assert!(!server.is_running().await);
        assert!(server.transmit.lock().await.is_none());

        server.raw_broadcast(vec![1, 2, 3, 4]);
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(server.pending_chunks(), 1);

        // Shutdown twice is fine
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let server = RtlTcpServer::new(ServerConfig::new("127.0.0.1:0"));
        server.stop().await;
        server.stop().await;
        assert!(server.local_addr().await.is_none());
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let first = RtlTcpServer::new(ServerConfig::new("127.0.0.1:0"));
        let addr = first.start().await.unwrap();

        let second = RtlTcpServer::new(ServerConfig::new(addr.to_string()));
        assert!(matches!(second.start().await, Err(ServerError::Bind { .. })));

        first.stop().await;
    }
}
