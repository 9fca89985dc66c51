use rtltcp_proto::{iq, Command, DongleInfo, IqSample, DONGLE_INFO_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{ClientError, Result};

/// Default reassembly window: 8192 I/Q pairs
pub const DEFAULT_WINDOW_BYTES: usize = 16384;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Deadline for receiving the 12 byte handshake
    pub handshake_timeout: Duration,

    /// Deadline for each stream read. Expiry is not an error.
    pub read_timeout: Duration,

    /// Bytes collected before samples are decoded and delivered
    pub window_bytes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(2),
            read_timeout: Duration::from_secs(2),
            window_bytes: DEFAULT_WINDOW_BYTES,
        }
    }
}

impl ClientConfig {
    /// Window size in I/Q pairs
    pub fn with_window_samples(mut self, samples: usize) -> Self {
        self.window_bytes = samples.max(1) * 2;
        self
    }

    fn normalized(mut self) -> Self {
        // Whole I/Q pairs only
        self.window_bytes = (self.window_bytes & !1).max(2);
        self
    }
}

type SharedWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// Connected rtl_tcp client
pub struct RtlTcpClient {
    dongle_info: DongleInfo,
    peer: SocketAddr,
    writer: SharedWriter,
    running: Arc<AtomicBool>,
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    bytes_in: Arc<AtomicU64>,
    bytes_out: AtomicU64,
}

impl RtlTcpClient {
    /// Dial, read the handshake and start streaming
    ///
    /// `on_samples` receives one decoded window at a time, from the client's
    /// read task.
    pub async fn connect<A, F>(address: A, config: ClientConfig, on_samples: F) -> Result<Self>
    where
        A: ToSocketAddrs,
        F: FnMut(&[IqSample]) + Send + 'static,
    {
        let config = config.normalized();

        let mut stream = TcpStream::connect(address).await?;
        let peer = stream.peer_addr()?;
        debug!("Connected to {}, waiting for handshake", peer);

        // Dropping `stream` on error closes the transport
        let dongle_info = handshake(&mut stream, config.handshake_timeout).await?;
        debug!(
            "Received handshake. Tuner type: {}, gain steps: {}",
            dongle_info.tuner_type, dongle_info.gain_count
        );

        let (reader, writer) = stream.into_split();
        let writer: SharedWriter = Arc::new(Mutex::new(Some(writer)));
        let running = Arc::new(AtomicBool::new(true));
        let bytes_in = Arc::new(AtomicU64::new(DONGLE_INFO_SIZE as u64));

        let task = tokio::spawn(read_loop(
            reader,
            config,
            on_samples,
            Arc::clone(&writer),
            Arc::clone(&running),
            Arc::clone(&bytes_in),
        ));

        Ok(Self {
            dongle_info,
            peer,
            writer,
            running,
            read_task: std::sync::Mutex::new(Some(task)),
            bytes_in,
            bytes_out: AtomicU64::new(0),
        })
    }

    pub fn dongle_info(&self) -> DongleInfo {
        self.dongle_info
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// `false` once the stream ended or [`stop`](Self::stop) was called
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Write one command frame. Errors are returned, not retried.
    pub async fn send_command(&self, command: Command) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or(ClientError::NotConnected)?;

        let frame = command.encode();
        writer.write_all(&frame).await?;
        self.bytes_out.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    pub async fn set_center_frequency(&self, hz: u32) -> Result<()> {
        self.send_command(Command::set_frequency(hz)).await
    }

    pub async fn set_sample_rate(&self, hz: u32) -> Result<()> {
        self.send_command(Command::set_sample_rate(hz)).await
    }

    /// Gain in tenths of a dB
    pub async fn set_gain(&self, tenths_db: u32) -> Result<()> {
        self.send_command(Command::set_gain(tenths_db)).await
    }

    pub async fn set_gain_mode(&self, manual: bool) -> Result<()> {
        self.send_command(Command::set_gain_mode(manual)).await
    }

    pub async fn set_tuner_gain_by_index(&self, index: u32) -> Result<()> {
        self.send_command(Command::set_tuner_gain_by_index(index)).await
    }

    /// Stop the read loop and close the connection. Safe to call repeatedly.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let task = self.read_task.lock().ok().and_then(|mut t| t.take());
        if let Some(task) = task {
            task.abort();
        }

        if self.writer.lock().await.take().is_some() {
            debug!("Connection to {} closed", self.peer);
        }
    }
}

impl Drop for RtlTcpClient {
    fn drop(&mut self) {
        if let Ok(mut task) = self.read_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

async fn handshake(stream: &mut TcpStream, deadline: Duration) -> Result<DongleInfo> {
    let mut buffer = [0u8; DONGLE_INFO_SIZE];

    match tokio::time::timeout(deadline, stream.read_exact(&mut buffer)).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(ClientError::Handshake(
                "not enough bytes received for handshake".to_string(),
            ));
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            return Err(ClientError::Handshake(format!(
                "no handshake within {:?}",
                deadline
            )));
        }
    }

    let info = DongleInfo::decode(&buffer)?;
    if !info.has_valid_magic() {
        warn!(
            "Unexpected handshake magic {:?}, continuing anyway",
            String::from_utf8_lossy(&info.magic)
        );
    }

    Ok(info)
}

async fn read_loop<F>(
    mut reader: OwnedReadHalf,
    config: ClientConfig,
    mut on_samples: F,
    writer: SharedWriter,
    running: Arc<AtomicBool>,
    bytes_in: Arc<AtomicU64>,
) where
    F: FnMut(&[IqSample]) + Send + 'static,
{
    let mut window = vec![0u8; config.window_bytes];
    let mut pos = 0;

    while running.load(Ordering::Acquire) {
        let read = match tokio::time::timeout(config.read_timeout, reader.read(&mut window[pos..])).await {
            Ok(read) => read,
            Err(_) => continue,
        };

        match read {
            Ok(0) => {
                debug!("Server closed the stream");
                break;
            }
            Ok(n) => {
                bytes_in.fetch_add(n as u64, Ordering::Relaxed);
                pos += n;

                if pos == window.len() {
                    let samples = iq::dequantize(&window);
                    on_samples(&samples);
                    pos = 0;
                }
            }
            Err(e) => {
                error!("Error reading data: {}", e);
                break;
            }
        }
    }

    running.store(false, Ordering::Release);
    drop(reader);
    writer.lock().await.take();
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rtltcp_proto::TunerType;
    use std::sync::mpsc;
    use tokio::net::TcpListener;

    #[test]
    fn test_window_normalized_to_pairs() {
        let config = ClientConfig {
            window_bytes: 1001,
            ..ClientConfig::default()
        }
        .normalized();
        assert_eq!(config.window_bytes, 1000);

        let config = ClientConfig {
            window_bytes: 0,
            ..ClientConfig::default()
        }
        .normalized();
        assert_eq!(config.window_bytes, 2);

        assert_eq!(ClientConfig::default().with_window_samples(4096).window_bytes, 8192);
    }

    #[tokio::test]
    async fn test_short_handshake_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"RTL0\0\0").await.unwrap();
            // Close with only half a handshake sent
        });

        let result = RtlTcpClient::connect(addr, ClientConfig::default(), |_| {}).await;
        assert!(matches!(result, Err(ClientError::Handshake(_))));
    }

    #[tokio::test]
    async fn test_handshake_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let config = ClientConfig {
            handshake_timeout: Duration::from_millis(100),
            ..ClientConfig::default()
        };
        let result = RtlTcpClient::connect(addr, config, |_| {}).await;
        assert!(matches!(result, Err(ClientError::Handshake(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reassembles_split_writes_into_windows() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(&DongleInfo::new(TunerType::E4000, 14).encode())
                .await
                .unwrap();

            // 8 pairs in awkward pieces: two full windows of 4 pairs
            let stream: Vec<u8> = vec![255, 1, 128, 128, 255, 1, 128, 128, 0, 255, 0, 255, 0, 255, 0, 255];
            for piece in stream.chunks(3) {
                socket.write_all(piece).await.unwrap();
                socket.flush().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let (tx, rx) = mpsc::channel();
        let client = RtlTcpClient::connect(
            addr,
            ClientConfig::default().with_window_samples(4),
            move |samples: &[IqSample]| {
                let _ = tx.send(samples.to_vec());
            },
        )
        .await
        .unwrap();

        assert_eq!(client.dongle_info().tuner_type, TunerType::E4000);
        assert_eq!(client.dongle_info().gain_count, 14);

        let first = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        let second = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(second.len(), 4);
        assert_abs_diff_eq!(first[0].re, 1.0);
        assert_abs_diff_eq!(first[0].im, -1.0);
        assert_abs_diff_eq!(first[1].re, 0.0);
        assert_abs_diff_eq!(second[3].re, -128.0 / 127.0);
        assert_abs_diff_eq!(second[3].im, 1.0);

        assert_eq!(client.bytes_received(), 12 + 16);
        client.stop().await;
    }

    #[tokio::test]
    async fn test_commands_are_framed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(&DongleInfo::default().encode())
                .await
                .unwrap();

            let mut frames = [0u8; 15];
            socket.read_exact(&mut frames).await.unwrap();
            frames
        });

        let client = RtlTcpClient::connect(addr, ClientConfig::default(), |_| {})
            .await
            .unwrap();
        client.set_center_frequency(100_000_000).await.unwrap();
        client.set_sample_rate(2_048_000).await.unwrap();
        client.set_gain(297).await.unwrap();
        assert_eq!(client.bytes_sent(), 15);

        let frames = server.await.unwrap();
        assert_eq!(&frames[0..5], &[0x01, 0x05, 0xF5, 0xE1, 0x00]);
        assert_eq!(&frames[5..10], &[0x02, 0x00, 0x1F, 0x40, 0x00]);
        assert_eq!(&frames[10..15], &[0x04, 0x00, 0x00, 0x01, 0x29]);

        client.stop().await;
        assert!(!client.is_running());
        assert!(matches!(
            client.set_gain(1).await,
            Err(ClientError::NotConnected)
        ));
    }
}
