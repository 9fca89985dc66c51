use std::time::Duration;

/// Segment size used for every network write of sample data
pub const DEFAULT_SEGMENT_SIZE: usize = 4096;

/// Maximum number of chunks waiting for the transmit loop
pub const DEFAULT_FIFO_DEPTH: usize = 64;

/// Server tuning knobs
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:1234`
    pub listen_address: String,

    /// Deadline for each session read. Expiry only re-arms the read.
    pub read_timeout: Duration,

    /// Bytes per network write when fanning out a chunk. Kept even so a
    /// skipped segment never splits an I/Q pair.
    pub segment_size: usize,

    /// FIFO bound. Chunks beyond it are dropped.
    pub fifo_depth: usize,

    /// Chunks to accumulate before the first transmission
    pub prime_chunks: usize,

    /// Longest idle wait of the transmit loop when the FIFO is empty
    pub idle_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:1234".to_string(),
            read_timeout: Duration::from_secs(1),
            segment_size: DEFAULT_SEGMENT_SIZE,
            fifo_depth: DEFAULT_FIFO_DEPTH,
            prime_chunks: 4,
            idle_interval: Duration::from_millis(5),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_address: impl Into<String>) -> Self {
        Self {
            listen_address: listen_address.into(),
            ..Self::default()
        }
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_segment_size(mut self, size: usize) -> Self {
        self.segment_size = even_segment(size);
        self
    }

    pub fn with_fifo_depth(mut self, depth: usize) -> Self {
        self.fifo_depth = depth.max(1);
        self
    }

    pub fn with_prime_chunks(mut self, chunks: usize) -> Self {
        self.prime_chunks = chunks;
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }
}

/// Round down to a whole number of I/Q pairs, at least one
pub(crate) fn even_segment(size: usize) -> usize {
    (size & !1).max(2)
}
