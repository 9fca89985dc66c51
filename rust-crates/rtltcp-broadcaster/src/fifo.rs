//! Bounded FIFO of pending sample chunks

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Notify;

/// One quantized I/Q block
pub type Chunk = Vec<u8>;

/// Lossy single-producer single-consumer chunk queue
///
/// Backed by a `ringbuf` heap ring. When the ring is full the incoming chunk
/// is dropped (drop-newest) and counted as an overrun. The producer side never
/// blocks, so it is safe to call from a driver callback thread.
pub struct ChunkFifo {
    producer: Mutex<HeapProd<Chunk>>,
    consumer: Mutex<HeapCons<Chunk>>,
    ready: Notify,
    depth: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
}

impl ChunkFifo {
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        let (producer, consumer) = HeapRb::<Chunk>::new(depth).split();

        Self {
            producer: Mutex::new(producer),
            consumer: Mutex::new(consumer),
            ready: Notify::new(),
            depth,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a chunk. Returns `false` if the FIFO was full and the chunk was dropped.
    pub fn push(&self, chunk: Chunk) -> bool {
        let pushed = self.producer.lock().try_push(chunk).is_ok();

        if pushed {
            self.enqueued.fetch_add(1, Ordering::Relaxed);
            self.ready.notify_one();
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }

        pushed
    }

    pub fn pop(&self) -> Option<Chunk> {
        self.consumer.lock().try_pop()
    }

    pub fn len(&self) -> usize {
        self.consumer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Total chunks accepted since creation
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    /// Total chunks dropped on overrun since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Suspend until something is pushed
    pub async fn notified(&self) {
        self.ready.notified().await
    }

    /// Suspend until at least `count` chunks are queued. `count` is capped at the depth.
    pub async fn wait_for(&self, count: usize) {
        let count = count.min(self.depth);
        while self.len() < count {
            self.ready.notified().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_fifo_order() {
        let fifo = ChunkFifo::new(4);
        assert!(fifo.push(vec![1]));
        assert!(fifo.push(vec![2]));
        assert!(fifo.push(vec![3]));

        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.pop(), Some(vec![1]));
        assert_eq!(fifo.pop(), Some(vec![2]));
        assert_eq!(fifo.pop(), Some(vec![3]));
        assert_eq!(fifo.pop(), None);
        assert!(fifo.is_empty());
    }

    #[test]
    fn test_overflow_drops_newest() {
        let fifo = ChunkFifo::new(3);
        for i in 0..10u8 {
            fifo.push(vec![i]);
        }

        assert_eq!(fifo.len(), 3);
        assert_eq!(fifo.enqueued(), 3);
        assert_eq!(fifo.dropped(), 7);

        // Oldest survive
        assert_eq!(fifo.pop(), Some(vec![0]));
        assert_eq!(fifo.pop(), Some(vec![1]));
        assert_eq!(fifo.pop(), Some(vec![2]));

        // Room again after draining
        assert!(fifo.push(vec![42]));
        assert_eq!(fifo.pop(), Some(vec![42]));
    }

    #[test]
    fn test_zero_depth_is_clamped() {
        let fifo = ChunkFifo::new(0);
        assert_eq!(fifo.depth(), 1);
        assert!(fifo.push(vec![1]));
        assert!(!fifo.push(vec![2]));
    }

    #[tokio::test]
    async fn test_wait_for_suspends_until_primed() {
        let fifo = Arc::new(ChunkFifo::new(8));

        let waiter = {
            let fifo = Arc::clone(&fifo);
            tokio::spawn(async move { fifo.wait_for(3).await })
        };

        fifo.push(vec![0]);
        fifo.push(vec![1]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        fifo.push(vec![2]);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake once primed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_producer_on_foreign_thread() {
        let fifo = Arc::new(ChunkFifo::new(128));

        let producer = {
            let fifo = Arc::clone(&fifo);
            std::thread::spawn(move || {
                for i in 0..100u8 {
                    fifo.push(vec![i]);
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 100 {
            match fifo.pop() {
                Some(chunk) => received.push(chunk[0]),
                None => {
                    let _ = tokio::time::timeout(Duration::from_millis(10), fifo.notified()).await;
                }
            }
        }
        producer.join().unwrap();

        let expected: Vec<u8> = (0..100).collect();
        assert_eq!(received, expected);
    }
}
