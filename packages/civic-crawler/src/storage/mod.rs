//! Storage port and the bounded write queue in front of it.
//!
//! The core never reads storage back; it only writes records through
//! [`StorageSink`]. Writes are at-least-once, so every record carries a
//! dedup identity (`StorageRecord::identity`) for the backend.

pub mod jsonl;
pub mod memory;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::records::StorageRecord;

pub use jsonl::JsonlSink;
pub use memory::MemorySink;

/// Opaque storage interface. Must be safe for concurrent callers.
#[async_trait]
pub trait StorageSink: Send + Sync {
    async fn write(&self, record: StorageRecord) -> Result<(), StorageError>;

    fn name(&self) -> &str {
        "sink"
    }
}

/// Sink that drops everything, for `--dry-run`.
#[derive(Debug, Default)]
pub struct NullSink {
    written: AtomicUsize,
}

impl NullSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageSink for NullSink {
    async fn write(&self, record: StorageRecord) -> Result<(), StorageError> {
        debug!(kind = record.kind(), identity = %record.identity(), "dry-run write discarded");
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn name(&self) -> &str {
        "null"
    }
}

/// Producer half of the write queue. Cheap to clone; workers each hold
/// one. `throttle` implements the frontier backpressure contract: once
/// the queue saturates, callers wait until it drains to half the cap.
#[derive(Clone)]
pub struct SinkClient {
    tx: mpsc::Sender<StorageRecord>,
    pending: Arc<AtomicUsize>,
    drained: Arc<Notify>,
    cap: usize,
}

impl SinkClient {
    /// Queue a record. Blocks when the channel itself is full, which
    /// bounds memory even if `throttle` is skipped.
    pub async fn send(&self, record: StorageRecord) -> Result<(), StorageError> {
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.tx.send(record).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            StorageError::Closed
        })
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn is_saturated(&self) -> bool {
        self.pending() >= self.cap
    }

    /// Park until the queue has drained below cap/2, but only when it
    /// is currently saturated.
    pub async fn throttle(&self) {
        if !self.is_saturated() {
            return;
        }
        loop {
            let notified = self.drained.notified();
            if self.pending() <= self.cap / 2 {
                return;
            }
            notified.await;
        }
    }
}

/// The write queue: a single writer task draining a bounded channel into
/// the sink, preserving send order.
pub struct SinkQueue {
    client: SinkClient,
    writer: JoinHandle<usize>,
}

impl SinkQueue {
    pub fn spawn(sink: Arc<dyn StorageSink>, cap: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<StorageRecord>(cap.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let drained = Arc::new(Notify::new());

        let writer = {
            let pending = pending.clone();
            let drained = drained.clone();
            tokio::spawn(async move {
                let mut written = 0usize;
                while let Some(record) = rx.recv().await {
                    if let Err(error) = sink.write(record).await {
                        warn!(sink = sink.name(), error = %error, "sink write failed");
                    } else {
                        written += 1;
                    }
                    pending.fetch_sub(1, Ordering::SeqCst);
                    drained.notify_waiters();
                }
                written
            })
        };

        Self {
            client: SinkClient {
                tx,
                pending,
                drained,
                cap,
            },
            writer,
        }
    }

    pub fn client(&self) -> SinkClient {
        self.client.clone()
    }

    /// Drop the producer side, drain everything queued, and return how
    /// many records reached the sink.
    pub async fn finish(self) -> usize {
        drop(self.client);
        self.writer.await.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{Category, PageRecord};
    use chrono::Utc;

    fn page(url: &str) -> StorageRecord {
        StorageRecord::Page(PageRecord {
            url: url.to_string(),
            parent_url: None,
            title: None,
            description: None,
            category: Category::Services,
            content_length: 0,
            quality_score: 50,
            crawled_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn queue_preserves_send_order() {
        let sink = Arc::new(MemorySink::new());
        let queue = SinkQueue::spawn(sink.clone(), 16);
        let client = queue.client();
        for i in 0..5 {
            client
                .send(page(&format!("https://www.bolton.gov.uk/p{}", i)))
                .await
                .unwrap();
        }
        drop(client);
        let written = queue.finish().await;
        assert_eq!(written, 5);

        let urls: Vec<String> = sink
            .records()
            .into_iter()
            .map(|r| match r {
                StorageRecord::Page(p) => p.url,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(urls[0], "https://www.bolton.gov.uk/p0");
        assert_eq!(urls[4], "https://www.bolton.gov.uk/p4");
    }

    #[tokio::test]
    async fn throttle_is_noop_below_cap() {
        let sink = Arc::new(MemorySink::new());
        let queue = SinkQueue::spawn(sink, 8);
        let client = queue.client();
        client.send(page("https://www.bolton.gov.uk/a")).await.unwrap();
        // Must return immediately.
        tokio::time::timeout(std::time::Duration::from_millis(100), client.throttle())
            .await
            .expect("throttle should not block below cap");
    }

    #[tokio::test]
    async fn dry_run_sink_counts_but_discards() {
        let sink = NullSink::new();
        sink.write(page("https://www.bolton.gov.uk/a")).await.unwrap();
        sink.write(page("https://www.bolton.gov.uk/b")).await.unwrap();
        assert_eq!(sink.written(), 2);
    }
}
