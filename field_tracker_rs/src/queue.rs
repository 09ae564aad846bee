use crate::error::{TrackerError, TrackerResult};
use crate::sample::LocationSample;
use crate::store::KeyValueStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Storage key holding the whole pending queue
pub const QUEUE_KEY: &str = "pending_locations";

/// Persisted envelope version
pub const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueuedSample {
    /// Assigned on enqueue, strictly increasing for the life of the queue
    seq: u64,
    #[serde(flatten)]
    sample: LocationSample,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueEnvelope {
    version: u32,
    #[serde(default)]
    next_seq: u64,
    samples: Vec<QueuedSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    /// Queue length after the append
    pub pending: usize,
    /// Oldest samples dropped to stay within the cap
    pub evicted: usize,
}

/// Samples read from the front of the queue, to be acknowledged with
/// [`DurableQueue::acknowledge`] once the backend has them.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBatch {
    pub samples: Vec<LocationSample>,
    /// Sequence number of the last sample in the batch
    through: Option<u64>,
}

impl PendingBatch {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// FIFO of undelivered samples persisted under [`QUEUE_KEY`].
///
/// Every operation is read-modify-write of the full envelope under one async
/// lock, so there is a single writer at a time and each write replaces the
/// stored queue as a whole.
///
/// # Acknowledgement
/// Each entry carries a sequence number. Acknowledging a batch removes the
/// entries up to the batch's last number, so samples appended while the
/// batch was in flight survive even if the cap evicted part of the batch
/// in the meantime.
pub struct DurableQueue {
    store: Arc<dyn KeyValueStore>,
    lock: Mutex<()>,
    max_pending: usize,
}

impl DurableQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, max_pending: usize) -> Self {
        Self {
            store,
            lock: Mutex::new(()),
            max_pending: max_pending.max(1),
        }
    }

    async fn load(&self) -> TrackerResult<QueueEnvelope> {
        let raw = match self.store.get(QUEUE_KEY).await? {
            Some(raw) => raw,
            None => {
                return Ok(QueueEnvelope {
                    version: ENVELOPE_VERSION,
                    ..Default::default()
                })
            }
        };

        let envelope: QueueEnvelope = serde_json::from_str(&raw)
            .map_err(|e| TrackerError::Storage(format!("Corrupt pending queue: {}", e)))?;

        if envelope.version != ENVELOPE_VERSION {
            return Err(TrackerError::Storage(format!(
                "Unsupported pending queue version {} (expected {})",
                envelope.version, ENVELOPE_VERSION
            )));
        }

        Ok(envelope)
    }

    /// The envelope is kept even when empty so `next_seq` never goes back
    async fn save(&self, envelope: &QueueEnvelope) -> TrackerResult<()> {
        let json = serde_json::to_string(envelope)?;
        self.store.set(QUEUE_KEY, &json).await
    }

    /// Append a sample behind everything already queued
    pub async fn enqueue(&self, sample: LocationSample) -> TrackerResult<EnqueueReport> {
        let _guard = self.lock.lock().await;

        let mut envelope = self.load().await?;
        let seq = envelope.next_seq;
        envelope.next_seq += 1;
        envelope.samples.push(QueuedSample { seq, sample });

        let evicted = envelope.samples.len().saturating_sub(self.max_pending);
        if evicted > 0 {
            envelope.samples.drain(..evicted);
            log::warn!(
                "Pending queue at cap ({}), dropped {} oldest sample(s)",
                self.max_pending,
                evicted
            );
        }

        let pending = envelope.samples.len();
        self.save(&envelope).await?;

        Ok(EnqueueReport { pending, evicted })
    }

    /// Read queued samples in capture order without removing them
    pub async fn drain_batch(&self, limit: Option<usize>) -> TrackerResult<PendingBatch> {
        let _guard = self.lock.lock().await;

        let mut entries = self.load().await?.samples;
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(PendingBatch {
            through: entries.last().map(|e| e.seq),
            samples: entries.into_iter().map(|e| e.sample).collect(),
        })
    }

    pub async fn drain(&self, limit: Option<usize>) -> TrackerResult<Vec<LocationSample>> {
        Ok(self.drain_batch(limit).await?.samples)
    }

    /// Remove a delivered batch. Returns how many samples are left.
    pub async fn acknowledge(&self, batch: &PendingBatch) -> TrackerResult<usize> {
        let through = match batch.through {
            Some(seq) => seq,
            None => return self.len().await,
        };

        let _guard = self.lock.lock().await;

        let mut envelope = self.load().await?;
        envelope.samples.retain(|e| e.seq > through);

        let remaining = envelope.samples.len();
        self.save(&envelope).await?;
        Ok(remaining)
    }

    /// Drop every queued sample. An unreadable payload is discarded too.
    pub async fn clear(&self) -> TrackerResult<()> {
        let _guard = self.lock.lock().await;

        match self.load().await {
            Ok(mut envelope) => {
                envelope.samples.clear();
                self.save(&envelope).await
            }
            Err(e) => {
                log::warn!("Discarding unreadable pending queue: {}", e);
                self.store.remove(QUEUE_KEY).await
            }
        }
    }

    pub async fn len(&self) -> TrackerResult<usize> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.samples.len())
    }

    pub async fn is_empty(&self) -> TrackerResult<bool> {
        Ok(self.len().await? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Fix;
    use crate::store::{test_dir, FileStore, MemoryStore};
    use chrono::{Duration, TimeZone, Utc};

    fn sample_at(minute: i64) -> LocationSample {
        let base = Utc.with_ymd_and_hms(2025, 5, 12, 9, 0, 0).unwrap();
        LocationSample::new(
            Fix::new(41.3 + minute as f64 * 0.001, 69.2, Some(10.0)),
            80,
            false,
            base + Duration::minutes(minute),
        )
    }

    #[tokio::test]
    async fn test_fifo_order_and_non_destructive_drain() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()), 100);
        for i in 0..5 {
            queue.enqueue(sample_at(i)).await.unwrap();
        }

        let first = queue.drain(Some(3)).await.unwrap();
        assert_eq!(first, vec![sample_at(0), sample_at(1), sample_at(2)]);

        // Drain doesn't remove anything
        assert_eq!(queue.len().await.unwrap(), 5);
        assert_eq!(queue.drain(None).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_acknowledge_keeps_later_samples() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()), 100);
        queue.enqueue(sample_at(0)).await.unwrap();
        queue.enqueue(sample_at(1)).await.unwrap();

        let batch = queue.drain_batch(None).await.unwrap();
        // Arrives while the batch is in flight
        queue.enqueue(sample_at(2)).await.unwrap();

        let remaining = queue.acknowledge(&batch).await.unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(queue.drain(None).await.unwrap(), vec![sample_at(2)]);
    }

    #[tokio::test]
    async fn test_acknowledge_after_eviction_keeps_new_sample() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()), 3);
        for i in 0..3 {
            queue.enqueue(sample_at(i)).await.unwrap();
        }

        let batch = queue.drain_batch(None).await.unwrap();
        assert_eq!(batch.len(), 3);

        // At the cap: evicts sample 0, which is part of the in-flight batch
        let report = queue.enqueue(sample_at(3)).await.unwrap();
        assert_eq!(report.evicted, 1);

        assert_eq!(queue.acknowledge(&batch).await.unwrap(), 1);
        assert_eq!(queue.drain(None).await.unwrap(), vec![sample_at(3)]);
    }

    #[tokio::test]
    async fn test_sequence_survives_clear() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()), 100);
        queue.enqueue(sample_at(0)).await.unwrap();
        queue.enqueue(sample_at(1)).await.unwrap();
        let stale = queue.drain_batch(None).await.unwrap();

        queue.clear().await.unwrap();
        queue.enqueue(sample_at(2)).await.unwrap();

        // A batch drained before the clear can't remove samples added after it
        assert_eq!(queue.acknowledge(&stale).await.unwrap(), 1);
        assert_eq!(queue.drain(None).await.unwrap(), vec![sample_at(2)]);
    }

    #[tokio::test]
    async fn test_enqueue_after_clear_survives() {
        let queue = Arc::new(DurableQueue::new(Arc::new(MemoryStore::new()), 100));
        queue.enqueue(sample_at(0)).await.unwrap();

        let q1 = queue.clone();
        let q2 = queue.clone();
        let (cleared, queued) = tokio::join!(
            async move { q1.clear().await },
            async move { q2.enqueue(sample_at(1)).await }
        );
        cleared.unwrap();
        queued.unwrap();

        // Either the clear ran first (new sample survives alone) or after
        // (empty). Never a mix with the old sample.
        let left = queue.drain(None).await.unwrap();
        assert!(left.is_empty() || left == vec![sample_at(1)]);

        queue.clear().await.unwrap();
        queue.enqueue(sample_at(2)).await.unwrap();
        assert_eq!(queue.drain(None).await.unwrap(), vec![sample_at(2)]);
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let queue = DurableQueue::new(Arc::new(MemoryStore::new()), 3);
        for i in 0..3 {
            let report = queue.enqueue(sample_at(i)).await.unwrap();
            assert_eq!(report.evicted, 0);
        }

        let report = queue.enqueue(sample_at(3)).await.unwrap();
        assert_eq!(report, EnqueueReport { pending: 3, evicted: 1 });
        assert_eq!(
            queue.drain(None).await.unwrap(),
            vec![sample_at(1), sample_at(2), sample_at(3)]
        );
    }

    #[tokio::test]
    async fn test_failed_write_leaves_queue_unchanged() {
        let store = Arc::new(MemoryStore::new());
        let queue = DurableQueue::new(store.clone(), 100);
        queue.enqueue(sample_at(0)).await.unwrap();

        store.set_fail_writes(true);
        assert!(matches!(
            queue.enqueue(sample_at(1)).await,
            Err(TrackerError::Storage(_))
        ));
        assert_eq!(queue.drain(None).await.unwrap(), vec![sample_at(0)]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = test_dir("queue");
        {
            let store = FileStore::open(&dir).await.unwrap();
            let queue = DurableQueue::new(Arc::new(store), 100);
            queue.enqueue(sample_at(0)).await.unwrap();
            queue.enqueue(sample_at(1)).await.unwrap();
        }

        let store = FileStore::open(&dir).await.unwrap();
        let queue = DurableQueue::new(Arc::new(store), 100);
        assert_eq!(
            queue.drain(None).await.unwrap(),
            vec![sample_at(0), sample_at(1)]
        );

        let raw = std::fs::read_to_string(dir.join("pending_locations.json")).unwrap();
        assert!(raw.contains("\"version\":1"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_version_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(QUEUE_KEY, r#"{"version":7,"samples":[]}"#)
            .await
            .unwrap();
        let queue = DurableQueue::new(store.clone(), 100);

        assert!(matches!(queue.len().await, Err(TrackerError::Storage(_))));
        // The unreadable payload is not overwritten
        assert!(queue.enqueue(sample_at(0)).await.is_err());
        assert!(store.get(QUEUE_KEY).await.unwrap().unwrap().contains("\"version\":7"));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.set(QUEUE_KEY, "[{\"latit").await.unwrap();
        let queue = DurableQueue::new(store, 100);

        assert!(matches!(queue.drain(None).await, Err(TrackerError::Storage(_))));

        queue.clear().await.unwrap();
        assert!(queue.is_empty().await.unwrap());
    }
}
