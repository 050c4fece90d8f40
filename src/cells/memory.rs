//! In-memory cell store
//!
//! `DashMap`-backed implementation of [`CellStore`] with a configurable bulk
//! read limit and simulated per-call latency. Counters and fault injection
//! make batching, concurrency and retry behavior observable in tests.

use super::store::CellStore;
use super::{Namespace, Record, RecordKey, StoredRecord, WritePolicy};
use crate::error::{Error, Result};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default maximum number of keys per bulk read
pub const DEFAULT_BATCH_LIMIT: usize = 5_000;

/// Fault count meaning "fail forever"
pub const PERMANENT: usize = usize::MAX;

#[derive(Debug, Clone)]
struct Stored {
    generation: u32,
    bins: Record,
}

/// Counters shared by all clones of one store
#[derive(Debug, Default)]
struct Counters {
    put_calls: AtomicU64,
    bulk_get_calls: AtomicU64,
    in_flight_puts: AtomicUsize,
    peak_in_flight_puts: AtomicUsize,
}

/// Decrements the in-flight gauge on every exit path
struct InFlight<'a>(&'a Counters);

impl<'a> InFlight<'a> {
    fn enter(counters: &'a Counters) -> Self {
        let now = counters.in_flight_puts.fetch_add(1, Ordering::SeqCst) + 1;
        counters.peak_in_flight_puts.fetch_max(now, Ordering::SeqCst);
        Self(counters)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight_puts.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory implementation of [`CellStore`]
#[derive(Clone)]
pub struct MemoryCellStore {
    records: Arc<DashMap<RecordKey, Stored>>,
    batch_limit: usize,
    latency: Duration,
    key_faults: Arc<DashMap<String, usize>>,
    bulk_faults: Arc<AtomicUsize>,
    counters: Arc<Counters>,
}

impl Default for MemoryCellStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCellStore {
    pub fn new() -> Self {
        Self::with_options(DEFAULT_BATCH_LIMIT, Duration::ZERO)
    }

    /// Create with a custom bulk read limit and per-call latency
    pub fn with_options(batch_limit: usize, latency: Duration) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            batch_limit,
            latency,
            key_faults: Arc::new(DashMap::new()),
            bulk_faults: Arc::new(AtomicUsize::new(0)),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Fail the next `times` puts of `key` (in any namespace).
    /// [`PERMANENT`] never recovers.
    pub fn fail_key(&self, key: impl Into<String>, times: usize) {
        self.key_faults.insert(key.into(), times);
    }

    /// Fail the next `n` accepted bulk reads
    pub fn fail_next_bulk_reads(&self, n: usize) {
        self.bulk_faults.store(n, Ordering::SeqCst);
    }

    /// Number of stored records across all namespaces
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Direct lookup, bypassing latency and faults
    pub fn get(&self, namespace: &Namespace, key: &str) -> Option<StoredRecord> {
        let record_key = RecordKey {
            namespace: namespace.clone(),
            user_key: key.to_string(),
        };
        self.records.get(&record_key).map(|stored| StoredRecord {
            key: record_key.clone(),
            generation: stored.generation,
            bins: stored.bins.clone(),
        })
    }

    pub fn put_calls(&self) -> u64 {
        self.counters.put_calls.load(Ordering::SeqCst)
    }

    /// Bulk reads that passed the batch limit check
    pub fn bulk_get_calls(&self) -> u64 {
        self.counters.bulk_get_calls.load(Ordering::SeqCst)
    }

    /// Highest number of puts observed in flight at once
    pub fn peak_in_flight_puts(&self) -> usize {
        self.counters.peak_in_flight_puts.load(Ordering::SeqCst)
    }

    fn take_key_fault(&self, key: &str) -> bool {
        match self.key_faults.get_mut(key) {
            Some(mut remaining) if *remaining > 0 => {
                if *remaining != PERMANENT {
                    *remaining -= 1;
                }
                true
            }
            _ => false,
        }
    }

    async fn simulate_latency(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl CellStore for MemoryCellStore {
    fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    async fn put(&self, namespace: &Namespace, key: &str, record: Record, policy: WritePolicy) -> Result<()> {
        let _in_flight = InFlight::enter(&self.counters);
        self.counters.put_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        if self.take_key_fault(key) {
            return Err(Error::CellStore(format!("injected write failure for key {}", key)));
        }

        let record_key = RecordKey {
            namespace: namespace.clone(),
            user_key: key.to_string(),
        };
        match self.records.entry(record_key) {
            Entry::Occupied(mut existing) => match policy {
                WritePolicy::CreateOnly => {
                    return Err(Error::AlreadyExists(format!("record {}/{}", namespace, key)));
                }
                WritePolicy::CreateOrReplace => {
                    let stored = existing.get_mut();
                    stored.generation += 1;
                    stored.bins = record;
                }
                WritePolicy::Update => {
                    let stored = existing.get_mut();
                    stored.generation += 1;
                    stored.bins.extend(record);
                }
            },
            Entry::Vacant(slot) => {
                slot.insert(Stored {
                    generation: 1,
                    bins: record,
                });
            }
        }
        Ok(())
    }

    async fn bulk_get(&self, namespace: &Namespace, keys: &[String]) -> Result<Vec<StoredRecord>> {
        if keys.len() > self.batch_limit {
            return Err(Error::OversizedBatch {
                requested: keys.len(),
                limit: self.batch_limit,
            });
        }
        self.counters.bulk_get_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let injected = self
            .bulk_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::CellStore("injected bulk read failure".to_string()));
        }

        let records: Vec<StoredRecord> = keys.iter().filter_map(|key| self.get(namespace, key)).collect();
        debug!(namespace = %namespace, requested = keys.len(), found = records.len(), "Bulk read");
        Ok(records)
    }

    async fn truncate(&self, keyspace: &str) -> Result<()> {
        self.records.retain(|key, _| key.namespace.keyspace != keyspace);
        debug!(keyspace, "Truncated keyspace");
        Ok(())
    }
}
