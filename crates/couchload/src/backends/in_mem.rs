//! # Previously, on couchload...
//!
//! 🎬 The couch was far away, the network was flaky, and the tests needed to run on a
//! laptop in airplane mode. So someone built a couch out of a `Vec` and a `Mutex`.
//!
//! `InMemoryClient` is a [`BulkWriteClient`] for tests. It stores documents by `_id` the
//! way CouchDB would (a second write of the same `_id` is a `conflict`), remembers every
//! batch it was handed, and can be configured to misbehave on purpose.
//!
//! ⚠️ This is NOT for production. This is for tests. If you're deploying this
//! to prod, please also deploy a therapist.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::backends::BulkWriteClient;
use crate::common::{Batch, BulkWriteReply, DocResult};

#[derive(Debug, Default)]
struct Shelf {
    batches: Vec<Batch>,
    ids: HashSet<String>,
    auto_id: u64,
}

/// 📦 A couch made of heap memory. Clone it, hand one copy to the pipeline, keep the other
/// to peek at what arrived.
#[derive(Debug, Clone)]
pub(crate) struct InMemoryClient {
    database_exists: bool,
    /// 💀 1-based call number that blows up with a call-level error.
    fail_on_write: Option<usize>,
    write_delay: Duration,
    /// 🐌 1-based call number that takes much longer than the rest.
    slow_write: Option<(usize, Duration)>,
    shelf: Arc<Mutex<Shelf>>,
    writes_started: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl InMemoryClient {
    pub(crate) fn new() -> Self {
        Self {
            database_exists: true,
            fail_on_write: None,
            write_delay: Duration::ZERO,
            slow_write: None,
            shelf: Arc::new(Mutex::new(Shelf::default())),
            writes_started: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn without_database(mut self) -> Self {
        self.database_exists = false;
        self
    }

    pub(crate) fn failing_on_write(mut self, call_number: usize) -> Self {
        self.fail_on_write = Some(call_number);
        self
    }

    pub(crate) fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub(crate) fn with_slow_write(mut self, call_number: usize, delay: Duration) -> Self {
        self.slow_write = Some((call_number, delay));
        self
    }

    pub(crate) fn batches(&self) -> Vec<Batch> {
        self.shelf.lock().expect("💀 shelf mutex poisoned").batches.clone()
    }

    pub(crate) fn writes_started(&self) -> usize {
        self.writes_started.load(Ordering::SeqCst)
    }

    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BulkWriteClient for InMemoryClient {
    async fn exists(&self, _database_name: &str) -> Result<bool> {
        Ok(self.database_exists)
    }

    async fn write(&self, _database_name: &str, batch: &Batch) -> Result<BulkWriteReply> {
        let call_number = self.writes_started.fetch_add(1, Ordering::SeqCst) + 1;
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        let delay = match self.slow_write {
            Some((slow_call, slow_delay)) if slow_call == call_number => slow_delay,
            _ => self.write_delay,
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let reply = if self.fail_on_write == Some(call_number) {
            Err(anyhow::anyhow!("💀 simulated write failure on call #{call_number}"))
        } else {
            let mut shelf = self.shelf.lock().expect("💀 shelf mutex poisoned");
            let mut results = Vec::with_capacity(batch.len());
            for doc in batch.docs() {
                let id = match doc.id() {
                    Some(id) => id.to_string(),
                    None => {
                        shelf.auto_id += 1;
                        format!("auto-{}", shelf.auto_id)
                    }
                };
                if shelf.ids.insert(id.clone()) {
                    results.push(DocResult::success(id));
                } else {
                    results.push(DocResult::failure(id, "conflict"));
                }
            }
            shelf.batches.push(batch.clone());
            Ok(BulkWriteReply {
                status_code: 201,
                results,
            })
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        reply
    }
}
