//! 🧺 The Batcher: fills a basket, hands it off, grabs the same basket again.
//!
//! 🧠 Knowledge graph:
//! - Owns the one and only `Sender<Batch>` of the job queue. When the Batcher finishes,
//!   the queue closes. No stray sender clones, no zombie channels.
//! - The working buffer is an arena: it keeps its capacity across batches. Sealing drains
//!   the documents into fresh storage, so a sealed `Batch` never shares memory with the
//!   buffer the producer keeps writing into.
//! - `append` suspends while the queue is full. That suspension IS the backpressure.

use anyhow::{Context, Result};
use async_channel::Sender;
use tracing::trace;

use crate::common::{Batch, Document};

/// 🧺 Accumulates documents into batches of exactly `capacity`, plus one trailing partial.
#[derive(Debug)]
pub(crate) struct Batcher {
    buffer: Vec<Document>,
    capacity: usize,
    tx: Sender<Batch>,
    batches_sealed: u64,
}

impl Batcher {
    pub(crate) fn new(capacity: usize, tx: Sender<Batch>) -> Self {
        // -- ⚠️ a zero capacity basket never fills, and a never-full basket never ships
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            tx,
            batches_sealed: 0,
        }
    }

    /// 📥 Add one document. Seals and queues the buffer when it hits `capacity`.
    pub(crate) async fn append(&mut self, doc: Document) -> Result<()> {
        self.buffer.push(doc);
        if self.buffer.len() >= self.capacity {
            self.seal_and_send().await?;
        }
        Ok(())
    }

    /// 🏁 Flush whatever is left (1..capacity-1 docs) and close the job queue.
    ///
    /// An empty buffer ships nothing. Nobody wants an empty `_bulk_docs`.
    pub(crate) async fn finish(mut self) -> Result<u64> {
        if !self.buffer.is_empty() {
            self.seal_and_send().await?;
        }
        self.tx.close();
        Ok(self.batches_sealed)
    }

    pub(crate) fn batches_sealed(&self) -> u64 {
        self.batches_sealed
    }

    async fn seal_and_send(&mut self) -> Result<()> {
        // -- 📦 drain, not mem::take: the arena keeps its allocation for the next round
        let sealed = Batch::new(self.buffer.drain(..).collect());
        trace!("📦 sealed batch #{} with {} docs", self.batches_sealed + 1, sealed.len());
        self.tx
            .send(sealed)
            .await
            .context("💀 The job queue is closed. The pipeline was aborted while we were still producing batches.")?;
        self.batches_sealed += 1;
        Ok(())
    }
}
