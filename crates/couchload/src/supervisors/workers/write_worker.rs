//! 🎬 *[a queue fills with batches. somewhere, a couch waits.]*
//!
//! 🗑️ The WriteWorker: patient, tireless, and deeply unbothered by the chaos upstream.
//! It receives batches. It writes batches. It reports how it went. It asks no questions.
//!
//! 🧠 Knowledge graph:
//! - Latency is measured HERE, around the whole client call, retries included.
//! - Call succeeded → `WriteOutcome` on the results channel.
//! - Call failed → the error goes on the errors channel and this worker clocks out for good.
//! - Job queue closed and empty → clean exit. Its senders drop with it, which is how the
//!   aggregator eventually learns that everyone has gone home.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_channel::{Receiver, Sender};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::Worker;
use crate::backends::BulkWriteClient;
use crate::common::{Batch, WriteOutcome};

#[derive(Debug)]
pub(crate) struct WriteWorker<C> {
    id: usize,
    database_name: Arc<str>,
    client: Arc<C>,
    jobs: Receiver<Batch>,
    results: Sender<WriteOutcome>,
    errors: Sender<anyhow::Error>,
}

impl<C> WriteWorker<C>
where
    C: BulkWriteClient + 'static,
{
    pub(crate) fn new(
        id: usize,
        database_name: Arc<str>,
        client: Arc<C>,
        jobs: Receiver<Batch>,
        results: Sender<WriteOutcome>,
        errors: Sender<anyhow::Error>,
    ) -> Self {
        Self {
            id,
            database_name,
            client,
            jobs,
            results,
            errors,
        }
    }
}

impl<C> Worker for WriteWorker<C>
where
    C: BulkWriteClient + 'static,
{
    type Output = ();

    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            debug!("📥 WriteWorker #{} started draining the job queue", self.id);
            while let Ok(batch) = self.jobs.recv().await {
                trace!("🪣 WriteWorker #{} picked up a batch of {} docs", self.id, batch.len());
                let started = Instant::now();
                match self.client.write(&self.database_name, &batch).await {
                    Ok(reply) => {
                        let outcome = WriteOutcome::from_reply(reply, started.elapsed());
                        if self.results.send(outcome).await.is_err() {
                            // -- 🚪 nobody is collecting results anymore: the run was aborted
                            debug!("🏁 WriteWorker #{}: aggregator is gone, stopping", self.id);
                            return Ok(());
                        }
                    }
                    Err(err) => {
                        let err = err.context(format!(
                            "💀 WriteWorker #{} could not write a batch of {} docs to '{}'.",
                            self.id,
                            batch.len(),
                            self.database_name
                        ));
                        if self.errors.send(err).await.is_err() {
                            debug!("🏁 WriteWorker #{}: aggregator is gone, error dropped", self.id);
                        }
                        return Ok(());
                    }
                }
            }
            debug!("🏁 WriteWorker #{}: job queue closed and drained. Shutting down.", self.id);
            Ok(())
        })
    }
}
