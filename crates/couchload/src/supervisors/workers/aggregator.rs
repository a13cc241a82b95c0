//! 🧮 The AggregatorWorker: one task, two inboxes, zero locks.
//!
//! 🧠 Knowledge graph:
//! - Owns `AggregatedStats` outright. Outcomes arrive by message, so nobody else can
//!   ever hold a reference to the counters. The borrow checker did the locking for free.
//! - Listens on the errors channel first (`biased`), then results. A fatal error is
//!   not something to get to "eventually".
//! - On a fatal error: close the job queue, throw away whatever is still queued, and
//!   finish with the error. No summary. Fail fast, fail loud.
//! - Both channels closed and drained → hand the stats and the output back to the
//!   Supervisor, which writes the summary after everything else is quiet.

use anyhow::{Context, Result};
use async_channel::Receiver;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::Worker;
use crate::common::{Batch, WriteOutcome};
use crate::stats::AggregatedStats;

#[derive(Debug)]
pub(crate) struct AggregatorWorker<W> {
    results: Receiver<WriteOutcome>,
    errors: Receiver<anyhow::Error>,
    /// 🔪 Kept only so a fatal error can close the queue and discard what is left in it.
    jobs: Receiver<Batch>,
    output: W,
    stats: AggregatedStats,
}

impl<W> AggregatorWorker<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(
        results: Receiver<WriteOutcome>,
        errors: Receiver<anyhow::Error>,
        jobs: Receiver<Batch>,
        output: W,
    ) -> Self {
        Self {
            results,
            errors,
            jobs,
            output,
            stats: AggregatedStats::new(),
        }
    }

    async fn drain(&mut self) -> Result<()> {
        let mut results_open = true;
        let mut errors_open = true;

        while results_open || errors_open {
            tokio::select! {
                biased;
                received = self.errors.recv(), if errors_open => match received {
                    Ok(err) => {
                        return Err(err.context("💀 A bulk write failed for good. Aborting the whole import."));
                    }
                    Err(_) => errors_open = false,
                },
                received = self.results.recv(), if results_open => match received {
                    Ok(outcome) => {
                        let line = self.stats.record(&outcome);
                        self.output
                            .write_all(format!("{line}\n").as_bytes())
                            .await
                            .context("💀 Could not write the per-batch log line to the output.")?;
                    }
                    Err(_) => results_open = false,
                },
            }
        }

        self.output
            .flush()
            .await
            .context("💀 Could not flush the output.")?;
        Ok(())
    }

    /// 🔪 Close the job queue and discard anything still waiting in it.
    fn abort(&self) {
        self.jobs.close();
        let mut discarded = 0usize;
        while self.jobs.try_recv().is_ok() {
            discarded += 1;
        }
        error!("🛑 import aborted, {discarded} queued batch(es) discarded");
    }
}

impl<W> Worker for AggregatorWorker<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    type Output = (AggregatedStats, W);

    fn start(mut self) -> JoinHandle<Result<(AggregatedStats, W)>> {
        tokio::spawn(async move {
            debug!("🧮 AggregatorWorker started");
            if let Err(err) = self.drain().await {
                self.abort();
                return Err(err);
            }
            debug!(
                "🏁 AggregatorWorker: {} batches and {} docs accounted for",
                self.stats.batches_written, self.stats.docs_written
            );
            Ok((self.stats, self.output))
        })
    }
}
