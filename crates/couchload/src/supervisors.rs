//! 🎬 *[camera pans across a dimly lit terminal]*
//! 🎬 "In a world where stdin never ends..."
//! 🎬 "One supervisor dared to batch it all."
//! 🎬 *[record scratch]* 🦆
//!
//! 📦 The Supervisor: part middle manager, part air traffic controller.
//!
//! 🧠 Knowledge graph:
//! - Pre-flight: ask the client whether the database exists. No → nothing starts.
//! - Then: N `WriteWorker`s, one `AggregatorWorker`, and the producer loop running right
//!   here on the caller's task (parser → batcher → bounded job queue).
//! - Shutdown order, and it is not a suggestion:
//!   1. the batcher closes the job queue after the last batch,
//!   2. workers drain the queue and exit,
//!   3. result/error channels close as the last worker drops its senders,
//!   4. the aggregator drains both channels and is joined, then the workers are joined,
//!   5. the summary line is written.
//!   Shuffle these and you either lose outcomes or wait forever on a channel nobody reads.
//! - Fatal error: the aggregator finishes while the producer is still going. The producer
//!   is dropped on the spot (even if stdin never closes), in-flight writes are aborted,
//!   and the error comes back without a summary.
//!
//! ⚠️ DO NOT MAKE THE WORKERS PUB. They are the Supervisor's private little minions.

mod workers;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info};

use crate::app_config::AppConfig;
use crate::backends::BulkWriteClient;
use crate::batcher::Batcher;
use crate::common::Batch;
use crate::parser::parse_line;
use crate::progress::ProgressMetrics;
use crate::stats::AggregatedStats;
use workers::{AggregatorWorker, Worker, WriteWorker};

/// 📦 Owns the config and the client for one import run.
pub(crate) struct Supervisor<C> {
    app_config: AppConfig,
    client: Arc<C>,
}

impl<C> Supervisor<C>
where
    C: BulkWriteClient + 'static,
{
    pub(crate) fn new(app_config: AppConfig, client: C) -> Self {
        Self {
            app_config,
            client: Arc::new(client),
        }
    }

    /// 🚀 Run one import: pre-flight, pipeline, orderly shutdown, summary.
    ///
    /// Per-batch log lines and then the summary JSON are written to `output`. On any fatal
    /// error the run stops and no summary is written.
    pub(crate) async fn run<R, W>(&self, input: R, output: W) -> Result<AggregatedStats>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let database_name = self.app_config.database_name.as_str();

        // -- 🔒 pre-flight: no database, no pipeline, no partial output
        let exists = self
            .client
            .exists(database_name)
            .await
            .with_context(|| format!("💀 Could not confirm that database '{database_name}' exists."))?;
        if !exists {
            anyhow::bail!(
                "💀 database '{database_name}' does not exist. We knocked. Nobody answered. Create it first, or check the spelling."
            );
        }
        info!("✅ database '{database_name}' exists, starting the pipeline");

        let concurrency = self.app_config.concurrency;
        let (jobs_tx, jobs_rx) = async_channel::bounded::<Batch>(concurrency);
        let (results_tx, results_rx) = async_channel::bounded(concurrency);
        let (errors_tx, errors_rx) = async_channel::bounded(concurrency);

        let shared_name: Arc<str> = Arc::from(database_name);
        let worker_handles: Vec<_> = (0..concurrency)
            .map(|id| {
                WriteWorker::new(
                    id,
                    shared_name.clone(),
                    self.client.clone(),
                    jobs_rx.clone(),
                    results_tx.clone(),
                    errors_tx.clone(),
                )
                .start()
            })
            .collect();
        // -- 🧹 only workers may hold result/error senders, or the aggregator never hears "done"
        drop(results_tx);
        drop(errors_tx);

        let mut aggregator = AggregatorWorker::new(results_rx, errors_rx, jobs_rx, output).start();

        // -- 1️⃣ produce until EOF; the batcher closes the job queue on its way out.
        //    the aggregator only finishes early when something is fatally wrong, and then
        //    the producer is dropped mid-read, stdin or no stdin.
        let producer = self.produce(input, Batcher::new(self.app_config.batch_size, jobs_tx));
        tokio::pin!(producer);
        let produced = tokio::select! {
            biased;
            finished = &mut aggregator => {
                return Err(Self::abandon(finished, worker_handles).await);
            }
            produced = &mut producer => produced,
        };

        // -- 2️⃣ + 3️⃣ + 4️⃣ workers drain the queue and drop their senders, which closes the
        //    channels, which lets the aggregator finish. its error is the one that matters most.
        let (stats, mut output) = match aggregator.await {
            Ok(Ok(finished)) => finished,
            failed => return Err(Self::abandon(failed, worker_handles).await),
        };
        let batches_queued = produced?;
        for joined in futures::future::join_all(worker_handles).await {
            joined.context("💀 A write worker panicked.")??;
        }
        debug!("🏁 {batches_queued} batches queued, {} written", stats.batches_written);

        // -- 5️⃣ summary, last, once everything else has gone quiet
        let summary = stats.summary_json()?;
        output
            .write_all(format!("{summary}\n").as_bytes())
            .await
            .context("💀 Could not write the summary to the output.")?;
        output.flush().await.context("💀 Could not flush the output.")?;

        Ok(stats)
    }

    /// 🛑 The aggregator stopped for good: cancel every write still in flight and work out
    /// which error to report. An aggregator that finished cleanly while input was still
    /// flowing means every worker is gone, so the reason is whichever one panicked.
    async fn abandon<W>(
        finished: Result<Result<(AggregatedStats, W)>, JoinError>,
        worker_handles: Vec<JoinHandle<Result<()>>>,
    ) -> anyhow::Error {
        for handle in &worker_handles {
            handle.abort();
        }
        match finished {
            Ok(Err(err)) => err,
            Err(join_err) => anyhow::Error::new(join_err).context("💀 The aggregator task panicked."),
            Ok(Ok(_)) => {
                for joined in futures::future::join_all(worker_handles).await {
                    if let Err(join_err) = joined {
                        if join_err.is_panic() {
                            return anyhow::Error::new(join_err).context("💀 A write worker panicked.");
                        }
                    }
                }
                anyhow::anyhow!("💀 Every write worker stopped before the input ran out.")
            }
        }
    }

    /// 🚰 Read lines, parse, batch. Returns how many batches were queued.
    async fn produce<R>(&self, mut input: R, mut batcher: Batcher) -> Result<u64>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut progress = self
            .app_config
            .progress
            .then(|| ProgressMetrics::new(self.app_config.database_name.clone()));

        let mut line = Vec::with_capacity(4096);
        loop {
            line.clear();
            let bytes_read = input
                .read_until(b'\n', &mut line)
                .await
                .context("💀 Failed to read the next line of input.")?;
            if bytes_read == 0 {
                break;
            }

            let parsed = match parse_line(&line) {
                Some(doc) => {
                    batcher.append(doc).await?;
                    true
                }
                None => false,
            };
            if let Some(progress) = progress.as_mut() {
                progress.line(parsed, batcher.batches_sealed());
            }
        }

        let batches_queued = batcher.finish().await?;
        if let Some(progress) = progress.as_mut() {
            progress.finish(batches_queued);
        }
        Ok(batches_queued)
    }
}
