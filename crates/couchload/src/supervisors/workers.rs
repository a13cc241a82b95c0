//! 🧵 Workers: the ones who actually do the work while the Supervisor takes all the
//! credit in the sprint retro.
//!
//! 🧠 Knowledge graph:
//! - `WriteWorker` × N: pull a `Batch` off the job queue, `_bulk_docs` it, report back.
//! - `AggregatorWorker` × 1: the only task that touches `AggregatedStats`. Fan-in point.
//! - Both are spawned onto tokio and handed back as `JoinHandle`s, so the Supervisor
//!   can wait for them in the right order. The order matters. Ask the deadlocks.

use anyhow::Result;
use tokio::task::JoinHandle;

mod aggregator;
mod write_worker;

pub(crate) use aggregator::AggregatorWorker;
pub(crate) use write_worker::WriteWorker;

/// 🏗️ A background worker, that does work. duh.
///
/// "What's the DEAL with lifetime annotations? You borrow something,
///  you give it back. It's not that hard, Jerry!" (Seinfeld, on Rust)
pub(crate) trait Worker {
    /// 📦 What the worker hands back when it is done. `()` for most of them.
    type Output: Send + 'static;

    /// 🚀 Start the worker. Returns a JoinHandle because we trust but verify.
    fn start(self) -> JoinHandle<Result<Self::Output>>;
}
