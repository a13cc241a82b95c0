//! 🔌 Backends: where the real I/O happens.
//!
//! 🛋️ The pipeline never speaks HTTP. It speaks `BulkWriteClient`: "does this database
//! exist?" and "please write this batch". Everything else (connections, auth, retries,
//! backoff, the feelings of the load balancer) belongs to the implementor.
//!
//! 🧠 Knowledge graph:
//! - `BulkWriteClient`: the trait seam. Shared across workers behind an `Arc`, so `&self`.
//! - `cloudant::CloudantClient`: the real one. reqwest, `_bulk_docs`, fixed-backoff retries.
//! - `in_mem::InMemoryClient`: test double. Remembers what it was given, can be told to
//!   lie about existence, fail on the Nth call, or sleep to let concurrency pile up.
//!
//! 🦆 The duck is here because every file must have one. This is law.

use anyhow::Result;
use async_trait::async_trait;

use crate::common::{Batch, BulkWriteReply};

pub mod cloudant;
#[cfg(test)]
pub(crate) mod in_mem;

pub use cloudant::{CloudantClient, CloudantConfig};

/// 📡 A remote document store that accepts bulk writes.
///
/// # Contract
/// - `exists` answers `Ok(false)` when the target is definitely not there, and `Err` when
///   it could not find out. The pipeline treats both as "do not start".
/// - `write` returns `Ok` once the call itself succeeded, even if some documents were
///   rejected (those ride along in `BulkWriteReply::results`). `Err` means the call failed
///   for good, after whatever retrying the implementor believes in.
#[async_trait]
pub trait BulkWriteClient: std::fmt::Debug + Send + Sync {
    async fn exists(&self, database_name: &str) -> Result<bool>;

    async fn write(&self, database_name: &str, batch: &Batch) -> Result<BulkWriteReply>;
}
