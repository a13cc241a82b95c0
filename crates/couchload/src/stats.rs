//! 📊 stats.rs: the single source of truth for "how did it go?"
//!
//! 🧠 Knowledge graph:
//! - `AggregatedStats`: histograms + totals. Exactly one per run. Only the aggregator task
//!   ever holds a `&mut` to it, so there is no lock. Message passing did the locking for us.
//! - `record()` is pure bookkeeping and returns a `LogLine`. Writing that line out is the
//!   caller's I/O problem, which keeps the counters nowhere near a syscall.
//! - BTreeMaps, so the summary prints in the same order every time and two runs that saw
//!   the same outcomes in a different order compare equal.
//!
//! ⚠️ `docs` counts every document the store answered for, winners and rejects alike.
//! The rejects are ALSO counted under `errors`. That is the summary format, not a bug.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;

use crate::common::WriteOutcome;

/// 📊 Running totals for the whole import.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregatedStats {
    #[serde(rename = "statusCodes")]
    pub status_codes: BTreeMap<u16, u64>,
    #[serde(rename = "errors")]
    pub error_categories: BTreeMap<String, u64>,
    #[serde(rename = "docs")]
    pub docs_written: u64,
    #[serde(rename = "batches")]
    pub batches_written: u64,
}

impl AggregatedStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🧮 Fold one outcome into the totals and describe it as a log line.
    pub fn record(&mut self, outcome: &WriteOutcome) -> LogLine {
        *self.status_codes.entry(outcome.status_code).or_default() += 1;

        let mut success = 0u64;
        let mut failure = 0u64;
        for result in &outcome.results {
            match &result.error {
                None => success += 1,
                Some(category) => {
                    *self.error_categories.entry(category.clone()).or_default() += 1;
                    failure += 1;
                }
            }
        }

        self.docs_written += outcome.results.len() as u64;
        self.batches_written += 1;

        LogLine {
            timestamp: Local::now(),
            status_code: outcome.status_code,
            latency_ms: outcome.latency.as_millis(),
            success,
            failure,
        }
    }

    /// 📜 The final summary: one line of JSON. Serializing maps and integers does not fail
    /// in practice, but if it ever does, we say so instead of printing half a summary.
    pub fn summary_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// 🪵 One line per completed batch: `<timestamp> <status> <latencyMs> <success> <failure>`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<Local>,
    pub status_code: u16,
    pub latency_ms: u128,
    pub success: u64,
    pub failure: u64,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {} {}",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, false),
            self.status_code,
            self.latency_ms,
            self.success,
            self.failure
        )
    }
}
