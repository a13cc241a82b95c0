//! 📊 progress.rs: "Are we there yet?" Every import, every time, forever.
//!
//! 🚀 stdin has no length, so there is no percentage and no ETA. What we CAN say is how
//! many lines went by, how many turned into documents, how many batches got queued, and
//! how fast. That goes into a comfy-table, and the table goes into an indicatif spinner.
//!
//! ⚠️ Everything here draws on stderr. stdout belongs to the per-batch log lines and the
//! summary, and people pipe those into `jq`. Do not poison the pipe.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::stats::AggregatedStats;

// -- 🎨 redraw at most this often; a 10 million line file should not mean 10 million redraws
const RENDER_EVERY: Duration = Duration::from_millis(200);

/// 🔢 Formats a number with commas. "1000000 docs" → "1,000,000 docs". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS for the long hauls. If it shows hours, order pizza. Plural.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📊 Producer-side counters plus the spinner that displays them.
///
/// Uses a sliding 5-second window for the docs/s rate so one slow batch doesn't make
/// the number look like a seismograph.
pub(crate) struct ProgressMetrics {
    database_name: String,
    lines_read: u64,
    docs_parsed: u64,
    batches_queued: u64,
    spinner: ProgressBar,
    rate_samples: VecDeque<(Instant, u64)>,
    start_time: Instant,
    last_render: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("database_name", &self.database_name)
            .field("lines_read", &self.lines_read)
            .field("docs_parsed", &self.docs_parsed)
            .field("batches_queued", &self.batches_queued)
            .finish()
    }
}

impl ProgressMetrics {
    pub(crate) fn new(database_name: String) -> Self {
        let spinner = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64));

        Self {
            database_name,
            lines_read: 0,
            docs_parsed: 0,
            batches_queued: 0,
            spinner,
            rate_samples,
            start_time,
            last_render: start_time,
        }
    }

    /// 🔄 One more line went by. `parsed` says whether it became a document.
    pub(crate) fn line(&mut self, parsed: bool, batches_queued: u64) {
        self.lines_read += 1;
        if parsed {
            self.docs_parsed += 1;
        }
        self.batches_queued = batches_queued;

        if self.last_render.elapsed() >= RENDER_EVERY {
            self.last_render = Instant::now();
            let docs_per_sec = self.docs_per_sec();
            self.render(docs_per_sec);
        }
    }

    /// ✅ Final redraw and stop spinning. We made it. (Or we hit EOF. Same energy.)
    pub(crate) fn finish(&mut self, batches_queued: u64) {
        self.batches_queued = batches_queued;
        let docs_per_sec = self.docs_per_sec();
        self.render(docs_per_sec);
        self.spinner.finish();
    }

    fn docs_per_sec(&mut self) -> f64 {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples.push_back((now, self.docs_parsed));

        match self.rate_samples.front() {
            Some(&(oldest_time, oldest_docs)) => {
                let elapsed = now.duration_since(oldest_time).as_secs_f64();
                if elapsed > 0.0 {
                    self.docs_parsed.saturating_sub(oldest_docs) as f64 / elapsed
                } else {
                    0.0
                }
            }
            None => 0.0,
        }
    }

    fn render(&self, docs_per_sec: f64) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new(format!("{} Docs/s", format_number(docs_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Docs", format_number(self.docs_parsed)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} Lines", format_number(self.lines_read)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Batches queued", format_number(self.batches_queued)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
            Cell::new(""),
        ]);

        self.spinner
            .set_message(format!("database: {}\n{}", self.database_name, table));
        self.spinner.tick();
    }
}

/// 🍽️ The end-of-run summary as a human-shaped table. The JSON summary on stdout is for
/// machines; this one is for the person squinting at the terminal.
pub fn summary_table(stats: &AggregatedStats) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["metric", "value"]);

    table.add_row(vec![
        Cell::new("docs written"),
        Cell::new(format_number(stats.docs_written)).set_alignment(CellAlignment::Right),
    ]);
    table.add_row(vec![
        Cell::new("batches written"),
        Cell::new(format_number(stats.batches_written)).set_alignment(CellAlignment::Right),
    ]);
    for (status_code, count) in &stats.status_codes {
        table.add_row(vec![
            Cell::new(format!("status {status_code}")),
            Cell::new(format_number(*count)).set_alignment(CellAlignment::Right),
        ]);
    }
    for (category, count) in &stats.error_categories {
        table.add_row(vec![
            Cell::new(format!("error: {category}")),
            Cell::new(format_number(*count)).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
