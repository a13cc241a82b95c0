//! 🚀 couchload-cli: the front door, the bouncer, the maitre d' of couchload.
//!
//! 📦 Thin wrapper: parse flags, set up logging, load config, point stdin at the
//! pipeline and stdout at the results. The library does the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use couchload::app_config::{ConfigOverrides, load_config};
use tokio::io::BufReader;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// 🛋️ Bulk-load line-delimited JSON from stdin into a Cloudant / CouchDB database.
///
/// Connection settings come from CLOUDANT_URL plus CLOUDANT_APIKEY (IAM) or
/// CLOUDANT_USERNAME and CLOUDANT_PASSWORD (basic auth), or from the `[cloudant]` section
/// of the config file. CLOUDANT_AUTH_TYPE picks the scheme explicitly.
#[derive(Debug, Parser)]
#[command(name = "couchload", version)]
struct Cli {
    /// 🎯 Database to write to. It must already exist.
    #[arg(long = "db", visible_alias = "dbname")]
    database_name: Option<String>,

    /// 🧵 Number of concurrent bulk requests in flight (1-50).
    #[arg(short = 'c', long)]
    concurrency: Option<usize>,

    /// 📦 Documents per bulk request.
    #[arg(short = 'b', long)]
    batch_size: Option<usize>,

    /// 📋 Optional TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// 📊 Show a live progress table and a final summary table on stderr.
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            database_name: self.database_name.clone(),
            concurrency: self.concurrency,
            batch_size: self.batch_size,
            // -- 🎛️ a missing flag means "no opinion", not "false"
            progress: self.progress.then_some(true),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 📡 stderr only. stdout is reserved for the per-batch lines and the summary.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = import(&cli).await {
        error!("💀 error: {}", err);
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the database server isn't reachable. \
                Double-check CLOUDANT_URL and that CouchDB / Cloudant is actually running. \
                If you're using Docker, `docker ps` is your friend. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}

async fn import(cli: &Cli) -> Result<()> {
    if let Some(ref path) = cli.config {
        let exists = path.try_exists().with_context(|| {
            format!("💀 Could not check whether config file '{}' exists.", path.display())
        })?;
        if !exists {
            anyhow::bail!(
                "💀 Config file '{}' does not exist. Maybe a cwd / relative path thing? An absolute path is absolutely certain.",
                path.display()
            );
        }
    }

    let app_config = load_config(cli.config.as_deref(), cli.overrides())
        .context("💀 Could not load the configuration.")?;
    let show_progress = app_config.progress;

    let stats = couchload::run(
        app_config,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;

    if show_progress {
        eprintln!("{}", couchload::progress::summary_table(&stats));
    }
    Ok(())
}
