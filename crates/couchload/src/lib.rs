//! 🛋️ couchload: pipe line-delimited JSON into a CouchDB / Cloudant database, in bulk.
//!
//! stdin → parser → batcher → bounded queue → N write workers → `_bulk_docs`
//! → one aggregator → a log line per batch and a JSON summary at the end.

pub mod app_config;
pub mod backends;
pub mod common;
pub mod parser;
pub mod progress;
pub mod stats;

mod batcher;
mod supervisors;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::app_config::AppConfig;
use crate::backends::CloudantClient;
use crate::stats::AggregatedStats;
use crate::supervisors::Supervisor;

/// 🚀 Run one import against the configured Cloudant service.
///
/// Reads `input` to the end, writes per-batch log lines and then the summary to `output`,
/// and returns the final statistics. Any fatal error stops the run without a summary.
pub async fn run<R, W>(app_config: AppConfig, input: R, output: W) -> Result<AggregatedStats>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let client = CloudantClient::new(app_config.cloudant.clone())
        .context("💀 Could not set up the Cloudant client.")?;
    Supervisor::new(app_config, client)
        .run(input, output)
        .await
        .context("💀 The import did not finish.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::CloudantConfig;
    use serde_json::{Value, json};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn config_for(server: &MockServer, concurrency: usize, batch_size: usize) -> AppConfig {
        AppConfig {
            database_name: "movies".into(),
            concurrency,
            batch_size,
            progress: false,
            cloudant: CloudantConfig {
                url: server.uri(),
                retry_backoff_ms: 1,
                ..CloudantConfig::default()
            },
        }
    }

    /// 🎭 Answers `_bulk_docs` like a real couch would: one `ok` item per doc sent.
    fn echo_bulk_docs(request: &Request) -> ResponseTemplate {
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let items: Vec<Value> = body["docs"]
            .as_array()
            .map(|docs| {
                docs.iter()
                    .enumerate()
                    .map(|(i, _)| json!({"ok": true, "id": format!("doc-{i}"), "rev": "1-x"}))
                    .collect()
            })
            .unwrap_or_default();
        ResponseTemplate::new(201).set_body_json(Value::Array(items))
    }

    #[tokio::test]
    async fn the_one_where_stdin_makes_it_all_the_way_to_the_couch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/movies/_bulk_docs"))
            .respond_with(echo_bulk_docs)
            .expect(2)
            .mount(&server)
            .await;

        let input = "{\"title\":\"Jaws\"}\n\n{\"title\":\"Alien\"}\n{\"title\":\"Heat\"}";
        let stats = run(config_for(&server, 2, 2), input.as_bytes(), Vec::new())
            .await
            .expect("💀 end-to-end run");

        assert_eq!(stats.docs_written, 3);
        assert_eq!(stats.batches_written, 2);
        assert_eq!(stats.status_codes.get(&201), Some(&2));
    }

    #[tokio::test]
    async fn the_one_where_a_missing_database_means_no_bulk_calls_at_all() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/movies"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let err = run(config_for(&server, 4, 500), "{\"a\":1}\n".as_bytes(), Vec::new())
            .await
            .expect_err("💀 must abort before the pipeline starts");
        assert!(format!("{err:#}").contains("does not exist"), "got: {err:#}");
    }
}
