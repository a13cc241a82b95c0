//! 🔧 App Configuration: the sacred env-and-TOML-to-struct pipeline.
//!
//! 📡 "Config not found: We looked everywhere. Under the couch. Behind the couch.
//! Inside the couch cushions. Found 40 cents. No config.", said every developer at 3am 🦆
//!
//! 🧠 Knowledge graph, lowest precedence first:
//! 1. serde defaults (concurrency 1, batch size 500, 3 retries with 5s backoff)
//! 2. `CLOUDANT_*` env vars → the `[cloudant]` section (`CLOUDANT_URL`, `CLOUDANT_APIKEY`, ...)
//! 3. `COUCHLOAD_*` env vars → top level (`COUCHLOAD_DATABASE_NAME`, `COUCHLOAD_CONCURRENCY`, ...)
//! 4. the TOML file, if one was given
//! 5. command line overrides, if the caller has any
//!
//! Then `validate()` says no to the things serde can't: empty names, silly concurrency.

use std::path::Path;

use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backends::CloudantConfig;

/// 🚦 Concurrency is bounded on both sides. Zero writers never finish; fifty is plenty.
pub const MAX_CONCURRENCY: usize = 50;

/// 📦 Everything the importer needs to know about itself.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// 🎯 The database to write into. Must already exist.
    #[serde(default, alias = "db", alias = "dbname")]
    pub database_name: String,
    /// 🧵 Number of concurrent `_bulk_docs` requests in flight.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// 📦 Documents per bulk request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// 📊 Show a live progress table on stderr.
    #[serde(default)]
    pub progress: bool,
    #[serde(default)]
    pub cloudant: CloudantConfig,
}

fn default_concurrency() -> usize {
    1
}

// -- 📦 500 docs per request: big enough to amortize the round trip, small enough to not 413
fn default_batch_size() -> usize {
    500
}

impl AppConfig {
    /// ✅ Reject configs that would parse fine and then ruin your evening.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_name.trim().is_empty() {
            anyhow::bail!(
                "💀 No database name given. Pass --db <name> or set COUCHLOAD_DATABASE_NAME. We refuse to guess which couch you meant."
            );
        }
        if !(1..=MAX_CONCURRENCY).contains(&self.concurrency) {
            anyhow::bail!(
                "💀 concurrency must be between 1 and {MAX_CONCURRENCY}, got {}.",
                self.concurrency
            );
        }
        if self.batch_size == 0 {
            anyhow::bail!("💀 batch_size must be at least 1. A batch of nothing is a very expensive no-op.");
        }
        Ok(())
    }
}

/// 🎛️ Values that beat every other layer, typically from command line flags.
/// `None` means "no opinion", and no opinion never overrides anyone.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<bool>,
}

/// 🚀 Load the config from env vars, an optional TOML file and overrides, then validate it.
///
/// 📐 If `config_file_name` is None → env vars (and overrides) only. No file, no assumptions.
pub fn load_config(
    config_file_name: Option<&Path>,
    overrides: ConfigOverrides,
) -> anyhow::Result<AppConfig> {
    info!(
        "🔧 Loading configuration: {:#?}",
        config_file_name.unwrap_or(Path::new(""))
    );

    let config = Figment::new()
        .merge(Env::prefixed("CLOUDANT_").map(|key| format!("cloudant.{}", key.as_str()).into()))
        .merge(Env::prefixed("COUCHLOAD_"));

    let config = match config_file_name {
        Some(file_name) => config.merge(Toml::file(file_name)),
        None => config,
    };

    let config = config.merge(Serialized::defaults(overrides));

    let context_msg = match config_file_name {
        Some(path) => format!(
            "💀 Failed to parse configuration from file '{}' and environment variables (COUCHLOAD_*, CLOUDANT_*).",
            path.display()
        ),
        None => "💀 Failed to parse configuration from environment variables (COUCHLOAD_*, CLOUDANT_*). \
                 No file was provided, so this one's all on the environment."
            .to_string(),
    };

    let app_config: AppConfig = config.extract().context(context_msg)?;
    app_config
        .validate()
        .context("💀 The configuration parsed, but it does not make sense.")?;
    info!(
        "🔧 database '{}', concurrency {}, batch size {}, store {}",
        app_config.database_name, app_config.concurrency, app_config.batch_size, app_config.cloudant.url
    );
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_test_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("💀 Failed to create a temp config. The filesystem said 'new phone who dis'.");
        file.write_all(contents.as_bytes())
            .expect("💀 Failed to write test config.");
        file
    }

    fn valid() -> AppConfig {
        AppConfig {
            database_name: "movies".into(),
            concurrency: 4,
            batch_size: 500,
            progress: false,
            cloudant: CloudantConfig::default(),
        }
    }

    #[test]
    fn the_one_where_the_toml_file_sets_everything() {
        let file = write_test_config(
            r#"
            database_name = "movies"
            concurrency = 8
            batch_size = 250

            [cloudant]
            url = "http://localhost:5984"
            username = "admin"
            max_retries = 5
            "#,
        );

        let app_config = load_config(Some(file.path()), ConfigOverrides::default())
            .expect("💀 A complete config file should load.");

        assert_eq!(app_config.database_name, "movies");
        assert_eq!(app_config.concurrency, 8);
        assert_eq!(app_config.batch_size, 250);
        assert_eq!(app_config.cloudant.url, "http://localhost:5984");
        assert_eq!(app_config.cloudant.username.as_deref(), Some("admin"));
        assert_eq!(app_config.cloudant.max_retries, 5);
        assert_eq!(app_config.cloudant.retry_backoff_ms, 5000);
    }

    #[test]
    fn the_one_where_defaults_show_up_uninvited_but_helpful() {
        let file = write_test_config(r#"db = "movies""#);
        let app_config: AppConfig = Figment::new()
            .merge(Toml::file(file.path()))
            .extract()
            .expect("💀 defaults should fill the gaps");

        assert_eq!(app_config.database_name, "movies");
        assert_eq!(app_config.concurrency, 1);
        assert_eq!(app_config.batch_size, 500);
        assert!(!app_config.progress);
        assert_eq!(app_config.cloudant.max_retries, 3);
    }

    #[test]
    fn the_one_where_command_line_flags_win() {
        let file = write_test_config(
            r#"
            database_name = "from_file"
            concurrency = 2
            "#,
        );
        let app_config = load_config(
            Some(file.path()),
            ConfigOverrides {
                database_name: Some("from_flags".into()),
                concurrency: Some(16),
                ..ConfigOverrides::default()
            },
        )
        .expect("💀 overrides should merge");

        assert_eq!(app_config.database_name, "from_flags");
        assert_eq!(app_config.concurrency, 16);
        assert_eq!(app_config.batch_size, 500);
    }

    #[test]
    fn the_one_where_cloudant_env_vars_find_their_section() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("CLOUDANT_URL", "https://account.cloudant.com");
            jail.set_env("CLOUDANT_USERNAME", "admin");
            jail.set_env("CLOUDANT_APIKEY", "sekrit-api-key");
            jail.set_env("CLOUDANT_AUTH_TYPE", "iam");
            jail.set_env("COUCHLOAD_DATABASE_NAME", "movies");
            jail.set_env("COUCHLOAD_CONCURRENCY", "3");

            let app_config = load_config(None, ConfigOverrides::default())
                .map_err(|err| figment::Error::from(format!("{err:#}")))?;
            assert_eq!(app_config.cloudant.url, "https://account.cloudant.com");
            assert_eq!(app_config.cloudant.username.as_deref(), Some("admin"));
            assert_eq!(app_config.cloudant.apikey.as_deref(), Some("sekrit-api-key"));
            assert_eq!(app_config.cloudant.auth_type.as_deref(), Some("iam"));
            assert_eq!(app_config.database_name, "movies");
            assert_eq!(app_config.concurrency, 3);
            Ok(())
        });
    }

    #[test]
    fn the_one_where_a_missing_database_name_is_refused() {
        let config = AppConfig {
            database_name: "  ".into(),
            ..valid()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn the_one_where_concurrency_has_guard_rails() {
        for bad in [0, 51, 500] {
            let config = AppConfig {
                concurrency: bad,
                ..valid()
            };
            assert!(config.validate().is_err(), "concurrency {bad} should be refused");
        }
        for good in [1, 25, 50] {
            let config = AppConfig {
                concurrency: good,
                ..valid()
            };
            assert!(config.validate().is_ok(), "concurrency {good} should be fine");
        }
    }

    #[test]
    fn the_one_where_a_zero_batch_size_is_refused() {
        let config = AppConfig {
            batch_size: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }
}
