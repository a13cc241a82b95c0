//! 🛋️ The Cloudant / CouchDB backend: `_bulk_docs` with a side of patience.
//!
//! 🧠 Knowledge graph:
//! - `exists`: `GET {url}/{db}`. 2xx = yes, 404 = no, anything else = "we could not tell".
//! - `write`: `POST {url}/{db}/_bulk_docs` with `{"docs":[...]}`. The reply is a JSON array,
//!   one item per doc, in request order: `{"ok":true,...}` or `{"error":"conflict",...}`.
//! - Retries live HERE and only here: transport errors and 429/500/502/503/504 get
//!   `max_retries` more attempts with a fixed `retry_backoff_ms` nap in between.
//!   Other 4xx are our fault and retrying them would just be rude.
//! - Auth, picked once in `new()`:
//!   - `auth_type = "iam"` (or an `apikey` and no `auth_type`): the API key is traded for a
//!     bearer token at `auth_url`. The token is cached and refreshed once 80% of its
//!     lifetime is gone.
//!   - `auth_type = "basic"` (or a `username` and no `auth_type`): basic auth.
//!   - `auth_type = "noauth"`, or nothing configured at all: no auth header.
//!
//! ⚠️ A 201 with a `conflict` inside is a SUCCESSFUL call. The pipeline counts the conflict;
//! it does not abort over it. Only call-level failures escape as `Err`.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::backends::BulkWriteClient;
use crate::common::{Batch, BulkWriteReply, DocResult, Document};

const IAM_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";

/// 🔧 Connection settings for the store. Usually fed from `CLOUDANT_*` env vars.
#[derive(Deserialize, Clone)]
pub struct CloudantConfig {
    /// 📡 Base URL of the service, e.g. `https://myaccount.cloudant.com`.
    #[serde(default)]
    pub url: String,
    /// 🔑 `iam`, `basic` or `noauth`. Inferred from the credentials when left out.
    #[serde(default)]
    pub auth_type: Option<String>,
    /// 🔑 IAM API key, traded for a bearer token before the first request.
    #[serde(default)]
    pub apikey: Option<String>,
    /// 🎫 Where API keys get traded for tokens.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// 🔒 Basic auth username.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Basic auth password. "password123" is not a password. It is a confession.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔄 Extra attempts after the first one for retryable failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// ⏳ Fixed sleep between attempts.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_auth_url() -> String {
    "https://iam.cloud.ibm.com/identity/token".to_string()
}

fn default_max_retries() -> u32 {
    3
}

// -- ⏳ 5 seconds: long enough for a 429 to cool off, short enough to not lose the will to live
fn default_retry_backoff_ms() -> u64 {
    5000
}

fn default_connect_timeout_secs() -> u64 {
    10
}

// -- 📦 500 docs can be chunky. a minute is generous but not infinite.
fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for CloudantConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_type: None,
            apikey: None,
            auth_url: default_auth_url(),
            username: None,
            password: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

// -- 🙈 hand-rolled Debug so no secret ever ends up in an `info!` at 3am
impl fmt::Debug for CloudantConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudantConfig")
            .field("url", &self.url)
            .field("auth_type", &self.auth_type)
            .field("apikey", &self.apikey.as_ref().map(|_| "********"))
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// 🔑 How each request proves who we are.
#[derive(Clone, PartialEq, Eq)]
enum Auth {
    NoAuth,
    Basic {
        username: String,
        password: Option<String>,
    },
    Iam {
        apikey: String,
        auth_url: String,
    },
}

impl Auth {
    fn from_config(config: &CloudantConfig) -> Result<Self> {
        let requested = config.auth_type.as_deref().map(str::to_ascii_lowercase);
        match requested.as_deref() {
            Some("iam") => match config.apikey {
                Some(ref apikey) => Ok(Self::iam(apikey, config)),
                None => anyhow::bail!(
                    "💀 auth_type is 'iam' but no API key was given. Set CLOUDANT_APIKEY."
                ),
            },
            Some("basic") => match config.username {
                Some(ref username) => Ok(Self::basic(username, config)),
                None => anyhow::bail!(
                    "💀 auth_type is 'basic' but no username was given. Set CLOUDANT_USERNAME."
                ),
            },
            Some("noauth") | Some("none") => Ok(Self::NoAuth),
            Some(other) => anyhow::bail!(
                "💀 Unknown auth_type '{other}'. Pick one of 'iam', 'basic' or 'noauth'."
            ),
            None => Ok(match (&config.apikey, &config.username) {
                (Some(apikey), _) => Self::iam(apikey, config),
                (None, Some(username)) => Self::basic(username, config),
                (None, None) => Self::NoAuth,
            }),
        }
    }

    fn iam(apikey: &str, config: &CloudantConfig) -> Self {
        Self::Iam {
            apikey: apikey.to_string(),
            auth_url: config.auth_url.clone(),
        }
    }

    fn basic(username: &str, config: &CloudantConfig) -> Self {
        Self::Basic {
            username: username.to_string(),
            password: config.password.clone(),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoAuth => f.write_str("NoAuth"),
            Self::Basic { username, .. } => f.debug_struct("Basic").field("username", username).finish(),
            Self::Iam { auth_url, .. } => f.debug_struct("Iam").field("auth_url", auth_url).finish(),
        }
    }
}

/// 🎫 What the token endpoint hands back. Everything else in the reply is ignored.
#[derive(Deserialize)]
struct IamTokenReply {
    access_token: String,
    expires_in: u64,
}

struct IamToken {
    access_token: String,
    refresh_at: Instant,
}

impl fmt::Debug for IamToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IamToken")
            .field("access_token", &"********")
            .field("refresh_at", &self.refresh_at)
            .finish()
    }
}

/// 📨 The `_bulk_docs` request body. Borrowed, because the batch already owns the docs.
#[derive(Serialize)]
struct BulkDocsRequest<'a> {
    docs: &'a [Document],
}

/// 📡 A `BulkWriteClient` that talks to Cloudant / CouchDB over HTTP.
#[derive(Debug, Clone)]
pub struct CloudantClient {
    client: reqwest::Client,
    base_url: Url,
    auth: Auth,
    /// 🎫 Shared by every clone, so N workers trade the API key once, not N times.
    iam_token: Arc<Mutex<Option<IamToken>>>,
    config: CloudantConfig,
}

impl CloudantClient {
    pub fn new(config: CloudantConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            anyhow::bail!(
                "💀 No Cloudant URL configured. Set CLOUDANT_URL (or `[cloudant] url` in the config file) so we know which couch to sit on."
            );
        }
        let base_url = Url::parse(config.url.trim())
            .with_context(|| format!("💀 '{}' is not a URL we can talk to.", config.url))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("💀 '{}' cannot have a database path appended to it.", config.url);
        }
        let auth = Auth::from_config(&config)?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("💀 The HTTP client refused to be born. Probably a TLS setup problem on this machine.")?;
        Ok(Self {
            client,
            base_url,
            auth,
            iam_token: Arc::new(Mutex::new(None)),
            config,
        })
    }

    /// 🔤 `{url}/{db}/{extra...}`, each piece percent-encoded as one path segment.
    /// CouchDB allows `/` in database names, so it must not be read as a separator.
    fn database_url(&self, database_name: &str, extra: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("💀 '{}' cannot be a base URL.", self.base_url))?
            .pop_if_empty()
            .push(database_name)
            .extend(extra);
        Ok(url)
    }

    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        Ok(match &self.auth {
            Auth::NoAuth => request,
            Auth::Basic { username, password } => request.basic_auth(username, password.as_ref()),
            Auth::Iam { apikey, auth_url } => {
                request.bearer_auth(self.bearer_token(apikey, auth_url).await?)
            }
        })
    }

    /// 🎫 A bearer token for `apikey`, from the cache while it is fresh, from IAM otherwise.
    /// The lock is held across the exchange so concurrent workers wait for one refresh.
    async fn bearer_token(&self, apikey: &str, auth_url: &str) -> Result<String> {
        let mut cached = self.iam_token.lock().await;
        if let Some(token) = &*cached {
            if Instant::now() < token.refresh_at {
                return Ok(token.access_token.clone());
            }
        }

        debug!("🎫 trading the API key for a fresh IAM token at '{auth_url}'");
        let response = self
            .client
            .post(auth_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[("grant_type", IAM_GRANT_TYPE), ("apikey", apikey)])
            .send()
            .await
            .with_context(|| format!("💀 Could not reach the IAM token endpoint '{auth_url}'."))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 IAM refused to trade the API key for a token ({status}). Check CLOUDANT_APIKEY. IAM said: '{body}'"
            );
        }
        let bytes = response
            .bytes()
            .await
            .context("💀 The IAM token reply got lost on the way back.")?;
        let reply: IamTokenReply = serde_json::from_slice(&bytes)
            .context("💀 The IAM token reply had no usable access_token / expires_in.")?;

        let token = IamToken {
            access_token: reply.access_token,
            refresh_at: Instant::now() + Duration::from_secs(reply.expires_in.saturating_mul(4) / 5),
        };
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    /// 🔄 Send a request, retrying transport failures and retryable statuses with a fixed
    /// backoff. Hands back the last response even if it is an error status, so the caller
    /// can put the body in its error message.
    async fn send_with_retries<F>(&self, what: &str, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);
        let mut attempt: u32 = 0;
        loop {
            let result = self.authorize(build()).await?.send().await;
            let worth_another_try = match &result {
                Ok(response) => is_retryable_status(response.status()),
                Err(err) => !err.is_builder(),
            };

            if !worth_another_try || attempt >= self.config.max_retries {
                return result.with_context(|| {
                    format!("💀 {what} never got an answer from the store after {} attempt(s). Check the URL, the network, and whether the couch is actually plugged in.", attempt + 1)
                });
            }

            attempt += 1;
            match &result {
                Ok(response) => warn!(
                    "🔄 {what} got {} from the store, retry {attempt}/{} in {:?}",
                    response.status(),
                    self.config.max_retries,
                    backoff
                ),
                Err(err) => warn!(
                    "🔄 {what} failed ({err}), retry {attempt}/{} in {:?}",
                    self.config.max_retries, backoff
                ),
            }
            tokio::time::sleep(backoff).await;
        }
    }
}

#[async_trait]
impl BulkWriteClient for CloudantClient {
    async fn exists(&self, database_name: &str) -> Result<bool> {
        let url = self.database_url(database_name, &[])?;
        debug!("🔍 checking that '{url}' exists");
        let response = self
            .send_with_retries("database existence check", || self.client.get(url.clone()))
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!("✅ database '{database_name}' exists, welcome mat is out");
            return Ok(true);
        }
        if status == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let body = response.text().await.unwrap_or_default();
        anyhow::bail!(
            "💀 Asked whether database '{database_name}' exists and got {status} instead of a yes or a no. The store said: '{body}'"
        )
    }

    async fn write(&self, database_name: &str, batch: &Batch) -> Result<BulkWriteReply> {
        let body = serde_json::to_vec(&BulkDocsRequest { docs: batch.docs() })
            .context("💀 Could not encode the batch as a _bulk_docs request body.")?;
        let url = self.database_url(database_name, &["_bulk_docs"])?;
        trace!("📨 POST {url} with {} docs ({} bytes)", batch.len(), body.len());

        let response = self
            .send_with_retries("bulk write", || {
                self.client
                    .post(url.clone())
                    .header(reqwest::header::CONTENT_TYPE, "application/json")
                    .body(body.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!(
                "💀 The bulk write to '{database_name}' was refused with {status}. The store said: '{body}'"
            );
        }

        let bytes = response
            .bytes()
            .await
            .context("💀 The bulk write succeeded but the reply body got lost on the way back.")?;
        let results: Vec<DocResult> = serde_json::from_slice(&bytes).with_context(|| {
            format!(
                "💀 The bulk write reply was not the per-document array we expected: '{}'",
                String::from_utf8_lossy(&bytes)
            )
        })?;

        Ok(BulkWriteReply {
            status_code: status.as_u16(),
            results,
        })
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::INTERNAL_SERVER_ERROR
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}
