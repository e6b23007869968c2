//! Partition fetcher for the upstream listings API
//!
//! One HTTP session per run, one request per partition, strictly sequential
//! with a fixed delay between requests. A partition never fails the run on
//! its own: every terminal condition is folded into its [`PartitionResult`].

use super::diagnostics::{
    contains_challenge_phrase, looks_like_html, safe_snippet, FailureClassifier, FetchErrorKind,
    PartitionResult,
};
use crate::config::{Credentials, FetchConfig};
use crate::error::{HarvestError, Result};
use crate::normalize::RawItemRecord;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, COOKIE, USER_AGENT};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

/// Header carrying the guild identifier.
pub const GUILD_HEADER: &str = "X-Guild-Id";

/// Items and diagnostics from fetching every configured partition
#[derive(Debug, Default)]
pub struct FetchReport {
    pub items: Vec<RawItemRecord>,
    pub results: Vec<PartitionResult>,
}

impl FetchReport {
    pub fn total_items(&self) -> usize {
        self.items.len()
    }

    /// Fail the fetch stage when no partition produced anything.
    pub fn ensure_items(&self, classifier: &dyn FailureClassifier) -> Result<()> {
        if self.items.is_empty() {
            let hint = classifier.classify(&self.results);
            return Err(HarvestError::NoItems { hint });
        }
        Ok(())
    }
}

pub struct PartitionFetcher {
    client: reqwest::Client,
    config: FetchConfig,
    guild_id: String,
    cookie: String,
}

impl PartitionFetcher {
    /// Build the shared session with auth headers and the request timeout.
    pub fn new(config: FetchConfig, credentials: &Credentials) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("Mozilla/5.0"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json,text/plain,*/*"),
        );
        headers.insert(
            GUILD_HEADER,
            HeaderValue::from_str(&credentials.guild_id)
                .map_err(|_| HarvestError::config("PENNY_GUILD_ID is not a valid header value"))?,
        );
        let mut cookie = HeaderValue::from_str(&credentials.cookie)
            .map_err(|_| HarvestError::config("PENNY_RAW_COOKIE is not a valid header value"))?;
        cookie.set_sensitive(true);
        headers.insert(COOKIE, cookie);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            config,
            guild_id: credentials.guild_id.clone(),
            cookie: credentials.cookie.clone(),
        })
    }

    pub fn partitions(&self) -> &[String] {
        &self.config.partitions
    }

    /// Fetch every configured partition in order, sleeping between requests.
    pub async fn fetch_all(&self) -> FetchReport {
        let mut report = FetchReport::default();
        let total = self.config.partitions.len();

        for (i, partition) in self.config.partitions.iter().enumerate() {
            let (items, result) = self.fetch_partition(partition).await;
            if result.error.is_some() {
                result.log();
            }
            report.items.extend(items);
            report.results.push(result);

            if i + 1 < total {
                tokio::time::sleep(self.config.request_delay).await;
            }
        }

        info!(
            partitions = total,
            items = report.items.len(),
            "Finished fetching partitions"
        );
        report
    }

    /// Fetch a single partition. Never returns an error.
    #[instrument(skip(self))]
    pub async fn fetch_partition(&self, partition: &str) -> (Vec<RawItemRecord>, PartitionResult) {
        let started = Instant::now();
        let mut result = PartitionResult::new(partition);
        let items = self.fetch_into(partition, &mut result).await;
        result.item_count = items.len();
        result.elapsed_ms = elapsed_millis(started.elapsed());
        debug!(count = result.item_count, elapsed_ms = result.elapsed_ms, "Partition fetched");
        (items, result)
    }

    async fn fetch_into(&self, partition: &str, result: &mut PartitionResult) -> Vec<RawItemRecord> {
        let request = match self
            .client
            .get(&self.config.api_url)
            .query(&[
                ("zip_code", partition),
                ("guildId", self.guild_id.as_str()),
                ("experimental", "true"),
                ("include_out_of_stock", "false"),
            ])
            .build()
        {
            Ok(request) => request,
            Err(e) => {
                result.error = Some(FetchErrorKind::Network(error_kind(&e)));
                return Vec::new();
            },
        };
        let requested_url = request.url().clone();

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                result.error = Some(FetchErrorKind::Network(error_kind(&e)));
                return Vec::new();
            },
        };

        let status = response.status().as_u16();
        result.http_status = Some(status);
        result.redirected = response.url() != &requested_url;
        result.content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                result.error = Some(FetchErrorKind::Network(error_kind(&e)));
                return Vec::new();
            },
        };

        let snippet = safe_snippet(&body, &self.cookie);
        result.looks_like_html = looks_like_html(result.content_type.as_deref(), &snippet);

        // JSON bodies are never sniffed; item names may contain anything.
        if (result.looks_like_html || status != 200) && contains_challenge_phrase(&snippet) {
            result.error = Some(FetchErrorKind::BotChallenge);
            result.response_snippet = Some(snippet);
            return Vec::new();
        }

        if status != 200 {
            result.error = Some(FetchErrorKind::Http(status));
            if result.looks_like_html {
                result.response_snippet = Some(snippet);
            }
            return Vec::new();
        }

        match serde_json::from_slice::<Value>(&body) {
            Ok(value) => items_from_payload(value),
            Err(_) => {
                result.error = Some(FetchErrorKind::JsonDecode);
                result.response_snippet = Some(snippet);
                Vec::new()
            },
        }
    }
}

/// Arrays yield their object elements; a lone non-empty object is one item.
fn items_from_payload(value: Value) -> Vec<RawItemRecord> {
    match value {
        Value::Array(values) => values
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(map) => Some(RawItemRecord::from(map)),
                _ => None,
            })
            .collect(),
        Value::Object(map) if !map.is_empty() => vec![RawItemRecord::from(map)],
        _ => Vec::new(),
    }
}

fn error_kind(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "timeout".to_string()
    } else if e.is_connect() {
        "connect".to_string()
    } else if e.is_redirect() {
        "redirect".to_string()
    } else if e.is_body() || e.is_decode() {
        "body".to_string()
    } else if e.is_builder() {
        "builder".to_string()
    } else {
        "request".to_string()
    }
}

/// Whole milliseconds, saturating at `u64::MAX`.
fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
