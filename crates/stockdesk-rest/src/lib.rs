#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! HTTP data source for the external market-data provider.
//!
//! This crate implements the stockdesk-core [`DataSource`] trait over a small
//! REST API: `GET {base_url}/datasets/{name}?start=YYYY-MM-DD&end=YYYY-MM-DD`
//! answering with a JSON array of flat row objects.
//!
//! # Usage
//!
//! ```rust,ignore
//! use stockdesk_rest::RestSource;
//! use stockdesk_core::DataSource;
//! use chrono::NaiveDate;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = RestSource::new("https://data.example.com/api", "your_token")
//!         .with_timeout(Duration::from_secs(30))?;
//!
//!     let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
//!     let end = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
//!     let prices = source.fetch("prices", start, end).await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::*;
use reqwest::{Client, StatusCode};
use serde_json::{Map, Value as Json};
use std::fmt;
use std::time::Duration;
use stockdesk_core::{DataSource, DeskError, Result, SYMBOL_COLUMN};

/// Name reported by [`RestSource::name`].
const PROVIDER_NAME: &str = "rest";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP implementation of [`DataSource`].
#[derive(Clone)]
pub struct RestSource {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl fmt::Debug for RestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestSource")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl RestSource {
    /// Create a new source for `base_url` authenticating with `token`.
    #[must_use]
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, Some(token.into()))
    }

    /// Create a source that sends no credentials.
    #[must_use]
    pub fn anonymous(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, None)
    }

    /// Create a new source with a custom HTTP client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Rebuilds the HTTP client with a request timeout.
    ///
    /// # Errors
    /// Returns [`DeskError::Config`] if the client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DeskError::Config(e.to_string()))?;
        Ok(self)
    }

    /// Build the request URL for a dataset range.
    fn url(&self, dataset: &str, start: NaiveDate, end: NaiveDate) -> String {
        format!(
            "{}/datasets/{dataset}?start={start}&end={end}",
            self.base_url
        )
    }

    /// Make a GET request and parse the JSON response.
    async fn get_rows(&self, url: &str) -> Result<Vec<Map<String, Json>>> {
        tracing::debug!("REST request: {}", url);

        let mut request = self.client.get(url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| DeskError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DeskError::AuthenticationFailed(PROVIDER_NAME.to_string()));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(DeskError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after,
            });
        }

        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(DeskError::Network(format!("HTTP {status}: {text}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| DeskError::Network(e.to_string()))?;

        serde_json::from_str(&text).map_err(|e| DeskError::Parse(format!("{e}: {text}")))
    }
}

#[async_trait]
impl DataSource for RestSource {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch(&self, dataset: &str, start: NaiveDate, end: NaiveDate) -> Result<DataFrame> {
        let rows = self.get_rows(&self.url(dataset, start, end)).await?;
        tracing::debug!(dataset, rows = rows.len(), "REST response");
        rows_to_frame(&rows)
    }
}

/// Inferred polars type of one JSON column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Inferred {
    Null,
    Bool,
    Int,
    Float,
    Text,
}

fn infer<'a>(values: impl Iterator<Item = Option<&'a Json>>, column: &str) -> Result<Inferred> {
    let mut kind = Inferred::Null;
    for value in values.flatten() {
        let next = match value {
            Json::Null => continue,
            Json::Bool(_) => Inferred::Bool,
            Json::Number(n) if n.is_i64() => Inferred::Int,
            Json::Number(_) => Inferred::Float,
            Json::String(_) => Inferred::Text,
            Json::Array(_) | Json::Object(_) => {
                return Err(DeskError::Parse(format!(
                    "column {column} holds nested JSON"
                )));
            }
        };
        kind = match (kind, next) {
            (Inferred::Null, k) => k,
            (a, b) if a == b => a,
            (Inferred::Int, Inferred::Float) | (Inferred::Float, Inferred::Int) => Inferred::Float,
            (a, b) => {
                return Err(DeskError::Parse(format!(
                    "column {column} mixes {a:?} and {b:?} values"
                )));
            }
        };
    }
    Ok(kind)
}

/// Converts flat JSON row objects into a data frame.
///
/// Column types are inferred from the values: integers stay integers unless
/// mixed with fractional numbers, missing keys and `null` become nulls. The
/// `symbol` column is always text, since exchange codes are often numeric.
pub fn rows_to_frame(rows: &[Map<String, Json>]) -> Result<DataFrame> {
    let mut names: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
    }

    let mut columns = Vec::with_capacity(names.len());
    for name in names {
        let cells = || rows.iter().map(|row| row.get(name));
        let column_name = PlSmallStr::from(name);

        if name == SYMBOL_COLUMN {
            let symbols: Vec<Option<String>> = cells()
                .map(|v| match v {
                    Some(Json::String(s)) => Some(s.clone()),
                    Some(Json::Number(n)) => Some(n.to_string()),
                    _ => None,
                })
                .collect();
            columns.push(Column::new(column_name, symbols));
            continue;
        }

        let column = match infer(cells(), name)? {
            Inferred::Null => Column::full_null(column_name, rows.len(), &DataType::Null),
            Inferred::Bool => Column::new(
                column_name,
                cells()
                    .map(|v| v.and_then(Json::as_bool))
                    .collect::<Vec<Option<bool>>>(),
            ),
            Inferred::Int => Column::new(
                column_name,
                cells()
                    .map(|v| v.and_then(Json::as_i64))
                    .collect::<Vec<Option<i64>>>(),
            ),
            Inferred::Float => Column::new(
                column_name,
                cells()
                    .map(|v| v.and_then(Json::as_f64))
                    .collect::<Vec<Option<f64>>>(),
            ),
            Inferred::Text => Column::new(
                column_name,
                cells()
                    .map(|v| v.and_then(Json::as_str).map(str::to_string))
                    .collect::<Vec<Option<String>>>(),
            ),
        };
        columns.push(column);
    }

    DataFrame::new(columns).map_err(|e| DeskError::Parse(e.to_string()))
}
