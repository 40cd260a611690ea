//! Unified platform API source
//!
//! Every platform is reached through one gateway exposing
//! `POST {base}/{platform}/{usecase}` with body `{arg, page, params}` and
//! answering `{records, nextPage, limit, timeUntilReset}`. Budget fields
//! missing from the body are read from `x-ratelimit-*` headers.

use super::client::HttpClient;
use super::pacing::{Pacer, Pacing};
use crate::adapter::{FetchRequest, PlatformSource};
use crate::engine::{PageResponse, RateSignal};
use crate::error::{Error, Result};
use crate::pool::{BudgetProbe, Credential};
use crate::types::{JsonValue, Platform};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

/// Usecase answering a credential's current budget
pub const RATE_LIMIT_USECASE: &str = "rate-limit";

const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnifiedPage {
    #[serde(default)]
    records: Vec<JsonValue>,
    #[serde(default)]
    next_page: Option<JsonValue>,
    #[serde(default)]
    limit: Option<u64>,
    #[serde(default)]
    time_until_reset: Option<u64>,
}

impl UnifiedPage {
    fn into_page(self, headers: RateSignal) -> PageResponse {
        let next_page = match self.next_page {
            Some(JsonValue::String(s)) => Some(s),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        let rate = RateSignal {
            remaining: self.limit.or(headers.remaining),
            seconds_until_reset: self
                .time_until_reset
                .unwrap_or(headers.seconds_until_reset),
        };
        PageResponse::new(self.records, next_page, rate)
    }
}

/// `PlatformSource` over the unified HTTP gateway
#[derive(Debug, Clone)]
pub struct UnifiedApiClient {
    http: HttpClient,
    pacing: HashMap<Platform, Pacer>,
}

impl UnifiedApiClient {
    /// Create a source over `http`
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            pacing: HashMap::new(),
        }
    }

    /// Pace calls to `platform`
    #[must_use]
    pub fn with_pacing(mut self, platform: Platform, pacing: Pacing) -> Self {
        self.pacing.insert(platform, Pacer::new(pacing));
        self
    }

    fn path(platform: Platform, usecase: &str) -> String {
        format!("{}/{}", platform.as_str(), usecase.trim_start_matches('/'))
    }

    async fn post(
        &self,
        platform: Platform,
        usecase: &str,
        body: JsonValue,
        credential: Option<&Credential>,
    ) -> Result<PageResponse> {
        if let Some(limiter) = self.pacing.get(&platform) {
            limiter.wait().await;
        }

        let path = Self::path(platform, usecase);
        let bearer = credential.map(|c| c.token.as_str());
        let response = self.http.post_json(&path, &body, bearer).await?;
        let header_rate = rate_from_headers(response.headers());
        let text = response.text().await?;
        let page: UnifiedPage = serde_json::from_str(&text)
            .map_err(|e| Error::decode(format!("{path}: {e}")))?;

        let page = page.into_page(header_rate);
        debug!(
            %platform,
            usecase,
            records = page.records.len(),
            remaining = ?page.rate.remaining,
            "Fetched page"
        );
        Ok(page)
    }
}

#[async_trait]
impl PlatformSource for UnifiedApiClient {
    async fn fetch(&self, request: FetchRequest) -> Result<PageResponse> {
        let body = serde_json::json!({
            "arg": request.arg,
            "page": request.page,
            "params": request.params,
        });
        self.post(
            request.platform,
            &request.usecase,
            body,
            request.credential.as_ref(),
        )
        .await
    }
}

/// Budget probe calling the gateway's rate-limit usecase
#[derive(Debug, Clone)]
pub struct UnifiedBudgetProbe {
    client: UnifiedApiClient,
    platform: Platform,
}

impl UnifiedBudgetProbe {
    pub fn new(client: UnifiedApiClient, platform: Platform) -> Self {
        Self { client, platform }
    }
}

#[async_trait]
impl BudgetProbe for UnifiedBudgetProbe {
    async fn probe(&self, credential: &Credential) -> Result<RateSignal> {
        let page = self
            .client
            .post(
                self.platform,
                RATE_LIMIT_USECASE,
                serde_json::json!({}),
                Some(credential),
            )
            .await?;
        Ok(page.rate)
    }
}

fn rate_from_headers(headers: &HeaderMap) -> RateSignal {
    let read = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    };
    RateSignal {
        remaining: read(REMAINING_HEADER),
        seconds_until_reset: read(RESET_HEADER).unwrap_or(0),
    }
}
