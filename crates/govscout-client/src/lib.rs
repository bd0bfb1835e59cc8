//! GovWin API client: OAuth password-grant token exchange, the paginated
//! opportunity search loop, and the contracts sub-resource fallback.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use govscout_core::Opportunity;
use serde::Deserialize;
use thiserror::Error;
use tracing::info_span;

pub const CRATE_NAME: &str = "govscout-client";

const PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub oauth_url: String,
    pub api_base: String,
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    /// Comma-separated upstream opportunity-type filter, e.g. "FBO,BID".
    pub opp_types: String,
    pub token_timeout: Duration,
    pub fetch_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            oauth_url: "https://services.govwin.com/neo-ws/oauth/token".to_string(),
            api_base: "https://services.govwin.com/neo-ws".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            username: String::new(),
            password: String::new(),
            opp_types: "FBO,BID".to_string(),
            token_timeout: Duration::from_secs(20),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

/// Token acquisition failure. Fatal for the run; never retried.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("token endpoint returned status {status}")]
    HttpStatus { status: u16 },
    #[error("token response missing access_token")]
    MalformedResponse,
}

/// Upstream list or contracts call failure. Fatal for the run; never retried.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpportunitiesPage {
    #[serde(default)]
    opportunities: Vec<Opportunity>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractEntry {
    #[serde(default, rename = "fedPrimeObligationAmt")]
    pub fed_prime_obligation_amt: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ContractsPage {
    #[serde(default, rename = "Contracts")]
    contracts: Vec<ContractEntry>,
}

/// Sum of federal prime obligation amounts; entries without an amount
/// contribute 0, and an empty list sums to 0 (not null).
pub fn sum_obligations(entries: &[ContractEntry]) -> f64 {
    entries
        .iter()
        .map(|c| c.fed_prime_obligation_amt.unwrap_or(0.0))
        .sum()
}

/// Secondary contract-value lookup, abstracted so the ingest pipeline can be
/// exercised without a live upstream.
#[async_trait]
pub trait ContractValueSource: Send + Sync {
    async fn contract_total(&self, opp_id: &str) -> Result<f64, FetchError>;
}

#[derive(Debug)]
pub struct GovWinClient {
    http: reqwest::Client,
    config: ClientConfig,
    token: String,
}

impl GovWinClient {
    /// Build the HTTP client and exchange credentials for a bearer token.
    pub async fn connect(config: ClientConfig) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .build()?;
        let token = fetch_token(&http, &config).await?;
        Ok(Self {
            http,
            config,
            token,
        })
    }

    /// Fetch every opportunity the search endpoint returns for one term,
    /// advancing the offset by the number of records in each page until a
    /// page comes back empty.
    pub async fn fetch_term(
        &self,
        term: &str,
        date_from: NaiveDate,
    ) -> Result<Vec<Opportunity>, FetchError> {
        let span = info_span!("fetch_term", term);
        let _guard = span.enter();

        let url = format!("{}/opportunities", self.config.api_base);
        let date_from = date_from.format("%Y-%m-%d").to_string();
        let mut offset = 0usize;
        let mut out = Vec::new();

        loop {
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.token)
                .query(&[
                    ("q", term),
                    ("oppSelectionDateFrom", date_from.as_str()),
                    ("market", "Federal"),
                    ("oppType", self.config.opp_types.as_str()),
                    ("max", &PAGE_SIZE.to_string()),
                    ("offset", &offset.to_string()),
                ])
                .timeout(self.config.fetch_timeout)
                .send()
                .await?;

            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }

            let page: OpportunitiesPage = resp.json().await?;
            if page.opportunities.is_empty() {
                break;
            }
            offset += page.opportunities.len();
            out.extend(page.opportunities);
        }

        Ok(out)
    }

    async fn fetch_contracts_page(
        &self,
        opp_id: &str,
        offset: usize,
    ) -> Result<Vec<ContractEntry>, FetchError> {
        let url = format!("{}/opportunities/{}/contracts", self.config.api_base, opp_id);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("max", PAGE_SIZE.to_string()), ("offset", offset.to_string())])
            .timeout(self.config.fetch_timeout)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }

        let page: ContractsPage = resp.json().await?;
        Ok(page.contracts)
    }
}

#[async_trait]
impl ContractValueSource for GovWinClient {
    async fn contract_total(&self, opp_id: &str) -> Result<f64, FetchError> {
        paged_total(move |offset| self.fetch_contracts_page(opp_id, offset)).await
    }
}

/// Drive a page fetcher until it returns an empty page, advancing the
/// offset by the number of entries in each page and summing obligations.
async fn paged_total<F, Fut>(mut fetch_page: F) -> Result<f64, FetchError>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<ContractEntry>, FetchError>>,
{
    let mut offset = 0usize;
    let mut total = 0.0;
    loop {
        let entries = fetch_page(offset).await?;
        if entries.is_empty() {
            break;
        }
        offset += entries.len();
        total += sum_obligations(&entries);
    }
    Ok(total)
}

fn token_form(config: &ClientConfig) -> [(&'static str, &str); 6] {
    [
        ("client_id", config.client_id.as_str()),
        ("client_secret", config.client_secret.as_str()),
        ("grant_type", "password"),
        ("username", config.username.as_str()),
        ("password", config.password.as_str()),
        ("scope", "read"),
    ]
}

async fn fetch_token(http: &reqwest::Client, config: &ClientConfig) -> Result<String, AuthError> {
    let resp = http
        .post(&config.oauth_url)
        .form(&token_form(config))
        .timeout(config.token_timeout)
        .send()
        .await?;

    let status = resp.status();
    if !status.is_success() {
        return Err(AuthError::HttpStatus {
            status: status.as_u16(),
        });
    }

    let body: TokenResponse = resp.json().await?;
    body.access_token.ok_or(AuthError::MalformedResponse)
}
