//! HTTP chain client (TronGrid-compatible query API + signer service)

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::ChainClient;
use super::error::ChainError;
use super::retry::RetryPolicy;
use super::types::{TransferRecord, extract_tx_id, normalize_transfers};
use crate::config::{ChainConfig, HotWalletConfig, TokenConfig};

const API_KEY_HEADER: &str = "TRON-PRO-API-KEY";
const MAX_ERROR_BODY: usize = 256;

pub struct HttpChainClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    token_contract: String,
    page_limit: u32,
    min_confirmations: u64,
    timeout_ms: u64,
    retry: RetryPolicy,
    signer_url: String,
    signer_api_key: String,
}

impl HttpChainClient {
    pub fn new(
        chain: &ChainConfig,
        token: &TokenConfig,
        hot_wallet: &HotWalletConfig,
        retry: RetryPolicy,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(chain.request_timeout_ms))
            .build()
            .map_err(|e| ChainError::Config(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            endpoint = %chain.endpoint,
            token = %token.contract,
            timeout_ms = chain.request_timeout_ms,
            max_attempts = retry.max_attempts(),
            "Chain client initialized"
        );

        Ok(Self {
            client,
            endpoint: chain.endpoint.trim_end_matches('/').to_string(),
            api_key: chain.api_key.clone(),
            token_contract: token.contract.clone(),
            page_limit: chain.page_limit,
            min_confirmations: chain.min_confirmations,
            timeout_ms: chain.request_timeout_ms,
            retry,
            signer_url: hot_wallet.signer_url.trim_end_matches('/').to_string(),
            signer_api_key: hot_wallet.signer_api_key.clone(),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> ChainError {
        if e.is_timeout() {
            ChainError::Timeout(self.timeout_ms)
        } else {
            ChainError::Network(e.to_string())
        }
    }

    /// One GET attempt: transport, status and body are all checked here
    async fn get_json_once(&self, url: &str, query: &[(&str, String)]) -> Result<Value, ChainError> {
        let mut request = self.client.get(url).query(query);
        if !self.api_key.is_empty() {
            request = request.header(API_KEY_HEADER, &self.api_key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))
    }

    /// GET and parse with the retry policy applied; a body that fails to
    /// parse counts as a failed attempt
    async fn get_parsed<T, F>(
        &self,
        operation: &str,
        url: &str,
        query: &[(&str, String)],
        parse: F,
    ) -> Result<T, ChainError>
    where
        F: Fn(&Value) -> Result<T, ChainError>,
    {
        let parse = &parse;
        self.retry
            .run(operation, |attempt| async move {
                debug!(url, attempt = attempt + 1, "Chain GET");
                let body = self.get_json_once(url, query).await?;
                parse(&body)
            })
            .await
    }
}

fn truncate(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

/// Raw balance of `contract` in an account response (`data[0].trc20` is a list of single-entry maps)
pub(crate) fn parse_token_balance(body: &Value, contract: &str) -> Result<u128, ChainError> {
    let Some(account) = body
        .get("data")
        .and_then(Value::as_array)
        .and_then(|accounts| accounts.first())
    else {
        // unactivated accounts come back with an empty list
        return Ok(0);
    };

    let entry = account
        .get("trc20")
        .and_then(Value::as_array)
        .and_then(|tokens| tokens.iter().find_map(|token| token.get(contract)));

    match entry {
        None => Ok(0),
        Some(Value::String(raw)) => raw
            .parse::<u128>()
            .map_err(|e| ChainError::Decode(format!("bad token balance {}: {}", raw, e))),
        Some(Value::Number(n)) => n
            .as_u64()
            .map(u128::from)
            .ok_or_else(|| ChainError::Decode(format!("bad token balance {}", n))),
        Some(other) => Err(ChainError::Decode(format!("bad token balance {}", other))),
    }
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn fetch_incoming_transfers(
        &self,
        address: &str,
    ) -> Result<Vec<TransferRecord>, ChainError> {
        let url = format!("{}/v1/accounts/{}/transactions/trc20", self.endpoint, address);
        let query = [
            ("only_confirmed", "true".to_string()),
            ("only_to", "true".to_string()),
            ("limit", self.page_limit.to_string()),
            ("contract_address", self.token_contract.clone()),
        ];

        let records = self
            .get_parsed("fetch_incoming_transfers", &url, &query, |body| {
                normalize_transfers(body, self.min_confirmations)
            })
            .await?;
        debug!(address, count = records.len(), "Fetched transfers");
        Ok(records)
    }

    async fn token_balance(&self, address: &str) -> Result<u128, ChainError> {
        let url = format!("{}/v1/accounts/{}", self.endpoint, address);
        self.get_parsed("token_balance", &url, &[], |body| {
            parse_token_balance(body, &self.token_contract)
        })
        .await
    }

    /// Single attempt: a broadcast that timed out may already be on chain
    async fn broadcast_transfer(&self, to: &str, raw_amount: u128) -> Result<String, ChainError> {
        if self.signer_url.is_empty() {
            return Err(ChainError::Config("signer url not configured".into()));
        }

        let url = format!("{}/v1/transfers", self.signer_url);
        let payload = json!({
            "to": to,
            "amount": raw_amount.to_string(),
            "contract": self.token_contract,
        });

        let mut request = self.client.post(&url).json(&payload);
        if !self.signer_api_key.is_empty() {
            request = request.bearer_auth(&self.signer_api_key);
        }

        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Rejected(format!("{}: {}", status, truncate(body))));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChainError::Status {
                status: status.as_u16(),
                body: truncate(body),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;
        extract_tx_id(&body)
            .ok_or_else(|| ChainError::Decode("broadcast response has no transaction id".into()))
    }
}
