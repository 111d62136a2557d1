//! JSON-RPC 2.0 client for the chain endpoint.
//!
//! Thin typed wrapper over the `eth_*` methods the agent needs. Every call
//! carries the configured timeout; a timeout maps to `ChainError::Timeout`
//! and is never retried here.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Value, json};

use crate::chain::address::{Address, hex_encode};
use crate::error::ChainError;

pub struct RpcClient {
    http: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

impl RpcClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChainError::Timeout {
                        seconds: self.timeout.as_secs(),
                    }
                } else {
                    ChainError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChainError::Transport(format!(
                "HTTP {} from {}",
                status, self.endpoint
            )));
        }

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::MalformedResponse(e.to_string()))?;

        if let Some(err) = parsed.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        parsed
            .result
            .ok_or_else(|| ChainError::MalformedResponse(format!("{} returned no result", method)))
    }

    async fn call_quantity(&self, method: &str, params: Value) -> Result<u128, ChainError> {
        let result = self.call(method, params).await?;
        let text = result
            .as_str()
            .ok_or_else(|| ChainError::MalformedResponse(format!("{}: non-string quantity", method)))?;
        parse_quantity(text)
    }

    pub async fn chain_id(&self) -> Result<u64, ChainError> {
        let id = self.call_quantity("eth_chainId", json!([])).await?;
        u64::try_from(id).map_err(|_| ChainError::QuantityOverflow(id.to_string()))
    }

    pub async fn gas_price(&self) -> Result<u128, ChainError> {
        self.call_quantity("eth_gasPrice", json!([])).await
    }

    /// Pending-state nonce for the account.
    pub async fn transaction_count(&self, address: &Address) -> Result<u64, ChainError> {
        let count = self
            .call_quantity(
                "eth_getTransactionCount",
                json!([address.to_checksum(), "pending"]),
            )
            .await?;
        u64::try_from(count).map_err(|_| ChainError::QuantityOverflow(count.to_string()))
    }

    pub async fn balance(&self, address: &Address) -> Result<u128, ChainError> {
        self.call_quantity("eth_getBalance", json!([address.to_checksum(), "latest"]))
            .await
    }

    /// `eth_call` against latest state; returns the raw return data.
    pub async fn call_contract(&self, to: &Address, data: &[u8]) -> Result<Vec<u8>, ChainError> {
        let result = self
            .call(
                "eth_call",
                json!([{
                    "to": to.to_checksum(),
                    "data": format!("0x{}", hex_encode(data)),
                }, "latest"]),
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| ChainError::MalformedResponse("eth_call: non-string data".to_string()))?;
        parse_data(text)
    }

    pub async fn estimate_gas(
        &self,
        from: &Address,
        to: &Address,
        value: u128,
        data: &[u8],
    ) -> Result<u64, ChainError> {
        let mut tx = json!({
            "from": from.to_checksum(),
            "to": to.to_checksum(),
            "value": format!("0x{:x}", value),
        });
        if !data.is_empty() {
            tx["data"] = json!(format!("0x{}", hex_encode(data)));
        }
        let gas = self.call_quantity("eth_estimateGas", json!([tx])).await?;
        u64::try_from(gas).map_err(|_| ChainError::QuantityOverflow(gas.to_string()))
    }

    /// Submit a signed transaction. Returns the node-reported tx hash.
    pub async fn send_raw_transaction(&self, raw_hex: &str) -> Result<String, ChainError> {
        let result = self
            .call("eth_sendRawTransaction", json!([raw_hex]))
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ChainError::MalformedResponse("eth_sendRawTransaction: non-string hash".to_string())
            })
    }
}

/// Parse a `0x`-prefixed hex quantity into `u128`.
pub fn parse_quantity(text: &str) -> Result<u128, ChainError> {
    let hex = text
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::MalformedResponse(format!("quantity '{}' lacks 0x", text)))?;
    if hex.is_empty() {
        return Err(ChainError::MalformedResponse("empty quantity".to_string()));
    }
    if hex.len() > 32 {
        return Err(ChainError::QuantityOverflow(text.to_string()));
    }
    u128::from_str_radix(hex, 16)
        .map_err(|_| ChainError::MalformedResponse(format!("bad quantity '{}'", text)))
}

/// Parse `0x`-prefixed hex data into bytes.
pub fn parse_data(text: &str) -> Result<Vec<u8>, ChainError> {
    let hex = text
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::MalformedResponse(format!("data '{}' lacks 0x", text)))?;
    if hex.len() % 2 != 0 {
        return Err(ChainError::MalformedResponse(
            "odd-length hex data".to_string(),
        ));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|_| ChainError::MalformedResponse("non-hex data".to_string()))
        })
        .collect()
}
