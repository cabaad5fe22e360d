use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};

use super::{ProviderError, WalletProvider};

/// Wallet provider backed by a JSON-RPC 2.0 endpoint (a local node or a
/// signing gateway).
pub struct JsonRpcWallet {
    http: HttpClient,
    endpoint: String,
    next_id: AtomicU64,
    timeout: Duration,
}

impl JsonRpcWallet {
    pub fn new(endpoint: impl Into<String>, http: HttpClient) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl WalletProvider for JsonRpcWallet {
    fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let params = if params.is_null() { json!([]) } else { params };
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::debug!(method, id, endpoint = %self.endpoint, "wallet rpc request");

        let response = self
            .http
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .map_err(|err| ProviderError::transport(format!("{method} request failed: {err}")))?;
        let status = response.status();
        let text = response
            .text()
            .map_err(|err| ProviderError::transport(format!("{method} response body read failed: {err}")))?;
        let payload: Value = match serde_json::from_str(&text) {
            Ok(payload) => payload,
            Err(_) if !status.is_success() => {
                return Err(ProviderError::transport(format!(
                    "{method} failed ({}): {}",
                    status.as_u16(),
                    crate::truncate_text(&text, 256)
                )))
            }
            Err(err) => {
                return Err(ProviderError::transport(format!(
                    "{method} returned invalid JSON: {err}"
                )))
            }
        };

        if let Some(error) = payload.get("error").filter(|error| !error.is_null()) {
            return Err(ProviderError {
                code: error
                    .get("code")
                    .and_then(Value::as_i64)
                    .unwrap_or(ProviderError::INTERNAL),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown provider error")
                    .to_string(),
                data: error.get("data").cloned(),
            });
        }
        Ok(payload.get("result").cloned().unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use reqwest::blocking::Client as HttpClient;
    use serde_json::json;

    use super::JsonRpcWallet;
    use crate::wallet::{ProviderError, WalletProvider};

    #[test]
    fn unreachable_endpoint_is_an_internal_error() {
        let wallet = JsonRpcWallet::new("http://127.0.0.1:9", HttpClient::new())
            .with_timeout(Duration::from_secs(5));
        let err = wallet.request("eth_chainId", json!(null)).err();
        assert_eq!(err.map(|err| err.code), Some(ProviderError::INTERNAL));
        assert_eq!(wallet.endpoint(), "http://127.0.0.1:9");
    }
}
