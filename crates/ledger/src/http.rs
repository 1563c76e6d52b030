//! JSON-RPC 2.0 ledger client
//!
//! Every submitted transaction carries the operator account, its public key
//! and an Ed25519 signature over the JSON-encoded transaction body.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use greenafrica_core::{LedgerAccountId, TokenId, TransactionId};
use greenafrica_crypto::{sign_data, SigningKeypair};
use greenafrica_settings::LedgerSettings;

use crate::rpc::{ContractQuery, ContractValue, LedgerRpc, LedgerTransaction, Receipt};
use crate::{LedgerError, Result};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    params: Value,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// Signed transaction envelope
#[derive(Debug, Serialize)]
struct SignedTransaction<'a> {
    transaction: &'a LedgerTransaction,
    operator: LedgerAccountId,
    public_key: String,
    signature: String,
}

/// Ledger RPC over HTTP
pub struct HttpLedgerRpc {
    http_client: reqwest::Client,
    rpc_url: String,
    operator: LedgerAccountId,
    keypair: SigningKeypair,
    next_id: AtomicU64,
}

impl HttpLedgerRpc {
    /// Requires `operator_id` and `operator_key`; neither is re-read later.
    pub fn new(settings: &LedgerSettings) -> Result<Self> {
        let operator = settings
            .operator_id
            .ok_or(LedgerError::NotConfigured("ledger.operator_id"))?;
        if settings.operator_key.is_empty() {
            return Err(LedgerError::NotConfigured("ledger.operator_key"));
        }
        let keypair = SigningKeypair::from_secret_hex(&settings.operator_key)?;

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| LedgerError::Rpc(format!("http client: {}", e)))?;

        Ok(Self {
            http_client,
            rpc_url: settings.rpc_url.clone(),
            operator,
            keypair,
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!("ledger rpc -> {} (id {})", method, request.id);

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Rpc(format!("{}: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(LedgerError::Rpc(format!("{}: HTTP {}", method, status)));
        }

        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::UnexpectedResponse(format!("{}: {}", method, e)))?;

        if let Some(error) = body.error {
            return Err(LedgerError::Rpc(format!("{} ({}): {}", method, error.code, error.message)));
        }
        let result = body
            .result
            .ok_or_else(|| LedgerError::UnexpectedResponse(format!("{}: empty result", method)))?;
        serde_json::from_value(result)
            .map_err(|e| LedgerError::UnexpectedResponse(format!("{}: {}", method, e)))
    }

    fn sign(&self, tx: &LedgerTransaction) -> Result<String> {
        let body = serde_json::to_vec(tx)
            .map_err(|e| LedgerError::UnexpectedResponse(format!("encode transaction: {}", e)))?;
        Ok(hex::encode(sign_data(&self.keypair, &body)))
    }
}

#[async_trait]
impl LedgerRpc for HttpLedgerRpc {
    async fn submit(&self, tx: LedgerTransaction) -> Result<TransactionId> {
        let envelope = SignedTransaction {
            transaction: &tx,
            operator: self.operator,
            public_key: self.keypair.public_key_hex(),
            signature: self.sign(&tx)?,
        };
        let params = serde_json::to_value(&envelope)
            .map_err(|e| LedgerError::UnexpectedResponse(format!("encode transaction: {}", e)))?;
        self.request("ledger_submitTransaction", params).await
    }

    async fn receipt(&self, id: &TransactionId) -> Result<Receipt> {
        self.request("ledger_getReceipt", json!({ "transaction_id": id }))
            .await
    }

    async fn call(&self, query: ContractQuery) -> Result<Vec<ContractValue>> {
        let params = serde_json::to_value(&query)
            .map_err(|e| LedgerError::UnexpectedResponse(format!("encode query: {}", e)))?;
        self.request("ledger_call", params).await
    }

    async fn token_balance(&self, token: TokenId, account: LedgerAccountId) -> Result<u128> {
        #[derive(Deserialize)]
        struct Balance {
            units: String,
        }
        let balance: Balance = self
            .request("ledger_tokenBalance", json!({ "token": token, "account": account }))
            .await?;
        balance
            .units
            .parse()
            .map_err(|_| LedgerError::UnexpectedResponse(format!("balance units {:?}", balance.units)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{routing::post, Json, Router};
    use greenafrica_core::Secret;
    use greenafrica_crypto::verify_signature;
    use parking_lot::Mutex;

    use crate::rpc::ContractTarget;

    fn settings(url: String) -> LedgerSettings {
        let key = SigningKeypair::from_secret_bytes(&[3u8; 32]);
        LedgerSettings {
            rpc_url: url,
            operator_id: Some("0.0.1001".parse().unwrap()),
            operator_key: Secret::new(hex::encode(key.secret_key_bytes())),
            ..Default::default()
        }
    }

    async fn serve(seen: Arc<Mutex<Vec<Value>>>) -> String {
        let app = Router::new().route(
            "/",
            post(move |Json(req): Json<Value>| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(req.clone());
                    let result = match req["method"].as_str().unwrap_or_default() {
                        "ledger_submitTransaction" => json!("0.0.1001@1700000000.1"),
                        "ledger_getReceipt" => json!({
                            "transaction_id": req["params"]["transaction_id"],
                            "status": "SUCCESS"
                        }),
                        "ledger_tokenBalance" => json!({ "units": "250000000" }),
                        "ledger_call" => json!([{ "uint": 6 }]),
                        _ => {
                            return Json(json!({
                                "jsonrpc": "2.0",
                                "id": req["id"],
                                "error": { "code": -32601, "message": "Method not found" }
                            }))
                        }
                    };
                    Json(json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_new_requires_operator_credentials() {
        let mut s = LedgerSettings::default();
        assert!(matches!(
            HttpLedgerRpc::new(&s),
            Err(LedgerError::NotConfigured("ledger.operator_id"))
        ));
        s.operator_id = Some("0.0.1001".parse().unwrap());
        assert!(matches!(
            HttpLedgerRpc::new(&s),
            Err(LedgerError::NotConfigured("ledger.operator_key"))
        ));
        s.operator_key = Secret::new("zz");
        assert!(matches!(HttpLedgerRpc::new(&s), Err(LedgerError::Crypto(_))));
    }

    #[tokio::test]
    async fn test_submit_is_signed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = serve(seen.clone()).await;
        let rpc = HttpLedgerRpc::new(&settings(url)).unwrap();

        let tx = LedgerTransaction::TokenMint {
            token: "0.0.5001".parse().unwrap(),
            amount: 1_000_000,
        };
        let id = rpc.submit(tx.clone()).await.unwrap();
        assert_eq!(id.as_str(), "0.0.1001@1700000000.1");

        let request = seen.lock()[0].clone();
        assert_eq!(request["jsonrpc"], "2.0");
        assert_eq!(request["params"]["operator"], "0.0.1001");

        let pubkey: [u8; 32] = hex::decode(request["params"]["public_key"].as_str().unwrap())
            .unwrap()
            .try_into()
            .unwrap();
        let signature: [u8; 64] = hex::decode(request["params"]["signature"].as_str().unwrap())
            .unwrap()
            .try_into()
            .unwrap();
        let body = serde_json::to_vec(&tx).unwrap();
        assert!(verify_signature(&pubkey, &body, &signature));
    }

    #[tokio::test]
    async fn test_receipt_balance_and_call() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = serve(seen).await;
        let rpc = HttpLedgerRpc::new(&settings(url)).unwrap();

        let receipt = rpc.receipt(&TransactionId::new("abc")).await.unwrap();
        assert!(receipt.is_success());
        assert_eq!(receipt.transaction_id.as_str(), "abc");

        let units = rpc
            .token_balance("0.0.5001".parse().unwrap(), "0.0.7001".parse().unwrap())
            .await
            .unwrap();
        assert_eq!(units, 250_000_000);

        let values = rpc
            .call(ContractQuery::new(
                ContractTarget::Native("0.0.5002".parse().unwrap()),
                "decimals",
                vec![],
            ))
            .await
            .unwrap();
        assert_eq!(values, vec![ContractValue::Uint(6)]);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_rpc_error() {
        let rpc = HttpLedgerRpc::new(&settings("http://127.0.0.1:1".into())).unwrap();
        let err = rpc.receipt(&TransactionId::new("abc")).await.unwrap_err();
        assert!(matches!(err, LedgerError::Rpc(_)));
        assert!(err.is_retryable());
    }
}
