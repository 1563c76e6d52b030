//! HTTP client for the bills API

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use greenafrica_core::{ProviderResponse, Secret};
use greenafrica_settings::{BillingSettings, RedemptionSettings};

use crate::{check_amount, AirtimeBilling, AirtimePurchase, BillingError, BillingMeta, BillingReceipt, Result};

#[derive(Debug, Serialize)]
struct AirtimeRequest<'a> {
    provider: &'a str,
    reference: &'a str,
    recipient: &'a str,
    amount: u64,
    meta: &'a BillingMeta,
}

#[derive(Debug, Deserialize)]
struct AirtimeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    message: Option<String>,
}

/// `POST {base_url}/bills/airtime` with an `api-key` header
pub struct BillingClient {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Secret,
    bounds: RedemptionSettings,
}

impl BillingClient {
    pub fn new(settings: &BillingSettings, bounds: RedemptionSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(BillingError::NotConfigured("billing.api_key"));
        }
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| BillingError::Http(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/bills/airtime", settings.base_url.trim_end_matches('/')),
            api_key: settings.api_key.clone(),
            bounds,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Interpret a provider reply. Failures keep whatever the provider sent.
fn parse_response(http_ok: bool, body: AirtimeResponse) -> Result<BillingReceipt> {
    if http_ok && body.success {
        let data = body
            .data
            .ok_or_else(|| BillingError::InvalidResponse("success without data".to_string()))?;
        return serde_json::from_value(data).map_err(|e| BillingError::InvalidResponse(e.to_string()));
    }

    let message = body
        .message
        .or_else(|| match &body.data {
            Some(serde_json::Value::String(s)) => Some(s.clone()),
            _ => None,
        })
        .unwrap_or_else(|| "Airtime purchase failed".to_string());
    let response = body
        .data
        .and_then(|data| serde_json::from_value::<BillingReceipt>(data).ok())
        .map(|receipt| ProviderResponse {
            reference: Some(receipt.reference),
            response_code: receipt.response_code,
            response_msg: receipt.response_msg,
            status: receipt.status,
            recipient: receipt.recipient,
            provider: None,
            error_message: Some(message.clone()),
        });
    Err(BillingError::Provider { message, response })
}

#[async_trait]
impl AirtimeBilling for BillingClient {
    async fn purchase_airtime(&self, purchase: &AirtimePurchase) -> Result<BillingReceipt> {
        check_amount(purchase.amount, &self.bounds)?;

        let request = AirtimeRequest {
            provider: purchase.carrier.code(),
            reference: &purchase.reference,
            recipient: &purchase.recipient,
            amount: purchase.amount,
            meta: &purchase.meta,
        };
        debug!("POST {} reference={}", self.endpoint, purchase.reference);

        let response = self
            .http_client
            .post(&self.endpoint)
            .header("api-key", self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| BillingError::Http(e.to_string()))?;

        let status = response.status();
        let body: AirtimeResponse = response.json().await.map_err(|e| {
            BillingError::InvalidResponse(format!("HTTP {}: {}", status, e))
        })?;

        match parse_response(status.is_success(), body) {
            Ok(receipt) => {
                info!(
                    "Airtime {} {} to {} accepted (ref {})",
                    purchase.carrier, purchase.amount, purchase.recipient, receipt.reference
                );
                Ok(receipt)
            }
            Err(e) => {
                warn!("Airtime purchase {} failed: {}", purchase.reference, e);
                Err(e)
            }
        }
    }
}
