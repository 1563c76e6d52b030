//! GreenAfrica Billing Gateway
//!
//! Airtime purchases through the third-party bills API.
//!
//! The caller supplies a reference unique per attempt ([`generate_reference`]);
//! the provider uses it to deduplicate. Amounts outside the configured bounds
//! are rejected before any request is made.

mod client;
mod mock;

pub use client::BillingClient;
pub use mock::MockBilling;

use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use greenafrica_core::{Carrier, ProviderResponse};
use greenafrica_settings::{BillingSettings, GatewayMode, RedemptionSettings};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    #[error("Billing not configured: {0} is missing")]
    NotConfigured(&'static str),

    #[error("Amount must be between {min} and {max}, got {amount}")]
    AmountOutOfRange { amount: u64, min: u64, max: u64 },

    #[error("Billing request failed: {0}")]
    Http(String),

    #[error("Provider rejected purchase: {message}")]
    Provider {
        message: String,
        /// Raw fields the provider returned alongside the failure
        response: Option<ProviderResponse>,
    },

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),
}

impl BillingError {
    pub fn is_config_error(&self) -> bool {
        matches!(self, BillingError::NotConfigured(_))
    }

    /// Message to store as the redemption's failure reason
    pub fn provider_message(&self) -> String {
        match self {
            BillingError::Provider { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BillingError>;

/// Metadata forwarded to the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingMeta {
    pub uid: String,
    pub name: String,
}

/// One airtime purchase attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirtimePurchase {
    pub carrier: Carrier,
    pub reference: String,
    pub recipient: String,
    pub amount: u64,
    pub meta: BillingMeta,
}

/// Provider acknowledgement, kept verbatim for audit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingReceipt {
    pub reference: String,
    #[serde(default, rename = "responseCode")]
    pub response_code: Option<i64>,
    #[serde(default, rename = "responseMsg")]
    pub response_msg: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub recipient: Option<String>,
}

impl BillingReceipt {
    pub fn to_provider_response(&self, carrier: Carrier) -> ProviderResponse {
        ProviderResponse {
            reference: Some(self.reference.clone()),
            response_code: self.response_code,
            response_msg: self.response_msg.clone(),
            status: self.status.clone(),
            recipient: self.recipient.clone(),
            provider: Some(carrier.code().to_string()),
            error_message: None,
        }
    }
}

#[async_trait]
pub trait AirtimeBilling: Send + Sync {
    async fn purchase_airtime(&self, purchase: &AirtimePurchase) -> Result<BillingReceipt>;
}

/// `TEQ_<unix millis>_<0..999>`
pub fn generate_reference() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    format!("TEQ_{}_{}", millis, suffix)
}

/// Reject amounts outside the inclusive redemption bounds
pub fn check_amount(amount: u64, bounds: &RedemptionSettings) -> Result<()> {
    if bounds.contains(amount) {
        Ok(())
    } else {
        Err(BillingError::AmountOutOfRange {
            amount,
            min: bounds.min_amount,
            max: bounds.max_amount,
        })
    }
}

/// Billing backend for the configured mode
pub fn from_settings(
    billing: &BillingSettings,
    bounds: RedemptionSettings,
) -> Result<Arc<dyn AirtimeBilling>> {
    match billing.mode {
        GatewayMode::Mock => Ok(Arc::new(MockBilling::new(bounds))),
        GatewayMode::Live => Ok(Arc::new(BillingClient::new(billing, bounds)?)),
    }
}
