//! Recording billing double

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use greenafrica_settings::RedemptionSettings;

use crate::{check_amount, AirtimeBilling, AirtimePurchase, BillingError, BillingReceipt, Result};

#[derive(Debug, Default)]
struct MockState {
    purchases: Vec<AirtimePurchase>,
    fail_next: Option<BillingError>,
}

/// Accepts every purchase unless a failure is queued. Clones share state.
#[derive(Debug, Clone)]
pub struct MockBilling {
    bounds: RedemptionSettings,
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBilling {
    fn default() -> Self {
        Self::new(RedemptionSettings::default())
    }
}

impl MockBilling {
    pub fn new(bounds: RedemptionSettings) -> Self {
        Self {
            bounds,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Fail the next purchase with `error`
    pub fn fail_next(&self, error: BillingError) {
        self.state.lock().fail_next = Some(error);
    }

    /// Purchases that reached the provider, including failed ones
    pub fn purchases(&self) -> Vec<AirtimePurchase> {
        self.state.lock().purchases.clone()
    }

    pub fn purchase_count(&self) -> usize {
        self.state.lock().purchases.len()
    }
}

#[async_trait]
impl AirtimeBilling for MockBilling {
    async fn purchase_airtime(&self, purchase: &AirtimePurchase) -> Result<BillingReceipt> {
        check_amount(purchase.amount, &self.bounds)?;

        let mut state = self.state.lock();
        state.purchases.push(purchase.clone());
        if let Some(error) = state.fail_next.take() {
            warn!("[MOCK] Airtime purchase {} failed: {}", purchase.reference, error);
            return Err(error);
        }

        info!(
            "[MOCK] Airtime {} {} to {} (ref {})",
            purchase.carrier, purchase.amount, purchase.recipient, purchase.reference
        );
        Ok(BillingReceipt {
            reference: purchase.reference.clone(),
            response_code: Some(200),
            response_msg: Some("Successful".to_string()),
            status: Some("successful".to_string()),
            recipient: Some(purchase.recipient.clone()),
        })
    }
}
