//! Billing client against a local bills API
//!
//! A small axum server plays the provider: it records every request and
//! rejects recipients it does not know.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use greenafrica_billing::{
    AirtimeBilling, AirtimePurchase, BillingClient, BillingError, BillingMeta,
};
use greenafrica_core::{Carrier, EntityId, RedemptionStatus, Secret};
use greenafrica_ledger::{LedgerGateway, MockLedger, TransactionKind};
use greenafrica_mirror::{MemoryMirrorStore, MirrorStore, NewAccount};
use greenafrica_points::{Gateways, PointsLedger, RedeemRequest, Step};
use greenafrica_registry::RegistryGateway;
use greenafrica_settings::{BillingSettings, GatewayMode, RedemptionSettings, Settings};

const API_KEY: &str = "test-api-key";
const UNKNOWN_RECIPIENT: &str = "08059999999";

// =============================================================================
// Fake provider
// =============================================================================

#[derive(Clone, Default)]
struct Provider {
    requests: Arc<Mutex<Vec<(Option<String>, Value)>>>,
}

async fn airtime(
    State(provider): State<Provider>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let key = headers
        .get("api-key")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    provider.requests.lock().push((key.clone(), body.clone()));

    if key.as_deref() != Some(API_KEY) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "success": false, "message": "Invalid API key" })),
        );
    }
    if body["recipient"] == UNKNOWN_RECIPIENT {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "success": false,
                "message": "Recipient not on network",
                "data": {
                    "reference": body["reference"],
                    "responseCode": 400,
                    "responseMsg": "Recipient not on network",
                    "status": "failed",
                    "recipient": body["recipient"],
                }
            })),
        );
    }
    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "data": {
                "reference": body["reference"],
                "responseCode": 200,
                "responseMsg": "Successful",
                "status": "successful",
                "recipient": body["recipient"],
            }
        })),
    )
}

async fn start_provider() -> (String, Provider, oneshot::Sender<()>) {
    let provider = Provider::default();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let app = Router::new()
        .route("/api/v1/bills/airtime", post(airtime))
        .with_state(provider.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async { let _ = shutdown_rx.await; })
            .await
            .unwrap();
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    (format!("http://{}/api/v1/", addr), provider, shutdown_tx)
}

fn billing_settings(base_url: &str, api_key: &str) -> BillingSettings {
    BillingSettings {
        mode: GatewayMode::Live,
        base_url: base_url.to_string(),
        api_key: Secret::new(api_key),
        timeout_secs: 5,
    }
}

fn purchase(recipient: &str, amount: u64) -> AirtimePurchase {
    AirtimePurchase {
        carrier: Carrier::Glo,
        reference: greenafrica_billing::generate_reference(),
        recipient: recipient.to_string(),
        amount,
        meta: BillingMeta {
            uid: "u1".to_string(),
            name: "U One".to_string(),
        },
    }
}

// =============================================================================
// Client
// =============================================================================

#[tokio::test]
async fn test_purchase_accepted() {
    let (base_url, provider, _shutdown) = start_provider().await;
    let client = BillingClient::new(&billing_settings(&base_url, API_KEY), RedemptionSettings::default())
        .unwrap();
    assert!(client.endpoint().ends_with("/api/v1/bills/airtime"));

    let request = purchase("08051234567", 100);
    let receipt = client.purchase_airtime(&request).await.unwrap();
    assert_eq!(receipt.reference, request.reference);
    assert_eq!(receipt.response_code, Some(200));
    assert_eq!(receipt.status.as_deref(), Some("successful"));

    let requests = provider.requests.lock().clone();
    assert_eq!(requests.len(), 1);
    let (key, body) = &requests[0];
    assert_eq!(key.as_deref(), Some(API_KEY));
    assert_eq!(body["provider"], "GLO");
    assert_eq!(body["amount"], 100);
    assert_eq!(body["recipient"], "08051234567");
    assert_eq!(body["meta"]["uid"], "u1");
    assert_eq!(body["meta"]["name"], "U One");
}

#[tokio::test]
async fn test_provider_rejection_keeps_response() {
    let (base_url, _provider, _shutdown) = start_provider().await;
    let client = BillingClient::new(&billing_settings(&base_url, API_KEY), RedemptionSettings::default())
        .unwrap();

    let request = purchase(UNKNOWN_RECIPIENT, 100);
    let err = client.purchase_airtime(&request).await.unwrap_err();
    let BillingError::Provider { message, response } = err else {
        panic!("unexpected error: {}", err);
    };
    assert_eq!(message, "Recipient not on network");
    let response = response.unwrap();
    assert_eq!(response.reference, Some(request.reference));
    assert_eq!(response.response_code, Some(400));
}

#[tokio::test]
async fn test_wrong_api_key() {
    let (base_url, _provider, _shutdown) = start_provider().await;
    let client = BillingClient::new(&billing_settings(&base_url, "stale-key"), RedemptionSettings::default())
        .unwrap();

    let err = client.purchase_airtime(&purchase("08051234567", 100)).await.unwrap_err();
    assert_eq!(err.provider_message(), "Invalid API key");
}

#[tokio::test]
async fn test_out_of_range_amount_not_sent() {
    let (base_url, provider, _shutdown) = start_provider().await;
    let client = BillingClient::new(&billing_settings(&base_url, API_KEY), RedemptionSettings::default())
        .unwrap();

    let err = client.purchase_airtime(&purchase("08051234567", 5001)).await.unwrap_err();
    assert!(matches!(err, BillingError::AmountOutOfRange { amount: 5001, .. }));
    assert!(provider.requests.lock().is_empty());
}

#[test]
fn test_missing_api_key() {
    let result = BillingClient::new(&billing_settings("http://localhost", ""), RedemptionSettings::default());
    assert!(matches!(result, Err(BillingError::NotConfigured("billing.api_key"))));
}

// =============================================================================
// Redemption with the live client
// =============================================================================

#[tokio::test]
async fn test_rejected_delivery_after_burn() {
    let (base_url, provider, _shutdown) = start_provider().await;

    let mut settings = Settings::default();
    let token = EntityId::new(0, 0, 5001);
    settings.ledger.operator_id = Some(EntityId::new(0, 0, 2));
    settings.ledger.token_id = Some(token);
    settings.billing = billing_settings(&base_url, API_KEY);

    let mock = MockLedger::new(EntityId::new(0, 0, 2));
    let ledger = LedgerGateway::new(Arc::new(mock.clone()), &settings.ledger);
    let registry = RegistryGateway::new(ledger.submitter().clone(), &settings.registry);
    let billing = BillingClient::new(&settings.billing, settings.redemption).unwrap();
    let mirror = MemoryMirrorStore::new();
    let points = PointsLedger::new(
        Gateways::new(Arc::new(ledger), Arc::new(registry), Arc::new(billing), Arc::new(mirror.clone())),
        &settings,
    );

    let account_id = EntityId::new(0, 0, 9100);
    mirror
        .create_account(NewAccount {
            user_id: "u1".to_string(),
            display_name: "U One".to_string(),
            email: None,
            phone_number: None,
            green_id: account_id.to_string(),
            ledger_account: Some(account_id),
            evm_address: Some(account_id.to_evm_address()),
            encrypted_private_key: None,
            referral_code: "UONE2025001".to_string(),
        })
        .await
        .unwrap();
    mock.set_native_balance(token, account_id, 500_000_000);

    let err = points
        .redeem_airtime(RedeemRequest::airtime("u1", 200, UNKNOWN_RECIPIENT))
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(Step::BillingPurchase));
    assert!(!err.is_retryable());

    // Burned, not refunded
    assert_eq!(mock.native_balance(token, account_id), 300_000_000);
    assert_eq!(mock.submitted_count(TransactionKind::TokenMint), 0);
    assert_eq!(provider.requests.lock().len(), 1);

    let redemption = &mirror.list_redemptions("u1").await.unwrap()[0];
    assert_eq!(redemption.status, RedemptionStatus::Failed);
    assert_eq!(redemption.failure_reason.as_deref(), Some("Recipient not on network"));
    let response = redemption.api_response.as_ref().unwrap();
    assert_eq!(response.response_code, Some(400));
    assert_eq!(response.provider.as_deref(), Some("GLO"));
}
