//! End-to-end points flows on the in-memory ledger
//!
//! Every gateway is built from settings the way the CLI builds them:
//! 1. Sign-up creates a ledger identity and registers the recycler
//! 2. Grants mint on the ledger and are deduplicated per reward code
//! 3. Redemptions burn, buy airtime and reconcile the request
//! 4. Legacy accounts keep working until migrated
//! 5. The mirror snapshot survives a restart

use greenafrica_core::{
    Carrier, EntityId, RedemptionStatus, Secret, TransactionType, UserIdentity,
};
use greenafrica_ledger::{ContractValue, LedgerTransaction, MockLedger, TransactionKind};
use greenafrica_mirror::{MirrorStore, NewAccount};
use greenafrica_points::{
    AccountService, BalanceSource, Gateways, GrantRequest, PointsError, PointsLedger,
    RedeemRequest, Step,
};
use greenafrica_registry::{to_bytes32, Device};
use greenafrica_settings::Settings;

// =============================================================================
// HELPERS
// =============================================================================

const TOKEN: EntityId = EntityId::new(0, 0, 5001);

struct Services {
    points: PointsLedger,
    accounts: AccountService,
    gateways: Gateways,
    mock: MockLedger,
}

fn settings(snapshot: Option<std::path::PathBuf>) -> Settings {
    let mut settings = Settings::default();
    settings.ledger.operator_id = Some(EntityId::new(0, 0, 2));
    settings.ledger.token_id = Some(TOKEN);
    settings.ledger.token_address = Some(EntityId::new(0, 0, 5002).to_evm_address());
    settings.registry.contract_id = Some(EntityId::new(0, 0, 5003));
    settings.custody.encryption_key = Secret::new("integration-custody-key");
    settings.mirror.snapshot_path = snapshot;
    settings
}

fn services(settings: &Settings) -> Services {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("greenafrica=debug")
        .with_test_writer()
        .try_init();

    let (gateways, mock) = Gateways::from_settings(settings).expect("gateways from settings");
    Services {
        points: PointsLedger::new(gateways.clone(), settings),
        accounts: AccountService::new(gateways.clone(), settings),
        gateways,
        mock: mock.expect("mock ledger in mock mode"),
    }
}

fn identity(user_id: &str, name: &str) -> UserIdentity {
    UserIdentity {
        user_id: user_id.to_string(),
        display_name: name.to_string(),
        email: None,
        phone_number: None,
    }
}

async fn points_of(s: &Services, user_id: &str) -> i64 {
    s.accounts.balance(user_id).await.unwrap().points
}

// =============================================================================
// 1. Sign-up, referral and grant
// =============================================================================

#[tokio::test]
async fn test_signup_referral_and_grant() {
    let s = services(&settings(None));

    let ada = s.accounts.open_account(&identity("ada", "Ada Obi"), None).await.unwrap();
    let tunde = s
        .accounts
        .open_account(&identity("tunde", "Tunde Bello"), Some(&ada.referral_code))
        .await
        .unwrap();
    assert_ne!(ada.ledger_account, tunde.ledger_account);
    assert!(ada.referral_code.starts_with("ADAOBI"));

    // Both recyclers are on the registry, with the referral recorded
    let facts = s.gateways.registry.get_account(&tunde.green_id).await.unwrap().unwrap();
    assert_eq!(facts.referred_by.as_deref(), Some(ada.referral_code.as_str()));
    assert!(!facts.has_recycled);

    s.points.award_referral_code(&ada.referral_code, "tunde").await.unwrap();
    assert_eq!(points_of(&s, "ada").await, 50);

    let receipt = s
        .points
        .grant(GrantRequest::earned("tunde", 100, "RVM-0001"))
        .await
        .unwrap();
    assert!(receipt.registry_transaction.is_some());
    assert_eq!(points_of(&s, "tunde").await, 100);

    let facts = s.gateways.registry.get_account(&tunde.green_id).await.unwrap().unwrap();
    assert!(facts.has_recycled);
    assert_eq!(facts.points, 100);
    assert_eq!(facts.total_pet, 100);

    let view = s.accounts.balance("tunde").await.unwrap();
    assert!(matches!(view.source, BalanceSource::Ledger(_)));

    // The mirrored balance is not the source of truth for ledger accounts
    let mirrored = s.gateways.mirror.get_account("tunde").await.unwrap().unwrap();
    assert_eq!(mirrored.total_points, 0);
}

#[tokio::test]
async fn test_deposits_name_a_registered_machine() {
    let s = services(&settings(None));
    let device = Device {
        device_id: "RVM-YABA-002".to_string(),
        latitude: 6.5095,
        longitude: 3.3711,
        name: "Yaba Market".to_string(),
        meta_uri: String::new(),
    };
    s.gateways.registry.register_device(&device).await.unwrap();

    s.accounts.open_account(&identity("u1", "U One"), None).await.unwrap();
    let mut request = GrantRequest::earned("u1", 20, "RVM-0002");
    request.device_id = Some(device.device_id.clone());
    s.points.grant(request).await.unwrap();

    let registry = EntityId::new(0, 0, 5003).to_evm_address();
    let entry = s.mock.device_entry(registry, to_bytes32("RVM-YABA-002")).unwrap();
    assert_eq!((entry.lat_e6, entry.lng_e6), (6_509_500, 3_371_100));

    let deposit_device = s.mock.submitted().into_iter().find_map(|tx| match tx {
        LedgerTransaction::ContractExecute { function, params, .. } if function == "recordDeposit" => {
            params.get(1).and_then(ContractValue::as_bytes32)
        }
        _ => None,
    });
    assert_eq!(deposit_device, Some(entry.device_id));
}

// =============================================================================
// 2. Redemption
// =============================================================================

#[tokio::test]
async fn test_grant_then_redeem_airtime() {
    let s = services(&settings(None));
    s.accounts.open_account(&identity("u1", "U One"), None).await.unwrap();
    s.points.grant(GrantRequest::earned("u1", 500, "RVM-0001")).await.unwrap();

    let receipt = s
        .points
        .redeem_airtime(RedeemRequest::airtime("u1", 200, "08031234567"))
        .await
        .unwrap();
    assert_eq!(receipt.carrier, Carrier::Mtn);
    assert_eq!(points_of(&s, "u1").await, 300);

    let redemption = s
        .gateways
        .mirror
        .get_redemption(&receipt.redemption_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(redemption.status, RedemptionStatus::Completed);
    assert!(redemption.transaction_id.is_some());
    assert_eq!(redemption.api_response.unwrap().provider.as_deref(), Some("MTN"));

    let history = s.accounts.history("u1", 10).await.unwrap();
    let kinds: Vec<_> = history.iter().map(|t| (t.kind, t.amount)).collect();
    assert_eq!(
        kinds,
        vec![(TransactionType::Redeemed, -200), (TransactionType::Earned, 500)]
    );
}

#[tokio::test]
async fn test_redeem_more_than_balance() {
    let s = services(&settings(None));
    s.accounts.open_account(&identity("u1", "U One"), None).await.unwrap();
    s.points.grant(GrantRequest::earned("u1", 50, "RVM-0001")).await.unwrap();

    let err = s
        .points
        .redeem_airtime(RedeemRequest::airtime("u1", 100, "08031234567"))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Insufficient balance"));
    assert_eq!(s.mock.submitted_count(TransactionKind::TokenWipe), 0);
    assert_eq!(points_of(&s, "u1").await, 50);

    let redemptions = s.accounts.redemptions("u1").await.unwrap();
    assert_eq!(redemptions.len(), 1);
    assert_eq!(redemptions[0].status, RedemptionStatus::Failed);
}

#[tokio::test]
async fn test_redemption_bounds_checked_before_ledger() {
    let s = services(&settings(None));
    s.accounts.open_account(&identity("u1", "U One"), None).await.unwrap();
    s.points.grant(GrantRequest::earned("u1", 6000, "RVM-0001")).await.unwrap();
    let submitted = s.mock.submitted().len();

    for points in [49, 5001] {
        let err = s
            .points
            .redeem_airtime(RedeemRequest::airtime("u1", points, "08031234567"))
            .await
            .unwrap_err();
        assert!(matches!(err, PointsError::Validation(_)), "{}", points);
    }
    assert_eq!(s.mock.submitted().len(), submitted);
}

#[tokio::test]
async fn test_burn_rejected_by_ledger() {
    let s = services(&settings(None));
    s.accounts.open_account(&identity("u1", "U One"), None).await.unwrap();
    s.points.grant(GrantRequest::earned("u1", 300, "RVM-0001")).await.unwrap();
    s.mock.fail_next_submit(TransactionKind::TokenWipe, "PLATFORM_NOT_ACTIVE");

    let err = s
        .points
        .redeem_airtime(RedeemRequest::airtime("u1", 100, "08031234567"))
        .await
        .unwrap_err();
    assert_eq!(err.step(), Some(Step::LedgerBurn));
    assert!(err.is_retryable());
    assert_eq!(points_of(&s, "u1").await, 300);

    // The caller retries and the second attempt goes through
    s.points
        .redeem_airtime(RedeemRequest::airtime("u1", 100, "08031234567"))
        .await
        .unwrap();
    let redemptions = s.accounts.redemptions("u1").await.unwrap();
    assert_eq!(redemptions.len(), 2);
    let failed = redemptions.iter().filter(|r| r.status == RedemptionStatus::Failed).count();
    let completed = redemptions.iter().filter(|r| r.status == RedemptionStatus::Completed).count();
    assert_eq!((failed, completed), (1, 1));
    assert_eq!(points_of(&s, "u1").await, 200);
}

// =============================================================================
// 3. Legacy accounts
// =============================================================================

async fn seed_legacy(s: &Services, user_id: &str, evm: Option<greenafrica_core::EvmAddress>) {
    s.gateways
        .mirror
        .create_account(NewAccount {
            user_id: user_id.to_string(),
            display_name: "Legacy User".to_string(),
            email: None,
            phone_number: None,
            green_id: "GRN-2023-000117".to_string(),
            ledger_account: None,
            evm_address: evm,
            encrypted_private_key: None,
            referral_code: "LEGACY2023117".to_string(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_legacy_evm_account_grant() {
    let s = services(&settings(None));
    let evm = EntityId::new(0, 0, 4242).to_evm_address();
    seed_legacy(&s, "old", Some(evm)).await;

    let receipt = s.points.grant(GrantRequest::earned("old", 30, "RVM-0009")).await.unwrap();
    assert!(receipt.affects_balance);
    assert!(receipt.registry_transaction.is_none());
    assert_eq!(s.mock.contract_calls("mint"), 1);

    let mirrored = s.gateways.mirror.get_account("old").await.unwrap().unwrap();
    assert_eq!(mirrored.total_points, 30);
    assert_eq!(points_of(&s, "old").await, 30);
}

#[tokio::test]
async fn test_legacy_account_migration() {
    let s = services(&settings(None));
    seed_legacy(&s, "old", None).await;

    let err = s.points.grant(GrantRequest::earned("old", 30, "RVM-0009")).await.unwrap_err();
    assert!(matches!(err, PointsError::NoLedgerAddress(_)));
    assert_eq!(
        s.accounts.balance("old").await.unwrap().source,
        BalanceSource::Mirror
    );

    let migration = s.accounts.migrate_legacy("old").await.unwrap();
    assert!(migration.migrated);
    assert_eq!(migration.previous_green_id.as_deref(), Some("GRN-2023-000117"));
    let account = migration.account;
    assert_eq!(account.green_id, account.ledger_account.unwrap().to_string());
    assert!(s.gateways.registry.account_exists(&account.green_id).await.unwrap());

    // Same reward code works once the account can receive points
    s.points.grant(GrantRequest::earned("old", 30, "RVM-0009")).await.unwrap();
    assert_eq!(points_of(&s, "old").await, 30);
}

// =============================================================================
// 4. Persistence
// =============================================================================

#[tokio::test]
async fn test_mirror_snapshot_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("mirror.json");

    let first = services(&settings(Some(snapshot.clone())));
    let account = first
        .accounts
        .open_account(&identity("u1", "U One"), None)
        .await
        .unwrap();
    first.points.grant(GrantRequest::earned("u1", 75, "RVM-0001")).await.unwrap();
    assert!(snapshot.exists());

    let second = services(&settings(Some(snapshot)));
    let reopened = second.accounts.open_account(&identity("u1", "U One"), None).await.unwrap();
    assert_eq!(reopened.green_id, account.green_id);
    assert_eq!(reopened.encrypted_private_key, account.encrypted_private_key);
    // No second ledger account for an existing user
    assert_eq!(second.mock.submitted_count(TransactionKind::AccountCreate), 0);

    let history = second.accounts.history("u1", 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].metadata.reward_code.as_deref(), Some("RVM-0001"));
}
