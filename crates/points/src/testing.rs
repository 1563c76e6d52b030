//! Fixtures shared by the unit tests

use std::sync::Arc;

use greenafrica_billing::MockBilling;
use greenafrica_core::{
    Account, EntityId, EvmAddress, NewTransaction, Secret, TokenId, TransactionMetadata,
    TransactionType,
};
use greenafrica_ledger::{LedgerGateway, MockLedger};
use greenafrica_mirror::{MemoryMirrorStore, MirrorStore, NewAccount};
use greenafrica_registry::RegistryGateway;
use greenafrica_settings::Settings;

use crate::{AccountService, Gateways, PointsLedger};

pub const TREASURY: EntityId = EntityId::new(0, 0, 2);
pub const TOKEN: TokenId = EntityId::new(0, 0, 5001);
pub const LEGACY_GREEN_ID: &str = "GRN-2024-000042";

pub fn token_address() -> EvmAddress {
    EntityId::new(0, 0, 5002).to_evm_address()
}

pub fn registry_address() -> EvmAddress {
    EntityId::new(0, 0, 5003).to_evm_address()
}

pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.ledger.operator_id = Some(TREASURY);
    settings.ledger.token_id = Some(TOKEN);
    settings.ledger.token_address = Some(token_address());
    settings.registry.contract_address = Some(registry_address());
    settings.custody.encryption_key = Secret::new("test-custody-key");
    settings
}

pub struct Harness {
    pub points: PointsLedger,
    pub accounts: AccountService,
    pub mock: MockLedger,
    pub billing: MockBilling,
    pub mirror: MemoryMirrorStore,
    pub settings: Settings,
}

pub fn harness() -> Harness {
    harness_with(test_settings())
}

pub fn harness_with(settings: Settings) -> Harness {
    let mock = MockLedger::new(TREASURY);
    let ledger = LedgerGateway::new(Arc::new(mock.clone()), &settings.ledger);
    let registry = RegistryGateway::new(ledger.submitter().clone(), &settings.registry);
    let billing = MockBilling::new(settings.redemption);
    let mirror = MemoryMirrorStore::new();
    let gateways = Gateways::new(
        Arc::new(ledger),
        Arc::new(registry),
        Arc::new(billing.clone()),
        Arc::new(mirror.clone()),
    );
    Harness {
        points: PointsLedger::new(gateways.clone(), &settings),
        accounts: AccountService::new(gateways, &settings),
        mock,
        billing,
        mirror,
        settings,
    }
}

fn new_account(user_id: &str, green_id: String) -> NewAccount {
    NewAccount {
        user_id: user_id.to_string(),
        display_name: format!("User {}", user_id),
        email: None,
        phone_number: None,
        green_id,
        ledger_account: None,
        evm_address: None,
        encrypted_private_key: None,
        referral_code: format!("REF{}", user_id),
    }
}

/// Account with a native ledger identity, not registered on the registry
pub async fn native_account(h: &Harness, user_id: &str, num: u64) -> Account {
    let id = EntityId::new(0, 0, num);
    let mut account = new_account(user_id, id.to_string());
    account.ledger_account = Some(id);
    account.evm_address = Some(id.to_evm_address());
    h.mirror.create_account(account).await.unwrap()
}

/// Pre-ledger account, optionally with an EVM address from the contract era
pub async fn legacy_account(h: &Harness, user_id: &str, evm: Option<EvmAddress>) -> Account {
    let mut account = new_account(user_id, LEGACY_GREEN_ID.to_string());
    account.evm_address = evm;
    h.mirror.create_account(account).await.unwrap()
}

pub fn earned(user_id: &str, amount: i64) -> NewTransaction {
    NewTransaction {
        user_id: user_id.to_string(),
        kind: TransactionType::Earned,
        amount,
        description: "seed".to_string(),
        phone: None,
        metadata: TransactionMetadata::default(),
    }
}

/// Native balance in whole points
pub fn native_points(h: &Harness, account: &Account) -> u128 {
    account
        .ledger_account
        .map(|id| h.mock.native_balance(TOKEN, id) / 1_000_000)
        .unwrap_or(0)
}
