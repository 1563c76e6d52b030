//! In-memory ledger
//!
//! Tracks native token balances and supply, ERC-20 style contract balances and
//! the registry contract's recycler table. Every submitted transaction is
//! logged so tests can count side effects, and failures can be injected once
//! per transaction kind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use greenafrica_core::{EntityId, EvmAddress, LedgerAccountId, TokenId, TransactionId};

use crate::rpc::{
    ContractQuery, ContractValue, LedgerRpc, LedgerTransaction, Receipt,
    TransactionKind, STATUS_SUCCESS,
};
use crate::{LedgerError, Result};

const STATUS_REVERT: &str = "CONTRACT_REVERT_EXECUTED";
const STATUS_INSUFFICIENT: &str = "INSUFFICIENT_TOKEN_BALANCE";
const STATUS_INVALID_WIPE: &str = "INVALID_WIPING_AMOUNT";

/// Recycler row held by the mock registry contract
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryEntry {
    pub recycler_id: [u8; 32],
    pub referral_code: [u8; 32],
    pub referred_by: [u8; 32],
    pub has_recycled: bool,
    pub first_deposit_at: u64,
    pub points: u128,
    pub total_pet: u128,
    pub deposits: u64,
    pub redemptions: u64,
}

/// Collection machine row held by the mock registry contract
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceEntry {
    pub device_id: [u8; 32],
    pub lat_e6: i128,
    pub lng_e6: i128,
    pub name: String,
    pub meta_uri: String,
}

#[derive(Debug)]
struct MockState {
    treasury: LedgerAccountId,
    native_balances: HashMap<(TokenId, LedgerAccountId), u128>,
    native_supply: HashMap<TokenId, u128>,
    /// (token contract, holder) -> units
    contract_balances: HashMap<(EvmAddress, EvmAddress), u128>,
    contract_decimals: u8,
    /// (registry contract, recycler id) -> entry
    registry: HashMap<(EvmAddress, [u8; 32]), RegistryEntry>,
    devices: HashMap<(EvmAddress, [u8; 32]), DeviceEntry>,
    receipts: HashMap<TransactionId, Receipt>,
    submitted: Vec<LedgerTransaction>,
    queries: Vec<ContractQuery>,
    fail_submit: HashMap<TransactionKind, String>,
    fail_receipt: HashMap<TransactionKind, String>,
    receipt_delay: Option<Duration>,
    next_account: u64,
    tx_counter: u64,
}

/// Mock ledger shared between a gateway and the test that inspects it
#[derive(Debug, Clone)]
pub struct MockLedger {
    state: Arc<RwLock<MockState>>,
}

impl Default for MockLedger {
    fn default() -> Self {
        Self::new(EntityId::new(0, 0, 2))
    }
}

impl MockLedger {
    /// Create a mock ledger whose native token treasury is `treasury`
    pub fn new(treasury: LedgerAccountId) -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState {
                treasury,
                native_balances: HashMap::new(),
                native_supply: HashMap::new(),
                contract_balances: HashMap::new(),
                contract_decimals: 18,
                registry: HashMap::new(),
                devices: HashMap::new(),
                receipts: HashMap::new(),
                submitted: Vec::new(),
                queries: Vec::new(),
                fail_submit: HashMap::new(),
                fail_receipt: HashMap::new(),
                receipt_delay: None,
                next_account: 7000,
                tx_counter: 0,
            })),
        }
    }

    pub fn treasury(&self) -> LedgerAccountId {
        self.state.read().treasury
    }

    /// Decimals reported by every mock token contract
    pub fn set_contract_decimals(&self, decimals: u8) {
        self.state.write().contract_decimals = decimals;
    }

    pub fn set_native_balance(&self, token: TokenId, account: LedgerAccountId, units: u128) {
        let mut state = self.state.write();
        let previous = state
            .native_balances
            .insert((token, account), units)
            .unwrap_or(0);
        let supply = state.native_supply.entry(token).or_insert(0);
        *supply = supply.saturating_sub(previous).saturating_add(units);
    }

    pub fn native_balance(&self, token: TokenId, account: LedgerAccountId) -> u128 {
        self.state
            .read()
            .native_balances
            .get(&(token, account))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_supply(&self, token: TokenId) -> u128 {
        self.state.read().native_supply.get(&token).copied().unwrap_or(0)
    }

    pub fn set_contract_balance(&self, token: EvmAddress, holder: EvmAddress, units: u128) {
        self.state
            .write()
            .contract_balances
            .insert((token, holder), units);
    }

    pub fn contract_balance(&self, token: EvmAddress, holder: EvmAddress) -> u128 {
        self.state
            .read()
            .contract_balances
            .get(&(token, holder))
            .copied()
            .unwrap_or(0)
    }

    pub fn registry_entry(&self, registry: EvmAddress, recycler_id: [u8; 32]) -> Option<RegistryEntry> {
        self.state.read().registry.get(&(registry, recycler_id)).cloned()
    }

    pub fn device_entry(&self, registry: EvmAddress, device_id: [u8; 32]) -> Option<DeviceEntry> {
        self.state.read().devices.get(&(registry, device_id)).cloned()
    }

    /// Every transaction passed to `submit`, including rejected ones
    pub fn submitted(&self) -> Vec<LedgerTransaction> {
        self.state.read().submitted.clone()
    }

    pub fn submitted_count(&self, kind: TransactionKind) -> usize {
        self.state
            .read()
            .submitted
            .iter()
            .filter(|tx| tx.kind() == kind)
            .count()
    }

    /// Number of `ContractExecute` submissions calling `function`
    pub fn contract_calls(&self, function: &str) -> usize {
        self.state
            .read()
            .submitted
            .iter()
            .filter(|tx| matches!(tx, LedgerTransaction::ContractExecute { function: f, .. } if f == function))
            .count()
    }

    pub fn queries(&self) -> Vec<ContractQuery> {
        self.state.read().queries.clone()
    }

    /// Reject the next submission of `kind` at the RPC layer
    pub fn fail_next_submit(&self, kind: TransactionKind, message: impl Into<String>) {
        self.state.write().fail_submit.insert(kind, message.into());
    }

    /// Accept the next submission of `kind` but report `status` in its receipt
    pub fn fail_next_receipt(&self, kind: TransactionKind, status: impl Into<String>) {
        self.state.write().fail_receipt.insert(kind, status.into());
    }

    /// Delay every receipt lookup
    pub fn set_receipt_delay(&self, delay: Option<Duration>) {
        self.state.write().receipt_delay = delay;
    }

    fn next_transaction_id(state: &mut MockState) -> TransactionId {
        state.tx_counter += 1;
        TransactionId::new(format!("{}@mock.{:06}", state.treasury, state.tx_counter))
    }

    fn apply(state: &mut MockState, tx: &LedgerTransaction) -> std::result::Result<Option<LedgerAccountId>, String> {
        match tx {
            LedgerTransaction::TokenMint { token, amount } => {
                let treasury = state.treasury;
                *state.native_balances.entry((*token, treasury)).or_insert(0) += amount;
                *state.native_supply.entry(*token).or_insert(0) += amount;
                info!("[MOCK] Minted {} units of {} to treasury {}", amount, token, treasury);
                Ok(None)
            }
            LedgerTransaction::TokenTransfer { token, from, to, amount } => {
                let available = state.native_balances.get(&(*token, *from)).copied().unwrap_or(0);
                if available < *amount {
                    return Err(STATUS_INSUFFICIENT.to_string());
                }
                state.native_balances.insert((*token, *from), available - amount);
                *state.native_balances.entry((*token, *to)).or_insert(0) += amount;
                info!("[MOCK] Transferred {} units of {} from {} to {}", amount, token, from, to);
                Ok(None)
            }
            LedgerTransaction::TokenWipe { token, account, amount } => {
                let available = state.native_balances.get(&(*token, *account)).copied().unwrap_or(0);
                if available < *amount {
                    return Err(STATUS_INVALID_WIPE.to_string());
                }
                state.native_balances.insert((*token, *account), available - amount);
                let supply = state.native_supply.entry(*token).or_insert(0);
                *supply = supply.saturating_sub(*amount);
                info!("[MOCK] Wiped {} units of {} from {}", amount, token, account);
                Ok(None)
            }
            LedgerTransaction::AccountCreate { public_key } => {
                state.next_account += 1;
                let id = EntityId::new(0, 0, state.next_account);
                info!("[MOCK] Created account {} (key {}...)", id, &public_key[..public_key.len().min(8)]);
                Ok(Some(id))
            }
            LedgerTransaction::ContractExecute { target, function, params, .. } => {
                Self::execute_contract(state, target.evm_address(), function, params)?;
                info!("[MOCK] Executed {}() on {}", function, target);
                Ok(None)
            }
        }
    }

    fn execute_contract(
        state: &mut MockState,
        contract: EvmAddress,
        function: &str,
        params: &[ContractValue],
    ) -> std::result::Result<(), String> {
        let revert = || STATUS_REVERT.to_string();
        match (function, params) {
            ("mint", [ContractValue::Address(to), ContractValue::Uint(amount)]) => {
                *state.contract_balances.entry((contract, *to)).or_insert(0) += amount;
                Ok(())
            }
            ("burn", [ContractValue::Address(from), ContractValue::Uint(amount)]) => {
                let balance = state.contract_balances.entry((contract, *from)).or_insert(0);
                if *balance < *amount {
                    return Err(revert());
                }
                *balance -= amount;
                Ok(())
            }
            (
                "registerRecycler",
                [ContractValue::Bytes32(id), ContractValue::Bytes32(code), ContractValue::Bytes32(referred_by)],
            ) => {
                if state.registry.contains_key(&(contract, *id)) {
                    return Err(revert());
                }
                state.registry.insert(
                    (contract, *id),
                    RegistryEntry {
                        recycler_id: *id,
                        referral_code: *code,
                        referred_by: *referred_by,
                        ..Default::default()
                    },
                );
                Ok(())
            }
            (
                "registerRVM",
                [ContractValue::Bytes32(id), ContractValue::Int(lat_e6), ContractValue::Int(lng_e6), ContractValue::String(name), ContractValue::String(meta_uri)],
            ) => {
                if state.devices.contains_key(&(contract, *id)) {
                    return Err(revert());
                }
                state.devices.insert(
                    (contract, *id),
                    DeviceEntry {
                        device_id: *id,
                        lat_e6: *lat_e6,
                        lng_e6: *lng_e6,
                        name: name.clone(),
                        meta_uri: meta_uri.clone(),
                    },
                );
                Ok(())
            }
            (
                "recordDeposit",
                [ContractValue::Bytes32(id), ContractValue::Bytes32(_device), ContractValue::Uint(units), ContractValue::Uint(points), ContractValue::String(_uri), ContractValue::Bytes32(_session)],
            ) => {
                let entry = state.registry.get_mut(&(contract, *id)).ok_or_else(revert)?;
                if !entry.has_recycled {
                    entry.has_recycled = true;
                    entry.first_deposit_at = unix_now();
                }
                entry.points += points;
                entry.total_pet += units;
                entry.deposits += 1;
                Ok(())
            }
            (
                "redeemPoints",
                [ContractValue::Bytes32(id), ContractValue::Uint(points), ContractValue::String(_reward), ContractValue::String(_destination), ContractValue::String(_redemption)],
            ) => {
                let entry = state.registry.get_mut(&(contract, *id)).ok_or_else(revert)?;
                entry.points = entry.points.saturating_sub(*points);
                entry.redemptions += 1;
                Ok(())
            }
            _ => Err(revert()),
        }
    }

    fn query_contract(state: &MockState, query: &ContractQuery) -> Result<Vec<ContractValue>> {
        let contract = query.target.evm_address();
        match (query.function.as_str(), query.params.as_slice()) {
            ("decimals", []) => Ok(vec![ContractValue::Uint(state.contract_decimals as u128)]),
            ("balanceOf", [ContractValue::Address(holder)]) => {
                let units = state
                    .contract_balances
                    .get(&(contract, *holder))
                    .copied()
                    .unwrap_or(0);
                Ok(vec![ContractValue::Uint(units)])
            }
            ("getUser", [ContractValue::Bytes32(id)]) => {
                let entry = state.registry.get(&(contract, *id));
                let row = entry.cloned().unwrap_or_default();
                Ok(vec![
                    ContractValue::Bool(entry.is_some()),
                    ContractValue::Bytes32(row.recycler_id),
                    ContractValue::Bytes32(row.referral_code),
                    ContractValue::Bytes32(row.referred_by),
                    ContractValue::Bool(row.has_recycled),
                    ContractValue::Uint(row.first_deposit_at as u128),
                    ContractValue::Uint(row.points),
                    ContractValue::Uint(row.total_pet),
                ])
            }
            (function, _) => Err(LedgerError::Rpc(format!(
                "contract {} has no view {}",
                query.target, function
            ))),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[async_trait]
impl LedgerRpc for MockLedger {
    async fn submit(&self, tx: LedgerTransaction) -> Result<TransactionId> {
        let mut state = self.state.write();
        let kind = tx.kind();
        state.submitted.push(tx.clone());

        if let Some(message) = state.fail_submit.remove(&kind) {
            warn!("[MOCK] Rejecting {} submission: {}", kind, message);
            return Err(LedgerError::Rpc(message));
        }

        let id = Self::next_transaction_id(&mut state);
        let (status, account_id) = match state.fail_receipt.remove(&kind) {
            Some(status) => (status, None),
            None => match Self::apply(&mut state, &tx) {
                Ok(account_id) => (STATUS_SUCCESS.to_string(), account_id),
                Err(status) => (status, None),
            },
        };
        debug!("[MOCK] {} {} -> {}", kind, id, status);

        state.receipts.insert(
            id.clone(),
            Receipt {
                transaction_id: id.clone(),
                status,
                account_id,
            },
        );
        Ok(id)
    }

    async fn receipt(&self, id: &TransactionId) -> Result<Receipt> {
        let delay = self.state.read().receipt_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .read()
            .receipts
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::Rpc(format!("unknown transaction {}", id)))
    }

    async fn call(&self, query: ContractQuery) -> Result<Vec<ContractValue>> {
        let mut state = self.state.write();
        state.queries.push(query.clone());
        Self::query_contract(&state, &query)
    }

    async fn token_balance(&self, token: TokenId, account: LedgerAccountId) -> Result<u128> {
        Ok(self.native_balance(token, account))
    }
}
