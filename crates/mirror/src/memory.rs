//! In-memory mirror store with optional JSON snapshot

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use greenafrica_core::{
    Account, NewRedemption, NewTransaction, RedemptionRequest, RedemptionStatus, RedemptionUpdate,
    TransactionRecord,
};

use crate::{AccountUpdate, MirrorError, MirrorStore, NewAccount, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct MirrorState {
    #[serde(default)]
    accounts: BTreeMap<String, Account>,
    /// Insertion order is write order
    #[serde(default)]
    transactions: Vec<TransactionRecord>,
    #[serde(default)]
    redemptions: BTreeMap<String, RedemptionRequest>,
    /// Creation sequence per redemption id, breaks `created_at` ties
    #[serde(default)]
    redemption_seq: BTreeMap<String, u64>,
    #[serde(default)]
    next_seq: u64,
}

impl MirrorState {
    fn account_mut(&mut self, user_id: &str) -> Result<&mut Account> {
        self.accounts
            .get_mut(user_id)
            .ok_or_else(|| MirrorError::AccountNotFound(user_id.to_string()))
    }
}

/// Clones share the same state
#[derive(Debug, Clone, Default)]
pub struct MemoryMirrorStore {
    state: Arc<RwLock<MirrorState>>,
    snapshot_path: Option<PathBuf>,
}

impl MemoryMirrorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the snapshot at `path` if it exists; every write rewrites it
    pub fn open(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let content =
                fs::read_to_string(&path).map_err(|e| MirrorError::Snapshot(e.to_string()))?;
            let state: MirrorState =
                serde_json::from_str(&content).map_err(|e| MirrorError::Snapshot(e.to_string()))?;
            info!(
                "Loaded mirror snapshot from {:?} ({} accounts, {} transactions)",
                path,
                state.accounts.len(),
                state.transactions.len()
            );
            state
        } else {
            MirrorState::default()
        };

        Ok(Self {
            state: Arc::new(RwLock::new(state)),
            snapshot_path: Some(path),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    /// Apply `f` as one write. With a snapshot the change is staged on a copy
    /// and only becomes visible once it is on disk.
    fn write<T>(&self, f: impl FnOnce(&mut MirrorState) -> Result<T>) -> Result<T> {
        let mut state = self.state.write();
        match &self.snapshot_path {
            None => f(&mut *state),
            Some(path) => {
                let mut next = state.clone();
                let value = f(&mut next)?;
                persist(path, &next)?;
                *state = next;
                Ok(value)
            }
        }
    }
}

fn persist(path: &Path, state: &MirrorState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| MirrorError::Snapshot(e.to_string()))?;
        }
    }
    let content =
        serde_json::to_string_pretty(state).map_err(|e| MirrorError::Snapshot(e.to_string()))?;
    fs::write(path, content).map_err(|e| MirrorError::Snapshot(e.to_string()))?;
    debug!("Mirror snapshot written to {:?}", path);
    Ok(())
}

fn merge_identity<T: PartialEq + Copy>(
    user_id: &str,
    current: &mut Option<T>,
    incoming: Option<T>,
) -> Result<()> {
    match (*current, incoming) {
        (Some(existing), Some(new)) if existing != new => Err(MirrorError::LedgerIdentityImmutable {
            user_id: user_id.to_string(),
        }),
        (None, Some(new)) => {
            *current = Some(new);
            Ok(())
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl MirrorStore for MemoryMirrorStore {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>> {
        Ok(self.state.read().accounts.get(user_id).cloned())
    }

    async fn create_account(&self, account: NewAccount) -> Result<Account> {
        self.write(|state| {
            if state.accounts.contains_key(&account.user_id) {
                return Err(MirrorError::AccountExists(account.user_id));
            }
            let now = Utc::now();
            let record = Account {
                user_id: account.user_id,
                display_name: account.display_name,
                email: account.email,
                phone_number: account.phone_number,
                green_id: account.green_id,
                ledger_account: account.ledger_account,
                evm_address: account.evm_address,
                encrypted_private_key: account.encrypted_private_key,
                total_points: 0,
                referral_code: account.referral_code,
                referral_points: 0,
                created_at: now,
                updated_at: now,
            };
            state.accounts.insert(record.user_id.clone(), record.clone());
            Ok(record)
        })
    }

    async fn update_account(&self, user_id: &str, update: AccountUpdate) -> Result<Account> {
        self.write(|state| {
            let account = state.account_mut(user_id)?;
            // Validate both identity fields before touching anything else
            let mut ledger_account = account.ledger_account;
            let mut evm_address = account.evm_address;
            merge_identity(user_id, &mut ledger_account, update.ledger_account)?;
            merge_identity(user_id, &mut evm_address, update.evm_address)?;
            account.ledger_account = ledger_account;
            account.evm_address = evm_address;

            if let Some(name) = update.display_name {
                account.display_name = name;
            }
            if let Some(email) = update.email {
                account.email = Some(email);
            }
            if let Some(phone) = update.phone_number {
                account.phone_number = Some(phone);
            }
            if let Some(green_id) = update.green_id {
                account.green_id = green_id;
            }
            if let Some(key) = update.encrypted_private_key {
                account.encrypted_private_key = Some(key);
            }
            account.updated_at = Utc::now();
            Ok(account.clone())
        })
    }

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>> {
        Ok(self
            .state
            .read()
            .accounts
            .values()
            .find(|a| a.referral_code == code)
            .cloned())
    }

    async fn increment_referral_points(&self, user_id: &str, points: i64) -> Result<()> {
        self.write(|state| {
            let account = state.account_mut(user_id)?;
            account.referral_points = account
                .referral_points
                .checked_add(points)
                .ok_or_else(|| MirrorError::BalanceOverflow(user_id.to_string()))?;
            account.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn append_transaction(
        &self,
        transaction: NewTransaction,
        affects_balance: bool,
    ) -> Result<TransactionRecord> {
        self.write(|state| {
            let now = Utc::now();
            if affects_balance {
                let account = state.account_mut(&transaction.user_id)?;
                account.total_points = account
                    .total_points
                    .checked_add(transaction.amount)
                    .ok_or_else(|| MirrorError::BalanceOverflow(transaction.user_id.clone()))?;
                account.updated_at = now;
            }
            let record = TransactionRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: transaction.user_id,
                kind: transaction.kind,
                amount: transaction.amount,
                description: transaction.description,
                phone: transaction.phone,
                metadata: transaction.metadata,
                affects_balance,
                created_at: now,
            };
            debug!(
                "Audit {} {} for {} (affects_balance={})",
                record.kind, record.amount, record.user_id, affects_balance
            );
            state.transactions.push(record.clone());
            Ok(record)
        })
    }

    async fn list_transactions(&self, user_id: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        Ok(self
            .state
            .read()
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_redemption(&self, redemption: NewRedemption) -> Result<RedemptionRequest> {
        self.write(|state| {
            let now = Utc::now();
            let id = uuid::Uuid::new_v4().to_string();
            let record = RedemptionRequest {
                id: id.clone(),
                user_id: redemption.user_id,
                reward: redemption.reward,
                amount: redemption.amount,
                points: redemption.points,
                phone: redemption.phone,
                carrier: redemption.carrier,
                detected_carrier: redemption.detected_carrier,
                status: redemption.status,
                transaction_id: None,
                burn_transaction: None,
                failure_reason: redemption.failure_reason,
                api_response: None,
                created_at: now,
                updated_at: now,
                completed_at: None,
            };
            state.next_seq += 1;
            state.redemption_seq.insert(id.clone(), state.next_seq);
            state.redemptions.insert(id, record.clone());
            Ok(record)
        })
    }

    async fn update_redemption(
        &self,
        id: &str,
        status: RedemptionStatus,
        update: RedemptionUpdate,
    ) -> Result<RedemptionRequest> {
        self.write(|state| {
            let redemption = state
                .redemptions
                .get_mut(id)
                .ok_or_else(|| MirrorError::RedemptionNotFound(id.to_string()))?;

            if redemption.status == status && status.is_terminal() {
                return Ok(redemption.clone());
            }
            // A non-terminal status may be restated to merge fields
            if redemption.status != status && !redemption.status.can_transition_to(status) {
                return Err(MirrorError::InvalidTransition {
                    id: id.to_string(),
                    from: redemption.status,
                    to: status,
                });
            }

            let now = Utc::now();
            redemption.status = status;
            if update.transaction_id.is_some() {
                redemption.transaction_id = update.transaction_id;
            }
            if update.burn_transaction.is_some() {
                redemption.burn_transaction = update.burn_transaction;
            }
            if update.failure_reason.is_some() {
                redemption.failure_reason = update.failure_reason;
            }
            if update.api_response.is_some() {
                redemption.api_response = update.api_response;
            }
            if status == RedemptionStatus::Completed {
                redemption.completed_at = Some(now);
            }
            redemption.updated_at = now;
            debug!("Redemption {} -> {}", id, status);
            Ok(redemption.clone())
        })
    }

    async fn get_redemption(&self, id: &str) -> Result<Option<RedemptionRequest>> {
        Ok(self.state.read().redemptions.get(id).cloned())
    }

    async fn list_redemptions(&self, user_id: &str) -> Result<Vec<RedemptionRequest>> {
        let state = self.state.read();
        let seq = |r: &RedemptionRequest| state.redemption_seq.get(&r.id).copied().unwrap_or(0);
        let mut redemptions: Vec<RedemptionRequest> = state
            .redemptions
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        redemptions.sort_by(|a, b| (b.created_at, seq(b)).cmp(&(a.created_at, seq(a))));
        Ok(redemptions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use greenafrica_core::{Carrier, EntityId, RewardType, TransactionMetadata, TransactionType};

    fn new_account(user_id: &str) -> NewAccount {
        NewAccount {
            user_id: user_id.to_string(),
            display_name: "Ada".to_string(),
            email: None,
            phone_number: None,
            green_id: "GRN-2024-000001".to_string(),
            ledger_account: None,
            evm_address: None,
            encrypted_private_key: None,
            referral_code: "ADA2024001".to_string(),
        }
    }

    fn earned(user_id: &str, amount: i64) -> NewTransaction {
        NewTransaction {
            user_id: user_id.to_string(),
            kind: TransactionType::Earned,
            amount,
            description: "Recycled bottles".to_string(),
            phone: None,
            metadata: TransactionMetadata::default(),
        }
    }

    fn new_redemption(user_id: &str) -> NewRedemption {
        NewRedemption {
            user_id: user_id.to_string(),
            reward: RewardType::Airtime,
            amount: 200,
            points: 200,
            phone: "08031234567".to_string(),
            carrier: Carrier::Mtn,
            detected_carrier: Some(Carrier::Mtn),
            status: RedemptionStatus::Pending,
            failure_reason: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let store = MemoryMirrorStore::new();
        let account = store.create_account(new_account("u1")).await.unwrap();
        assert_eq!(account.total_points, 0);
        assert_eq!(store.get_account("u1").await.unwrap(), Some(account));
        assert!(matches!(
            store.create_account(new_account("u1")).await,
            Err(MirrorError::AccountExists(_))
        ));
    }

    #[tokio::test]
    async fn test_balance_affecting_append_increments() {
        let store = MemoryMirrorStore::new();
        store.create_account(new_account("u1")).await.unwrap();

        let record = store.append_transaction(earned("u1", 30), true).await.unwrap();
        assert!(record.affects_balance);
        store.append_transaction(earned("u1", -10), true).await.unwrap();

        let account = store.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.total_points, 20);
    }

    #[tokio::test]
    async fn test_audit_only_append_leaves_balance() {
        let store = MemoryMirrorStore::new();
        store.create_account(new_account("u1")).await.unwrap();
        store.append_transaction(earned("u1", 100), false).await.unwrap();

        let account = store.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.total_points, 0);
        assert_eq!(store.list_transactions("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_balance_affecting_append_requires_account() {
        let store = MemoryMirrorStore::new();
        assert!(matches!(
            store.append_transaction(earned("ghost", 5), true).await,
            Err(MirrorError::AccountNotFound(_))
        ));
        assert!(store.list_transactions("ghost", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_transactions_newest_first_with_limit() {
        let store = MemoryMirrorStore::new();
        for amount in 1..=5 {
            store.append_transaction(earned("u1", amount), false).await.unwrap();
        }
        store.append_transaction(earned("u2", 99), false).await.unwrap();

        let amounts: Vec<i64> = store
            .list_transactions("u1", 3)
            .await
            .unwrap()
            .iter()
            .map(|t| t.amount)
            .collect();
        assert_eq!(amounts, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn test_ledger_identity_is_immutable() {
        let store = MemoryMirrorStore::new();
        store.create_account(new_account("u1")).await.unwrap();

        let first = EntityId::new(0, 0, 7001);
        let update = AccountUpdate {
            ledger_account: Some(first),
            evm_address: Some(first.to_evm_address()),
            ..Default::default()
        };
        store.update_account("u1", update.clone()).await.unwrap();
        // Same identity again is accepted
        store.update_account("u1", update).await.unwrap();

        let other = EntityId::new(0, 0, 7002);
        let result = store
            .update_account(
                "u1",
                AccountUpdate {
                    ledger_account: Some(other),
                    display_name: Some("Changed".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(MirrorError::LedgerIdentityImmutable { .. })));

        let account = store.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.ledger_account, Some(first));
        assert_eq!(account.display_name, "Ada");
    }

    #[tokio::test]
    async fn test_referral_lookup_and_increment() {
        let store = MemoryMirrorStore::new();
        store.create_account(new_account("u1")).await.unwrap();

        let found = store.find_by_referral_code("ADA2024001").await.unwrap().unwrap();
        assert_eq!(found.user_id, "u1");
        assert!(store.find_by_referral_code("NOPE").await.unwrap().is_none());

        store.increment_referral_points("u1", 50).await.unwrap();
        let account = store.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.referral_points, 50);
        assert_eq!(account.total_points, 0);
    }

    #[tokio::test]
    async fn test_redemption_lifecycle() {
        let store = MemoryMirrorStore::new();
        let created = store.create_redemption(new_redemption("u1")).await.unwrap();
        assert_eq!(created.status, RedemptionStatus::Pending);

        store
            .update_redemption(
                &created.id,
                RedemptionStatus::Processing,
                RedemptionUpdate {
                    burn_transaction: Some("0.0.2@mock.000001".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let done = store
            .update_redemption(
                &created.id,
                RedemptionStatus::Completed,
                RedemptionUpdate {
                    transaction_id: Some("TEQ_1_1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(done.status, RedemptionStatus::Completed);
        assert_eq!(done.transaction_id.as_deref(), Some("TEQ_1_1"));
        assert_eq!(done.burn_transaction.as_deref(), Some("0.0.2@mock.000001"));
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_redemption_terminal_reapply_and_invalid_transition() {
        let store = MemoryMirrorStore::new();
        let created = store.create_redemption(new_redemption("u1")).await.unwrap();
        store
            .update_redemption(&created.id, RedemptionStatus::Failed, RedemptionUpdate::default())
            .await
            .unwrap();

        let again = store
            .update_redemption(
                &created.id,
                RedemptionStatus::Failed,
                RedemptionUpdate {
                    failure_reason: Some("ignored".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(again.failure_reason.is_none());

        assert!(matches!(
            store
                .update_redemption(&created.id, RedemptionStatus::Completed, RedemptionUpdate::default())
                .await,
            Err(MirrorError::InvalidTransition { .. })
        ));
        assert!(matches!(
            store
                .update_redemption("missing", RedemptionStatus::Failed, RedemptionUpdate::default())
                .await,
            Err(MirrorError::RedemptionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_processing_restated_to_attach_burn() {
        let store = MemoryMirrorStore::new();
        let created = store.create_redemption(new_redemption("u1")).await.unwrap();
        store
            .update_redemption(&created.id, RedemptionStatus::Processing, RedemptionUpdate::default())
            .await
            .unwrap();

        let burned = store
            .update_redemption(
                &created.id,
                RedemptionStatus::Processing,
                RedemptionUpdate {
                    burn_transaction: Some("0.0.2@mock.000007".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(burned.status, RedemptionStatus::Processing);
        assert_eq!(burned.burn_transaction.as_deref(), Some("0.0.2@mock.000007"));

        let done = store
            .update_redemption(&created.id, RedemptionStatus::Completed, RedemptionUpdate::default())
            .await
            .unwrap();
        assert_eq!(done.burn_transaction.as_deref(), Some("0.0.2@mock.000007"));
    }

    #[tokio::test]
    async fn test_counter_overflow_is_an_error() {
        let store = MemoryMirrorStore::new();
        store.create_account(new_account("u1")).await.unwrap();
        store.append_transaction(earned("u1", i64::MAX), true).await.unwrap();

        assert!(matches!(
            store.append_transaction(earned("u1", 1), true).await,
            Err(MirrorError::BalanceOverflow(_))
        ));
        let account = store.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.total_points, i64::MAX);
        assert_eq!(store.list_transactions("u1", 10).await.unwrap().len(), 1);

        store.increment_referral_points("u1", i64::MAX).await.unwrap();
        assert!(matches!(
            store.increment_referral_points("u1", 1).await,
            Err(MirrorError::BalanceOverflow(_))
        ));
    }

    #[tokio::test]
    async fn test_list_redemptions_newest_first_within_same_instant() {
        let store = MemoryMirrorStore::new();
        let mut ids = Vec::new();
        for _ in 0..20 {
            ids.push(store.create_redemption(new_redemption("u1")).await.unwrap().id);
        }
        // Force every request onto one timestamp
        {
            let mut state = store.state.write();
            let instant = Utc::now();
            for r in state.redemptions.values_mut() {
                r.created_at = instant;
            }
        }

        let listed: Vec<String> = store
            .list_redemptions("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.reverse();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirror").join("state.json");

        let store = MemoryMirrorStore::open(path.clone()).unwrap();
        store.create_account(new_account("u1")).await.unwrap();
        store.append_transaction(earned("u1", 30), true).await.unwrap();
        assert!(path.exists());

        let reopened = MemoryMirrorStore::open(path).unwrap();
        let account = reopened.get_account("u1").await.unwrap().unwrap();
        assert_eq!(account.total_points, 30);
        assert_eq!(reopened.list_transactions("u1", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_snapshot_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = MemoryMirrorStore::open(path.clone()).unwrap();
        store.create_account(new_account("u1")).await.unwrap();

        assert!(store.append_transaction(earned("ghost", 5), true).await.is_err());
        let reopened = MemoryMirrorStore::open(path).unwrap();
        assert!(reopened.list_transactions("ghost", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_open_rejects_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            MemoryMirrorStore::open(path),
            Err(MirrorError::Snapshot(_))
        ));
    }
}
