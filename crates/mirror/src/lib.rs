//! GreenAfrica Mirror Store
//!
//! Audit trail and cached account state kept beside the ledger.
//!
//! The mirror is never the balance authority for an account with a ledger
//! identity. Records written with `affects_balance = true` (legacy accounts)
//! apply their signed amount to `total_points` in the same write as the
//! record insert; audit-only records leave the balance alone.
//!
//! Every timestamp is assigned by the store.

mod memory;

pub use memory::MemoryMirrorStore;

use async_trait::async_trait;
use thiserror::Error;

use greenafrica_core::{
    Account, EvmAddress, LedgerAccountId, NewRedemption, NewTransaction, RedemptionRequest,
    RedemptionStatus, RedemptionUpdate, Secret, TransactionRecord,
};
use greenafrica_settings::MirrorSettings;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account already exists: {0}")]
    AccountExists(String),

    #[error("Redemption not found: {0}")]
    RedemptionNotFound(String),

    #[error("Ledger identity of {user_id} is already set and cannot change")]
    LedgerIdentityImmutable { user_id: String },

    #[error("Redemption {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: RedemptionStatus,
        to: RedemptionStatus,
    },

    #[error("Points counter of {0} would overflow")]
    BalanceOverflow(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

pub type Result<T> = std::result::Result<T, MirrorError>;

/// Account document as first written at sign-in
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccount {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub green_id: String,
    pub ledger_account: Option<LedgerAccountId>,
    pub evm_address: Option<EvmAddress>,
    pub encrypted_private_key: Option<Secret>,
    pub referral_code: String,
}

/// Partial account update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountUpdate {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub green_id: Option<String>,
    pub ledger_account: Option<LedgerAccountId>,
    pub evm_address: Option<EvmAddress>,
    pub encrypted_private_key: Option<Secret>,
}

#[async_trait]
pub trait MirrorStore: Send + Sync {
    async fn get_account(&self, user_id: &str) -> Result<Option<Account>>;

    async fn create_account(&self, account: NewAccount) -> Result<Account>;

    /// Rejects a change to an already-set `ledger_account` or `evm_address`
    async fn update_account(&self, user_id: &str, update: AccountUpdate) -> Result<Account>;

    async fn find_by_referral_code(&self, code: &str) -> Result<Option<Account>>;

    async fn increment_referral_points(&self, user_id: &str, points: i64) -> Result<()>;

    /// Insert an immutable audit record. With `affects_balance` the signed
    /// amount is applied to the owner's `total_points` atomically.
    async fn append_transaction(
        &self,
        transaction: NewTransaction,
        affects_balance: bool,
    ) -> Result<TransactionRecord>;

    /// Newest first
    async fn list_transactions(&self, user_id: &str, limit: usize) -> Result<Vec<TransactionRecord>>;

    async fn create_redemption(&self, redemption: NewRedemption) -> Result<RedemptionRequest>;

    /// Move a redemption to `status`, merging the set fields of `update`.
    /// Re-applying the current terminal status is a no-op.
    async fn update_redemption(
        &self,
        id: &str,
        status: RedemptionStatus,
        update: RedemptionUpdate,
    ) -> Result<RedemptionRequest>;

    async fn get_redemption(&self, id: &str) -> Result<Option<RedemptionRequest>>;

    /// Newest first
    async fn list_redemptions(&self, user_id: &str) -> Result<Vec<RedemptionRequest>>;
}

/// In-memory store, snapshotted to JSON when a path is configured
pub fn from_settings(settings: &MirrorSettings) -> Result<MemoryMirrorStore> {
    match &settings.snapshot_path {
        Some(path) => MemoryMirrorStore::open(path.clone()),
        None => Ok(MemoryMirrorStore::new()),
    }
}
