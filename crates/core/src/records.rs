//! Mirror-store records shared by the gateways and the orchestrator

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{is_legacy_green_id, Carrier, CoreError, EvmAddress, LedgerAccountId, Secret};

/// Profile fields supplied by the identity provider at sign-in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub user_id: String,
    pub display_name: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
}

/// One recycler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub display_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    /// Either a legacy `GRN-YYYY-NNNNNN` id or the ledger account id
    pub green_id: String,
    /// Native ledger identity, immutable once set
    #[serde(default)]
    pub ledger_account: Option<LedgerAccountId>,
    #[serde(default)]
    pub evm_address: Option<EvmAddress>,
    /// Custodial key ciphertext
    #[serde(default)]
    pub encrypted_private_key: Option<Secret>,
    /// Mirrored balance; a cache once a ledger identity exists
    pub total_points: i64,
    pub referral_code: String,
    #[serde(default)]
    pub referral_points: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn has_ledger_identity(&self) -> bool {
        self.ledger_account.is_some()
    }

    /// Pre-ledger account that still needs a ledger identity
    pub fn needs_migration(&self) -> bool {
        is_legacy_green_id(&self.green_id) && self.evm_address.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Earned,
    Redeemed,
    Referral,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Earned => write!(f, "earned"),
            TransactionType::Redeemed => write!(f, "redeemed"),
            TransactionType::Referral => write!(f, "referral"),
        }
    }
}

impl FromStr for TransactionType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "earned" => Ok(TransactionType::Earned),
            "redeemed" => Ok(TransactionType::Redeemed),
            "referral" => Ok(TransactionType::Referral),
            _ => Err(CoreError::UnknownTransactionType(s.to_string())),
        }
    }
}

/// Correlation fields attached to an audit record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redemption_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_transaction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carrier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub billing_reference: Option<String>,
}

/// Audit record as submitted by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTransaction {
    pub user_id: String,
    pub kind: TransactionType,
    /// Signed: positive for credits, negative for redemptions
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: TransactionMetadata,
}

/// Stored, immutable audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionType,
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub metadata: TransactionMetadata,
    /// Whether this record moved the mirrored balance (legacy path)
    pub affects_balance: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardType {
    Airtime,
    Data,
}

impl fmt::Display for RewardType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewardType::Airtime => write!(f, "airtime"),
            RewardType::Data => write!(f, "data"),
        }
    }
}

impl FromStr for RewardType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "airtime" => Ok(RewardType::Airtime),
            "data" => Ok(RewardType::Data),
            _ => Err(CoreError::UnknownRewardType(s.to_string())),
        }
    }
}

/// Redemption lifecycle: `pending -> processing -> completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RedemptionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RedemptionStatus::Completed | RedemptionStatus::Failed)
    }

    pub fn can_transition_to(&self, next: RedemptionStatus) -> bool {
        use RedemptionStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for RedemptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedemptionStatus::Pending => write!(f, "pending"),
            RedemptionStatus::Processing => write!(f, "processing"),
            RedemptionStatus::Completed => write!(f, "completed"),
            RedemptionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Provider fields kept verbatim for audit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_msg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRedemption {
    pub user_id: String,
    pub reward: RewardType,
    /// Currency units requested
    pub amount: u64,
    /// Point cost (1:1 with amount)
    pub points: u64,
    pub phone: String,
    pub carrier: Carrier,
    #[serde(default)]
    pub detected_carrier: Option<Carrier>,
    pub status: RedemptionStatus,
    #[serde(default)]
    pub failure_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionRequest {
    pub id: String,
    pub user_id: String,
    pub reward: RewardType,
    pub amount: u64,
    pub points: u64,
    pub phone: String,
    pub carrier: Carrier,
    #[serde(default)]
    pub detected_carrier: Option<Carrier>,
    pub status: RedemptionStatus,
    /// Provider reference once billing succeeded
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Ledger burn reference, set as soon as the burn succeeded
    #[serde(default)]
    pub burn_transaction: Option<String>,
    #[serde(default)]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub api_response: Option<ProviderResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields merged into a redemption on a status change
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedemptionUpdate {
    pub transaction_id: Option<String>,
    pub burn_transaction: Option<String>,
    pub failure_reason: Option<String>,
    pub api_response: Option<ProviderResponse>,
}
