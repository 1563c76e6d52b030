//! GreenAfrica Points Ledger
//!
//! Orchestrates grants and redemptions across the ledger, the registry
//! contract, the billing provider and the mirror store.
//!
//! ## Grant
//!
//! ```text
//! validate -> guard(code, user) -> resolve account -> ledger mint
//!          -> registry deposit (best effort) -> audit record -> done
//! ```
//!
//! ## Redemption
//!
//! ```text
//! validate -> resolve account -> balance check -> redemption (pending)
//!          -> ledger burn -> redemption (processing) -> registry (best effort)
//!          -> billing -> redemption (completed | failed) -> audit record
//! ```
//!
//! A billing failure after a successful burn is recorded, never refunded.
//! Whether a failure aborts the operation is decided by [`StepPolicy`].

mod accounts;
mod gateways;
mod guard;
mod orchestrator;
mod policy;

#[cfg(test)]
mod testing;

pub use accounts::{
    generate_referral_code, AccountService, BalanceSource, BalanceView, Migration, PointsComparison,
};
pub use gateways::Gateways;
pub use guard::{GuardKey, IdempotencyGuard, MintSession, Rejection};
pub use orchestrator::{GrantReceipt, GrantRequest, PointsLedger, RedeemRequest, RedemptionReceipt};
pub use policy::{Step, StepPolicy};

use thiserror::Error;

use greenafrica_billing::BillingError;
use greenafrica_crypto::CryptoError;
use greenafrica_ledger::LedgerError;
use greenafrica_mirror::MirrorError;
use greenafrica_registry::RegistryError;

/// Failure reported by one of the gateways
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Mirror(#[from] MirrorError),

    #[error(transparent)]
    Custody(#[from] CryptoError),
}

impl StepFailure {
    /// Missing credentials never succeed on retry
    pub fn is_config_error(&self) -> bool {
        match self {
            StepFailure::Ledger(e) => e.is_config_error(),
            StepFailure::Billing(e) => e.is_config_error(),
            StepFailure::Custody(_) => true,
            StepFailure::Registry(_) | StepFailure::Mirror(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum PointsError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Account {0} has neither a ledger identity nor an EVM address")]
    NoLedgerAddress(String),

    #[error("Insufficient balance: {available} points available, {requested} requested")]
    InsufficientBalance {
        available: u64,
        requested: u64,
        /// Failed redemption recorded for the attempt
        redemption_id: Option<String>,
    },

    #[error("Reward {code} for {user_id} is already being processed")]
    AlreadyProcessing { code: String, user_id: String },

    #[error("Reward {code} for {user_id} was already granted")]
    AlreadyGranted { code: String, user_id: String },

    #[error("Step {step} failed: {source}")]
    Step {
        step: Step,
        retryable: bool,
        #[source]
        source: StepFailure,
    },

    #[error("Gateway setup failed: {0}")]
    Setup(#[from] StepFailure),
}

impl PointsError {
    /// Whether the caller may re-invoke the whole operation
    pub fn is_retryable(&self) -> bool {
        match self {
            PointsError::Step { retryable, .. } => *retryable,
            PointsError::AlreadyProcessing { .. } => true,
            _ => false,
        }
    }

    /// Rejected before any gateway call
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            PointsError::Validation(_) | PointsError::NoLedgerAddress(_)
        )
    }

    pub fn step(&self) -> Option<Step> {
        match self {
            PointsError::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PointsError>;

pub(crate) fn step_error(step: Step, context: &str, failure: StepFailure) -> PointsError {
    let policy = StepPolicy::for_step(step);
    tracing::error!("{} failed for {}: {}", step, context, failure);
    PointsError::Step {
        step,
        retryable: policy.retryable && !failure.is_config_error(),
        source: failure,
    }
}

/// Outcome of a step whose value the operation cannot continue without
pub(crate) fn required<T, E>(step: Step, context: &str, result: std::result::Result<T, E>) -> Result<T>
where
    E: Into<StepFailure>,
{
    result.map_err(|e| step_error(step, context, e.into()))
}

/// Outcome of a step the table may mark best-effort: fatal failures abort,
/// the rest are logged and become `Ok(None)`.
pub(crate) fn optional<T, E>(
    step: Step,
    context: &str,
    result: std::result::Result<T, E>,
) -> Result<Option<T>>
where
    E: Into<StepFailure>,
{
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            let failure = e.into();
            if StepPolicy::for_step(step).fatal {
                Err(step_error(step, context, failure))
            } else {
                tracing::warn!("{} failed for {} (continuing): {}", step, context, failure);
                Ok(None)
            }
        }
    }
}
