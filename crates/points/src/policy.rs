//! Per-step failure policy

use std::fmt;

/// One externally visible step of a grant, redemption or account operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    ResolveAccount,
    LedgerMint,
    RegistryDeposit,
    AuditWrite,
    ReferralCredit,
    BalanceCheck,
    RedemptionCreate,
    LedgerBurn,
    RegistryRedemption,
    BillingPurchase,
    RedemptionReconcile,
    AccountCreate,
    RegistryRegister,
}

impl Step {
    pub const ALL: [Step; 13] = [
        Step::ResolveAccount,
        Step::LedgerMint,
        Step::RegistryDeposit,
        Step::AuditWrite,
        Step::ReferralCredit,
        Step::BalanceCheck,
        Step::RedemptionCreate,
        Step::LedgerBurn,
        Step::RegistryRedemption,
        Step::BillingPurchase,
        Step::RedemptionReconcile,
        Step::AccountCreate,
        Step::RegistryRegister,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Step::ResolveAccount => "resolve_account",
            Step::LedgerMint => "ledger_mint",
            Step::RegistryDeposit => "registry_deposit",
            Step::AuditWrite => "audit_write",
            Step::ReferralCredit => "referral_credit",
            Step::BalanceCheck => "balance_check",
            Step::RedemptionCreate => "redemption_create",
            Step::LedgerBurn => "ledger_burn",
            Step::RegistryRedemption => "registry_redemption",
            Step::BillingPurchase => "billing_purchase",
            Step::RedemptionReconcile => "redemption_reconcile",
            Step::AccountCreate => "account_create",
            Step::RegistryRegister => "registry_register",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a failure at a step means for the whole operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    /// Abort the operation
    pub fatal: bool,
    /// Re-invoking the whole operation may succeed
    pub retryable: bool,
}

impl StepPolicy {
    pub const BEST_EFFORT: StepPolicy = StepPolicy {
        fatal: false,
        retryable: false,
    };

    pub const fn fatal(retryable: bool) -> Self {
        Self {
            fatal: true,
            retryable,
        }
    }

    pub fn for_step(step: Step) -> StepPolicy {
        match step {
            Step::ResolveAccount => Self::fatal(true),
            Step::LedgerMint => Self::fatal(true),
            Step::RegistryDeposit => Self::BEST_EFFORT,
            Step::AuditWrite => Self::BEST_EFFORT,
            Step::ReferralCredit => Self::BEST_EFFORT,
            Step::BalanceCheck => Self::fatal(true),
            Step::RedemptionCreate => Self::fatal(true),
            Step::LedgerBurn => Self::fatal(true),
            Step::RegistryRedemption => Self::BEST_EFFORT,
            // Points are already burned; a retry would burn again
            Step::BillingPurchase => Self::fatal(false),
            Step::RedemptionReconcile => Self::BEST_EFFORT,
            Step::AccountCreate => Self::fatal(true),
            Step::RegistryRegister => Self::BEST_EFFORT,
        }
    }
}
