//! Grant and redemption orchestration

use std::time::Duration;

use tracing::{error, info, warn};

use greenafrica_billing::{
    check_amount, generate_reference, AirtimePurchase, BillingError, BillingMeta, BillingReceipt,
};
use greenafrica_core::{
    detect_carrier, parse_phone, Account, Carrier, NewRedemption, NewTransaction, ProviderResponse,
    RedemptionRequest, RedemptionStatus, RedemptionUpdate, RewardType, TransactionId,
    TransactionMetadata, TransactionRecord, TransactionType,
};
use greenafrica_ledger::{AccountRef, Backend};
use greenafrica_registry::{Deposit, RedemptionFact};
use greenafrica_settings::{RedemptionSettings, RewardSettings, Settings};

use crate::guard::{GuardKey, IdempotencyGuard, Rejection};
use crate::{optional, required, step_error, Gateways, PointsError, Result, Step};

/// Upper bound on tracked grant keys
const GUARD_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub user_id: String,
    pub points: u64,
    /// External reward code; with the user id it forms the idempotency key
    pub code: String,
    /// Deposit session reported to the registry; generated when absent
    pub session_id: Option<String>,
    /// Machine that took the deposit; the configured device when absent
    pub device_id: Option<String>,
    pub kind: TransactionType,
    pub description: Option<String>,
}

impl GrantRequest {
    /// Points earned by recycling, identified by the machine's reward code
    pub fn earned(user_id: impl Into<String>, points: u64, code: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            points,
            code: code.into(),
            session_id: None,
            device_id: None,
            kind: TransactionType::Earned,
            description: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GrantReceipt {
    /// Ledger transaction that credited the user
    pub transaction: TransactionId,
    pub backend: Backend,
    pub registry_transaction: Option<TransactionId>,
    /// `None` when the audit write failed
    pub audit: Option<TransactionRecord>,
    pub affects_balance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedeemRequest {
    pub user_id: String,
    pub points: u64,
    pub reward: RewardType,
    pub phone: String,
    /// User-selected carrier; detected from the number when absent
    pub carrier: Option<Carrier>,
}

impl RedeemRequest {
    pub fn airtime(user_id: impl Into<String>, points: u64, phone: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            points,
            reward: RewardType::Airtime,
            phone: phone.into(),
            carrier: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedemptionReceipt {
    pub redemption_id: String,
    pub carrier: Carrier,
    pub phone: String,
    pub burn_transaction: TransactionId,
    pub registry_transaction: Option<TransactionId>,
    pub billing: BillingReceipt,
}

/// Points Ledger Orchestrator
pub struct PointsLedger {
    gateways: Gateways,
    guard: IdempotencyGuard,
    bounds: RedemptionSettings,
    rewards: RewardSettings,
}

impl PointsLedger {
    pub fn new(gateways: Gateways, settings: &Settings) -> Self {
        Self {
            gateways,
            guard: IdempotencyGuard::with_config(
                Duration::from_secs(settings.rewards.dedupe_window_secs),
                GUARD_CAPACITY,
            ),
            bounds: settings.redemption,
            rewards: settings.rewards,
        }
    }

    pub fn gateways(&self) -> &Gateways {
        &self.gateways
    }

    pub fn guard(&self) -> &IdempotencyGuard {
        &self.guard
    }

    /// Credit `request.points` to a user at most once per `(code, user)`.
    ///
    /// Only the ledger mint is fatal. The guard key is released when the
    /// grant fails so the caller can retry.
    pub async fn grant(&self, request: GrantRequest) -> Result<GrantReceipt> {
        if request.user_id.trim().is_empty() {
            return Err(PointsError::Validation("user id is required".to_string()));
        }
        if request.points == 0 {
            return Err(PointsError::Validation("points must be positive".to_string()));
        }
        if request.code.trim().is_empty() {
            return Err(PointsError::Validation("reward code is required".to_string()));
        }

        let key = GuardKey::new(&request.code, &request.user_id);
        let session = self.guard.try_acquire(key).map_err(|rejection| match rejection {
            Rejection::InFlight => PointsError::AlreadyProcessing {
                code: request.code.clone(),
                user_id: request.user_id.clone(),
            },
            Rejection::Completed => PointsError::AlreadyGranted {
                code: request.code.clone(),
                user_id: request.user_id.clone(),
            },
        })?;

        let receipt = self.grant_locked(&request).await?;
        session.complete();
        Ok(receipt)
    }

    async fn grant_locked(&self, request: &GrantRequest) -> Result<GrantReceipt> {
        let user_id = request.user_id.as_str();
        let (account, account_ref) = self.resolve(user_id).await?;
        let affects_balance = !account.has_ledger_identity();
        let session_id = request.session_id.clone().unwrap_or_else(new_session_id);

        info!(
            "Granting {} points to {} ({:?} backend, code {})",
            request.points,
            user_id,
            account_ref.backend(),
            request.code
        );
        let transaction = required(
            Step::LedgerMint,
            user_id,
            self.gateways.ledger.mint(&account_ref, request.points).await,
        )?;

        // Deposits are only recorded for recycling credits on the native path
        let registry_transaction =
            if account_ref.backend() == Backend::Native && request.kind == TransactionType::Earned {
                let deposit = Deposit {
                    account_id: account.green_id.clone(),
                    device_id: request.device_id.clone(),
                    unit_count: request.points,
                    points_awarded: request.points,
                    evidence_uri: String::new(),
                    session_id: session_id.clone(),
                };
                optional(
                    Step::RegistryDeposit,
                    user_id,
                    self.gateways.registry.record_deposit(&deposit).await,
                )?
                .flatten()
            } else {
                None
            };

        let description = request
            .description
            .clone()
            .unwrap_or_else(|| format!("Reward earned with code: {}", request.code));
        let audit = optional(
            Step::AuditWrite,
            user_id,
            self.gateways
                .mirror
                .append_transaction(
                    NewTransaction {
                        user_id: user_id.to_string(),
                        kind: request.kind,
                        amount: points_to_i64(request.points),
                        description,
                        phone: None,
                        metadata: TransactionMetadata {
                            reward_code: Some(request.code.clone()),
                            session_id: Some(session_id),
                            ledger_transaction: Some(transaction.to_string()),
                            ..Default::default()
                        },
                    },
                    affects_balance,
                )
                .await,
        )?;

        info!("Granted {} points to {} ({})", request.points, user_id, transaction);
        Ok(GrantReceipt {
            transaction,
            backend: account_ref.backend(),
            registry_transaction,
            audit,
            affects_balance,
        })
    }

    /// Burn points and buy airtime with them.
    ///
    /// Every validation runs before the first gateway call. Once the burn
    /// has succeeded a billing failure marks the redemption `failed` and the
    /// points stay burned.
    pub async fn redeem_airtime(&self, request: RedeemRequest) -> Result<RedemptionReceipt> {
        let user_id = request.user_id.as_str();
        if user_id.trim().is_empty() {
            return Err(PointsError::Validation("user id is required".to_string()));
        }
        if request.points == 0 {
            return Err(PointsError::Validation("points must be positive".to_string()));
        }
        if request.reward != RewardType::Airtime {
            return Err(PointsError::Validation(format!(
                "{} rewards are not supported",
                request.reward
            )));
        }
        check_amount(request.points, &self.bounds)
            .map_err(|e| PointsError::Validation(e.to_string()))?;
        let phone = parse_phone(&request.phone).map_err(|e| PointsError::Validation(e.to_string()))?;
        let detected = detect_carrier(&phone);
        let carrier = request.carrier.or(detected).ok_or_else(|| {
            PointsError::Validation(format!("cannot determine carrier for {}", phone))
        })?;

        let (account, account_ref) = self.resolve(user_id).await?;
        let affects_balance = !account.has_ledger_identity();

        let balance = required(
            Step::BalanceCheck,
            user_id,
            self.gateways.ledger.balance_of(&account_ref).await,
        )?;
        let available = balance.whole();
        let redemption = |status, failure_reason| NewRedemption {
            user_id: user_id.to_string(),
            reward: request.reward,
            amount: request.points,
            points: request.points,
            phone: phone.clone(),
            carrier,
            detected_carrier: detected,
            status,
            failure_reason,
        };

        if available < request.points {
            warn!(
                "Redemption of {} points by {} rejected: balance {}",
                request.points, user_id, available
            );
            let reason = format!(
                "Insufficient balance: {} points available, {} requested",
                available, request.points
            );
            let recorded = optional(
                Step::RedemptionReconcile,
                user_id,
                self.gateways
                    .mirror
                    .create_redemption(redemption(RedemptionStatus::Failed, Some(reason)))
                    .await,
            )?;
            return Err(PointsError::InsufficientBalance {
                available,
                requested: request.points,
                redemption_id: recorded.map(|r| r.id),
            });
        }

        let pending = required(
            Step::RedemptionCreate,
            user_id,
            self.gateways
                .mirror
                .create_redemption(redemption(RedemptionStatus::Pending, None))
                .await,
        )?;
        let redemption_id = pending.id;

        // Nothing is burned yet, so a request that cannot enter processing is dropped
        let processing = self
            .gateways
            .mirror
            .update_redemption(
                &redemption_id,
                RedemptionStatus::Processing,
                RedemptionUpdate::default(),
            )
            .await;
        if let Err(e) = &processing {
            self.reconcile(
                user_id,
                &redemption_id,
                RedemptionStatus::Failed,
                RedemptionUpdate {
                    failure_reason: Some(format!("Could not start processing: {}", e)),
                    ..Default::default()
                },
            )
            .await?;
        }
        required(Step::RedemptionCreate, user_id, processing)?;

        let burned = self.gateways.ledger.burn(&account_ref, request.points).await;
        if let Err(e) = &burned {
            self.reconcile(
                user_id,
                &redemption_id,
                RedemptionStatus::Failed,
                RedemptionUpdate {
                    failure_reason: Some(format!("Ledger burn failed: {}", e)),
                    ..Default::default()
                },
            )
            .await?;
        }
        let burn_transaction = required(Step::LedgerBurn, user_id, burned)?;
        // Same status, only the burn reference is attached
        self.reconcile(
            user_id,
            &redemption_id,
            RedemptionStatus::Processing,
            RedemptionUpdate {
                burn_transaction: Some(burn_transaction.to_string()),
                ..Default::default()
            },
        )
        .await?;

        let registry_transaction = if account_ref.backend() == Backend::Native {
            let fact = RedemptionFact {
                account_id: account.green_id.clone(),
                points: request.points,
                reward_type: request.reward.to_string(),
                destination: phone.clone(),
                redemption_id: redemption_id.clone(),
            };
            optional(
                Step::RegistryRedemption,
                user_id,
                self.gateways.registry.record_redemption(&fact).await,
            )?
            .flatten()
        } else {
            None
        };

        let purchase = AirtimePurchase {
            carrier,
            reference: generate_reference(),
            recipient: phone.clone(),
            amount: request.points,
            meta: BillingMeta {
                uid: user_id.to_string(),
                name: account.display_name.clone(),
            },
        };
        let audit = |billing_reference: Option<String>, description: String| NewTransaction {
            user_id: user_id.to_string(),
            kind: TransactionType::Redeemed,
            amount: -points_to_i64(request.points),
            description,
            phone: Some(phone.clone()),
            metadata: TransactionMetadata {
                redemption_id: Some(redemption_id.clone()),
                ledger_transaction: Some(burn_transaction.to_string()),
                carrier: Some(carrier.code().to_string()),
                billing_reference,
                ..Default::default()
            },
        };

        match self.gateways.billing.purchase_airtime(&purchase).await {
            Ok(receipt) => {
                self.reconcile(
                    user_id,
                    &redemption_id,
                    RedemptionStatus::Completed,
                    RedemptionUpdate {
                        transaction_id: Some(receipt.reference.clone()),
                        api_response: Some(receipt.to_provider_response(carrier)),
                        ..Default::default()
                    },
                )
                .await?;
                self.write_audit(
                    user_id,
                    audit(
                        Some(receipt.reference.clone()),
                        format!("Redeemed {} points for {} airtime", request.points, carrier),
                    ),
                    affects_balance,
                )
                .await?;

                info!(
                    "Redemption {} completed: {} {} airtime to {}",
                    redemption_id, request.points, carrier, phone
                );
                Ok(RedemptionReceipt {
                    redemption_id,
                    carrier,
                    phone,
                    burn_transaction,
                    registry_transaction,
                    billing: receipt,
                })
            }
            Err(e) => {
                error!(
                    "Redemption {}: {} points burned ({}) but airtime purchase failed; no refund issued",
                    redemption_id, request.points, burn_transaction
                );
                let message = e.provider_message();
                self.reconcile(
                    user_id,
                    &redemption_id,
                    RedemptionStatus::Failed,
                    RedemptionUpdate {
                        failure_reason: Some(message.clone()),
                        api_response: Some(failed_response(&e, &purchase.reference, carrier)),
                        ..Default::default()
                    },
                )
                .await?;
                self.write_audit(
                    user_id,
                    audit(
                        Some(purchase.reference.clone()),
                        format!(
                            "Redeemed {} points for {} airtime (delivery failed: {})",
                            request.points, carrier, message
                        ),
                    ),
                    affects_balance,
                )
                .await?;
                Err(step_error(Step::BillingPurchase, user_id, e.into()))
            }
        }
    }

    /// Grant the referral bonus to `referrer_id` for bringing in `referred_id`
    pub async fn award_referral(&self, referrer_id: &str, referred_id: &str) -> Result<GrantReceipt> {
        if referrer_id == referred_id {
            return Err(PointsError::Validation("an account cannot refer itself".to_string()));
        }
        let points = self.rewards.points_per_referral;
        let receipt = self
            .grant(GrantRequest {
                user_id: referrer_id.to_string(),
                points,
                code: format!("referral:{}", referred_id),
                session_id: None,
                device_id: None,
                kind: TransactionType::Referral,
                description: Some(format!("Referral bonus for inviting {}", referred_id)),
            })
            .await?;

        optional(
            Step::ReferralCredit,
            referrer_id,
            self.gateways
                .mirror
                .increment_referral_points(referrer_id, points_to_i64(points))
                .await,
        )?;
        Ok(receipt)
    }

    /// [`Self::award_referral`] for the owner of `referral_code`
    pub async fn award_referral_code(&self, referral_code: &str, referred_id: &str) -> Result<GrantReceipt> {
        let referrer = required(
            Step::ResolveAccount,
            referred_id,
            self.gateways.mirror.find_by_referral_code(referral_code).await,
        )?
        .ok_or_else(|| PointsError::AccountNotFound(format!("referral code {}", referral_code)))?;
        self.award_referral(&referrer.user_id, referred_id).await
    }

    async fn resolve(&self, user_id: &str) -> Result<(Account, AccountRef)> {
        let account = required(
            Step::ResolveAccount,
            user_id,
            self.gateways.mirror.get_account(user_id).await,
        )?
        .ok_or_else(|| PointsError::AccountNotFound(user_id.to_string()))?;
        let account_ref =
            account_ref(&account).ok_or_else(|| PointsError::NoLedgerAddress(user_id.to_string()))?;
        Ok((account, account_ref))
    }

    async fn reconcile(
        &self,
        user_id: &str,
        redemption_id: &str,
        status: RedemptionStatus,
        update: RedemptionUpdate,
    ) -> Result<Option<RedemptionRequest>> {
        optional(
            Step::RedemptionReconcile,
            user_id,
            self.gateways
                .mirror
                .update_redemption(redemption_id, status, update)
                .await,
        )
    }

    async fn write_audit(
        &self,
        user_id: &str,
        transaction: NewTransaction,
        affects_balance: bool,
    ) -> Result<Option<TransactionRecord>> {
        optional(
            Step::AuditWrite,
            user_id,
            self.gateways
                .mirror
                .append_transaction(transaction, affects_balance)
                .await,
        )
    }
}

/// Native identity first, EVM address as the fallback
pub(crate) fn account_ref(account: &Account) -> Option<AccountRef> {
    account
        .ledger_account
        .map(AccountRef::Native)
        .or(account.evm_address.map(AccountRef::Evm))
}

fn failed_response(error: &BillingError, reference: &str, carrier: Carrier) -> ProviderResponse {
    let mut response = match error {
        BillingError::Provider {
            response: Some(response),
            ..
        } => response.clone(),
        _ => ProviderResponse::default(),
    };
    response.reference.get_or_insert_with(|| reference.to_string());
    response.provider = Some(carrier.code().to_string());
    response.error_message = Some(error.provider_message());
    response
}

fn points_to_i64(points: u64) -> i64 {
    i64::try_from(points).unwrap_or(i64::MAX)
}

fn new_session_id() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!(
        "session_{}_{}",
        chrono::Utc::now().timestamp_millis(),
        &suffix[..9]
    )
}
