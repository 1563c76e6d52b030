//! Account lifecycle: first sign-in, legacy migration and balance reads

use rand::Rng;
use tracing::{info, warn};

use greenafrica_core::{Account, Secret, TransactionRecord, RedemptionRequest, UserIdentity};
use greenafrica_crypto::CustodyCipher;
use greenafrica_ledger::{Backend, NewLedgerAccount};
use greenafrica_mirror::{AccountUpdate, MirrorError, NewAccount};
use greenafrica_settings::Settings;

use crate::orchestrator::account_ref;
use crate::{optional, required, step_error, Gateways, PointsError, Result, Step};

/// Longest referral code the registry stores without truncation
const MAX_REFERRAL_CODE_LEN: usize = 32;

/// Where a displayed balance came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceSource {
    Ledger(Backend),
    /// Legacy account without any ledger address
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceView {
    pub user_id: String,
    pub points: i64,
    /// Exact amount including fractional token units
    pub display: String,
    pub source: BalanceSource,
}

/// Ledger balance next to the registry's own points tally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointsComparison {
    pub balance: BalanceView,
    /// `None` when the recycler is not on the registry or it is unreachable
    pub registry_points: Option<u128>,
}

impl PointsComparison {
    pub fn in_sync(&self) -> bool {
        match self.registry_points {
            Some(points) => i128::try_from(points).ok() == Some(self.balance.points as i128),
            None => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Migration {
    pub account: Account,
    /// False when the account already had a ledger identity
    pub migrated: bool,
    pub previous_green_id: Option<String>,
}

/// `<first 8 alphanumerics><year><3 digits>`, uppercased
pub fn generate_referral_code(display_name: &str) -> String {
    let mut name: String = display_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(8)
        .collect::<String>()
        .to_ascii_uppercase();
    if name.is_empty() {
        name = "GREEN".to_string();
    }
    let year = chrono::Utc::now().format("%Y");
    let suffix: u16 = rand::thread_rng().gen_range(0..1000);
    let mut code = format!("{}{}{:03}", name, year, suffix);
    code.truncate(MAX_REFERRAL_CODE_LEN);
    code
}

pub struct AccountService {
    gateways: Gateways,
    custody_key: Secret,
}

impl AccountService {
    pub fn new(gateways: Gateways, settings: &Settings) -> Self {
        Self {
            gateways,
            custody_key: settings.custody.encryption_key.clone(),
        }
    }

    /// First sign-in. Returns the existing account unchanged if there is one.
    pub async fn open_account(
        &self,
        identity: &UserIdentity,
        referred_by: Option<&str>,
    ) -> Result<Account> {
        let user_id = identity.user_id.as_str();
        if user_id.trim().is_empty() {
            return Err(PointsError::Validation("user id is required".to_string()));
        }
        if let Some(existing) = self.find(user_id).await? {
            return Ok(existing);
        }

        let (created, sealed) = self.create_ledger_account(user_id).await?;
        let new_account = NewAccount {
            user_id: user_id.to_string(),
            display_name: identity.display_name.clone(),
            email: identity.email.clone(),
            phone_number: identity.phone_number.clone(),
            green_id: created.account_id.to_string(),
            ledger_account: Some(created.account_id),
            evm_address: Some(created.evm_address),
            encrypted_private_key: Some(sealed),
            referral_code: generate_referral_code(&identity.display_name),
        };

        let account = match self.gateways.mirror.create_account(new_account).await {
            Ok(account) => account,
            Err(MirrorError::AccountExists(_)) => {
                warn!(
                    "Account {} was created concurrently; ledger account {} left unused",
                    user_id, created.account_id
                );
                return self
                    .find(user_id)
                    .await?
                    .ok_or_else(|| PointsError::AccountNotFound(user_id.to_string()));
            }
            Err(e) => return Err(step_error(Step::AccountCreate, user_id, e.into())),
        };

        self.register(&account, referred_by).await?;
        info!("Opened account {} with Green ID {}", user_id, account.green_id);
        Ok(account)
    }

    /// Give a legacy `GRN-YYYY-NNNNNN` account its ledger identity, once
    pub async fn migrate_legacy(&self, user_id: &str) -> Result<Migration> {
        let account = self
            .find(user_id)
            .await?
            .ok_or_else(|| PointsError::AccountNotFound(user_id.to_string()))?;
        if !account.needs_migration() {
            return Ok(Migration {
                account,
                migrated: false,
                previous_green_id: None,
            });
        }

        let (created, sealed) = self.create_ledger_account(user_id).await?;
        let update = AccountUpdate {
            green_id: Some(created.account_id.to_string()),
            ledger_account: Some(created.account_id),
            evm_address: Some(created.evm_address),
            encrypted_private_key: Some(sealed),
            ..Default::default()
        };
        let migrated = required(
            Step::AccountCreate,
            user_id,
            self.gateways.mirror.update_account(user_id, update).await,
        )?;

        self.register(&migrated, None).await?;
        info!(
            "Migrated {} from {} to ledger account {}",
            user_id, account.green_id, migrated.green_id
        );
        Ok(Migration {
            account: migrated,
            migrated: true,
            previous_green_id: Some(account.green_id),
        })
    }

    /// Ledger balance when the account has any ledger address, otherwise the
    /// mirrored balance
    pub async fn balance(&self, user_id: &str) -> Result<BalanceView> {
        let account = self
            .find(user_id)
            .await?
            .ok_or_else(|| PointsError::AccountNotFound(user_id.to_string()))?;

        match account_ref(&account) {
            Some(reference) => {
                let amount = required(
                    Step::BalanceCheck,
                    user_id,
                    self.gateways.ledger.balance_of(&reference).await,
                )?;
                Ok(BalanceView {
                    user_id: user_id.to_string(),
                    points: i64::try_from(amount.whole()).unwrap_or(i64::MAX),
                    display: amount.to_string(),
                    source: BalanceSource::Ledger(reference.backend()),
                })
            }
            None => Ok(BalanceView {
                user_id: user_id.to_string(),
                points: account.total_points,
                display: account.total_points.to_string(),
                source: BalanceSource::Mirror,
            }),
        }
    }

    /// Balance alongside the registry tally, for reconciling the two
    pub async fn compare_points(&self, user_id: &str) -> Result<PointsComparison> {
        let balance = self.balance(user_id).await?;
        let green_id = self
            .find(user_id)
            .await?
            .map(|a| a.green_id)
            .ok_or_else(|| PointsError::AccountNotFound(user_id.to_string()))?;

        let registry_points = match self.gateways.registry.get_account(&green_id).await {
            Ok(facts) => facts.map(|f| f.points),
            Err(e) => {
                warn!("Registry lookup for {} failed: {}", user_id, e);
                None
            }
        };
        let comparison = PointsComparison {
            balance,
            registry_points,
        };
        if !comparison.in_sync() {
            warn!(
                "Points of {} differ: ledger {}, registry {:?}",
                user_id, comparison.balance.points, comparison.registry_points
            );
        }
        Ok(comparison)
    }

    /// Newest-first audit records
    pub async fn history(&self, user_id: &str, limit: usize) -> Result<Vec<TransactionRecord>> {
        required(
            Step::ResolveAccount,
            user_id,
            self.gateways.mirror.list_transactions(user_id, limit).await,
        )
    }

    /// Newest-first redemption requests
    pub async fn redemptions(&self, user_id: &str) -> Result<Vec<RedemptionRequest>> {
        required(
            Step::ResolveAccount,
            user_id,
            self.gateways.mirror.list_redemptions(user_id).await,
        )
    }

    async fn find(&self, user_id: &str) -> Result<Option<Account>> {
        required(
            Step::ResolveAccount,
            user_id,
            self.gateways.mirror.get_account(user_id).await,
        )
    }

    /// New ledger account plus its sealed key. The custody key is checked
    /// before anything is submitted.
    async fn create_ledger_account(&self, user_id: &str) -> Result<(NewLedgerAccount, Secret)> {
        let cipher = required(Step::AccountCreate, user_id, CustodyCipher::new(&self.custody_key))?;
        let created = required(
            Step::AccountCreate,
            user_id,
            self.gateways.ledger.create_account().await,
        )?;
        let sealed = required(
            Step::AccountCreate,
            user_id,
            cipher.seal_private_key(&created.keypair.secret_key_bytes()),
        )?;
        Ok((created, sealed))
    }

    async fn register(&self, account: &Account, referred_by: Option<&str>) -> Result<()> {
        let registration = optional(
            Step::RegistryRegister,
            &account.user_id,
            self.gateways
                .registry
                .register_account(&account.green_id, &account.referral_code, referred_by)
                .await,
        )?;
        if let Some(registration) = registration {
            if registration.already_exists {
                info!("Recycler {} already on the registry", account.green_id);
            }
        }
        Ok(())
    }
}
