//! GreenAfrica Contract Registry Gateway
//!
//! Records recyclers, collection machines, deposits and redemptions on the
//! registry contract.
//!
//! The registry is optional bookkeeping. With no contract configured every
//! write reports success with no transaction and every read reports nothing.
//!
//! Identifiers are sent as `bytes32`: the UTF-8 bytes are truncated to 32
//! (or zero-padded). Two identifiers sharing their first 32 bytes collide on
//! chain; this is a known limitation of the contract ABI.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use greenafrica_core::TransactionId;
use greenafrica_ledger::{
    ContractQuery, ContractTarget, ContractValue, LedgerError, LedgerTransaction, Submitter,
};
use greenafrica_settings::RegistrySettings;

/// Gas for `registerRecycler`, `registerRVM` and `redeemPoints`
const REGISTER_GAS: u64 = 300_000;
/// Gas for `recordDeposit`
const DEPOSIT_GAS: u64 = 400_000;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Registry ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Malformed registry response: {0}")]
    MalformedResponse(String),

    #[error("Invalid device: {0}")]
    InvalidDevice(String),
}

impl RegistryError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RegistryError::Ledger(e) => e.is_retryable(),
            RegistryError::MalformedResponse(_) | RegistryError::InvalidDevice(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// Outcome of [`RegistryGateway::register_account`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub transaction: Option<TransactionId>,
    pub already_exists: bool,
}

/// Deposit evidence recorded after a successful mint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deposit {
    pub account_id: String,
    /// Falls back to the configured device when `None`
    pub device_id: Option<String>,
    pub unit_count: u64,
    pub points_awarded: u64,
    pub evidence_uri: String,
    pub session_id: String,
}

/// Redemption recorded after a successful burn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionFact {
    pub account_id: String,
    pub points: u64,
    pub reward_type: String,
    pub destination: String,
    pub redemption_id: String,
}

/// Collection machine placed at a site
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub device_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub name: String,
    pub meta_uri: String,
}

impl Device {
    fn validate(&self) -> Result<()> {
        if self.device_id.trim().is_empty() || self.name.trim().is_empty() {
            return Err(RegistryError::InvalidDevice(
                "device id and name are required".to_string(),
            ));
        }
        if !(-90.0..=90.0).contains(&self.latitude) || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(RegistryError::InvalidDevice(format!(
                "coordinates {}, {} out of range",
                self.latitude, self.longitude
            )));
        }
        Ok(())
    }
}

/// Degrees as the contract's integer micro-degrees
pub fn to_micro_degrees(degrees: f64) -> i128 {
    (degrees * 1_000_000.0).round() as i128
}

/// Recycler facts held on chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountFacts {
    pub recycler_id: String,
    pub referral_code: String,
    pub referred_by: Option<String>,
    pub has_recycled: bool,
    pub first_deposit_at: u64,
    pub points: u128,
    pub total_pet: u128,
}

/// Normalise an identifier to the contract's `bytes32`
pub fn to_bytes32(value: &str) -> [u8; 32] {
    let bytes = value.as_bytes();
    if bytes.len() > 32 {
        warn!("Identifier {:?} truncated to 32 bytes for the registry", value);
    }
    let mut out = [0u8; 32];
    let len = bytes.len().min(32);
    out[..len].copy_from_slice(&bytes[..len]);
    out
}

/// Inverse of [`to_bytes32`], dropping the zero padding
pub fn from_bytes32(value: &[u8; 32]) -> String {
    let end = value.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&value[..end]).into_owned()
}

pub struct RegistryGateway {
    submitter: Submitter,
    target: Option<ContractTarget>,
    device_id: String,
}

impl RegistryGateway {
    /// A native contract id wins over an EVM address when both are set
    pub fn new(submitter: Submitter, settings: &RegistrySettings) -> Self {
        let target = settings
            .contract_id
            .map(ContractTarget::Native)
            .or(settings.contract_address.map(ContractTarget::Evm));
        if target.is_none() {
            info!("Registry contract not configured; registry calls are no-ops");
        }
        Self {
            submitter,
            target,
            device_id: settings.device_id.clone(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.target.is_some()
    }

    async fn execute(
        &self,
        target: ContractTarget,
        function: &str,
        params: Vec<ContractValue>,
        gas: u64,
    ) -> Result<TransactionId> {
        let receipt = self
            .submitter
            .submit_and_confirm(LedgerTransaction::ContractExecute {
                target,
                function: function.to_string(),
                params,
                gas,
            })
            .await?;
        debug!("Registry {}() confirmed in {}", function, receipt.transaction_id);
        Ok(receipt.transaction_id)
    }

    /// Register a recycler unless already present
    pub async fn register_account(
        &self,
        account_id: &str,
        referral_code: &str,
        referred_by: Option<&str>,
    ) -> Result<Registration> {
        let Some(target) = self.target else {
            return Ok(Registration {
                transaction: None,
                already_exists: false,
            });
        };

        if self.account_exists(account_id).await? {
            debug!("Recycler {} already registered", account_id);
            return Ok(Registration {
                transaction: None,
                already_exists: true,
            });
        }

        let tx = self
            .execute(
                target,
                "registerRecycler",
                vec![
                    ContractValue::Bytes32(to_bytes32(account_id)),
                    ContractValue::Bytes32(to_bytes32(referral_code)),
                    ContractValue::Bytes32(to_bytes32(referred_by.unwrap_or_default())),
                ],
                REGISTER_GAS,
            )
            .await?;
        info!("Registered recycler {} ({})", account_id, tx);
        Ok(Registration {
            transaction: Some(tx),
            already_exists: false,
        })
    }

    /// Register a collection machine; deposits name it by `device_id`
    pub async fn register_device(&self, device: &Device) -> Result<Option<TransactionId>> {
        device.validate()?;
        let Some(target) = self.target else {
            return Ok(None);
        };
        let tx = self
            .execute(
                target,
                "registerRVM",
                vec![
                    ContractValue::Bytes32(to_bytes32(&device.device_id)),
                    ContractValue::Int(to_micro_degrees(device.latitude)),
                    ContractValue::Int(to_micro_degrees(device.longitude)),
                    ContractValue::String(device.name.clone()),
                    ContractValue::String(device.meta_uri.clone()),
                ],
                REGISTER_GAS,
            )
            .await?;
        info!("Registered device {} ({})", device.device_id, tx);
        Ok(Some(tx))
    }

    pub async fn account_exists(&self, account_id: &str) -> Result<bool> {
        Ok(self.get_account(account_id).await?.is_some())
    }

    pub async fn record_deposit(&self, deposit: &Deposit) -> Result<Option<TransactionId>> {
        let Some(target) = self.target else {
            return Ok(None);
        };
        let device = deposit.device_id.as_deref().unwrap_or(&self.device_id);
        let tx = self
            .execute(
                target,
                "recordDeposit",
                vec![
                    ContractValue::Bytes32(to_bytes32(&deposit.account_id)),
                    ContractValue::Bytes32(to_bytes32(device)),
                    ContractValue::Uint(deposit.unit_count as u128),
                    ContractValue::Uint(deposit.points_awarded as u128),
                    ContractValue::String(deposit.evidence_uri.clone()),
                    ContractValue::Bytes32(to_bytes32(&deposit.session_id)),
                ],
                DEPOSIT_GAS,
            )
            .await?;
        info!(
            "Recorded deposit of {} points for {} ({})",
            deposit.points_awarded, deposit.account_id, tx
        );
        Ok(Some(tx))
    }

    pub async fn record_redemption(&self, fact: &RedemptionFact) -> Result<Option<TransactionId>> {
        let Some(target) = self.target else {
            return Ok(None);
        };
        let tx = self
            .execute(
                target,
                "redeemPoints",
                vec![
                    ContractValue::Bytes32(to_bytes32(&fact.account_id)),
                    ContractValue::Uint(fact.points as u128),
                    ContractValue::String(fact.reward_type.clone()),
                    ContractValue::String(fact.destination.clone()),
                    ContractValue::String(fact.redemption_id.clone()),
                ],
                REGISTER_GAS,
            )
            .await?;
        info!(
            "Recorded redemption {} of {} points for {} ({})",
            fact.redemption_id, fact.points, fact.account_id, tx
        );
        Ok(Some(tx))
    }

    pub async fn get_account(&self, account_id: &str) -> Result<Option<AccountFacts>> {
        let Some(target) = self.target else {
            return Ok(None);
        };
        let values = self
            .submitter
            .rpc()
            .call(ContractQuery::new(
                target,
                "getUser",
                vec![ContractValue::Bytes32(to_bytes32(account_id))],
            ))
            .await?;
        parse_account(&values)
    }
}

fn parse_account(values: &[ContractValue]) -> Result<Option<AccountFacts>> {
    let malformed = || RegistryError::MalformedResponse(format!("getUser returned {:?}", values));
    let [exists, id, code, referred_by, has_recycled, first_deposit, points, total_pet] = values else {
        return Err(malformed());
    };
    if !exists.as_bool().ok_or_else(malformed)? {
        return Ok(None);
    }
    let referred_by = from_bytes32(&referred_by.as_bytes32().ok_or_else(malformed)?);
    Ok(Some(AccountFacts {
        recycler_id: from_bytes32(&id.as_bytes32().ok_or_else(malformed)?),
        referral_code: from_bytes32(&code.as_bytes32().ok_or_else(malformed)?),
        referred_by: (!referred_by.is_empty()).then_some(referred_by),
        has_recycled: has_recycled.as_bool().ok_or_else(malformed)?,
        first_deposit_at: u64::try_from(first_deposit.as_uint().ok_or_else(malformed)?)
            .map_err(|_| malformed())?,
        points: points.as_uint().ok_or_else(malformed)?,
        total_pet: total_pet.as_uint().ok_or_else(malformed)?,
    }))
}
