//! Configuration types

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use greenafrica_core::{ContractId, EvmAddress, LedgerAccountId, Secret, TokenId};

use crate::{default_settings_path, Result, SettingsError};

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub network: Network,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub registry: RegistrySettings,

    #[serde(default)]
    pub billing: BillingSettings,

    #[serde(default)]
    pub redemption: RedemptionSettings,

    #[serde(default)]
    pub rewards: RewardSettings,

    #[serde(default)]
    pub custody: CustodySettings,

    #[serde(default)]
    pub mirror: MirrorSettings,

    /// Custom settings file path (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the default path, or create defaults
    pub fn load_or_default() -> Result<Self> {
        Self::load_from(&default_settings_path())
    }

    /// Load settings from a specific path, or create defaults
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(SettingsError::ReadError)?;
            let mut settings: Settings =
                serde_json::from_str(&content).map_err(SettingsError::ParseError)?;
            settings.config_path = Some(path.clone());
            info!("Loaded settings from {:?}", path);
            Ok(settings)
        } else {
            let mut settings = Self::default();
            settings.config_path = Some(path.clone());
            Ok(settings)
        }
    }

    /// Save settings to the configured path
    pub fn save(&self) -> Result<()> {
        let path = self.config_path.clone().unwrap_or_else(default_settings_path);
        self.save_to(&path)
    }

    /// Save settings to a specific path
    pub fn save_to(&self, path: &PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(SettingsError::CreateDirError)?;
            }
        }

        let content = serde_json::to_string_pretty(self).map_err(SettingsError::ParseError)?;
        std::fs::write(path, content).map_err(SettingsError::WriteError)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    /// Overlay environment-style variables.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("LEDGER_NETWORK") {
            self.network = parse("LEDGER_NETWORK", &v)?;
        }
        if let Some(v) = get("LEDGER_RPC_URL") {
            self.ledger.rpc_url = v;
        }
        if let Some(v) = get("LEDGER_OPERATOR_ID") {
            self.ledger.operator_id = Some(parse("LEDGER_OPERATOR_ID", &v)?);
        }
        if let Some(v) = get("LEDGER_OPERATOR_KEY") {
            self.ledger.operator_key = Secret::new(v);
        }
        if let Some(v) = get("GREENPOINTS_TOKEN_ID") {
            self.ledger.token_id = Some(parse("GREENPOINTS_TOKEN_ID", &v)?);
        }
        if let Some(v) = get("GREENPOINTS_TOKEN_ADDRESS") {
            self.ledger.token_address = Some(parse("GREENPOINTS_TOKEN_ADDRESS", &v)?);
        }
        if let Some(v) = get("REGISTRY_CONTRACT_ID") {
            self.registry.contract_id = Some(parse("REGISTRY_CONTRACT_ID", &v)?);
        }
        if let Some(v) = get("REGISTRY_CONTRACT_ADDRESS") {
            self.registry.contract_address = Some(parse("REGISTRY_CONTRACT_ADDRESS", &v)?);
        }
        if let Some(v) = get("BILLING_API_KEY") {
            self.billing.api_key = Secret::new(v);
        }
        if let Some(v) = get("BILLING_API_BASE_URL") {
            self.billing.base_url = v.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("REFERRAL_POINTS") {
            self.rewards.points_per_referral = parse("REFERRAL_POINTS", &v)?;
        }
        if let Some(v) = get("CUSTODY_ENCRYPTION_KEY") {
            self.custody.encryption_key = Secret::new(v);
        }
        Ok(())
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| SettingsError::InvalidOverride {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Ledger network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Testnet,
    Mainnet,
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "testnet" => Ok(Self::Testnet),
            "mainnet" => Ok(Self::Mainnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Whether a gateway talks to a real endpoint or an in-process mock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    #[default]
    Mock,
    Live,
}

/// Ledger settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSettings {
    #[serde(default)]
    pub mode: GatewayMode,

    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,

    /// Operator account paying for and signing every transaction
    #[serde(default)]
    pub operator_id: Option<LedgerAccountId>,

    /// Hex-encoded Ed25519 secret of the operator
    #[serde(default)]
    pub operator_key: Secret,

    /// Native GreenPoints token
    #[serde(default)]
    pub token_id: Option<TokenId>,

    /// GreenPoints token contract, for EVM-addressed accounts
    #[serde(default)]
    pub token_address: Option<EvmAddress>,

    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,

    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,

    #[serde(default = "default_timeout")]
    pub request_timeout_secs: u64,
}

fn default_rpc_url() -> String {
    "http://127.0.0.1:7546".to_string()
}

fn default_token_decimals() -> u8 {
    6
}

fn default_receipt_timeout() -> u64 {
    30
}

fn default_timeout() -> u64 {
    30
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            mode: GatewayMode::default(),
            rpc_url: default_rpc_url(),
            operator_id: None,
            operator_key: Secret::default(),
            token_id: None,
            token_address: None,
            token_decimals: default_token_decimals(),
            receipt_timeout_secs: default_receipt_timeout(),
            request_timeout_secs: default_timeout(),
        }
    }
}

/// On-chain registry settings. Without a contract the registry is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default)]
    pub contract_id: Option<ContractId>,

    #[serde(default)]
    pub contract_address: Option<EvmAddress>,

    /// Device recorded against deposits
    #[serde(default = "default_device_id")]
    pub device_id: String,
}

fn default_device_id() -> String {
    "RVM-IFITNESS-ORCHID-001".to_string()
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            contract_id: None,
            contract_address: None,
            device_id: default_device_id(),
        }
    }
}

impl RegistrySettings {
    pub fn is_configured(&self) -> bool {
        self.contract_id.is_some() || self.contract_address.is_some()
    }
}

/// Airtime billing provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingSettings {
    #[serde(default)]
    pub mode: GatewayMode,

    #[serde(default = "default_billing_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Secret,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_billing_url() -> String {
    "https://teqilla.com/api/v1".to_string()
}

impl Default for BillingSettings {
    fn default() -> Self {
        Self {
            mode: GatewayMode::default(),
            base_url: default_billing_url(),
            api_key: Secret::default(),
            timeout_secs: default_timeout(),
        }
    }
}

/// Airtime redemption bounds, in naira
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RedemptionSettings {
    #[serde(default = "default_min_amount")]
    pub min_amount: u64,

    #[serde(default = "default_max_amount")]
    pub max_amount: u64,
}

fn default_min_amount() -> u64 {
    50
}

fn default_max_amount() -> u64 {
    5000
}

impl Default for RedemptionSettings {
    fn default() -> Self {
        Self {
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
        }
    }
}

impl RedemptionSettings {
    pub fn contains(&self, amount: u64) -> bool {
        (self.min_amount..=self.max_amount).contains(&amount)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RewardSettings {
    #[serde(default = "default_referral_points")]
    pub points_per_referral: u64,

    /// How long a completed grant blocks the same (code, user) pair
    #[serde(default = "default_dedupe_window")]
    pub dedupe_window_secs: u64,
}

fn default_referral_points() -> u64 {
    50
}

fn default_dedupe_window() -> u64 {
    600
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            points_per_referral: default_referral_points(),
            dedupe_window_secs: default_dedupe_window(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustodySettings {
    #[serde(default)]
    pub encryption_key: Secret,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MirrorSettings {
    /// JSON snapshot backing the in-memory mirror store
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}
