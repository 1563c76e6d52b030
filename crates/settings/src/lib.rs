//! GreenAfrica Settings
//!
//! Configuration for the points ledger services.
//!
//! ## Features
//!
//! - Ledger network, operator and token identifiers
//! - Registry contract and billing provider endpoints
//! - Redemption bounds and referral rewards
//! - JSON file storage with environment overrides
//!
//! ## Usage
//!
//! ```no_run
//! use greenafrica_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.apply_overrides(|key| std::env::var(key).ok())?;
//! settings.redemption.max_amount = 2000;
//! settings.save()?;
//! # Ok::<(), greenafrica_settings::SettingsError>(())
//! ```

mod config;

pub use config::{
    BillingSettings, CustodySettings, GatewayMode, LedgerSettings, MirrorSettings, Network,
    RedemptionSettings, RegistrySettings, RewardSettings, Settings,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidOverride { key: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Default config directory (`$HOME/.greenafrica`, or the working directory)
pub fn default_config_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".greenafrica")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
