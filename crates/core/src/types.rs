use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{CoreError, Result};

/// Ledger entity identifier in `shard.realm.num` form (e.g. `0.0.12345`).
///
/// Accounts, tokens and contracts on the native ledger share this shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub shard: u32,
    pub realm: u64,
    pub num: u64,
}

/// Native ledger account reference ("Green ID" once migrated)
pub type LedgerAccountId = EntityId;

/// Native fungible token reference
pub type TokenId = EntityId;

/// Native smart contract reference
pub type ContractId = EntityId;

impl EntityId {
    pub const fn new(shard: u32, realm: u64, num: u64) -> Self {
        Self { shard, realm, num }
    }

    /// Long-zero EVM address for this entity:
    /// `shard (4 bytes) || realm (8 bytes) || num (8 bytes)`, big-endian.
    pub fn to_evm_address(&self) -> EvmAddress {
        let mut bytes = [0u8; 20];
        bytes[0..4].copy_from_slice(&self.shard.to_be_bytes());
        bytes[4..12].copy_from_slice(&self.realm.to_be_bytes());
        bytes[12..20].copy_from_slice(&self.num.to_be_bytes());
        EvmAddress(bytes)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.shard, self.realm, self.num)
    }
}

impl FromStr for EntityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || CoreError::InvalidEntityId(s.to_string());
        let mut parts = s.trim().split('.');
        let (Some(shard), Some(realm), Some(num), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        Ok(Self {
            shard: shard.parse().map_err(|_| invalid())?,
            realm: realm.parse().map_err(|_| invalid())?,
            num: num.parse().map_err(|_| invalid())?,
        })
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EntityId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// 20-byte EVM-style address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvmAddress(pub [u8; 20]);

impl EvmAddress {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for EvmAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for EvmAddress {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bytes = hex::decode(digits).map_err(|_| CoreError::InvalidEvmAddress(s.to_string()))?;
        let array: [u8; 20] = bytes
            .try_into()
            .map_err(|_| CoreError::InvalidEvmAddress(s.to_string()))?;
        Ok(Self(array))
    }
}

impl Serialize for EvmAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for EvmAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Ledger transaction reference as reported by the ledger (or its mock)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token quantity in base units together with the token's decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenAmount {
    pub units: u128,
    pub decimals: u8,
}

impl TokenAmount {
    pub fn new(units: u128, decimals: u8) -> Self {
        Self { units, decimals }
    }

    /// Base units for a whole number of points
    pub fn from_points(points: u64, decimals: u8) -> Self {
        Self {
            units: points as u128 * Self::scale(decimals),
            decimals,
        }
    }

    /// Whole points, fractional remainder discarded
    pub fn whole(&self) -> u64 {
        let whole = self.units / Self::scale(self.decimals);
        u64::try_from(whole).unwrap_or(u64::MAX)
    }

    fn scale(decimals: u8) -> u128 {
        10u128.saturating_pow(decimals as u32)
    }
}

impl fmt::Display for TokenAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = Self::scale(self.decimals);
        let whole = self.units / scale;
        let frac = self.units % scale;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:0width$}", frac, width = self.decimals as usize);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

/// Wrapper for credentials that must never appear in logs.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Check whether a Green ID uses the pre-ledger `GRN-YYYY-NNNNNN` format
pub fn is_legacy_green_id(green_id: &str) -> bool {
    let mut parts = green_id.split('-');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("GRN"), Some(year), Some(serial), None) => {
            year.len() == 4
                && serial.len() == 6
                && year.bytes().all(|b| b.is_ascii_digit())
                && serial.bytes().all(|b| b.is_ascii_digit())
        }
        _ => false,
    }
}
