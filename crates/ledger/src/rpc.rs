//! Ledger RPC boundary
//!
//! The ledger is an opaque service that accepts transactions, reports their
//! receipts and answers read-only contract calls.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use greenafrica_core::{ContractId, EvmAddress, LedgerAccountId, TokenId, TransactionId};

use crate::Result;

/// Receipt status reported for a successful transaction
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Contract addressed either by native id or by EVM address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractTarget {
    Native(ContractId),
    Evm(EvmAddress),
}

impl ContractTarget {
    pub fn evm_address(&self) -> EvmAddress {
        match self {
            ContractTarget::Native(id) => id.to_evm_address(),
            ContractTarget::Evm(address) => *address,
        }
    }
}

impl fmt::Display for ContractTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractTarget::Native(id) => write!(f, "{}", id),
            ContractTarget::Evm(address) => write!(f, "{}", address),
        }
    }
}

/// ABI-level contract argument or return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractValue {
    Address(EvmAddress),
    Bytes32([u8; 32]),
    Uint(u128),
    /// Signed integer, e.g. scaled coordinates
    Int(i128),
    String(String),
    Bool(bool),
}

impl ContractValue {
    pub fn as_uint(&self) -> Option<u128> {
        match self {
            ContractValue::Uint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            ContractValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ContractValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes32(&self) -> Option<[u8; 32]> {
        match self {
            ContractValue::Bytes32(v) => Some(*v),
            _ => None,
        }
    }
}

/// Read-only contract call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractQuery {
    pub target: ContractTarget,
    pub function: String,
    pub params: Vec<ContractValue>,
}

impl ContractQuery {
    pub fn new(target: ContractTarget, function: impl Into<String>, params: Vec<ContractValue>) -> Self {
        Self {
            target,
            function: function.into(),
            params,
        }
    }
}

/// Transactions the gateways submit. Amounts are in smallest token units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerTransaction {
    /// Mint into the token treasury
    TokenMint { token: TokenId, amount: u128 },
    TokenTransfer {
        token: TokenId,
        from: LedgerAccountId,
        to: LedgerAccountId,
        amount: u128,
    },
    /// Admin wipe from an account; reduces total supply
    TokenWipe {
        token: TokenId,
        account: LedgerAccountId,
        amount: u128,
    },
    /// `public_key` is the hex-encoded Ed25519 key controlling the account
    AccountCreate { public_key: String },
    ContractExecute {
        target: ContractTarget,
        function: String,
        params: Vec<ContractValue>,
        gas: u64,
    },
}

impl LedgerTransaction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            LedgerTransaction::TokenMint { .. } => TransactionKind::TokenMint,
            LedgerTransaction::TokenTransfer { .. } => TransactionKind::TokenTransfer,
            LedgerTransaction::TokenWipe { .. } => TransactionKind::TokenWipe,
            LedgerTransaction::AccountCreate { .. } => TransactionKind::AccountCreate,
            LedgerTransaction::ContractExecute { .. } => TransactionKind::ContractExecute,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    TokenMint,
    TokenTransfer,
    TokenWipe,
    AccountCreate,
    ContractExecute,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::TokenMint => "TokenMint",
            TransactionKind::TokenTransfer => "TokenTransfer",
            TransactionKind::TokenWipe => "TokenWipe",
            TransactionKind::AccountCreate => "AccountCreate",
            TransactionKind::ContractExecute => "ContractExecute",
        };
        f.write_str(name)
    }
}

/// Transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub transaction_id: TransactionId,
    pub status: String,
    /// Set for `AccountCreate`
    #[serde(default)]
    pub account_id: Option<LedgerAccountId>,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == STATUS_SUCCESS
    }
}

/// Opaque ledger RPC
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Submit a transaction, returning its id once accepted
    async fn submit(&self, tx: LedgerTransaction) -> Result<TransactionId>;

    /// Receipt for a submitted transaction. May wait for consensus.
    async fn receipt(&self, id: &TransactionId) -> Result<Receipt>;

    /// Read-only contract call
    async fn call(&self, query: ContractQuery) -> Result<Vec<ContractValue>>;

    /// Native token balance in smallest units
    async fn token_balance(&self, token: TokenId, account: LedgerAccountId) -> Result<u128>;
}
