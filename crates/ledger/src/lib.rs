//! GreenAfrica Ledger Gateway
//!
//! Mints, burns and reads GreenPoints on the distributed ledger.
//!
//! Two token backends sit behind [`TokenLedger`]:
//! - **Native**: the ledger's own token service. A mint is two transactions
//!   (mint to the treasury, then transfer to the user); both must succeed.
//! - **Contract**: an ERC-20 style contract called through `ContractExecute`,
//!   used for accounts that only have an EVM address.
//!
//! Both talk to the ledger through [`LedgerRpc`], implemented by
//! [`MockLedger`] (in-memory, for tests and `mode = mock`) and
//! [`HttpLedgerRpc`] (signed JSON-RPC).

mod gateway;
mod http;
mod mock;
mod rpc;

pub use gateway::{
    AccountRef, Backend, ContractTokenLedger, LedgerGateway, NativeTokenLedger, NewLedgerAccount,
    Submitter, TokenLedger,
};
pub use http::HttpLedgerRpc;
pub use mock::{DeviceEntry, MockLedger, RegistryEntry};
pub use rpc::{
    ContractQuery, ContractTarget, ContractValue, LedgerRpc, LedgerTransaction, Receipt,
    TransactionKind, STATUS_SUCCESS,
};

use thiserror::Error;

use greenafrica_core::TransactionId;
use greenafrica_crypto::CryptoError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger not configured: {0} is missing")]
    NotConfigured(&'static str),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("{kind} receipt not received within {secs}s")]
    Timeout { kind: TransactionKind, secs: u64 },

    #[error("{kind} failed with status {status}")]
    ReceiptStatus { kind: TransactionKind, status: String },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Minted to treasury ({mint_tx}) but transfer to user failed: {reason}")]
    PartialMint { mint_tx: TransactionId, reason: String },

    #[error("Unexpected ledger response: {0}")]
    UnexpectedResponse(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl LedgerError {
    /// Missing credentials or token identifiers
    pub fn is_config_error(&self) -> bool {
        matches!(self, LedgerError::NotConfigured(_) | LedgerError::Crypto(_))
    }

    /// Whether re-invoking the whole operation may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Rpc(_)
                | LedgerError::Timeout { .. }
                | LedgerError::ReceiptStatus { .. }
                | LedgerError::PartialMint { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
