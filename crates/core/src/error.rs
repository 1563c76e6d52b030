use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("Invalid ledger entity id: {0}")]
    InvalidEntityId(String),

    #[error("Invalid EVM address: {0}")]
    InvalidEvmAddress(String),

    #[error("Invalid phone number: {0}")]
    InvalidPhone(String),

    #[error("Unknown carrier: {0}")]
    UnknownCarrier(String),

    #[error("Unknown reward type: {0}")]
    UnknownRewardType(String),

    #[error("Unknown transaction type: {0}")]
    UnknownTransactionType(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
