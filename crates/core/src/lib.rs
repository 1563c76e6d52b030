//! GreenAfrica Core Types
//!
//! Data structures shared by the ledger, registry, billing and mirror gateways
//! and the points orchestrator.

mod error;
mod phone;
mod records;
mod types;

pub use error::*;
pub use phone::*;
pub use records::*;
pub use types::*;
