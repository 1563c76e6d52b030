//! Ledger Gateway
//!
//! [`TokenLedger`] is implemented once per backend. [`LedgerGateway`] picks
//! the backend per call from the account reference: a native ledger identity
//! goes to [`NativeTokenLedger`], an EVM address to [`ContractTokenLedger`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use greenafrica_core::{EvmAddress, LedgerAccountId, TokenAmount, TokenId, TransactionId};
use greenafrica_crypto::SigningKeypair;
use greenafrica_settings::{GatewayMode, LedgerSettings};

use crate::http::HttpLedgerRpc;
use crate::mock::MockLedger;
use crate::rpc::{
    ContractQuery, ContractTarget, ContractValue, LedgerRpc, LedgerTransaction, Receipt,
};
use crate::{LedgerError, Result};

/// Gas for token contract mint/burn
const TOKEN_GAS: u64 = 200_000;

/// Account as seen by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountRef {
    /// Native ledger identity
    Native(LedgerAccountId),
    /// EVM-style address only
    Evm(EvmAddress),
}

impl AccountRef {
    pub fn evm_address(&self) -> EvmAddress {
        match self {
            AccountRef::Native(id) => id.to_evm_address(),
            AccountRef::Evm(address) => *address,
        }
    }

    pub fn backend(&self) -> Backend {
        match self {
            AccountRef::Native(_) => Backend::Native,
            AccountRef::Evm(_) => Backend::Contract,
        }
    }
}

impl std::fmt::Display for AccountRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountRef::Native(id) => write!(f, "{}", id),
            AccountRef::Evm(address) => write!(f, "{}", address),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Native,
    Contract,
}

/// Mint, burn and balance for whole GreenPoints
#[async_trait]
pub trait TokenLedger: Send + Sync {
    fn backend(&self) -> Backend;

    async fn mint(&self, account: &AccountRef, points: u64) -> Result<TransactionId>;

    async fn burn(&self, account: &AccountRef, points: u64) -> Result<TransactionId>;

    async fn balance_of(&self, account: &AccountRef) -> Result<TokenAmount>;
}

/// Submits a transaction and waits for its receipt with an upper bound
#[derive(Clone)]
pub struct Submitter {
    rpc: Arc<dyn LedgerRpc>,
    receipt_timeout: Duration,
}

impl Submitter {
    pub fn new(rpc: Arc<dyn LedgerRpc>, receipt_timeout: Duration) -> Self {
        Self {
            rpc,
            receipt_timeout,
        }
    }

    pub fn rpc(&self) -> &Arc<dyn LedgerRpc> {
        &self.rpc
    }

    /// Submit `tx` and return its successful receipt.
    ///
    /// A receipt that does not arrive within the timeout is a failure, as is
    /// any status other than `SUCCESS`.
    pub async fn submit_and_confirm(&self, tx: LedgerTransaction) -> Result<Receipt> {
        let kind = tx.kind();
        let id = self.rpc.submit(tx).await?;
        debug!("Submitted {} {}", kind, id);

        let receipt = tokio::time::timeout(self.receipt_timeout, self.rpc.receipt(&id))
            .await
            .map_err(|_| LedgerError::Timeout {
                kind,
                secs: self.receipt_timeout.as_secs(),
            })??;

        if !receipt.is_success() {
            return Err(LedgerError::ReceiptStatus {
                kind,
                status: receipt.status,
            });
        }
        Ok(receipt)
    }
}

fn scale(points: u64, decimals: u8) -> Result<u128> {
    if points == 0 {
        return Err(LedgerError::InvalidAmount("points must be positive".to_string()));
    }
    10u128
        .checked_pow(decimals as u32)
        .and_then(|factor| (points as u128).checked_mul(factor))
        .ok_or_else(|| LedgerError::InvalidAmount(format!("{} points overflow at {} decimals", points, decimals)))
}

/// Ledger-native token service backend
pub struct NativeTokenLedger {
    submitter: Submitter,
    token: Option<TokenId>,
    treasury: Option<LedgerAccountId>,
    decimals: u8,
}

impl NativeTokenLedger {
    pub fn new(
        submitter: Submitter,
        token: Option<TokenId>,
        treasury: Option<LedgerAccountId>,
        decimals: u8,
    ) -> Self {
        Self {
            submitter,
            token,
            treasury,
            decimals,
        }
    }

    fn token(&self) -> Result<TokenId> {
        self.token.ok_or(LedgerError::NotConfigured("ledger.token_id"))
    }

    fn native_id(account: &AccountRef) -> Result<LedgerAccountId> {
        match account {
            AccountRef::Native(id) => Ok(*id),
            AccountRef::Evm(address) => Err(LedgerError::UnexpectedResponse(format!(
                "native backend cannot address {}",
                address
            ))),
        }
    }
}

#[async_trait]
impl TokenLedger for NativeTokenLedger {
    fn backend(&self) -> Backend {
        Backend::Native
    }

    /// Mint to the treasury, then transfer the same quantity to the user.
    async fn mint(&self, account: &AccountRef, points: u64) -> Result<TransactionId> {
        let token = self.token()?;
        let treasury = self.treasury.ok_or(LedgerError::NotConfigured("ledger.operator_id"))?;
        let user = Self::native_id(account)?;
        let amount = scale(points, self.decimals)?;

        info!("Minting {} GreenPoints ({} units) to treasury {}", points, amount, treasury);
        let minted = self
            .submitter
            .submit_and_confirm(LedgerTransaction::TokenMint { token, amount })
            .await?;

        let transfer = LedgerTransaction::TokenTransfer {
            token,
            from: treasury,
            to: user,
            amount,
        };
        match self.submitter.submit_and_confirm(transfer).await {
            Ok(receipt) => {
                info!("Transferred {} GreenPoints to {} ({})", points, user, receipt.transaction_id);
                Ok(receipt.transaction_id)
            }
            Err(e) => {
                error!(
                    "Mint {} succeeded but transfer to {} failed: {}",
                    minted.transaction_id, user, e
                );
                Err(LedgerError::PartialMint {
                    mint_tx: minted.transaction_id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Admin wipe from the user's account
    async fn burn(&self, account: &AccountRef, points: u64) -> Result<TransactionId> {
        let token = self.token()?;
        let user = Self::native_id(account)?;
        let amount = scale(points, self.decimals)?;

        info!("Burning {} GreenPoints ({} units) from {}", points, amount, user);
        let receipt = self
            .submitter
            .submit_and_confirm(LedgerTransaction::TokenWipe {
                token,
                account: user,
                amount,
            })
            .await?;
        Ok(receipt.transaction_id)
    }

    async fn balance_of(&self, account: &AccountRef) -> Result<TokenAmount> {
        let token = self.token()?;
        let user = Self::native_id(account)?;
        let units = self.submitter.rpc().token_balance(token, user).await?;
        Ok(TokenAmount::new(units, self.decimals))
    }
}

/// ERC-20 style token contract backend
pub struct ContractTokenLedger {
    submitter: Submitter,
    token: Option<EvmAddress>,
    decimals: OnceCell<u8>,
}

impl ContractTokenLedger {
    pub fn new(submitter: Submitter, token: Option<EvmAddress>) -> Self {
        Self {
            submitter,
            token,
            decimals: OnceCell::new(),
        }
    }

    fn target(&self) -> Result<ContractTarget> {
        self.token
            .map(ContractTarget::Evm)
            .ok_or(LedgerError::NotConfigured("ledger.token_address"))
    }

    async fn first_uint(&self, query: ContractQuery) -> Result<u128> {
        let function = query.function.clone();
        let values = self.submitter.rpc().call(query).await?;
        values
            .first()
            .and_then(ContractValue::as_uint)
            .ok_or_else(|| LedgerError::UnexpectedResponse(format!("{}() returned {:?}", function, values)))
    }

    /// Token decimals, queried once
    async fn decimals(&self) -> Result<u8> {
        let target = self.target()?;
        self.decimals
            .get_or_try_init(|| async {
                let raw = self
                    .first_uint(ContractQuery::new(target, "decimals", vec![]))
                    .await?;
                let decimals = u8::try_from(raw)
                    .map_err(|_| LedgerError::UnexpectedResponse(format!("decimals() = {}", raw)))?;
                debug!("Token contract {} uses {} decimals", target, decimals);
                Ok::<u8, LedgerError>(decimals)
            })
            .await
            .copied()
    }

    async fn execute(&self, function: &str, account: &AccountRef, points: u64) -> Result<TransactionId> {
        let target = self.target()?;
        let amount = scale(points, self.decimals().await?)?;
        let holder = account.evm_address();

        info!("Calling {}({}, {} units) on {}", function, holder, amount, target);
        let receipt = self
            .submitter
            .submit_and_confirm(LedgerTransaction::ContractExecute {
                target,
                function: function.to_string(),
                params: vec![ContractValue::Address(holder), ContractValue::Uint(amount)],
                gas: TOKEN_GAS,
            })
            .await?;
        Ok(receipt.transaction_id)
    }
}

#[async_trait]
impl TokenLedger for ContractTokenLedger {
    fn backend(&self) -> Backend {
        Backend::Contract
    }

    async fn mint(&self, account: &AccountRef, points: u64) -> Result<TransactionId> {
        self.execute("mint", account, points).await
    }

    async fn burn(&self, account: &AccountRef, points: u64) -> Result<TransactionId> {
        self.execute("burn", account, points).await
    }

    async fn balance_of(&self, account: &AccountRef) -> Result<TokenAmount> {
        let target = self.target()?;
        let decimals = self.decimals().await?;
        let units = self
            .first_uint(ContractQuery::new(
                target,
                "balanceOf",
                vec![ContractValue::Address(account.evm_address())],
            ))
            .await?;
        Ok(TokenAmount::new(units, decimals))
    }
}

/// Freshly created custodial ledger account
#[derive(Debug)]
pub struct NewLedgerAccount {
    pub account_id: LedgerAccountId,
    pub evm_address: EvmAddress,
    pub keypair: SigningKeypair,
}

/// Ledger Gateway
///
/// Built once from [`LedgerSettings`] and shared by reference.
pub struct LedgerGateway {
    submitter: Submitter,
    native: NativeTokenLedger,
    contract: ContractTokenLedger,
}

impl LedgerGateway {
    pub fn new(rpc: Arc<dyn LedgerRpc>, settings: &LedgerSettings) -> Self {
        let submitter = Submitter::new(rpc, Duration::from_secs(settings.receipt_timeout_secs));
        Self {
            native: NativeTokenLedger::new(
                submitter.clone(),
                settings.token_id,
                settings.operator_id,
                settings.token_decimals,
            ),
            contract: ContractTokenLedger::new(submitter.clone(), settings.token_address),
            submitter,
        }
    }

    /// Build the gateway for the configured mode.
    ///
    /// Mock mode returns the [`MockLedger`] as well so callers can seed it.
    pub fn from_settings(settings: &LedgerSettings) -> Result<(Self, Option<MockLedger>)> {
        match settings.mode {
            GatewayMode::Mock => {
                let mock = match settings.operator_id {
                    Some(operator) => MockLedger::new(operator),
                    None => MockLedger::default(),
                };
                info!("[MOCK] Ledger gateway using in-memory ledger");
                Ok((Self::new(Arc::new(mock.clone()), settings), Some(mock)))
            }
            GatewayMode::Live => {
                let rpc = HttpLedgerRpc::new(settings)?;
                Ok((Self::new(Arc::new(rpc), settings), None))
            }
        }
    }

    pub fn rpc(&self) -> &Arc<dyn LedgerRpc> {
        self.submitter.rpc()
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    /// Backend serving `account`
    pub fn backend_for(&self, account: &AccountRef) -> &dyn TokenLedger {
        match account.backend() {
            Backend::Native => &self.native,
            Backend::Contract => &self.contract,
        }
    }

    pub async fn mint(&self, account: &AccountRef, points: u64) -> Result<TransactionId> {
        self.backend_for(account).mint(account, points).await
    }

    pub async fn burn(&self, account: &AccountRef, points: u64) -> Result<TransactionId> {
        self.backend_for(account).burn(account, points).await
    }

    pub async fn balance_of(&self, account: &AccountRef) -> Result<TokenAmount> {
        self.backend_for(account).balance_of(account).await
    }

    /// Create a new ledger account controlled by a fresh Ed25519 key
    pub async fn create_account(&self) -> Result<NewLedgerAccount> {
        let keypair = SigningKeypair::generate();
        let receipt = self
            .submitter
            .submit_and_confirm(LedgerTransaction::AccountCreate {
                public_key: keypair.public_key_hex(),
            })
            .await?;
        let account_id = receipt.account_id.ok_or_else(|| {
            LedgerError::UnexpectedResponse(format!(
                "receipt {} carries no account id",
                receipt.transaction_id
            ))
        })?;
        info!("Created ledger account {}", account_id);
        Ok(NewLedgerAccount {
            account_id,
            evm_address: account_id.to_evm_address(),
            keypair,
        })
    }
}
