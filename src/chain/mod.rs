//! Chain access: operations, quotes, and the adapter seam.
//!
//! The [`ChainAdapter`] trait is the only path from the agent to the chain.
//! Estimation is read-only and consumes no nonce; submission signs locally
//! and sends exactly one raw transaction. Nothing in this layer retries.

pub mod abi;
pub mod address;
pub mod flare;
pub mod oracle;
pub mod rpc;
pub mod tx;
pub mod units;
pub mod wallet;

pub use address::Address;
pub use flare::FlareAdapter;
pub use oracle::{FtsoOracle, PriceQuote};
pub use rpc::RpcClient;
pub use units::TokenAmount;
pub use wallet::Wallet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ChainError;

/// A fully validated operation, ready for quoting. Amounts are already in
/// base units; symbols are canonical registry symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChainOperation {
    NativeTransfer {
        symbol: String,
        to: Address,
        amount: TokenAmount,
    },
    Erc20Transfer {
        symbol: String,
        contract: Address,
        to: Address,
        amount: TokenAmount,
    },
    Swap {
        from_symbol: String,
        to_symbol: String,
        /// Hop addresses, wrapped-native substituted for the native coin.
        path: Vec<Address>,
        amount_in: TokenAmount,
        out_decimals: u8,
    },
}

impl ChainOperation {
    /// Short human label used in previews and logs.
    pub fn describe(&self) -> String {
        match self {
            Self::NativeTransfer { symbol, to, amount } => {
                format!("send {} {} to {}", amount, symbol, to)
            }
            Self::Erc20Transfer {
                symbol, to, amount, ..
            } => format!("send {} {} to {}", amount, symbol, to),
            Self::Swap {
                from_symbol,
                to_symbol,
                amount_in,
                ..
            } => format!("swap {} {} for {}", amount_in, from_symbol, to_symbol),
        }
    }
}

/// A frozen cost/output estimate. Every number here is exact and is what
/// gets signed if the user confirms; nothing recomputes between preview
/// and submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quote {
    pub operation: ChainOperation,
    pub gas_limit: u64,
    pub gas_price: u128,
    /// `gas_limit * gas_price`, in native base units.
    pub fee: TokenAmount,
    /// Quoted output units (swaps only).
    pub expected_out: Option<TokenAmount>,
    /// Slippage floor already applied to `expected_out` (swaps only).
    pub min_out: Option<TokenAmount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitStatus {
    Submitted,
    Failed,
}

/// Outcome of a submission attempt that reached a definitive state.
/// Ambiguous outcomes (timeouts mid-send) surface as errors instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    pub status: SubmitStatus,
    pub tx_hash: Option<String>,
    pub error_detail: Option<String>,
}

impl SubmitReceipt {
    pub fn submitted(tx_hash: String) -> Self {
        Self {
            status: SubmitStatus::Submitted,
            tx_hash: Some(tx_hash),
            error_detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: SubmitStatus::Failed,
            tx_hash: None,
            error_detail: Some(detail.into()),
        }
    }
}

/// The one seam between the agent and the chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Quote an operation. Read-only: no nonce is consumed and nothing is
    /// signed.
    async fn estimate(&self, from: &Address, op: &ChainOperation) -> Result<Quote, ChainError>;

    /// Sign the quoted operation and submit it once.
    ///
    /// Definitive node rejections come back as `Ok` receipts with
    /// `Failed` status (the nonce was not consumed). A timeout during the
    /// send itself is ambiguous and comes back as `ChainError::Timeout`;
    /// the adapter never retries on its own.
    async fn sign_and_submit(
        &self,
        wallet: &Wallet,
        quote: &Quote,
        deadline: DateTime<Utc>,
    ) -> Result<SubmitReceipt, ChainError>;

    async fn native_balance(&self, address: &Address) -> Result<TokenAmount, ChainError>;

    async fn erc20_balance(
        &self,
        contract: &Address,
        owner: &Address,
        decimals: u8,
    ) -> Result<TokenAmount, ChainError>;
}
