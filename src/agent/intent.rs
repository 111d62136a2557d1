//! Typed operation intents.
//!
//! Every consumer matches on a closed `IntentKind`, so adding an operation
//! is a compile-time event, not a stringly-typed convention. A value-moving
//! kind only ever carries fully validated parameters; anything missing or
//! malformed is downgraded to `NeedsClarification` at routing time.

use serde::Serialize;

use crate::chain::Address;
use crate::chain::units::TokenAmount;

/// Validated parameters for a token transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendParams {
    pub symbol: String,
    pub amount: TokenAmount,
    pub to: Address,
}

/// Validated parameters for a token swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapParams {
    pub from_symbol: String,
    pub to_symbol: String,
    pub amount: TokenAmount,
}

/// What a routed utterance asks the agent to do.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntentKind {
    SendToken(SendParams),
    SwapToken(SwapParams),
    GenerateWallet,
    QueryBalance { symbol: Option<String> },
    QueryMarket { symbol: Option<String> },
    /// A recognizable operation with a missing or malformed parameter.
    /// `reason` is precise enough to show the user verbatim.
    NeedsClarification { reason: String },
    Unknown,
}

impl IntentKind {
    /// True for operations that move value and therefore require the
    /// preview-and-confirm gate.
    pub fn is_value_moving(&self) -> bool {
        matches!(self, Self::SendToken(_) | Self::SwapToken(_))
    }

    /// Stable label for logs and payloads.
    pub fn label(&self) -> &'static str {
        match self {
            Self::SendToken(_) => "send_token",
            Self::SwapToken(_) => "swap_token",
            Self::GenerateWallet => "generate_wallet",
            Self::QueryBalance { .. } => "query_balance",
            Self::QueryMarket { .. } => "query_market",
            Self::NeedsClarification { .. } => "needs_clarification",
            Self::Unknown => "unknown",
        }
    }
}

/// A routed utterance: the typed kind plus routing metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutedIntent {
    pub kind: IntentKind,
    /// Classifier confidence; 0 when classification failed outright.
    pub confidence: f32,
    pub raw_text: String,
}

impl RoutedIntent {
    pub fn unknown(raw_text: impl Into<String>) -> Self {
        Self {
            kind: IntentKind::Unknown,
            confidence: 0.0,
            raw_text: raw_text.into(),
        }
    }
}
