//! Closed token registry.
//!
//! Every symbol the agent will touch is registered up front with its
//! decimals, on-chain form, and optional oracle feed. Routing never falls
//! through to a guessed token: an unregistered symbol is a validation
//! failure, not a lookup miss.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::chain::address::Address;
use crate::error::ValidationError;

/// How a registered symbol exists on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AssetKind {
    /// The chain's native coin.
    Native,
    /// An ERC-20 contract.
    Erc20 { address: Address },
    /// Oracle feed only; cannot be sent or swapped.
    PriceOnly,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub symbol: String,
    pub decimals: u8,
    pub asset: AssetKind,
    /// FTSO feed name, e.g. `FLR/USD`.
    #[serde(default)]
    pub feed: Option<String>,
}

impl TokenInfo {
    pub fn is_transferable(&self) -> bool {
        !matches!(self.asset, AssetKind::PriceOnly)
    }
}

/// The closed set of known tokens plus user-friendly aliases.
#[derive(Debug, Clone)]
pub struct TokenRegistry {
    tokens: BTreeMap<String, TokenInfo>,
    aliases: BTreeMap<String, String>,
    wrapped_native: Option<String>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            tokens: BTreeMap::new(),
            aliases: BTreeMap::new(),
            wrapped_native: None,
        }
    }

    /// The default Flare mainnet registry: native FLR, canonical WNat, and
    /// the price-only feeds the FTSO publishes. Deployment config can add
    /// further ERC-20 rows.
    pub fn flare_defaults() -> Self {
        let mut registry = Self::new();

        registry.insert(TokenInfo {
            symbol: "FLR".to_string(),
            decimals: 18,
            asset: AssetKind::Native,
            feed: Some("FLR/USD".to_string()),
        });
        registry.insert(TokenInfo {
            symbol: "WFLR".to_string(),
            decimals: 18,
            // Canonical WNat contract on Flare mainnet,
            // 0x1D80c49BbbCd1C0911346656B529DF9E5c2F783d.
            asset: AssetKind::Erc20 {
                address: Address::from_bytes([
                    0x1d, 0x80, 0xc4, 0x9b, 0xbb, 0xcd, 0x1c, 0x09, 0x11, 0x34, 0x66, 0x56, 0xb5,
                    0x29, 0xdf, 0x9e, 0x5c, 0x2f, 0x78, 0x3d,
                ]),
            },
            feed: Some("FLR/USD".to_string()),
        });

        for symbol in ["BTC", "ETH", "XRP", "DOGE", "ADA", "ALGO", "SOL"] {
            registry.insert(TokenInfo {
                symbol: symbol.to_string(),
                decimals: 0,
                asset: AssetKind::PriceOnly,
                feed: Some(format!("{}/USD", symbol)),
            });
        }

        for (alias, canonical) in [
            ("FLARE", "FLR"),
            ("BITCOIN", "BTC"),
            ("ETHEREUM", "ETH"),
            ("ETHER", "ETH"),
            ("RIPPLE", "XRP"),
            ("DOGECOIN", "DOGE"),
            ("CARDANO", "ADA"),
            ("ALGORAND", "ALGO"),
            ("SOLANA", "SOL"),
        ] {
            registry.add_alias(alias, canonical);
        }

        registry.wrapped_native = Some("WFLR".to_string());
        registry
    }

    pub fn insert(&mut self, token: TokenInfo) {
        let symbol = token.symbol.to_uppercase();
        self.tokens.insert(
            symbol.clone(),
            TokenInfo {
                symbol,
                ..token
            },
        );
    }

    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.aliases
            .insert(alias.to_uppercase(), canonical.to_uppercase());
    }

    pub fn set_wrapped_native(&mut self, symbol: &str) {
        self.wrapped_native = Some(symbol.to_uppercase());
    }

    /// Resolve a raw user symbol (case-insensitive, alias-aware).
    pub fn resolve(&self, raw: &str) -> Option<&TokenInfo> {
        let upper = raw.trim().to_uppercase();
        let canonical = self.aliases.get(&upper).cloned().unwrap_or(upper);
        self.tokens.get(&canonical)
    }

    /// Resolve a symbol that must be sendable/swappable. A registered but
    /// price-only symbol gets its own error so the user is not told the
    /// token is unknown.
    pub fn transferable(&self, raw: &str) -> Result<&TokenInfo, ValidationError> {
        match self.resolve(raw) {
            Some(token) if token.is_transferable() => Ok(token),
            Some(token) => Err(ValidationError::NotTransferable {
                symbol: token.symbol.clone(),
            }),
            None => Err(ValidationError::UnknownToken {
                symbol: raw.trim().to_uppercase(),
            }),
        }
    }

    /// The ERC-20 address to use for this token in a swap path. Native
    /// assets route through the wrapped-native contract.
    pub fn swap_address(&self, token: &TokenInfo) -> Option<Address> {
        match &token.asset {
            AssetKind::Erc20 { address } => Some(*address),
            AssetKind::Native => {
                let wrapped = self.wrapped_native.as_ref()?;
                match &self.tokens.get(wrapped)?.asset {
                    AssetKind::Erc20 { address } => Some(*address),
                    _ => None,
                }
            }
            AssetKind::PriceOnly => None,
        }
    }

    /// All tokens with a price feed, for market summaries.
    pub fn with_feeds(&self) -> impl Iterator<Item = &TokenInfo> {
        self.tokens.values().filter(|t| t.feed.is_some())
    }

    /// Symbol of the chain's native coin, if one is registered.
    pub fn native_symbol(&self) -> Option<&str> {
        self.tokens
            .values()
            .find(|t| matches!(t.asset, AssetKind::Native))
            .map(|t| t.symbol.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenInfo> {
        self.tokens.values()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::flare_defaults()
    }
}
