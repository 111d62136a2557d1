//! FTSOv2 price feed reads.
//!
//! The FTSOv2 contract exposes `getFeedById(bytes21)` returning
//! `(value, decimals, timestamp)`. Feed ids are category byte `0x01`
//! (crypto) followed by the ASCII feed name, zero-padded to 21 bytes.

use std::sync::Arc;

use futures::future::join_all;

use crate::chain::abi;
use crate::chain::address::Address;
use crate::chain::rpc::RpcClient;
use crate::error::ChainError;
use crate::registry::TokenRegistry;

const FEED_CATEGORY_CRYPTO: u8 = 0x01;

/// A single oracle reading.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PriceQuote {
    pub symbol: String,
    pub feed: String,
    /// Raw feed value, scaled by `decimals`.
    pub value: u128,
    pub decimals: i8,
    /// Feed timestamp (unix seconds).
    pub timestamp: u64,
}

impl PriceQuote {
    /// Render the USD price as a decimal string. Negative feed decimals
    /// scale the value up; no floating point involved.
    pub fn format_usd(&self) -> String {
        if self.decimals >= 0 {
            crate::chain::units::TokenAmount::from_raw(self.value, self.decimals as u8)
                .format_units()
        } else {
            let shift = (-(self.decimals as i32)) as u32;
            match 10u128
                .checked_pow(shift)
                .and_then(|f| self.value.checked_mul(f))
            {
                Some(scaled) => scaled.to_string(),
                None => format!("{}e{}", self.value, shift),
            }
        }
    }
}

/// Build the 21-byte feed id for a crypto feed name like `FLR/USD`.
pub fn feed_id(name: &str) -> Result<[u8; 21], ChainError> {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > 20 || !name.is_ascii() {
        return Err(ChainError::InvalidFeed {
            name: name.to_string(),
        });
    }
    let mut id = [0u8; 21];
    id[0] = FEED_CATEGORY_CRYPTO;
    id[1..1 + bytes.len()].copy_from_slice(bytes);
    Ok(id)
}

pub struct FtsoOracle {
    rpc: Arc<RpcClient>,
    contract: Address,
}

impl FtsoOracle {
    pub fn new(rpc: Arc<RpcClient>, contract: Address) -> Self {
        Self { rpc, contract }
    }

    /// Read one feed.
    pub async fn read_feed(&self, symbol: &str, feed_name: &str) -> Result<PriceQuote, ChainError> {
        let id = feed_id(feed_name)?;
        let data = self
            .rpc
            .call_contract(&self.contract, &abi::encode_get_feed_by_id(&id))
            .await?;
        let (value, decimals, timestamp) = abi::decode_feed_value(&data)?;
        Ok(PriceQuote {
            symbol: symbol.to_string(),
            feed: feed_name.to_string(),
            value,
            decimals,
            timestamp,
        })
    }

    /// Read every feed in the registry concurrently. Failures are reported
    /// per symbol rather than failing the whole summary.
    pub async fn summary(
        &self,
        registry: &TokenRegistry,
    ) -> Vec<(String, Result<PriceQuote, ChainError>)> {
        let reads = registry.with_feeds().filter_map(|token| {
            let feed = token.feed.clone()?;
            let symbol = token.symbol.clone();
            Some(async move {
                let result = self.read_feed(&symbol, &feed).await;
                (symbol, result)
            })
        });
        join_all(reads).await
    }
}
