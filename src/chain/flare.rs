//! Flare C-chain adapter.
//!
//! Implements estimation and single-shot submission over JSON-RPC. The
//! whole read-nonce → sign → submit sequence runs under one exclusive
//! lock, so concurrent confirmations can never observe the same nonce.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::chain::abi;
use crate::chain::address::Address;
use crate::chain::rpc::RpcClient;
use crate::chain::tx::LegacyTransaction;
use crate::chain::units::TokenAmount;
use crate::chain::wallet::Wallet;
use crate::chain::{ChainAdapter, ChainOperation, Quote, SubmitReceipt};
use crate::error::ChainError;

/// Gas for a plain native-value transfer.
const NATIVE_TRANSFER_GAS: u64 = 21_000;

/// Headroom multiplier applied to `eth_estimateGas` results, in percent.
const GAS_HEADROOM_PCT: u64 = 120;

pub struct FlareAdapter {
    rpc: Arc<RpcClient>,
    chain_id: u64,
    native_decimals: u8,
    slippage_bps: u16,
    swap_router: Option<Address>,
    /// Serializes nonce read + sign + submit. Held for the whole sequence.
    submit_lock: Mutex<()>,
}

impl FlareAdapter {
    pub fn new(
        rpc: Arc<RpcClient>,
        chain_id: u64,
        native_decimals: u8,
        slippage_bps: u16,
        swap_router: Option<Address>,
    ) -> Self {
        Self {
            rpc,
            chain_id,
            native_decimals,
            slippage_bps,
            swap_router,
            submit_lock: Mutex::new(()),
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn fee_amount(&self, gas_limit: u64, gas_price: u128) -> Result<TokenAmount, ChainError> {
        let raw = gas_price
            .checked_mul(gas_limit as u128)
            .ok_or_else(|| ChainError::QuantityOverflow(format!("{}*{}", gas_price, gas_limit)))?;
        Ok(TokenAmount::from_raw(raw, self.native_decimals))
    }

    /// Build the `(to, value, calldata)` triple for a quoted operation.
    fn build_call(
        &self,
        quote: &Quote,
        from: &Address,
        deadline_unix: u64,
    ) -> Result<(Address, u128, Vec<u8>), ChainError> {
        match &quote.operation {
            ChainOperation::NativeTransfer { to, amount, .. } => {
                Ok((*to, amount.raw(), Vec::new()))
            }
            ChainOperation::Erc20Transfer {
                contract, to, amount, ..
            } => Ok((
                *contract,
                0,
                abi::encode_erc20_transfer(to, amount.raw()),
            )),
            ChainOperation::Swap {
                path, amount_in, ..
            } => {
                let router = self.swap_router.ok_or(ChainError::NoSwapRouter)?;
                let min_out = quote
                    .min_out
                    .ok_or_else(|| {
                        ChainError::MalformedResponse("swap quote missing min_out".to_string())
                    })?
                    .raw();
                Ok((
                    router,
                    0,
                    abi::encode_swap_exact_tokens(
                        amount_in.raw(),
                        min_out,
                        path,
                        from,
                        deadline_unix,
                    ),
                ))
            }
        }
    }

    async fn quote_swap_output(
        &self,
        amount_in: u128,
        path: &[Address],
        out_decimals: u8,
    ) -> Result<TokenAmount, ChainError> {
        let router = self.swap_router.ok_or(ChainError::NoSwapRouter)?;
        let data = abi::encode_get_amounts_out(amount_in, path);
        let ret = self.rpc.call_contract(&router, &data).await?;
        let amounts = abi::decode_u128_array(&ret)?;
        let out = amounts.last().copied().ok_or_else(|| {
            ChainError::MalformedResponse("getAmountsOut returned an empty array".to_string())
        })?;
        Ok(TokenAmount::from_raw(out, out_decimals))
    }
}

#[async_trait]
impl ChainAdapter for FlareAdapter {
    async fn estimate(&self, from: &Address, op: &ChainOperation) -> Result<Quote, ChainError> {
        let gas_price = self.rpc.gas_price().await?;

        match op {
            ChainOperation::NativeTransfer { .. } => {
                let fee = self.fee_amount(NATIVE_TRANSFER_GAS, gas_price)?;
                Ok(Quote {
                    operation: op.clone(),
                    gas_limit: NATIVE_TRANSFER_GAS,
                    gas_price,
                    fee,
                    expected_out: None,
                    min_out: None,
                })
            }
            ChainOperation::Erc20Transfer {
                contract, to, amount, ..
            } => {
                let data = abi::encode_erc20_transfer(to, amount.raw());
                let estimated = self.rpc.estimate_gas(from, contract, 0, &data).await?;
                let gas_limit = estimated.saturating_mul(GAS_HEADROOM_PCT) / 100;
                let fee = self.fee_amount(gas_limit, gas_price)?;
                Ok(Quote {
                    operation: op.clone(),
                    gas_limit,
                    gas_price,
                    fee,
                    expected_out: None,
                    min_out: None,
                })
            }
            ChainOperation::Swap {
                path,
                amount_in,
                out_decimals,
                ..
            } => {
                let router = self.swap_router.ok_or(ChainError::NoSwapRouter)?;
                let expected_out = self
                    .quote_swap_output(amount_in.raw(), path, *out_decimals)
                    .await?;
                let min_out = expected_out.mul_bps_floor(10_000 - self.slippage_bps);

                // Gas estimation needs plausible calldata; the deadline in
                // it does not affect gas, the real one is set at submit.
                let provisional_deadline = (Utc::now().timestamp() as u64).saturating_add(600);
                let data = abi::encode_swap_exact_tokens(
                    amount_in.raw(),
                    min_out.raw(),
                    path,
                    from,
                    provisional_deadline,
                );
                let estimated = self.rpc.estimate_gas(from, &router, 0, &data).await?;
                let gas_limit = estimated.saturating_mul(GAS_HEADROOM_PCT) / 100;
                let fee = self.fee_amount(gas_limit, gas_price)?;

                Ok(Quote {
                    operation: op.clone(),
                    gas_limit,
                    gas_price,
                    fee,
                    expected_out: Some(expected_out),
                    min_out: Some(min_out),
                })
            }
        }
    }

    async fn sign_and_submit(
        &self,
        wallet: &Wallet,
        quote: &Quote,
        deadline: DateTime<Utc>,
    ) -> Result<SubmitReceipt, ChainError> {
        let _guard = self.submit_lock.lock().await;

        let from = wallet.address();
        let deadline_unix = deadline.timestamp().max(0) as u64;

        // Failures before the raw send are definitive: nothing reached the
        // chain and the nonce was not consumed.
        let nonce = match self.rpc.transaction_count(&from).await {
            Ok(n) => n,
            Err(e) => return Ok(SubmitReceipt::failed(format!("nonce fetch failed: {}", e))),
        };

        let (to, value, data) = match self.build_call(quote, &from, deadline_unix) {
            Ok(parts) => parts,
            Err(e) => return Ok(SubmitReceipt::failed(e.to_string())),
        };

        let tx = LegacyTransaction {
            nonce,
            gas_price: quote.gas_price,
            gas_limit: quote.gas_limit,
            to: Some(to),
            value,
            data,
        };

        let signed = match tx.sign(wallet.signing_key(), self.chain_id) {
            Ok(s) => s,
            Err(e) => return Ok(SubmitReceipt::failed(e.to_string())),
        };

        tracing::debug!(
            nonce,
            gas_limit = quote.gas_limit,
            tx_hash = %signed.hash_hex(),
            "submitting transaction"
        );

        match self.rpc.send_raw_transaction(&signed.raw_hex()).await {
            Ok(hash) => Ok(SubmitReceipt::submitted(hash)),
            // A structured RPC error is the node rejecting the tx before
            // inclusion; the nonce is still free.
            Err(ChainError::Rpc { code, message }) => Ok(SubmitReceipt::failed(format!(
                "rejected by node ({}): {}",
                code, message
            ))),
            // Timeouts and dropped connections are ambiguous: the tx may
            // or may not be in flight. Never resend.
            Err(e) => Err(e),
        }
    }

    async fn native_balance(&self, address: &Address) -> Result<TokenAmount, ChainError> {
        let raw = self.rpc.balance(address).await?;
        Ok(TokenAmount::from_raw(raw, self.native_decimals))
    }

    async fn erc20_balance(
        &self,
        contract: &Address,
        owner: &Address,
        decimals: u8,
    ) -> Result<TokenAmount, ChainError> {
        let data = abi::encode_balance_of(owner);
        let ret = self.rpc.call_contract(contract, &data).await?;
        let raw = abi::decode_u128(&ret)?;
        Ok(TokenAmount::from_raw(raw, decimals))
    }
}
