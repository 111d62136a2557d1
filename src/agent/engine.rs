//! Preview/confirm gate for value-moving operations.
//!
//! Every send or swap passes through a two-phase exchange: the agent shows
//! a priced preview, and only the exact reply `CONFIRM` within the TTL
//! executes it. Any other reply cancels. The numbers shown in the preview
//! are the numbers submitted: the quote is fingerprinted at preview time
//! and checked again before it is handed to the signer.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::chain::units::TokenAmount;
use crate::chain::{ChainOperation, Quote};
use crate::error::EngineError;

/// The only reply that executes a pending preview.
pub const CONFIRM_TOKEN: &str = "CONFIRM";

/// How a user reply resolves a pending preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDisposition {
    Confirm,
    Cancel,
}

/// A priced operation waiting for the user's decision.
#[derive(Debug, Clone)]
pub struct PendingPreview {
    pub id: Uuid,
    pub quote: Quote,
    /// One-line operation description, reused in conflict and cancel
    /// notices.
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    fingerprint: [u8; 32],
}

/// The confirmation state machine. It owns no session state: callers pass
/// the session's pending slot in, which keeps every transition synchronous
/// and testable.
#[derive(Debug, Clone, Copy)]
pub struct ConfirmationEngine {
    ttl_secs: u64,
}

impl ConfirmationEngine {
    pub fn new(ttl_secs: u64) -> Self {
        Self { ttl_secs }
    }

    /// Stage a quote for confirmation. Refused while another preview is
    /// pending; the existing preview is left untouched.
    pub fn preview(
        &self,
        slot: &mut Option<PendingPreview>,
        quote: Quote,
        now: DateTime<Utc>,
    ) -> Result<PendingPreview, EngineError> {
        if let Some(existing) = slot {
            return Err(EngineError::PendingConflict {
                pending: existing.summary.clone(),
            });
        }
        let preview = PendingPreview {
            id: Uuid::new_v4(),
            summary: quote.operation.describe(),
            created_at: now,
            expires_at: now + Duration::seconds(self.ttl_secs as i64),
            fingerprint: fingerprint(&quote),
            quote,
        };
        *slot = Some(preview.clone());
        Ok(preview)
    }

    /// Decide what a reply does to a pending preview. Only the exact word
    /// `CONFIRM` (case-insensitive, surrounding whitespace ignored)
    /// confirms; every other reply cancels.
    pub fn classify_reply(reply: &str) -> ReplyDisposition {
        if reply.trim().eq_ignore_ascii_case(CONFIRM_TOKEN) {
            ReplyDisposition::Confirm
        } else {
            ReplyDisposition::Cancel
        }
    }

    /// Hand the pending preview over for submission. The slot is cleared
    /// whatever the outcome: an expired or tampered preview is gone, not
    /// retried.
    pub fn take_for_submit(
        &self,
        slot: &mut Option<PendingPreview>,
        now: DateTime<Utc>,
    ) -> Result<PendingPreview, EngineError> {
        let preview = slot.take().ok_or(EngineError::NothingPending)?;
        if now > preview.expires_at {
            return Err(EngineError::QuoteExpired {
                expired_at: preview.expires_at.to_rfc3339(),
            });
        }
        if fingerprint(&preview.quote) != preview.fingerprint {
            return Err(EngineError::PreviewTampered);
        }
        Ok(preview)
    }

    /// Drop the pending preview, returning it for the cancellation notice.
    pub fn cancel(&self, slot: &mut Option<PendingPreview>) -> Result<PendingPreview, EngineError> {
        slot.take().ok_or(EngineError::NothingPending)
    }
}

/// Digest over every field that reaches the chain, recomputed at
/// confirmation so the submitted numbers are provably the previewed ones.
fn fingerprint(quote: &Quote) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hash_operation(&mut hasher, &quote.operation);
    hasher.update(&quote.gas_limit.to_be_bytes());
    hasher.update(&quote.gas_price.to_be_bytes());
    hash_amount(&mut hasher, &quote.fee);
    hash_optional(&mut hasher, quote.expected_out.as_ref());
    hash_optional(&mut hasher, quote.min_out.as_ref());
    *hasher.finalize().as_bytes()
}

fn hash_str(hasher: &mut blake3::Hasher, text: &str) {
    hasher.update(&(text.len() as u64).to_be_bytes());
    hasher.update(text.as_bytes());
}

fn hash_amount(hasher: &mut blake3::Hasher, amount: &TokenAmount) {
    hasher.update(&amount.raw().to_be_bytes());
    hasher.update(&[amount.decimals()]);
}

fn hash_optional(hasher: &mut blake3::Hasher, amount: Option<&TokenAmount>) {
    match amount {
        Some(amount) => {
            hasher.update(&[1]);
            hash_amount(hasher, amount);
        }
        None => {
            hasher.update(&[0]);
        }
    }
}

fn hash_operation(hasher: &mut blake3::Hasher, op: &ChainOperation) {
    match op {
        ChainOperation::NativeTransfer { symbol, to, amount } => {
            hasher.update(&[0]);
            hash_str(hasher, symbol);
            hasher.update(to.as_bytes());
            hash_amount(hasher, amount);
        }
        ChainOperation::Erc20Transfer {
            symbol,
            contract,
            to,
            amount,
        } => {
            hasher.update(&[1]);
            hash_str(hasher, symbol);
            hasher.update(contract.as_bytes());
            hasher.update(to.as_bytes());
            hash_amount(hasher, amount);
        }
        ChainOperation::Swap {
            from_symbol,
            to_symbol,
            path,
            amount_in,
            out_decimals,
        } => {
            hasher.update(&[2]);
            hash_str(hasher, from_symbol);
            hash_str(hasher, to_symbol);
            hasher.update(&(path.len() as u64).to_be_bytes());
            for hop in path {
                hasher.update(hop.as_bytes());
            }
            hash_amount(hasher, amount_in);
            hasher.update(&[*out_decimals]);
        }
    }
}
