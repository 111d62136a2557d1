//! The conversational agent core.
//!
//! [`Agent::handle_turn`] is the single entry point every channel calls.
//! A turn locks its session for its full duration and resolves any
//! pending preview first: the exact reply `CONFIRM` executes it, a
//! competing transaction request is refused while one is pending, and
//! any other reply cancels. Value-moving operations never execute inside
//! the turn that requested them; they always go through the
//! preview/confirm exchange.

pub mod engine;
pub mod intent;
pub mod router;
pub mod session;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::attestation::{AttestationProvider, ExpectedClaims, TokenVerifier, TrustGate, Verdict};
use crate::chain::units::TokenAmount;
use crate::chain::wallet::{SessionKeystore, Wallet};
use crate::chain::{Address, ChainAdapter, ChainOperation, FtsoOracle, SubmitStatus};
use crate::channels::{IncomingMessage, TurnReply};
use crate::error::{EngineError, Error, ValidationError};
use crate::registry::{AssetKind, TokenRegistry};

use engine::{ConfirmationEngine, PendingPreview, ReplyDisposition};
use intent::{IntentKind, SendParams, SwapParams};
use router::IntentRouter;
use session::{SessionManager, SessionState};

/// Value-moving intents below this confidence are not acted on.
const MIN_ACTION_CONFIDENCE: f32 = 0.5;

const HELP_TEXT: &str = "\
I handle on-chain operations on Flare:
  \"send 10 FLR to 0x...\"      transfer tokens
  \"swap 10 FLR for WFLR\"      swap through the configured router
  \"what's my balance?\"        read wallet balances
  \"what's the FLR price?\"     FTSO price feeds
  \"create a wallet\"           generate a session wallet

Commands: /help, /address, /attest [nonce], /reset
Transfers and swaps show a priced preview first and execute only after
you reply CONFIRM.";

const NO_WALLET_HINT: &str =
    "No wallet is loaded for this session. Say \"create a wallet\" to make one.";

const UNKNOWN_REPLY: &str = "I did not catch an actionable request. Try \"send 10 FLR to 0x...\", \
                             \"what's my balance?\", or /help.";

/// Everything the agent is wired with at startup.
pub struct AgentParts {
    pub router: IntentRouter,
    pub engine: ConfirmationEngine,
    pub adapter: Arc<dyn ChainAdapter>,
    pub oracle: FtsoOracle,
    pub registry: Arc<TokenRegistry>,
    pub attestation: Arc<dyn AttestationProvider>,
    pub verifier: TokenVerifier,
    pub expected_claims: ExpectedClaims,
    /// Optional encrypted persistence for session wallet keys.
    pub keystore: Option<SessionKeystore>,
    /// Block explorer base URL for transaction links.
    pub explorer_base: String,
}

pub struct Agent {
    router: IntentRouter,
    engine: ConfirmationEngine,
    sessions: SessionManager,
    adapter: Arc<dyn ChainAdapter>,
    oracle: FtsoOracle,
    registry: Arc<TokenRegistry>,
    attestation: Arc<dyn AttestationProvider>,
    verifier: TokenVerifier,
    expected_claims: ExpectedClaims,
    trust: TrustGate,
    keystore: Option<SessionKeystore>,
    explorer_base: String,
}

impl Agent {
    pub fn new(parts: AgentParts) -> Self {
        Self {
            router: parts.router,
            engine: parts.engine,
            sessions: SessionManager::new(),
            adapter: parts.adapter,
            oracle: parts.oracle,
            registry: parts.registry,
            attestation: parts.attestation,
            verifier: parts.verifier,
            expected_claims: parts.expected_claims,
            trust: TrustGate::new(),
            keystore: parts.keystore,
            explorer_base: parts.explorer_base,
        }
    }

    /// Run the boot attestation handshake and record the verdict. Channels
    /// call this before accepting traffic so a broken enclave refuses key
    /// operations from the first turn.
    pub async fn attest_now(&self) -> TurnReply {
        self.run_attestation(None).await
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.count().await
    }

    /// Handle one user turn. Total: every failure becomes reply text, and
    /// the session lock is held from entry to reply so concurrent turns on
    /// one session serialize.
    pub async fn handle_turn(&self, msg: &IncomingMessage) -> TurnReply {
        let session = self.sessions.get_or_create(&msg.session_id).await;
        let mut state = session.lock().await;
        let now = Utc::now();
        state.touch(now);

        let text = msg.content.trim();
        if text.is_empty() {
            return TurnReply::text(UNKNOWN_REPLY);
        }

        if state.wallet.is_none() {
            self.restore_wallet(&mut state).await;
        }

        // A pending preview owns the turn. Only an expired one falls
        // through, already cleared, so the reply runs as a fresh
        // utterance.
        if state.pending.is_some() {
            if let Some(reply) = self.resolve_pending(&mut state, text, now).await {
                return reply;
            }
        }

        if matches!(
            ConfirmationEngine::classify_reply(text),
            ReplyDisposition::Confirm
        ) {
            return TurnReply::text(EngineError::NothingPending.to_string());
        }

        if let Some(reply) = self.handle_command(&mut state, text).await {
            return reply;
        }

        let ctx = state.turn_context();
        let intent = self.router.route(text, &ctx).await;
        tracing::info!(
            session = %ctx.session_id,
            channel = %msg.channel,
            intent = intent.kind.label(),
            confidence = intent.confidence,
            "routed turn"
        );

        if intent.kind.is_value_moving() && intent.confidence < MIN_ACTION_CONFIDENCE {
            return TurnReply::text(
                "I might have misread that. Please restate the transaction, \
                 e.g. \"send 10 FLR to 0x...\".",
            );
        }

        match intent.kind {
            IntentKind::SendToken(params) => self.start_send(&mut state, params, now).await,
            IntentKind::SwapToken(params) => self.start_swap(&mut state, params, now).await,
            IntentKind::GenerateWallet => self.generate_wallet(&mut state).await,
            IntentKind::QueryBalance { symbol } => self.query_balance(&state, symbol).await,
            IntentKind::QueryMarket { symbol } => self.query_market(symbol).await,
            IntentKind::NeedsClarification { reason } => TurnReply::text(reason),
            IntentKind::Unknown => TurnReply::text(UNKNOWN_REPLY),
        }
    }

    /// Decide the fate of a pending preview from the next user reply.
    /// `None` means the preview had already expired and was dropped; the
    /// caller handles the reply as a fresh turn.
    async fn resolve_pending(
        &self,
        state: &mut SessionState,
        reply: &str,
        now: DateTime<Utc>,
    ) -> Option<TurnReply> {
        if let ReplyDisposition::Confirm = ConfirmationEngine::classify_reply(reply) {
            return Some(match self.engine.take_for_submit(&mut state.pending, now) {
                Ok(preview) => self.submit(state, preview).await,
                Err(err) => {
                    tracing::info!(session = %state.id, error = %err, "confirmation refused");
                    TurnReply::text(err.to_string())
                }
            });
        }

        // An unconfirmed quote past its expiry is dead state, not a
        // conversation the reply has to answer.
        if state.pending.as_ref().is_some_and(|p| now > p.expires_at) {
            state.pending = None;
            return None;
        }

        // A competing transaction request must not replace the quote the
        // user was shown. It is refused; the pending preview stays.
        let ctx = state.turn_context();
        let intent = self.router.route(reply, &ctx).await;
        if intent.kind.is_value_moving() {
            if let Some(pending) = &state.pending {
                return Some(TurnReply::text(format!(
                    "{} Reply CONFIRM to execute it, or anything else to cancel.",
                    EngineError::PendingConflict {
                        pending: pending.summary.clone(),
                    }
                )));
            }
        }

        Some(match self.engine.cancel(&mut state.pending) {
            Ok(preview) => TurnReply::text(format!("Cancelled: {}.", preview.summary)),
            Err(err) => TurnReply::text(err.to_string()),
        })
    }

    /// Exactly one adapter submission per confirmed preview. The preview
    /// was already removed from the slot, so a retry has nothing to find.
    async fn submit(&self, state: &mut SessionState, preview: PendingPreview) -> TurnReply {
        let Some(wallet) = state.wallet.as_ref() else {
            return TurnReply::text(NO_WALLET_HINT);
        };
        match self
            .adapter
            .sign_and_submit(wallet, &preview.quote, preview.expires_at)
            .await
        {
            Ok(receipt) => match receipt.status {
                SubmitStatus::Submitted => {
                    let tx_hash = receipt.tx_hash.unwrap_or_default();
                    tracing::info!(session = %state.id, tx_hash = %tx_hash, "transaction submitted");
                    TurnReply::with_payload(
                        format!(
                            "Submitted: {}.\nTrack it at {}/tx/{}",
                            preview.summary, self.explorer_base, tx_hash
                        ),
                        json!({ "status": "submitted", "tx_hash": tx_hash }),
                    )
                }
                SubmitStatus::Failed => {
                    let detail = receipt
                        .error_detail
                        .unwrap_or_else(|| "no detail from the node".to_string());
                    tracing::warn!(session = %state.id, detail = %detail, "submission rejected");
                    TurnReply::with_payload(
                        format!("The transaction was not submitted: {}", detail),
                        json!({ "status": "failed", "detail": detail }),
                    )
                }
            },
            Err(err) => {
                tracing::error!(session = %state.id, error = %err, "submission errored");
                TurnReply::text(format!("Could not complete the submission: {}", err))
            }
        }
    }

    async fn handle_command(&self, state: &mut SessionState, text: &str) -> Option<TurnReply> {
        let rest = text.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let command = parts.next().unwrap_or("").to_lowercase();
        Some(match command.as_str() {
            "help" => TurnReply::text(HELP_TEXT),
            "address" => match &state.wallet {
                Some(wallet) => TurnReply::text(format!("Session wallet: {}", wallet.address())),
                None => TurnReply::text(NO_WALLET_HINT),
            },
            "attest" => self.run_attestation(parts.next()).await,
            "reset" => {
                // The wallet survives a reset; dropping keys would strand
                // funds.
                state.pending = None;
                TurnReply::text("Cleared any pending transaction. The session wallet is kept.")
            }
            other => TurnReply::text(format!("Unknown command /{}. Try /help.", other)),
        })
    }

    async fn run_attestation(&self, nonce: Option<&str>) -> TurnReply {
        let nonce = match nonce {
            Some(nonce) => nonce.to_string(),
            None => Uuid::new_v4().simple().to_string(),
        };
        let token = match self.attestation.get_token(&nonce).await {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(error = %err, "attestation token fetch failed");
                return TurnReply::text(format!("Attestation failed: {}", err));
            }
        };
        let expected = self.expected_claims.with_nonce(&nonce);
        let verdict = self.verifier.verify(&token, &expected, Utc::now());
        self.trust.record(&verdict).await;
        match verdict {
            Verdict::Valid(claims) => TurnReply::with_payload(
                format!(
                    "Attestation verified. Issuer {}, image {}.",
                    claims.iss, claims.submods.container.image_digest
                ),
                serde_json::to_value(&claims).unwrap_or_default(),
            ),
            Verdict::Invalid(reason) => {
                tracing::error!(%reason, "attestation verification failed");
                TurnReply::text(format!(
                    "Attestation FAILED: {}. Key operations are locked until a \
                     verification succeeds; run /attest to retry.",
                    reason
                ))
            }
        }
    }

    /// Reload a persisted wallet key for this session when a keystore is
    /// configured. Restoring key material is a key operation, so it is
    /// skipped while the trust gate is broken.
    async fn restore_wallet(&self, state: &mut SessionState) {
        let Some(keystore) = &self.keystore else {
            return;
        };
        if self.trust.require_operational().await.is_err() {
            return;
        }
        match keystore.load(&state.id) {
            Ok(Some(wallet)) => {
                tracing::info!(
                    session = %state.id,
                    address = %wallet.address(),
                    "restored session wallet from keystore"
                );
                state.wallet = Some(wallet);
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(session = %state.id, error = %err, "could not restore session wallet");
            }
        }
    }

    async fn generate_wallet(&self, state: &mut SessionState) -> TurnReply {
        if let Err(err) = self.trust.require_operational().await {
            tracing::warn!(session = %state.id, "refusing key operation, trust gate is broken");
            return TurnReply::text(format!("{} Run /attest to re-verify this enclave.", err));
        }
        if let Some(wallet) = &state.wallet {
            return TurnReply::text(format!(
                "This session already has a wallet: {}.",
                wallet.address()
            ));
        }
        let wallet = Wallet::generate();
        let address = wallet.address();
        let mut persist_note = "";
        if let Some(keystore) = &self.keystore {
            if let Err(err) = keystore.store(&state.id, &wallet) {
                tracing::error!(session = %state.id, error = %err, "failed to persist wallet key");
                persist_note = "\nWarning: the key could not be persisted and will not survive \
                                a restart.";
            }
        }
        state.wallet = Some(wallet);
        tracing::info!(session = %state.id, address = %address, "generated session wallet");
        TurnReply::with_payload(
            format!(
                "Created a wallet for this session.\nAddress: {}\nFund it before \
                 sending; the key never leaves the enclave.{}",
                address, persist_note
            ),
            json!({ "address": address.to_checksum() }),
        )
    }

    async fn start_send(
        &self,
        state: &mut SessionState,
        params: SendParams,
        now: DateTime<Utc>,
    ) -> TurnReply {
        let Some(from) = state.wallet.as_ref().map(|w| w.address()) else {
            return TurnReply::text(NO_WALLET_HINT);
        };
        match self.transfer_operation(&params) {
            Ok(op) => self.preview_operation(state, from, op, now).await,
            Err(err) => TurnReply::text(err.to_string()),
        }
    }

    async fn start_swap(
        &self,
        state: &mut SessionState,
        params: SwapParams,
        now: DateTime<Utc>,
    ) -> TurnReply {
        let Some(from) = state.wallet.as_ref().map(|w| w.address()) else {
            return TurnReply::text(NO_WALLET_HINT);
        };
        match self.swap_operation(&params) {
            Ok(op) => self.preview_operation(state, from, op, now).await,
            Err(err) => TurnReply::text(err.to_string()),
        }
    }

    fn transfer_operation(&self, params: &SendParams) -> Result<ChainOperation, ValidationError> {
        let token = self.registry.transferable(&params.symbol)?;
        match &token.asset {
            AssetKind::Native => Ok(ChainOperation::NativeTransfer {
                symbol: token.symbol.clone(),
                to: params.to,
                amount: params.amount,
            }),
            AssetKind::Erc20 { address } => Ok(ChainOperation::Erc20Transfer {
                symbol: token.symbol.clone(),
                contract: *address,
                to: params.to,
                amount: params.amount,
            }),
            AssetKind::PriceOnly => Err(ValidationError::NotTransferable {
                symbol: token.symbol.clone(),
            }),
        }
    }

    fn swap_operation(&self, params: &SwapParams) -> Result<ChainOperation, ValidationError> {
        let from = self.registry.transferable(&params.from_symbol)?;
        let to = self.registry.transferable(&params.to_symbol)?;
        let from_hop = self
            .registry
            .swap_address(from)
            .ok_or_else(|| ValidationError::NoSwapPath {
                symbol: from.symbol.clone(),
            })?;
        let to_hop = self
            .registry
            .swap_address(to)
            .ok_or_else(|| ValidationError::NoSwapPath {
                symbol: to.symbol.clone(),
            })?;
        Ok(ChainOperation::Swap {
            from_symbol: from.symbol.clone(),
            to_symbol: to.symbol.clone(),
            path: vec![from_hop, to_hop],
            amount_in: params.amount,
            out_decimals: to.decimals,
        })
    }

    async fn preview_operation(
        &self,
        state: &mut SessionState,
        from: Address,
        op: ChainOperation,
        now: DateTime<Utc>,
    ) -> TurnReply {
        if let Some(existing) = &state.pending {
            return TurnReply::text(
                EngineError::PendingConflict {
                    pending: existing.summary.clone(),
                }
                .to_string(),
            );
        }
        let quote = match self.adapter.estimate(&from, &op).await {
            Ok(quote) => quote,
            Err(err) => {
                tracing::warn!(session = %state.id, error = %err, "estimation failed");
                return TurnReply::text(format!("Could not price the transaction: {}", err));
            }
        };
        match self.engine.preview(&mut state.pending, quote, now) {
            Ok(preview) => TurnReply {
                text: self.render_preview(&preview),
                payload: preview_payload(&preview),
            },
            Err(err) => TurnReply::text(err.to_string()),
        }
    }

    fn render_preview(&self, preview: &PendingPreview) -> String {
        let quote = &preview.quote;
        let native = self.registry.native_symbol().unwrap_or("native units");
        let mut lines = vec![
            format!("You are about to: {}.", preview.summary),
            format!(
                "Estimated fee: {} {} (gas limit {}, gas price {} gwei).",
                quote.fee,
                native,
                quote.gas_limit,
                TokenAmount::from_raw(quote.gas_price, 9)
            ),
        ];
        if let (Some(expected), Some(min)) = (&quote.expected_out, &quote.min_out) {
            lines.push(format!(
                "Expected output: {}; you receive at least {}.",
                expected, min
            ));
        }
        let ttl = (preview.expires_at - preview.created_at).num_seconds();
        lines.push(format!(
            "Reply CONFIRM within {}s to execute. Any other reply cancels.",
            ttl
        ));
        lines.join("\n")
    }

    async fn query_balance(&self, state: &SessionState, symbol: Option<String>) -> TurnReply {
        let Some(address) = state.wallet.as_ref().map(|w| w.address()) else {
            return TurnReply::text(NO_WALLET_HINT);
        };
        match symbol {
            Some(symbol) => match self.token_balance(&address, &symbol).await {
                Ok(line) => TurnReply::text(line),
                Err(err) => TurnReply::text(format!("Could not read the balance: {}", err)),
            },
            None => {
                let mut lines = vec![format!("Balances for {}:", address)];
                for token in self.registry.iter().filter(|t| t.is_transferable()) {
                    match self.token_balance(&address, &token.symbol).await {
                        Ok(line) => lines.push(format!("  {}", line)),
                        Err(err) => lines.push(format!("  {}: unavailable ({})", token.symbol, err)),
                    }
                }
                TurnReply::text(lines.join("\n"))
            }
        }
    }

    async fn token_balance(&self, address: &Address, symbol: &str) -> Result<String, Error> {
        let token = self.registry.transferable(symbol)?;
        let balance = match &token.asset {
            AssetKind::Native => self.adapter.native_balance(address).await?,
            AssetKind::Erc20 { address: contract } => {
                self.adapter
                    .erc20_balance(contract, address, token.decimals)
                    .await?
            }
            AssetKind::PriceOnly => {
                return Err(ValidationError::NotTransferable {
                    symbol: token.symbol.clone(),
                }
                .into());
            }
        };
        Ok(format!("{}: {}", token.symbol, balance))
    }

    async fn query_market(&self, symbol: Option<String>) -> TurnReply {
        match symbol {
            Some(symbol) => {
                let Some(token) = self.registry.resolve(&symbol) else {
                    return TurnReply::text(
                        ValidationError::UnknownToken { symbol }.to_string(),
                    );
                };
                let Some(feed) = token.feed.clone() else {
                    return TurnReply::text(format!(
                        "No price feed is configured for {}.",
                        token.symbol
                    ));
                };
                match self.oracle.read_feed(&token.symbol, &feed).await {
                    Ok(quote) => TurnReply {
                        text: format!("{}: ${} ({})", quote.symbol, quote.format_usd(), quote.feed),
                        payload: serde_json::to_value(&quote).ok(),
                    },
                    Err(err) => {
                        tracing::warn!(symbol = %token.symbol, error = %err, "feed read failed");
                        TurnReply::text(format!(
                            "Could not read the {} feed: {}",
                            token.symbol, err
                        ))
                    }
                }
            }
            None => {
                let quotes = self.oracle.summary(&self.registry).await;
                let mut lines = vec!["Current FTSO prices:".to_string()];
                for (symbol, result) in quotes {
                    match result {
                        Ok(quote) => lines.push(format!("  {}: ${}", symbol, quote.format_usd())),
                        Err(err) => lines.push(format!("  {}: unavailable ({})", symbol, err)),
                    }
                }
                TurnReply::text(lines.join("\n"))
            }
        }
    }
}

fn preview_payload(preview: &PendingPreview) -> Option<serde_json::Value> {
    serde_json::to_value(&preview.quote.operation)
        .ok()
        .map(|operation| {
            json!({
                "preview_id": preview.id,
                "summary": preview.summary,
                "operation": operation,
                "fee": preview.quote.fee.format_units(),
                "expires_at": preview.expires_at.to_rfc3339(),
            })
        })
}
