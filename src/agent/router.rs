//! Natural-language routing into validated operation intents.
//!
//! The classifier only ever supplies a label. Every parameter that reaches
//! an operation is extracted from the raw utterance here and checked
//! against the closed token registry, so a misclassification can never
//! smuggle an unvalidated address or amount through. Routing is read-only:
//! it never touches session state and never calls the chain.

use std::sync::Arc;

use regex::Regex;

use crate::agent::intent::{IntentKind, RoutedIntent, SendParams, SwapParams};
use crate::agent::session::TurnContext;
use crate::chain::address::Address;
use crate::chain::units::TokenAmount;
use crate::error::ValidationError;
use crate::llm::{IntentClassifier, IntentLabel};
use crate::registry::{TokenInfo, TokenRegistry};

/// Words that look like tickers when shouted but never name a token.
const STOP_WORDS: &[&str] = &[
    "ALL", "AND", "ARE", "BALANCE", "CHECK", "COIN", "COINS", "FOR", "HOW", "INTO", "IS", "ME",
    "MUCH", "MY", "NOW", "OF", "PLEASE", "PRICE", "SEND", "SHOW", "SOME", "SWAP", "THE", "TO",
    "TODAY", "TOKEN", "TOKENS", "WALLET", "WHAT", "WHATS", "WORTH",
];

/// Turns utterances into [`RoutedIntent`]s.
pub struct IntentRouter {
    classifier: Arc<dyn IntentClassifier>,
    registry: Arc<TokenRegistry>,
}

impl IntentRouter {
    pub fn new(classifier: Arc<dyn IntentClassifier>, registry: Arc<TokenRegistry>) -> Self {
        Self {
            classifier,
            registry,
        }
    }

    /// Route one utterance. Total: classifier failures and invalid
    /// parameters degrade to `Unknown` and `NeedsClarification` instead of
    /// erroring, so the caller always has something to say.
    pub async fn route(&self, utterance: &str, ctx: &TurnContext) -> RoutedIntent {
        let verdict = match self.classifier.classify(utterance).await {
            Ok(verdict) => verdict,
            Err(err) => {
                tracing::warn!(
                    session = %ctx.session_id,
                    error = %err,
                    "classifier unavailable, routing as unknown"
                );
                return RoutedIntent::unknown(utterance);
            }
        };
        tracing::debug!(
            session = %ctx.session_id,
            label = ?verdict.label,
            confidence = verdict.confidence,
            "classified utterance"
        );

        let kind = match verdict.label {
            IntentLabel::SendToken => self.parse_send(utterance),
            IntentLabel::SwapToken => self.parse_swap(utterance),
            IntentLabel::GenerateWallet => IntentKind::GenerateWallet,
            IntentLabel::QueryBalance => self.route_balance(utterance),
            IntentLabel::QueryMarket => self.route_market(utterance),
            IntentLabel::Conversational => IntentKind::Unknown,
        };

        RoutedIntent {
            kind,
            confidence: verdict.confidence,
            raw_text: utterance.to_string(),
        }
    }

    fn parse_send(&self, utterance: &str) -> IntentKind {
        match self.try_parse_send(utterance) {
            Ok(params) => IntentKind::SendToken(params),
            Err(err) => IntentKind::NeedsClarification {
                reason: err.to_string(),
            },
        }
    }

    fn try_parse_send(&self, utterance: &str) -> Result<SendParams, ValidationError> {
        let raw_address = extract_address(utterance)
            .ok_or(ValidationError::MissingParameter("destination address"))?;
        let to = Address::parse(raw_address)?;
        // Addresses are digit-heavy, so strip before scanning for the
        // amount.
        let remainder = utterance.replace(raw_address, " ");
        let token = self.find_transferable(&remainder)?;
        let raw_amount =
            extract_amount(&remainder).ok_or(ValidationError::MissingParameter("amount"))?;
        let amount = TokenAmount::parse(&raw_amount, &token.symbol, token.decimals)?;
        Ok(SendParams {
            symbol: token.symbol.clone(),
            amount,
            to,
        })
    }

    fn parse_swap(&self, utterance: &str) -> IntentKind {
        match self.try_parse_swap(utterance) {
            Ok(params) => IntentKind::SwapToken(params),
            Err(err) => IntentKind::NeedsClarification {
                reason: err.to_string(),
            },
        }
    }

    fn try_parse_swap(&self, utterance: &str) -> Result<SwapParams, ValidationError> {
        let (raw_amount, raw_from, raw_to) =
            extract_swap_parts(utterance).ok_or(ValidationError::MissingParameter(
                "swap details (try: swap 10 FLR for WFLR)",
            ))?;
        let from = self.registry.transferable(raw_from)?;
        let to = self.registry.transferable(raw_to)?;
        if from.symbol == to.symbol {
            return Err(ValidationError::SelfSwap {
                symbol: from.symbol.clone(),
            });
        }
        let amount = TokenAmount::parse(&normalize_amount(raw_amount), &from.symbol, from.decimals)?;
        Ok(SwapParams {
            from_symbol: from.symbol.clone(),
            to_symbol: to.symbol.clone(),
            amount,
        })
    }

    fn route_balance(&self, utterance: &str) -> IntentKind {
        for word in candidate_words(utterance) {
            if let Some(token) = self.registry.resolve(word) {
                if token.is_transferable() {
                    return IntentKind::QueryBalance {
                        symbol: Some(token.symbol.clone()),
                    };
                }
                // Price-only tokens have no on-chain balance here.
                return IntentKind::NeedsClarification {
                    reason: ValidationError::NotTransferable {
                        symbol: token.symbol.clone(),
                    }
                    .to_string(),
                };
            }
        }
        IntentKind::QueryBalance { symbol: None }
    }

    fn route_market(&self, utterance: &str) -> IntentKind {
        for word in candidate_words(utterance) {
            if let Some(token) = self.registry.resolve(word) {
                if token.feed.is_some() {
                    return IntentKind::QueryMarket {
                        symbol: Some(token.symbol.clone()),
                    };
                }
                return IntentKind::NeedsClarification {
                    reason: format!("No price feed is configured for {}.", token.symbol),
                };
            }
        }
        if let Some(symbol) = self.unknown_symbol_candidate(utterance) {
            return IntentKind::NeedsClarification {
                reason: ValidationError::UnknownToken { symbol }.to_string(),
            };
        }
        IntentKind::QueryMarket { symbol: None }
    }

    /// Find the transferable token named in the text. Price-only and
    /// unregistered symbols produce distinct errors so the reply can say
    /// which problem it is.
    fn find_transferable(&self, text: &str) -> Result<&TokenInfo, ValidationError> {
        let mut price_only = None;
        for word in candidate_words(text) {
            if let Some(token) = self.registry.resolve(word) {
                if token.is_transferable() {
                    return Ok(token);
                }
                if price_only.is_none() {
                    price_only = Some(token.symbol.clone());
                }
            }
        }
        if let Some(symbol) = price_only {
            return Err(ValidationError::NotTransferable { symbol });
        }
        if let Some(symbol) = self.unknown_symbol_candidate(text) {
            return Err(ValidationError::UnknownToken { symbol });
        }
        Err(ValidationError::MissingParameter("token symbol"))
    }

    /// Best guess at an unregistered symbol, used to name it back to the
    /// user. Ordinary phrasing puts the symbol right after the amount
    /// ("send 10 usdc to ..."); failing that, an all-caps ticker anywhere
    /// counts.
    fn unknown_symbol_candidate(&self, text: &str) -> Option<String> {
        if let Some(word) = word_after_amount(text) {
            if !is_stop_word(word) && self.registry.resolve(word).is_none() {
                return Some(word.to_uppercase());
            }
        }
        candidate_words(text)
            .find(|w| looks_like_ticker(w) && self.registry.resolve(w).is_none())
            .map(|w| w.to_uppercase())
    }
}

fn candidate_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn is_stop_word(word: &str) -> bool {
    let upper = word.to_uppercase();
    STOP_WORDS.contains(&upper.as_str())
}

fn looks_like_ticker(word: &str) -> bool {
    (2..=8).contains(&word.len())
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && word.chars().any(|c| c.is_ascii_uppercase())
        && !is_stop_word(word)
}

fn extract_address(text: &str) -> Option<&str> {
    let regex = Regex::new(r"0x[0-9a-fA-F]{40}\b").ok()?;
    Some(regex.find(text)?.as_str())
}

fn amount_regex() -> Option<Regex> {
    // Comma-grouped first so "1,000" is not read as "1".
    Regex::new(r"\d{1,3}(?:,\d{3})+(?:\.\d+)?|\d+(?:\.\d+)?|\.\d+").ok()
}

fn extract_amount(text: &str) -> Option<String> {
    let hit = amount_regex()?.find(text)?;
    Some(normalize_amount(hit.as_str()))
}

fn normalize_amount(raw: &str) -> String {
    raw.replace(',', "")
}

fn word_after_amount(text: &str) -> Option<&str> {
    let hit = amount_regex()?.find(text)?;
    text[hit.end()..]
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
}

fn extract_swap_parts(text: &str) -> Option<(&str, &str, &str)> {
    let regex = Regex::new(
        r"(?i)\b(?:swap|exchange|trade|convert)\s+(?:(?:my|some|all)\s+)?([\d.,]+)\s+(\w+)\s+(?:for|to|into)\s+(\w+)",
    )
    .ok()?;
    let captures = regex.captures(text)?;
    Some((
        captures.get(1)?.as_str(),
        captures.get(2)?.as_str(),
        captures.get(3)?.as_str(),
    ))
}
