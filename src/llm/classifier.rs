//! Text-to-intent classification.
//!
//! The classifier is a best-effort label source and nothing more: it names
//! the operation a message seems to ask for, while parameters are extracted
//! and validated independently downstream. A wrong label can therefore
//! never move value on its own. All classifier failures degrade to an
//! `Unknown` route upstream instead of surfacing to the user.

use std::time::Duration;

use aho_corasick::{AhoCorasick, MatchKind};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::ClassifierError;

const GEMINI_PROVIDER: &str = "gemini";
const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Confidence reported for a model-produced label.
const MODEL_CONFIDENCE: f32 = 0.9;
/// Confidence reported for a keyword hit.
const KEYWORD_CONFIDENCE: f32 = 0.7;
/// Confidence when no keyword matched and the message is treated as chat.
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Closed label vocabulary a classifier may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    SendToken,
    SwapToken,
    GenerateWallet,
    QueryBalance,
    QueryMarket,
    Conversational,
}

impl IntentLabel {
    /// Parse a model reply into a label. Tolerant of case, whitespace and
    /// stray punctuation around the label text.
    pub fn parse(text: &str) -> Option<Self> {
        let cleaned: String = text
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match cleaned.as_str() {
            "send_token" | "sendtoken" => Some(Self::SendToken),
            "swap_token" | "swaptoken" | "token_swap" => Some(Self::SwapToken),
            "generate_wallet" | "generate_account" | "create_wallet" => Some(Self::GenerateWallet),
            "query_balance" | "check_balance" => Some(Self::QueryBalance),
            "query_market" | "price_quote" => Some(Self::QueryMarket),
            "conversational" | "chat" => Some(Self::Conversational),
            _ => None,
        }
    }
}

/// A classifier's answer for one utterance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierVerdict {
    pub label: IntentLabel,
    pub confidence: f32,
}

/// Source of intent labels for the router.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    async fn classify(&self, utterance: &str) -> Result<ClassifierVerdict, ClassifierError>;
}

/// Gemini REST classifier.
///
/// Sends the utterance with a fixed instruction to answer with exactly one
/// label token. The HTTP client carries the bounded timeout, so a slow
/// upstream surfaces as `ClassifierError::Timeout` and never hangs a turn.
pub struct GeminiClassifier {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    timeout_secs: u64,
}

impl GeminiClassifier {
    pub fn new(
        model: &str,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Setup {
                provider: GEMINI_PROVIDER.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            endpoint: format!("{}/{}:generateContent", GEMINI_BASE, model),
            api_key,
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl IntentClassifier for GeminiClassifier {
    async fn classify(&self, utterance: &str) -> Result<ClassifierVerdict, ClassifierError> {
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": build_prompt(utterance)}]}],
            "generationConfig": {"temperature": 0.0, "maxOutputTokens": 16},
        });

        let response = self
            .http
            .post(&self.endpoint)
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout {
                        provider: GEMINI_PROVIDER.to_string(),
                        seconds: self.timeout_secs,
                    }
                } else {
                    ClassifierError::RequestFailed {
                        provider: GEMINI_PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        if !response.status().is_success() {
            return Err(ClassifierError::RequestFailed {
                provider: GEMINI_PROVIDER.to_string(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let payload: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| ClassifierError::MalformedReply {
                    provider: GEMINI_PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;
        parse_generate_reply(&payload)
    }
}

fn build_prompt(utterance: &str) -> String {
    format!(
        "Classify the user message into exactly one of these labels:\n\
         send_token - transfer tokens to an address\n\
         swap_token - exchange one token for another\n\
         generate_wallet - create a new wallet or account\n\
         query_balance - ask about wallet balances\n\
         query_market - ask about token prices\n\
         conversational - anything else\n\
         Reply with the label only.\n\n\
         Message: {}",
        utterance
    )
}

fn parse_generate_reply(payload: &serde_json::Value) -> Result<ClassifierVerdict, ClassifierError> {
    let text = payload
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ClassifierError::MalformedReply {
            provider: GEMINI_PROVIDER.to_string(),
            reason: "reply carries no candidate text".to_string(),
        })?;
    let label = IntentLabel::parse(text).ok_or_else(|| ClassifierError::MalformedReply {
        provider: GEMINI_PROVIDER.to_string(),
        reason: format!("unrecognized label {:?}", text.trim()),
    })?;
    Ok(ClassifierVerdict {
        label,
        confidence: MODEL_CONFIDENCE,
    })
}

/// Keyword rules for the offline classifier. Leftmost match in the
/// utterance wins, so "swap my balance to usdt" reads as a swap.
const KEYWORD_RULES: &[(&str, IntentLabel)] = &[
    ("send", IntentLabel::SendToken),
    ("transfer", IntentLabel::SendToken),
    ("pay", IntentLabel::SendToken),
    ("swap", IntentLabel::SwapToken),
    ("exchange", IntentLabel::SwapToken),
    ("trade", IntentLabel::SwapToken),
    ("create a wallet", IntentLabel::GenerateWallet),
    ("create wallet", IntentLabel::GenerateWallet),
    ("new wallet", IntentLabel::GenerateWallet),
    ("create an account", IntentLabel::GenerateWallet),
    ("new account", IntentLabel::GenerateWallet),
    ("generate", IntentLabel::GenerateWallet),
    ("balance", IntentLabel::QueryBalance),
    ("holdings", IntentLabel::QueryBalance),
    ("price", IntentLabel::QueryMarket),
    ("worth", IntentLabel::QueryMarket),
    ("market", IntentLabel::QueryMarket),
];

/// Deterministic keyword classifier.
///
/// Used when no model backend is configured and as the offline path in
/// tests. Messages with no keyword hit are treated as conversation.
pub struct KeywordClassifier {
    matcher: AhoCorasick,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self, ClassifierError> {
        let matcher = AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::LeftmostLongest)
            .build(KEYWORD_RULES.iter().map(|(pattern, _)| *pattern))
            .map_err(|e| ClassifierError::Setup {
                provider: "keyword".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { matcher })
    }
}

#[async_trait]
impl IntentClassifier for KeywordClassifier {
    async fn classify(&self, utterance: &str) -> Result<ClassifierVerdict, ClassifierError> {
        match self.matcher.find(utterance) {
            Some(hit) => Ok(ClassifierVerdict {
                label: KEYWORD_RULES[hit.pattern().as_usize()].1,
                confidence: KEYWORD_CONFIDENCE,
            }),
            None => Ok(ClassifierVerdict {
                label: IntentLabel::Conversational,
                confidence: FALLBACK_CONFIDENCE,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_label_parse_tolerates_noise() {
        assert_eq!(IntentLabel::parse(" Send_Token\n"), Some(IntentLabel::SendToken));
        assert_eq!(IntentLabel::parse("\"swap token\""), Some(IntentLabel::SwapToken));
        assert_eq!(IntentLabel::parse("QUERY_MARKET."), Some(IntentLabel::QueryMarket));
        assert_eq!(IntentLabel::parse("generate_account"), Some(IntentLabel::GenerateWallet));
        assert_eq!(IntentLabel::parse("order a pizza"), None);
        assert_eq!(IntentLabel::parse(""), None);
    }

    #[tokio::test]
    async fn test_keyword_classifier_labels() {
        let classifier = KeywordClassifier::new().unwrap();
        let cases = [
            ("Send 10 FLR to 0xabc", IntentLabel::SendToken),
            ("please TRANSFER everything", IntentLabel::SendToken),
            ("swap 5 flr for usdt", IntentLabel::SwapToken),
            ("can you exchange flr to wflr", IntentLabel::SwapToken),
            ("create a wallet for me", IntentLabel::GenerateWallet),
            ("I need a new account", IntentLabel::GenerateWallet),
            ("what's my balance?", IntentLabel::QueryBalance),
            ("price of BTC please", IntentLabel::QueryMarket),
            ("what is flare worth", IntentLabel::QueryMarket),
        ];
        for (utterance, expected) in cases {
            let verdict = classifier.classify(utterance).await.unwrap();
            assert_eq!(verdict.label, expected, "utterance {:?}", utterance);
            assert!(verdict.confidence > 0.5);
        }
    }

    #[tokio::test]
    async fn test_keyword_classifier_fallback() {
        let classifier = KeywordClassifier::new().unwrap();
        let verdict = classifier.classify("hello there!").await.unwrap();
        assert_eq!(verdict.label, IntentLabel::Conversational);
        assert!(verdict.confidence < 0.5);
    }

    #[tokio::test]
    async fn test_keyword_classifier_leftmost_wins() {
        let classifier = KeywordClassifier::new().unwrap();
        let verdict = classifier
            .classify("swap my balance into usdt")
            .await
            .unwrap();
        assert_eq!(verdict.label, IntentLabel::SwapToken);
    }

    #[test]
    fn test_parse_generate_reply() {
        let payload = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "send_token\n"}]}
            }]
        });
        let verdict = parse_generate_reply(&payload).unwrap();
        assert_eq!(verdict.label, IntentLabel::SendToken);
    }

    #[test]
    fn test_parse_generate_reply_missing_text() {
        let payload = serde_json::json!({"candidates": []});
        let err = parse_generate_reply(&payload).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedReply { .. }));
    }

    #[test]
    fn test_parse_generate_reply_unknown_label() {
        let payload = serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "buy_groceries"}]}
            }]
        });
        let err = parse_generate_reply(&payload).unwrap_err();
        assert!(matches!(err, ClassifierError::MalformedReply { .. }));
    }
}
