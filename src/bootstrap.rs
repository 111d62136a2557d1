//! Startup wiring for Emberagent.
//!
//! Two concerns live here: layering the environment files the same way on
//! every entry point, and assembling a running [`Agent`] from a resolved
//! [`Config`]. Channels never construct chain or attestation plumbing
//! themselves; they receive the finished agent.
//!
//! Env file: `~/.emberagent/.env` (standard dotenvy format)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::agent::engine::ConfirmationEngine;
use crate::agent::router::IntentRouter;
use crate::agent::{Agent, AgentParts};
use crate::attestation::{AttestationProvider, LauncherProvider, SimulatedProvider, TokenVerifier};
use crate::chain::wallet::SessionKeystore;
use crate::chain::{ChainAdapter, FlareAdapter, FtsoOracle, RpcClient};
use crate::config::{AttestationMode, ChainConfig, ClassifierBackend, Config};
use crate::error::{ConfigError, Result};
use crate::llm::{GeminiClassifier, IntentClassifier, KeywordClassifier};
use crate::registry::{AssetKind, TokenInfo, TokenRegistry};

/// How long one launcher token fetch may take.
const LAUNCHER_TIMEOUT: Duration = Duration::from_secs(10);

/// Path to the Emberagent-specific `.env` file: `~/.emberagent/.env`.
pub fn emberagent_env_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".emberagent")
        .join(".env")
}

/// Load env vars from `~/.emberagent/.env` (in addition to the standard `.env`).
///
/// Call this **after** `dotenvy::dotenv()` so that the standard `./.env`
/// takes priority over `~/.emberagent/.env`. dotenvy never overwrites
/// existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.emberagent/.env`
pub fn load_emberagent_env() {
    let path = emberagent_env_path();
    if path.exists() {
        let _ = dotenvy::from_path(&path);
    }
}

/// The runtime token registry: the Flare defaults plus any deployment
/// ERC-20 rows supplied through configuration.
pub fn build_registry(chain: &ChainConfig) -> TokenRegistry {
    let mut registry = TokenRegistry::flare_defaults();
    for entry in &chain.tokens {
        registry.insert(TokenInfo {
            symbol: entry.symbol.clone(),
            decimals: entry.decimals,
            asset: AssetKind::Erc20 {
                address: entry.address,
            },
            feed: entry.feed.clone(),
        });
    }
    registry
}

/// Assemble an [`Agent`] from a resolved configuration.
///
/// Everything built here is constructed once and shared across sessions;
/// the adapter's submit lock and the per-session mutexes do the
/// serializing at runtime.
pub fn build_agent(config: &Config) -> Result<Agent> {
    let registry = Arc::new(build_registry(&config.chain));
    let native_decimals = registry
        .native_symbol()
        .and_then(|symbol| registry.resolve(symbol))
        .map(|token| token.decimals)
        .unwrap_or(18);

    let rpc = Arc::new(RpcClient::new(
        config.chain.rpc_url.clone(),
        config.chain.rpc_timeout,
    )?);
    let adapter: Arc<dyn ChainAdapter> = Arc::new(FlareAdapter::new(
        Arc::clone(&rpc),
        config.chain.chain_id,
        native_decimals,
        config.chain.slippage_bps,
        config.chain.swap_router,
    ));
    let oracle = FtsoOracle::new(Arc::clone(&rpc), config.chain.ftso_contract);

    let classifier: Arc<dyn IntentClassifier> = match config.classifier.backend {
        ClassifierBackend::Keyword => Arc::new(KeywordClassifier::new()?),
        ClassifierBackend::Gemini => {
            let Some(api_key) = &config.classifier.api_key else {
                return Err(ConfigError::MissingRequired {
                    key: "GEMINI_API_KEY".to_string(),
                    hint: "the gemini classifier backend needs an API key".to_string(),
                }
                .into());
            };
            Arc::new(GeminiClassifier::new(
                &config.classifier.model,
                api_key.clone(),
                config.classifier.timeout,
            )?)
        }
    };

    let mut verifier = TokenVerifier::new(
        config.attestation.token_max_age_secs,
        config.attestation.token_max_skew_secs,
    );
    let attestation: Arc<dyn AttestationProvider> = match config.attestation.mode {
        AttestationMode::Simulate => {
            let provider = SimulatedProvider::new(
                config.attestation.audience.clone(),
                config.attestation.image_digest.clone(),
            );
            verifier.trust_issuer(config.attestation.issuer.clone(), provider.verifying_key());
            Arc::new(provider)
        }
        AttestationMode::Launcher => {
            let Some(key) = &config.attestation.verifying_key else {
                return Err(ConfigError::MissingRequired {
                    key: "attestation.verifying_key".to_string(),
                    hint: "launcher attestation needs the token signer's public key".to_string(),
                }
                .into());
            };
            verifier.trust_issuer(config.attestation.issuer.clone(), key.clone());
            Arc::new(LauncherProvider::new(
                config.attestation.launcher_socket.clone(),
                config.attestation.audience.clone(),
                LAUNCHER_TIMEOUT,
            ))
        }
    };

    let keystore = match (&config.keystore.path, &config.keystore.passphrase) {
        (Some(path), Some(passphrase)) => {
            tracing::info!(path = %path.display(), "session keystore enabled");
            Some(SessionKeystore::new(path, passphrase.clone()))
        }
        _ => None,
    };

    Ok(Agent::new(AgentParts {
        router: IntentRouter::new(classifier, Arc::clone(&registry)),
        engine: ConfirmationEngine::new(config.engine.confirmation_ttl_secs),
        adapter,
        oracle,
        registry,
        attestation,
        verifier,
        expected_claims: config.attestation.expected_claims(),
        keystore,
        explorer_base: config.chain.explorer_base.clone(),
    }))
}
