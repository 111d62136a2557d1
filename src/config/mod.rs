//! Runtime configuration.
//!
//! [`Settings`] is the file layer; `Config` is the typed view the rest of
//! the crate consumes. Each sub-config resolves its environment overrides
//! against the settings layer, so the effective priority everywhere is
//! env var > `~/.emberagent/config.toml` > built-in default. Secrets
//! (`GEMINI_API_KEY`, `GATEWAY_AUTH_TOKEN`, `EMBERAGENT_KEYSTORE_PASSPHRASE`)
//! are env-only and never written to the config file.

pub(crate) mod helpers;

use std::path::{Path, PathBuf};
use std::time::Duration;

use k256::ecdsa::VerifyingKey;
use secrecy::SecretString;

use crate::attestation::{
    CONFIDENTIAL_SPACE_HWMODEL, CONFIDENTIAL_SPACE_SWNAME, ExpectedClaims, SIMULATED_HWMODEL,
    SIMULATED_ISSUER, SIMULATED_SWNAME,
};
use crate::chain::Address;
use crate::error::ConfigError;
use crate::settings::Settings;

use self::helpers::{decode_hex, normalize_variant, optional_env};

#[derive(Debug, Clone)]
pub struct Config {
    pub agent: AgentConfig,
    pub chain: ChainConfig,
    pub engine: EngineConfig,
    pub classifier: ClassifierConfig,
    pub attestation: AttestationConfig,
    pub gateway: GatewayConfig,
    pub keystore: KeystoreConfig,
}

impl Config {
    /// Load from the default config file location (or `EMBERAGENT_CONFIG`).
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_toml(None)
    }

    /// Load with an explicit config file path taking precedence over the
    /// `EMBERAGENT_CONFIG` variable and the default location.
    pub fn load_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        crate::bootstrap::load_emberagent_env();
        let mut settings = Settings::default();
        apply_toml_overlay(&mut settings, toml_path)?;
        Self::build(&settings)
    }

    /// Resolve every sub-config from an already-loaded settings layer.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            agent: AgentConfig::resolve(settings)?,
            chain: ChainConfig::resolve(settings)?,
            engine: EngineConfig::resolve(settings)?,
            classifier: ClassifierConfig::resolve(settings)?,
            attestation: AttestationConfig::resolve(settings)?,
            gateway: GatewayConfig::resolve(settings)?,
            keystore: KeystoreConfig::resolve(settings)?,
        })
    }
}

/// Overlay `settings` with the TOML config file. An explicit path (flag or
/// `EMBERAGENT_CONFIG`) must exist; the default location may be absent.
pub(crate) fn apply_toml_overlay(
    settings: &mut Settings,
    explicit: Option<&Path>,
) -> Result<(), ConfigError> {
    let explicit = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => optional_env("EMBERAGENT_CONFIG")?.map(PathBuf::from),
    };
    let (path, required) = match explicit {
        Some(path) => (path, true),
        None => match Settings::default_toml_path() {
            Some(path) => (path, false),
            None => return Ok(()),
        },
    };
    match Settings::load_toml(&path)? {
        Some(overlay) => {
            settings.merge_from(&overlay);
            Ok(())
        }
        None if required => Err(ConfigError::MissingRequired {
            key: path.display().to_string(),
            hint: "config file not found".to_string(),
        }),
        None => Ok(()),
    }
}

/// The config file the `config` subcommand operates on: explicit path >
/// `EMBERAGENT_CONFIG` > `~/.emberagent/config.toml`.
pub fn config_file_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    if let Some(raw) = optional_env("EMBERAGENT_CONFIG")? {
        return Ok(PathBuf::from(raw));
    }
    Settings::default_toml_path().ok_or_else(|| ConfigError::MissingRequired {
        key: "config path".to_string(),
        hint: "cannot determine the home directory; pass --config or set EMBERAGENT_CONFIG"
            .to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
}

impl AgentConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            name: optional_env("AGENT_NAME")?.unwrap_or_else(|| settings.agent.name.clone()),
        })
    }
}

/// One validated registry row supplied through configuration.
#[derive(Debug, Clone)]
pub struct TokenEntry {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
    pub feed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    pub chain_id: u64,
    pub ftso_contract: Address,
    pub swap_router: Option<Address>,
    pub explorer_base: String,
    pub rpc_timeout: Duration,
    pub slippage_bps: u16,
    pub tokens: Vec<TokenEntry>,
}

impl ChainConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let rpc_url =
            optional_env("WEB3_PROVIDER_URL")?.unwrap_or_else(|| settings.chain.rpc_url.clone());

        let chain_id = parse_env_u64("FLARE_CHAIN_ID")?.unwrap_or(settings.chain.chain_id);
        if chain_id == 0 {
            return Err(invalid("chain.chain_id", "must be a positive integer"));
        }

        let ftso_contract = parse_address(
            "chain.ftso_contract",
            &optional_env("FTSO_CONTRACT_ADDRESS")?
                .unwrap_or_else(|| settings.chain.ftso_contract.clone()),
        )?;

        let swap_router = optional_env("SWAP_ROUTER_ADDRESS")?
            .or_else(|| settings.chain.swap_router.clone())
            .map(|raw| parse_address("chain.swap_router", &raw))
            .transpose()?;

        let explorer_base = optional_env("WEB3_EXPLORER_URL")?
            .unwrap_or_else(|| settings.chain.explorer_base.clone())
            .trim_end_matches('/')
            .to_string();

        let timeout_secs =
            parse_env_u64("RPC_TIMEOUT_SECS")?.unwrap_or(settings.chain.rpc_timeout_secs);
        if timeout_secs == 0 {
            return Err(invalid("chain.rpc_timeout_secs", "must be a positive integer"));
        }

        let slippage_bps = parse_env_u16("SLIPPAGE_BPS")?.unwrap_or(settings.chain.slippage_bps);
        if slippage_bps >= 10_000 {
            return Err(invalid("chain.slippage_bps", "must be below 10000 basis points"));
        }

        let tokens = settings
            .chain
            .tokens
            .iter()
            .map(|token| {
                let key = format!("chain.tokens.{}", token.symbol);
                if token.symbol.trim().is_empty() {
                    return Err(invalid("chain.tokens", "token symbol must not be empty"));
                }
                if token.decimals > 36 {
                    return Err(invalid(&key, "decimals must be at most 36"));
                }
                Ok(TokenEntry {
                    symbol: token.symbol.trim().to_uppercase(),
                    address: parse_address(&key, &token.address)?,
                    decimals: token.decimals,
                    feed: token.feed.clone(),
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(Self {
            rpc_url,
            chain_id,
            ftso_contract,
            swap_router,
            explorer_base,
            rpc_timeout: Duration::from_secs(timeout_secs),
            slippage_bps,
            tokens,
        })
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub confirmation_ttl_secs: u64,
}

impl EngineConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let confirmation_ttl_secs = parse_env_u64("CONFIRMATION_TTL_SECS")?
            .unwrap_or(settings.engine.confirmation_ttl_secs);
        if confirmation_ttl_secs == 0 {
            return Err(invalid(
                "engine.confirmation_ttl_secs",
                "must be a positive integer",
            ));
        }
        Ok(Self {
            confirmation_ttl_secs,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifierBackend {
    /// Offline keyword matcher; no API key required.
    Keyword,
    /// Gemini model behind the generative language API.
    Gemini,
}

impl ClassifierBackend {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "keyword" => Ok(Self::Keyword),
            "gemini" => Ok(Self::Gemini),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("unknown backend '{other}', expected keyword or gemini"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub backend: ClassifierBackend,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout: Duration,
}

impl ClassifierConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let backend = ClassifierBackend::parse(
            &optional_env("CLASSIFIER_BACKEND")?
                .unwrap_or_else(|| settings.classifier.backend.clone()),
            "classifier.backend",
        )?;

        let model =
            optional_env("GEMINI_MODEL")?.unwrap_or_else(|| settings.classifier.model.clone());

        let api_key = optional_env("GEMINI_API_KEY")?.map(SecretString::from);
        if backend == ClassifierBackend::Gemini && api_key.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "GEMINI_API_KEY".to_string(),
                hint: "the gemini classifier needs an API key; set it in the environment or \
                       ~/.emberagent/.env"
                    .to_string(),
            });
        }

        let timeout_secs = parse_env_u64("CLASSIFIER_TIMEOUT_SECS")?
            .unwrap_or(settings.classifier.timeout_secs);
        if timeout_secs == 0 {
            return Err(invalid(
                "classifier.timeout_secs",
                "must be a positive integer",
            ));
        }

        Ok(Self {
            backend,
            model,
            api_key,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttestationMode {
    /// Self-signed tokens from an in-process provider; full claim checks
    /// still run.
    Simulate,
    /// Tokens fetched from the Confidential Space launcher socket.
    Launcher,
}

impl AttestationMode {
    fn parse(value: &str, key: &str) -> Result<Self, ConfigError> {
        match normalize_variant(value).as_str() {
            "simulate" | "simulated" => Ok(Self::Simulate),
            "launcher" => Ok(Self::Launcher),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("unknown mode '{other}', expected simulate or launcher"),
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttestationConfig {
    pub mode: AttestationMode,
    pub audience: String,
    pub image_digest: String,
    pub issuer: String,
    /// Key trusted to sign launcher tokens. `None` in simulate mode, where
    /// the in-process provider supplies its own.
    pub verifying_key: Option<VerifyingKey>,
    pub launcher_socket: PathBuf,
    pub token_max_age_secs: i64,
    pub token_max_skew_secs: i64,
    pub require_secure_boot: bool,
}

impl AttestationConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let mode = AttestationMode::parse(
            &optional_env("ATTESTATION_MODE")?.unwrap_or_else(|| settings.attestation.mode.clone()),
            "attestation.mode",
        )?;

        let audience = optional_env("ATTESTATION_AUDIENCE")?
            .unwrap_or_else(|| settings.attestation.audience.clone());
        let image_digest = optional_env("ATTESTATION_IMAGE_DIGEST")?
            .unwrap_or_else(|| settings.attestation.image_digest.clone());

        let issuer = match mode {
            AttestationMode::Simulate => SIMULATED_ISSUER.to_string(),
            AttestationMode::Launcher => optional_env("ATTESTATION_ISSUER")?
                .unwrap_or_else(|| settings.attestation.issuer.clone()),
        };

        let verifying_key = optional_env("ATTESTATION_VERIFYING_KEY")?
            .or_else(|| settings.attestation.verifying_key.clone())
            .map(|raw| parse_verifying_key("attestation.verifying_key", &raw))
            .transpose()?;
        if mode == AttestationMode::Launcher && verifying_key.is_none() {
            return Err(ConfigError::MissingRequired {
                key: "attestation.verifying_key".to_string(),
                hint: "launcher mode needs the token signer's public key (hex SEC1); set \
                       ATTESTATION_VERIFYING_KEY"
                    .to_string(),
            });
        }

        let launcher_socket = optional_env("ATTESTATION_LAUNCHER_SOCKET")?
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(settings.attestation.launcher_socket.clone()));

        let token_max_age_secs = parse_env_i64("ATTESTATION_TOKEN_MAX_AGE_SECS")?
            .unwrap_or(settings.attestation.token_max_age_secs);
        if token_max_age_secs <= 0 {
            return Err(invalid(
                "attestation.token_max_age_secs",
                "must be a positive integer",
            ));
        }
        let token_max_skew_secs = parse_env_i64("ATTESTATION_TOKEN_MAX_SKEW_SECS")?
            .unwrap_or(settings.attestation.token_max_skew_secs);
        if token_max_skew_secs < 0 {
            return Err(invalid(
                "attestation.token_max_skew_secs",
                "must not be negative",
            ));
        }

        let require_secure_boot = parse_env_bool("ATTESTATION_REQUIRE_SECURE_BOOT")?
            .unwrap_or(settings.attestation.require_secure_boot);

        Ok(Self {
            mode,
            audience,
            image_digest,
            issuer,
            verifying_key,
            launcher_socket,
            token_max_age_secs,
            token_max_skew_secs,
            require_secure_boot,
        })
    }

    /// The claim allow-list tokens must match, with the nonce left blank;
    /// callers bind a fresh nonce per verification.
    pub fn expected_claims(&self) -> ExpectedClaims {
        let (hwmodel, swname) = match self.mode {
            AttestationMode::Simulate => (SIMULATED_HWMODEL, SIMULATED_SWNAME),
            AttestationMode::Launcher => (CONFIDENTIAL_SPACE_HWMODEL, CONFIDENTIAL_SPACE_SWNAME),
        };
        ExpectedClaims {
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            image_digest: self.image_digest.clone(),
            hwmodel: hwmodel.to_string(),
            swname: swname.to_string(),
            nonce: String::new(),
            require_secure_boot: self.require_secure_boot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token required on API calls. `None` disables auth; only safe
    /// for loopback deployments.
    pub auth_token: Option<SecretString>,
    pub cors_origins: Vec<String>,
}

impl GatewayConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let host = optional_env("GATEWAY_HOST")?.unwrap_or_else(|| settings.gateway.host.clone());

        let port = parse_env_u16("GATEWAY_PORT")?.unwrap_or(settings.gateway.port);
        if port == 0 {
            return Err(invalid("gateway.port", "must be between 1 and 65535"));
        }

        Ok(Self {
            host,
            port,
            auth_token: optional_env("GATEWAY_AUTH_TOKEN")?.map(SecretString::from),
            cors_origins: settings.gateway.cors_origins.clone(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct KeystoreConfig {
    pub path: Option<PathBuf>,
    pub passphrase: Option<SecretString>,
}

impl KeystoreConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let path = optional_env("EMBERAGENT_KEYSTORE_PATH")?
            .or_else(|| settings.keystore.path.clone())
            .map(PathBuf::from);
        let passphrase = optional_env("EMBERAGENT_KEYSTORE_PASSPHRASE")?.map(SecretString::from);

        match (&path, &passphrase) {
            (Some(_), None) => Err(ConfigError::MissingRequired {
                key: "EMBERAGENT_KEYSTORE_PASSPHRASE".to_string(),
                hint: "keystore.path is set; the passphrase must come from the environment"
                    .to_string(),
            }),
            (None, Some(_)) => Err(ConfigError::MissingRequired {
                key: "keystore.path".to_string(),
                hint: "a keystore passphrase is set but no directory; set keystore.path or \
                       EMBERAGENT_KEYSTORE_PATH"
                    .to_string(),
            }),
            _ => Ok(Self { path, passphrase }),
        }
    }

    pub fn enabled(&self) -> bool {
        self.path.is_some() && self.passphrase.is_some()
    }
}

fn invalid(key: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::parse(raw).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_verifying_key(key: &str, raw: &str) -> Result<VerifyingKey, ConfigError> {
    let bytes = decode_hex(raw).ok_or_else(|| ConfigError::InvalidValue {
        key: key.to_string(),
        message: "must be hex-encoded SEC1 bytes".to_string(),
    })?;
    VerifyingKey::from_sec1_bytes(&bytes).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("not a valid secp256k1 public key: {e}"),
    })
}

fn parse_env_u64(key: &str) -> Result<Option<u64>, ConfigError> {
    optional_env(key)?
        .map(|raw| raw.parse::<u64>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be an unsigned integer: {e}"),
        })
}

fn parse_env_u16(key: &str) -> Result<Option<u16>, ConfigError> {
    optional_env(key)?
        .map(|raw| raw.parse::<u16>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be an unsigned integer: {e}"),
        })
}

fn parse_env_i64(key: &str) -> Result<Option<i64>, ConfigError> {
    optional_env(key)?
        .map(|raw| raw.parse::<i64>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be an integer: {e}"),
        })
}

fn parse_env_bool(key: &str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = optional_env(key)? else {
        return Ok(None);
    };
    match normalize_variant(&raw).as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;

    // Env vars are process-global; every test that touches them holds this.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "AGENT_NAME",
        "WEB3_PROVIDER_URL",
        "FLARE_CHAIN_ID",
        "FTSO_CONTRACT_ADDRESS",
        "SWAP_ROUTER_ADDRESS",
        "WEB3_EXPLORER_URL",
        "RPC_TIMEOUT_SECS",
        "SLIPPAGE_BPS",
        "CONFIRMATION_TTL_SECS",
        "CLASSIFIER_BACKEND",
        "GEMINI_MODEL",
        "GEMINI_API_KEY",
        "CLASSIFIER_TIMEOUT_SECS",
        "ATTESTATION_MODE",
        "ATTESTATION_AUDIENCE",
        "ATTESTATION_IMAGE_DIGEST",
        "ATTESTATION_ISSUER",
        "ATTESTATION_VERIFYING_KEY",
        "ATTESTATION_LAUNCHER_SOCKET",
        "ATTESTATION_TOKEN_MAX_AGE_SECS",
        "ATTESTATION_TOKEN_MAX_SKEW_SECS",
        "ATTESTATION_REQUIRE_SECURE_BOOT",
        "GATEWAY_HOST",
        "GATEWAY_PORT",
        "GATEWAY_AUTH_TOKEN",
        "EMBERAGENT_KEYSTORE_PATH",
        "EMBERAGENT_KEYSTORE_PASSPHRASE",
        "EMBERAGENT_CONFIG",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            // SAFETY: Guarded by ENV_MUTEX in tests.
            unsafe { std::env::remove_var(key) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe { std::env::set_var(key, value) };
    }

    #[test]
    fn test_defaults_resolve() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = Config::build(&Settings::default()).unwrap();
        assert_eq!(config.agent.name, "emberagent");
        assert_eq!(config.chain.chain_id, 14);
        assert_eq!(
            config.chain.rpc_url,
            "https://flare-api.flare.network/ext/C/rpc"
        );
        assert_eq!(
            config.chain.ftso_contract.to_checksum(),
            "0xB18d3A5e5A85C65cE47f977D7F486B79F99D3d32"
        );
        assert!(config.chain.swap_router.is_none());
        assert_eq!(config.chain.rpc_timeout, Duration::from_secs(20));
        assert_eq!(config.engine.confirmation_ttl_secs, 120);
        assert_eq!(config.classifier.backend, ClassifierBackend::Keyword);
        assert_eq!(config.attestation.mode, AttestationMode::Simulate);
        assert_eq!(config.attestation.issuer, SIMULATED_ISSUER);
        assert!(config.gateway.auth_token.is_none());
        assert!(!config.keystore.enabled());
    }

    #[test]
    fn test_env_overrides_settings() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        set_env("FLARE_CHAIN_ID", "114");
        set_env("WEB3_EXPLORER_URL", "https://coston2-explorer.flare.network/");
        set_env("GATEWAY_PORT", "8080");

        let mut settings = Settings::default();
        settings.gateway.port = 4000;

        let config = Config::build(&settings).unwrap();
        assert_eq!(config.chain.chain_id, 114);
        assert_eq!(
            config.chain.explorer_base,
            "https://coston2-explorer.flare.network"
        );
        assert_eq!(config.gateway.port, 8080);

        clear_env();
        let config = Config::build(&settings).unwrap();
        assert_eq!(config.gateway.port, 4000);
    }

    #[test]
    fn test_gemini_backend_requires_api_key() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        set_env("CLASSIFIER_BACKEND", "gemini");
        let err = Config::build(&Settings::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { key, .. } if key == "GEMINI_API_KEY"));

        set_env("GEMINI_API_KEY", "k-123");
        let config = Config::build(&Settings::default()).unwrap();
        assert_eq!(config.classifier.backend, ClassifierBackend::Gemini);
        assert!(config.classifier.api_key.is_some());

        clear_env();
    }

    #[test]
    fn test_launcher_mode_requires_verifying_key() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut settings = Settings::default();
        settings.attestation.mode = "launcher".to_string();

        let err = Config::build(&settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired { key, .. } if key == "attestation.verifying_key"
        ));

        let signer = k256::ecdsa::SigningKey::random(&mut rand::rngs::OsRng);
        let point = signer.verifying_key().to_encoded_point(true);
        let hex: String = point.as_bytes().iter().map(|b| format!("{b:02x}")).collect();
        settings.attestation.verifying_key = Some(hex);

        let config = Config::build(&settings).unwrap();
        assert_eq!(config.attestation.mode, AttestationMode::Launcher);
        assert_eq!(
            config.attestation.issuer,
            "https://confidentialcomputing.googleapis.com"
        );
        assert!(config.attestation.verifying_key.is_some());

        let expected = config.attestation.expected_claims();
        assert_eq!(expected.hwmodel, CONFIDENTIAL_SPACE_HWMODEL);
        assert_eq!(expected.swname, CONFIDENTIAL_SPACE_SWNAME);
        assert_eq!(expected.nonce, "");
    }

    #[test]
    fn test_simulate_mode_pins_simulated_claims() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = Config::build(&Settings::default()).unwrap();
        let expected = config.attestation.expected_claims();
        assert_eq!(expected.issuer, SIMULATED_ISSUER);
        assert_eq!(expected.hwmodel, SIMULATED_HWMODEL);
        assert_eq!(expected.swname, SIMULATED_SWNAME);
        assert!(expected.require_secure_boot);
    }

    #[test]
    fn test_zero_and_out_of_range_numbers_are_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        set_env("RPC_TIMEOUT_SECS", "0");
        assert!(Config::build(&Settings::default()).is_err());
        clear_env();

        set_env("GATEWAY_PORT", "70000");
        assert!(Config::build(&Settings::default()).is_err());
        clear_env();

        set_env("SLIPPAGE_BPS", "10000");
        assert!(Config::build(&Settings::default()).is_err());
        clear_env();

        set_env("CONFIRMATION_TTL_SECS", "0");
        assert!(Config::build(&Settings::default()).is_err());
        clear_env();
    }

    #[test]
    fn test_config_tokens_are_validated() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut settings = Settings::default();
        settings.chain.tokens.push(crate::settings::TokenSettings {
            symbol: "usdt".to_string(),
            address: "0x0b38e83b86d491735feaa0a791f65c2b99535396".to_string(),
            decimals: 6,
            feed: None,
        });

        let config = Config::build(&settings).unwrap();
        assert_eq!(config.chain.tokens.len(), 1);
        assert_eq!(config.chain.tokens[0].symbol, "USDT");
        assert_eq!(config.chain.tokens[0].decimals, 6);

        settings.chain.tokens[0].address = "0x1234".to_string();
        assert!(Config::build(&settings).is_err());
    }

    #[test]
    fn test_keystore_needs_both_path_and_passphrase() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let mut settings = Settings::default();
        settings.keystore.path = Some("/tmp/keys".to_string());
        let err = Config::build(&settings).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingRequired { key, .. } if key == "EMBERAGENT_KEYSTORE_PASSPHRASE"
        ));

        set_env("EMBERAGENT_KEYSTORE_PASSPHRASE", "hunter2hunter2");
        let config = Config::build(&settings).unwrap();
        assert!(config.keystore.enabled());

        clear_env();
    }

    #[test]
    fn test_toml_overlay_explicit_path_must_exist() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let mut settings = Settings::default();
        assert!(apply_toml_overlay(&mut settings, Some(&missing)).is_err());

        let path = dir.path().join("config.toml");
        let mut on_disk = Settings::default();
        on_disk.gateway.port = 8080;
        on_disk.save_toml(&path).unwrap();

        apply_toml_overlay(&mut settings, Some(&path)).unwrap();
        assert_eq!(settings.gateway.port, 8080);
    }

    #[test]
    fn test_config_file_path_prefers_explicit_then_env() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let explicit = Path::new("/tmp/explicit.toml");
        assert_eq!(
            config_file_path(Some(explicit)).unwrap(),
            PathBuf::from("/tmp/explicit.toml")
        );

        set_env("EMBERAGENT_CONFIG", "/tmp/from-env.toml");
        assert_eq!(
            config_file_path(None).unwrap(),
            PathBuf::from("/tmp/from-env.toml")
        );
        clear_env();
    }
}
