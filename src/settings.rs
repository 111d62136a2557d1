//! Persisted agent settings.
//!
//! `Settings` is the file layer: the shape of `~/.emberagent/config.toml`.
//! Values resolve with priority environment variable > config file >
//! built-in default; the typed runtime view lives in [`crate::config`].
//! Dotted keys (`chain.rpc_url`, `attestation.mode`) address individual
//! fields for the `config get`/`config set` commands.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::helpers::normalize_variant;
use crate::error::ConfigError;

fn default_agent_name() -> String {
    "emberagent".to_string()
}

fn default_rpc_url() -> String {
    "https://flare-api.flare.network/ext/C/rpc".to_string()
}

fn default_chain_id() -> u64 {
    14
}

fn default_ftso_contract() -> String {
    "0xB18d3A5e5A85C65cE47f977D7F486B79F99D3d32".to_string()
}

fn default_explorer_base() -> String {
    "https://flare-explorer.flare.network".to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    20
}

fn default_slippage_bps() -> u16 {
    50
}

fn default_token_decimals() -> u8 {
    18
}

fn default_confirmation_ttl_secs() -> u64 {
    120
}

fn default_classifier_backend() -> String {
    "keyword".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

fn default_classifier_timeout_secs() -> u64 {
    10
}

fn default_attestation_mode() -> String {
    "simulate".to_string()
}

fn default_attestation_audience() -> String {
    "https://emberagent.local".to_string()
}

fn default_image_digest() -> String {
    "sha256:dev".to_string()
}

fn default_attestation_issuer() -> String {
    "https://confidentialcomputing.googleapis.com".to_string()
}

fn default_launcher_socket() -> String {
    "/run/container_launcher/teeserver.sock".to_string()
}

fn default_token_max_age_secs() -> i64 {
    300
}

fn default_token_max_skew_secs() -> i64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    3000
}

/// Keys whose value must be one of a fixed set of variants. `set` normalizes
/// case and separators before checking.
const VARIANT_KEYS: &[(&str, &[&str])] = &[
    ("classifier.backend", &["keyword", "gemini"]),
    ("attestation.mode", &["simulate", "launcher"]),
];

/// Keys holding endpoint URLs; assignments are checked before they land in
/// the file so a typo surfaces at `config set` time, not at startup.
const ENDPOINT_KEYS: &[&str] = &["chain.rpc_url", "chain.explorer_base"];

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub chain: ChainSettings,
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub classifier: ClassifierSettings,
    #[serde(default)]
    pub attestation: AttestationSettings,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub keystore: KeystoreSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Display name shown by the REPL banner and the health endpoint.
    #[serde(default = "default_agent_name")]
    pub name: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSettings {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    /// FTSOv2 reader contract answering `getFeedById` price queries.
    #[serde(default = "default_ftso_contract")]
    pub ftso_contract: String,
    /// Swap router contract. Swaps are refused while this is unset.
    #[serde(default)]
    pub swap_router: Option<String>,
    /// Block explorer base for transaction links in replies.
    #[serde(default = "default_explorer_base")]
    pub explorer_base: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Slippage tolerance applied to swap quotes, in basis points.
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    /// Extra ERC-20 rows merged over the built-in token registry. Contract
    /// addresses are deployment-specific, so they live here rather than in
    /// code.
    #[serde(default)]
    pub tokens: Vec<TokenSettings>,
}

impl Default for ChainSettings {
    fn default() -> Self {
        Self {
            rpc_url: default_rpc_url(),
            chain_id: default_chain_id(),
            ftso_contract: default_ftso_contract(),
            swap_router: None,
            explorer_base: default_explorer_base(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            slippage_bps: default_slippage_bps(),
            tokens: Vec::new(),
        }
    }
}

/// One `[[chain.tokens]]` entry in the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSettings {
    pub symbol: String,
    pub address: String,
    #[serde(default = "default_token_decimals")]
    pub decimals: u8,
    /// FTSO feed name, e.g. `BTC/USD`, when the token has one.
    #[serde(default)]
    pub feed: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Seconds a previewed transaction stays confirmable.
    #[serde(default = "default_confirmation_ttl_secs")]
    pub confirmation_ttl_secs: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            confirmation_ttl_secs: default_confirmation_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSettings {
    /// `keyword` (offline) or `gemini`. Gemini needs `GEMINI_API_KEY`.
    #[serde(default = "default_classifier_backend")]
    pub backend: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default = "default_classifier_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            backend: default_classifier_backend(),
            model: default_gemini_model(),
            timeout_secs: default_classifier_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttestationSettings {
    /// `simulate` or `launcher`.
    #[serde(default = "default_attestation_mode")]
    pub mode: String,
    /// Audience the token must be issued for.
    #[serde(default = "default_attestation_audience")]
    pub audience: String,
    /// Container image digest expected in verified tokens.
    #[serde(default = "default_image_digest")]
    pub image_digest: String,
    /// Issuer expected in `launcher` tokens; `simulate` ignores this.
    #[serde(default = "default_attestation_issuer")]
    pub issuer: String,
    /// Hex SEC1 public key trusted to sign `launcher` tokens.
    #[serde(default)]
    pub verifying_key: Option<String>,
    /// Unix socket the in-enclave launcher serves tokens on.
    #[serde(default = "default_launcher_socket")]
    pub launcher_socket: String,
    #[serde(default = "default_token_max_age_secs")]
    pub token_max_age_secs: i64,
    #[serde(default = "default_token_max_skew_secs")]
    pub token_max_skew_secs: i64,
    /// Require the token to assert secure boot.
    #[serde(default = "default_true")]
    pub require_secure_boot: bool,
}

impl Default for AttestationSettings {
    fn default() -> Self {
        Self {
            mode: default_attestation_mode(),
            audience: default_attestation_audience(),
            image_digest: default_image_digest(),
            issuer: default_attestation_issuer(),
            verifying_key: None,
            launcher_socket: default_launcher_socket(),
            token_max_age_secs: default_token_max_age_secs(),
            token_max_skew_secs: default_token_max_skew_secs(),
            require_secure_boot: default_true(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Origins allowed to call the HTTP API. Empty means same-origin only.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct KeystoreSettings {
    /// Directory for encrypted session keys. Unset disables persistence.
    /// The passphrase only ever comes from `EMBERAGENT_KEYSTORE_PASSPHRASE`.
    #[serde(default)]
    pub path: Option<String>,
}

impl Settings {
    /// Default config file location, `~/.emberagent/config.toml`.
    pub fn default_toml_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".emberagent").join("config.toml"))
    }

    /// Read settings from a TOML file. `Ok(None)` when the file does not
    /// exist; a parse failure is an error so a corrupt file is never
    /// silently replaced by defaults.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, ConfigError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(ConfigError::Io(err)),
        };
        let settings = toml::from_str(&raw)
            .map_err(|e| ConfigError::ParseError(format!("{}: {e}", path.display())))?;
        Ok(Some(settings))
    }

    /// Write settings as TOML, creating parent directories as needed.
    pub fn save_toml(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let contents = format!(
            "# Emberagent configuration file.\n\
             # Priority: environment variables > this file > built-in defaults.\n\
             # Run `emberagent config init` to regenerate.\n\n{body}"
        );
        fs::write(path, contents)?;
        Ok(())
    }

    /// Look up a dotted key, e.g. `chain.rpc_url`.
    pub fn get(&self, key: &str) -> Option<Value> {
        let tree = serde_json::to_value(self).ok()?;
        let mut node = &tree;
        for part in key.split('.') {
            node = node.as_object()?.get(part)?;
        }
        Some(node.clone())
    }

    /// Assign a dotted key from its string form, coercing to the field's
    /// type and validating constrained keys.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), ConfigError> {
        let value = self.coerce(key, raw)?;
        self.put(key, value)
    }

    /// Restore a dotted key to its built-in default.
    pub fn reset(&mut self, key: &str) -> Result<(), ConfigError> {
        let fallback = Settings::default().get(key).ok_or_else(|| unknown_key(key))?;
        self.put(key, fallback)
    }

    /// Every leaf key with its display value, in stable order.
    pub fn list(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        if let Ok(tree) = serde_json::to_value(self) {
            collect_leaves(&tree, String::new(), &mut out);
        }
        out
    }

    /// Overlay every field of `other` that differs from the built-in
    /// default. Fields `other` left at their default keep `self`'s value.
    pub fn merge_from(&mut self, other: &Settings) {
        let (Ok(mut base), Ok(incoming), Ok(default)) = (
            serde_json::to_value(&*self),
            serde_json::to_value(other),
            serde_json::to_value(Settings::default()),
        ) else {
            return;
        };
        merge_non_default(&mut base, &incoming, &default);
        if let Ok(merged) = serde_json::from_value(base) {
            *self = merged;
        }
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), ConfigError> {
        let mut tree =
            serde_json::to_value(&*self).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        let slot = locate_mut(&mut tree, key).ok_or_else(|| unknown_key(key))?;
        *slot = value;
        *self = serde_json::from_value(tree).map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: e.to_string(),
        })?;
        Ok(())
    }

    fn coerce(&self, key: &str, raw: &str) -> Result<Value, ConfigError> {
        if let Some((_, allowed)) = VARIANT_KEYS.iter().find(|(name, _)| *name == key) {
            let variant = normalize_variant(raw);
            if !allowed.contains(&variant.as_str()) {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: format!("must be one of: {}", allowed.join(", ")),
                });
            }
            return Ok(Value::String(variant));
        }
        if ENDPOINT_KEYS.contains(&key) {
            validate_endpoint_url(key, raw)?;
            return Ok(Value::String(raw.trim().to_string()));
        }
        match self.get(key).ok_or_else(|| unknown_key(key))? {
            Value::Bool(_) => raw.trim().parse::<bool>().map(Value::Bool).map_err(|_| {
                ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be true or false".to_string(),
                }
            }),
            Value::Number(_) => raw
                .trim()
                .parse::<i64>()
                .map(|n| Value::Number(n.into()))
                .map_err(|_| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: "must be an integer".to_string(),
                }),
            Value::String(_) | Value::Null => Ok(Value::String(raw.to_string())),
            Value::Array(_) | Value::Object(_) => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: "structured value; edit the config file directly".to_string(),
            }),
        }
    }
}

fn unknown_key(key: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: "no such settings key".to_string(),
    }
}

fn locate_mut<'a>(tree: &'a mut Value, key: &str) -> Option<&'a mut Value> {
    let mut node = tree;
    for part in key.split('.') {
        node = node.as_object_mut()?.get_mut(part)?;
    }
    Some(node)
}

fn collect_leaves(node: &Value, prefix: String, out: &mut Vec<(String, String)>) {
    match node {
        Value::Object(map) => {
            for (name, child) in map {
                let key = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                collect_leaves(child, key, out);
            }
        }
        leaf => out.push((prefix, render_leaf(leaf))),
    }
}

fn render_leaf(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn merge_non_default(base: &mut Value, incoming: &Value, default: &Value) {
    match (incoming, default) {
        (Value::Object(inc), Value::Object(def)) => {
            if let Value::Object(out) = base {
                for (name, value) in inc {
                    let fallback = def.get(name).cloned().unwrap_or(Value::Null);
                    match out.get_mut(name) {
                        Some(slot) => merge_non_default(slot, value, &fallback),
                        None => {
                            out.insert(name.clone(), value.clone());
                        }
                    }
                }
            }
        }
        _ => {
            if incoming != default {
                *base = incoming.clone();
            }
        }
    }
}

fn validate_endpoint_url(key: &str, raw: &str) -> Result<(), ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };
    let parsed =
        url::Url::parse(raw.trim()).map_err(|e| invalid(format!("not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("must use http or https".to_string()));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("must include a host".to_string()));
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(invalid("must not embed credentials".to_string()));
    }
    Ok(())
}
