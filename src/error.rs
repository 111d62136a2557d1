//! Error types for Emberagent.

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Confirmation error: {0}")]
    Engine(#[from] EngineError),

    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Attestation error: {0}")]
    Attestation(#[from] AttestationError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameter validation failures raised while routing an utterance.
///
/// Every variant renders a reason precise enough to show the user as a
/// clarification prompt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("'{value}' is not a valid address: {reason}")]
    MalformedAddress { value: String, reason: String },

    #[error("Address '{value}' fails checksum validation")]
    ChecksumMismatch { value: String },

    #[error("Token '{symbol}' is not in the supported token list")]
    UnknownToken { symbol: String },

    #[error("Token '{symbol}' is price-feed only and cannot be sent or swapped")]
    NotTransferable { symbol: String },

    #[error("Amount must be greater than zero, got '{0}'")]
    NonPositiveAmount(String),

    #[error("Could not parse '{0}' as a decimal amount")]
    UnparseableAmount(String),

    #[error("Amount '{value}' has more decimal places than {symbol} supports ({max})")]
    PrecisionExceeded {
        value: String,
        symbol: String,
        max: u8,
    },

    #[error("Amount '{0}' is too large")]
    AmountTooLarge(String),

    #[error("A swap needs two different tokens, got {symbol} twice")]
    SelfSwap { symbol: String },

    #[error("No swap path is configured for '{symbol}' on this deployment")]
    NoSwapPath { symbol: String },
}

/// Confirmation engine failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The quote behind a pending preview passed its deadline before the
    /// user confirmed. Nothing was submitted.
    #[error("The quoted transaction expired at {expired_at}; nothing was submitted")]
    QuoteExpired { expired_at: String },

    /// A second preview was requested while one is already pending.
    #[error("Another transaction is already awaiting confirmation: {pending}")]
    PendingConflict { pending: String },

    /// The stored preview no longer matches its creation-time fingerprint.
    /// Execution refuses rather than signing mutated numbers.
    #[error("Pending preview failed integrity check; refusing to submit")]
    PreviewTampered,

    #[error("There is no pending transaction to confirm")]
    NothingPending,
}

/// Chain adapter failures.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// A chain call exceeded its deadline. The outcome is ambiguous and
    /// the adapter never retries on the caller's behalf.
    #[error("Chain call timed out after {seconds}s; outcome unknown")]
    Timeout { seconds: u64 },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("RPC transport error: {0}")]
    Transport(String),

    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),

    #[error("Quantity '{0}' does not fit in 128 bits")]
    QuantityOverflow(String),

    #[error("'{name}' is not a valid oracle feed name")]
    InvalidFeed { name: String },

    #[error("No swap router is configured for this deployment")]
    NoSwapRouter,

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Keystore error: {0}")]
    Keystore(String),
}

/// Attestation subsystem failures.
#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("Failed to obtain attestation token: {reason}")]
    TokenFetch { reason: String },

    #[error("Attestation launcher unavailable at {endpoint}: {reason}")]
    LauncherUnavailable { endpoint: String, reason: String },

    /// Verification returned an Invalid verdict. Fatal to the trust
    /// boundary: key-management operations are refused until a later
    /// verification succeeds.
    #[error("Attestation token failed verification: {reason}")]
    Invalid { reason: crate::attestation::InvalidReason },
}

/// Intent classifier failures. The router maps all of these to an
/// `Unknown` intent with confidence 0 rather than surfacing them.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Classifier request failed ({provider}): {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Classifier timed out after {seconds}s ({provider})")]
    Timeout { provider: String, seconds: u64 },

    #[error("Classifier returned an unusable reply ({provider}): {reason}")]
    MalformedReply { provider: String, reason: String },

    #[error("Classifier setup failed ({provider}): {reason}")]
    Setup { provider: String, reason: String },
}

/// Channel (REPL / HTTP gateway) errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Failed to start channel {name}: {reason}")]
    StartupFailed { name: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
