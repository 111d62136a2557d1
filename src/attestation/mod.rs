//! TEE attestation: token acquisition and the process trust gate.
//!
//! A provider mints or fetches integrity tokens with a caller nonce bound
//! into the claims. The launcher provider talks to the Confidential Space
//! launcher over its Unix socket; the simulated provider self-signs tokens
//! with a locally generated key so the full verification path runs in
//! environments without hardware attestation.

pub mod verify;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::header;
use hyper_util::rt::TokioIo;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use tokio::net::UnixStream;
use tokio::sync::RwLock;

use crate::error::AttestationError;

pub use verify::{
    ContainerClaims, ExpectedClaims, InvalidReason, Submods, TokenClaims, TokenVerifier, Verdict,
};

/// Claim values stamped by the simulated provider.
pub const SIMULATED_ISSUER: &str = "emberagent-simulator";
pub const SIMULATED_HWMODEL: &str = "SIMULATED";
pub const SIMULATED_SWNAME: &str = "SIMULATED_ENCLAVE";

/// Claim values Confidential Space stamps into launcher tokens.
pub const CONFIDENTIAL_SPACE_HWMODEL: &str = "GCP_AMD_SEV";
pub const CONFIDENTIAL_SPACE_SWNAME: &str = "CONFIDENTIAL_SPACE";

/// Sign `claims` into a compact ES256K JWS envelope.
pub fn sign_token(key: &SigningKey, claims: &TokenClaims) -> Result<String, AttestationError> {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ES256K","typ":"JWT"}"#);
    let body = serde_json::to_vec(claims).map_err(|e| AttestationError::TokenFetch {
        reason: format!("claim serialization failed: {}", e),
    })?;
    let signing_input = format!("{}.{}", header, URL_SAFE_NO_PAD.encode(body));
    let signature: Signature = key.sign(signing_input.as_bytes());
    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.to_bytes())
    ))
}

/// Source of attestation tokens for this process.
#[async_trait]
pub trait AttestationProvider: Send + Sync {
    /// Fetch a token with `nonce` bound into its claims.
    async fn get_token(&self, nonce: &str) -> Result<String, AttestationError>;
}

/// Self-signing provider for deployments without hardware attestation.
///
/// The key is generated at startup; its verifying half must be registered
/// with the [`TokenVerifier`] so that verification exercises the same
/// claim-matching path as production tokens.
pub struct SimulatedProvider {
    key: SigningKey,
    audience: String,
    image_digest: String,
}

impl SimulatedProvider {
    pub fn new(audience: impl Into<String>, image_digest: impl Into<String>) -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
            audience: audience.into(),
            image_digest: image_digest.into(),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        *self.key.verifying_key()
    }
}

#[async_trait]
impl AttestationProvider for SimulatedProvider {
    async fn get_token(&self, nonce: &str) -> Result<String, AttestationError> {
        let claims = TokenClaims {
            iss: SIMULATED_ISSUER.to_string(),
            aud: self.audience.clone(),
            iat: Utc::now().timestamp(),
            eat_nonce: nonce.to_string(),
            hwmodel: SIMULATED_HWMODEL.to_string(),
            swname: SIMULATED_SWNAME.to_string(),
            secboot: true,
            submods: Submods {
                container: ContainerClaims {
                    image_digest: self.image_digest.clone(),
                },
            },
        };
        sign_token(&self.key, &claims)
    }
}

/// Fetches tokens from the Confidential Space launcher over its local
/// Unix socket (`/run/container_launcher/teeserver.sock` in production).
pub struct LauncherProvider {
    socket_path: PathBuf,
    audience: String,
    timeout: Duration,
}

impl LauncherProvider {
    pub fn new(socket_path: impl Into<PathBuf>, audience: impl Into<String>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            audience: audience.into(),
            timeout,
        }
    }

    fn unavailable(&self, reason: impl std::fmt::Display) -> AttestationError {
        AttestationError::LauncherUnavailable {
            endpoint: self.socket_path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    async fn request_token(&self, nonce: &str) -> Result<String, AttestationError> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| self.unavailable(e))?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| self.unavailable(e))?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                tracing::debug!(error = %err, "attestation launcher connection closed");
            }
        });

        let payload = serde_json::json!({
            "audience": self.audience,
            "token_type": "OIDC",
            "nonces": [nonce],
        });
        let body = serde_json::to_vec(&payload).map_err(|e| AttestationError::TokenFetch {
            reason: format!("request serialization failed: {}", e),
        })?;
        let request = Request::post("/v1/token")
            .header(header::HOST, "localhost")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))
            .map_err(|e| AttestationError::TokenFetch {
                reason: e.to_string(),
            })?;

        let response = sender
            .send_request(request)
            .await
            .map_err(|e| AttestationError::TokenFetch {
                reason: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(AttestationError::TokenFetch {
                reason: format!("launcher returned HTTP {}", response.status()),
            });
        }
        let collected =
            response
                .into_body()
                .collect()
                .await
                .map_err(|e| AttestationError::TokenFetch {
                    reason: e.to_string(),
                })?;
        let token = String::from_utf8(collected.to_bytes().to_vec()).map_err(|_| {
            AttestationError::TokenFetch {
                reason: "launcher returned a non-UTF-8 body".to_string(),
            }
        })?;
        Ok(token.trim().to_string())
    }
}

#[async_trait]
impl AttestationProvider for LauncherProvider {
    async fn get_token(&self, nonce: &str) -> Result<String, AttestationError> {
        match tokio::time::timeout(self.timeout, self.request_token(nonce)).await {
            Ok(result) => result,
            Err(_) => Err(AttestationError::TokenFetch {
                reason: format!("launcher did not answer within {}s", self.timeout.as_secs()),
            }),
        }
    }
}

/// Process-wide trust state derived from verification verdicts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustState {
    /// No verification has run yet.
    Unchallenged,
    Verified {
        at: DateTime<Utc>,
    },
    Broken {
        reason: InvalidReason,
        at: DateTime<Utc>,
    },
}

/// Gate for key-management operations.
///
/// An `Invalid` verdict breaks the gate; wallet creation and signing are
/// refused until a later verification succeeds.
#[derive(Debug, Default)]
pub struct TrustGate {
    state: RwLock<Option<TrustState>>,
}

impl TrustGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, verdict: &Verdict) {
        let next = match verdict {
            Verdict::Valid(_) => TrustState::Verified { at: Utc::now() },
            Verdict::Invalid(reason) => TrustState::Broken {
                reason: *reason,
                at: Utc::now(),
            },
        };
        *self.state.write().await = Some(next);
    }

    pub async fn state(&self) -> TrustState {
        self.state
            .read()
            .await
            .clone()
            .unwrap_or(TrustState::Unchallenged)
    }

    /// Err when the last verification verdict was `Invalid`.
    pub async fn require_operational(&self) -> Result<(), AttestationError> {
        match self.state().await {
            TrustState::Broken { reason, .. } => Err(AttestationError::Invalid { reason }),
            TrustState::Unchallenged | TrustState::Verified { .. } => Ok(()),
        }
    }
}
