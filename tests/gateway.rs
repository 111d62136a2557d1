//! End-to-end integration tests for the HTTP gateway.
//!
//! These tests start a real Axum server on a random port and drive it with
//! an HTTP client, verifying the full request flow:
//! - Health endpoint is public
//! - Chat endpoint enforces bearer auth (and serves open when unconfigured)
//! - Chat round trip through the agent
//! - Input validation and rate limiting
//! - Session isolation across `session_id` values

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use emberagent::attestation::SIMULATED_ISSUER;
use emberagent::bootstrap::build_agent;
use emberagent::chain::Address;
use emberagent::channels::web::server::{GatewayState, start_server};
use emberagent::config::{
    AgentConfig, AttestationConfig, AttestationMode, ChainConfig, ClassifierBackend,
    ClassifierConfig, Config, EngineConfig, GatewayConfig, KeystoreConfig,
};

const AUTH_TOKEN: &str = "test-token-12345";
const TIMEOUT: Duration = Duration::from_secs(5);

/// A config whose network surfaces point nowhere: the keyword classifier
/// needs no API, attestation is simulated in-process, and the RPC endpoint
/// is a dead port so any accidental chain call fails fast.
fn test_config() -> Config {
    Config {
        agent: AgentConfig {
            name: "emberagent".to_string(),
        },
        chain: ChainConfig {
            rpc_url: "http://127.0.0.1:9".to_string(),
            chain_id: 14,
            ftso_contract: Address::from_bytes([0u8; 20]),
            swap_router: None,
            explorer_base: "https://flarescan.test".to_string(),
            rpc_timeout: Duration::from_secs(1),
            slippage_bps: 50,
            tokens: Vec::new(),
        },
        engine: EngineConfig {
            confirmation_ttl_secs: 120,
        },
        classifier: ClassifierConfig {
            backend: ClassifierBackend::Keyword,
            model: "gemini-1.5-flash".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
        },
        attestation: AttestationConfig {
            mode: AttestationMode::Simulate,
            audience: "https://agent.test".to_string(),
            image_digest: "sha256:dev".to_string(),
            issuer: SIMULATED_ISSUER.to_string(),
            verifying_key: None,
            launcher_socket: PathBuf::from("/run/container_launcher/teeserver.sock"),
            token_max_age_secs: 300,
            token_max_skew_secs: 60,
            require_secure_boot: false,
        },
        gateway: GatewayConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            auth_token: None,
            cors_origins: Vec::new(),
        },
        keystore: KeystoreConfig {
            path: None,
            passphrase: None,
        },
    }
}

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("Failed to bind")
}

/// Start a gateway on a random port, backed by a real agent, and return the
/// bound address. `None` means the sandbox refused the bind; callers skip.
async fn start_test_server(auth_token: Option<SecretString>) -> Option<(SocketAddr, Arc<GatewayState>)> {
    let agent = Arc::new(build_agent(&test_config()).unwrap());
    let state = Arc::new(GatewayState::new(agent));

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    match start_server(addr, state.clone(), auth_token, &[]).await {
        Ok(bound_addr) => Some((bound_addr, state)),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start test server: {e:?}"),
    }
}

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(TIMEOUT)
        .build()
        .expect("client builds")
}

async fn chat(
    addr: SocketAddr,
    token: Option<&str>,
    body: serde_json::Value,
) -> reqwest::Response {
    let mut request = client().post(format!("http://{}/api/chat", addr)).json(&body);
    if let Some(token) = token {
        request = request.header("Authorization", format!("Bearer {}", token));
    }
    request.send().await.expect("chat request sends")
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_health_is_public() {
    let Some((addr, _state)) = start_test_server(Some(SecretString::from(AUTH_TOKEN))).await else {
        return;
    };

    // No Authorization header on purpose.
    let resp = client()
        .get(format!("http://{}/api/health", addr))
        .send()
        .await
        .expect("health request sends");
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["channel"], "gateway");
}

#[tokio::test]
async fn test_chat_rejects_missing_or_wrong_token() {
    let Some((addr, _state)) = start_test_server(Some(SecretString::from(AUTH_TOKEN))).await else {
        return;
    };

    let resp = chat(addr, None, serde_json::json!({ "message": "/help" })).await;
    assert_eq!(resp.status(), 401);

    let resp = chat(addr, Some("wrong-token"), serde_json::json!({ "message": "/help" })).await;
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_chat_round_trip_with_auth() {
    let Some((addr, _state)) = start_test_server(Some(SecretString::from(AUTH_TOKEN))).await else {
        return;
    };

    let resp = chat(
        addr,
        Some(AUTH_TOKEN),
        serde_json::json!({ "message": "/help" }),
    )
    .await;
    assert_eq!(resp.status(), 200);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(
        body["response"]
            .as_str()
            .unwrap()
            .contains("on-chain operations"),
        "{body}"
    );
    // Without a session_id the gateway pins the shared default session.
    assert_eq!(body["session_id"], "default");
}

#[tokio::test]
async fn test_chat_without_configured_token_is_open() {
    let Some((addr, _state)) = start_test_server(None).await else {
        return;
    };

    let resp = chat(addr, None, serde_json::json!({ "message": "/help" })).await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_blank_message_is_rejected() {
    let Some((addr, _state)) = start_test_server(Some(SecretString::from(AUTH_TOKEN))).await else {
        return;
    };

    let resp = chat(addr, Some(AUTH_TOKEN), serde_json::json!({ "message": "   " })).await;
    assert_eq!(resp.status(), 422);
}

#[tokio::test]
async fn test_sessions_keep_separate_wallets() {
    let Some((addr, _state)) = start_test_server(Some(SecretString::from(AUTH_TOKEN))).await else {
        return;
    };

    let resp = chat(
        addr,
        Some(AUTH_TOKEN),
        serde_json::json!({ "message": "create a wallet", "session_id": "desk-a" }),
    )
    .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["session_id"], "desk-a");
    let address = body["payload"]["address"]
        .as_str()
        .expect("wallet payload carries the address")
        .to_string();

    // The other session has no wallet to show.
    let resp = chat(
        addr,
        Some(AUTH_TOKEN),
        serde_json::json!({ "message": "/address", "session_id": "desk-b" }),
    )
    .await;
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(
        body["response"].as_str().unwrap().contains("No wallet"),
        "{body}"
    );

    // The original session still does.
    let resp = chat(
        addr,
        Some(AUTH_TOKEN),
        serde_json::json!({ "message": "/address", "session_id": "desk-a" }),
    )
    .await;
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(
        body["response"].as_str().unwrap().contains(&address),
        "{body}"
    );
}

#[tokio::test]
async fn test_chat_rate_limit_returns_429() {
    let Some((addr, _state)) = start_test_server(Some(SecretString::from(AUTH_TOKEN))).await else {
        return;
    };

    // The gateway allows 30 chat messages per window.
    for _ in 0..30 {
        let resp = chat(addr, Some(AUTH_TOKEN), serde_json::json!({ "message": "/help" })).await;
        assert_eq!(resp.status(), 200);
    }

    let resp = chat(addr, Some(AUTH_TOKEN), serde_json::json!({ "message": "/help" })).await;
    assert_eq!(resp.status(), 429);
    assert!(
        resp.text().await.unwrap().contains("Rate limit exceeded"),
        "expected the rate limit message"
    );
}
