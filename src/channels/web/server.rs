//! Axum HTTP server for the web gateway.
//!
//! Exposes the agent over two routes: `POST /api/chat` for conversation
//! turns and `GET /api/health` for liveness probes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    http::{HeaderValue, StatusCode, header},
    middleware,
    routing::{get, post},
};
use secrecy::SecretString;
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};

use crate::agent::Agent;
use crate::channels::IncomingMessage;
use crate::channels::web::auth::{AuthState, auth_middleware};
use crate::channels::web::types::*;
use crate::error::ChannelError;

/// Simple sliding-window rate limiter.
///
/// Tracks the number of requests in the current window and resets when the
/// window expires. Not per-IP, since this is a single-operator gateway with
/// auth, but it stops a runaway client from flooding the agent.
pub struct RateLimiter {
    /// Requests remaining in the current window.
    remaining: AtomicU64,
    /// Epoch second when the current window started.
    window_start: AtomicU64,
    /// Maximum requests per window.
    max_requests: u64,
    /// Window duration in seconds.
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            remaining: AtomicU64::new(max_requests),
            window_start: AtomicU64::new(
                std::time::SystemTime::now()
                    .duration_since(std::time::UNIX_EPOCH)
                    .unwrap_or_default()
                    .as_secs(),
            ),
            max_requests,
            window_secs,
        }
    }

    /// Try to consume one request. Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self) -> bool {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        let window = self.window_start.load(Ordering::Relaxed);
        if now.saturating_sub(window) >= self.window_secs {
            // Window expired, reset
            self.window_start.store(now, Ordering::Relaxed);
            self.remaining
                .store(self.max_requests - 1, Ordering::Relaxed);
            return true;
        }

        loop {
            let current = self.remaining.load(Ordering::Relaxed);
            if current == 0 {
                return false;
            }
            if self
                .remaining
                .compare_exchange_weak(current, current - 1, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Shared state for all gateway handlers.
pub struct GatewayState {
    /// Agent every channel talks to.
    pub agent: Arc<Agent>,
    /// Rate limiter for the chat endpoint (30 messages per 60 seconds).
    pub chat_rate_limiter: RateLimiter,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl GatewayState {
    pub fn new(agent: Arc<Agent>) -> Self {
        Self {
            agent,
            chat_rate_limiter: RateLimiter::new(30, 60),
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    /// Ask a running server to stop accepting connections and drain.
    pub async fn trigger_shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
/// Without an auth token the chat route is served open; that is only
/// acceptable on loopback.
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
    auth_token: Option<SecretString>,
    cors_origins: &[String],
) -> Result<SocketAddr, ChannelError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: "gateway".to_string(),
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| ChannelError::StartupFailed {
            name: "gateway".to_string(),
            reason: format!("Failed to get local addr: {}", e),
        })?;

    // Public routes (no auth)
    let public = Router::new().route("/api/health", get(health_handler));

    // Protected routes (require auth whenever a token is configured)
    let protected = Router::new().route("/api/chat", post(chat_handler));
    let protected = match auth_token {
        Some(token) => protected.route_layer(middleware::from_fn_with_state(
            AuthState { token },
            auth_middleware,
        )),
        None => {
            tracing::warn!("GATEWAY_AUTH_TOKEN is not set; the chat endpoint is unauthenticated");
            protected
        }
    };

    // CORS: configured origins, or same-host plus localhost when none are
    // set. Never a wildcard; the gateway fronts value-moving operations.
    let mut origins: Vec<HeaderValue> = Vec::new();
    for origin in cors_origins {
        match origin.parse::<HeaderValue>() {
            Ok(value) => origins.push(value),
            Err(_) => tracing::warn!(%origin, "ignoring malformed CORS origin"),
        }
    }
    if origins.is_empty() {
        origins.push(
            format!("http://{}:{}", bound_addr.ip(), bound_addr.port())
                .parse()
                .expect("valid origin"),
        );
        origins.push(
            format!("http://localhost:{}", bound_addr.port())
                .parse()
                .expect("valid origin"),
        );
    }
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]))
        .allow_credentials(true);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Web gateway shutting down");
            })
            .await
        {
            tracing::error!("Web gateway server error: {}", e);
        }
    });

    Ok(bound_addr)
}

// --- Handlers ---

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        channel: "gateway",
    })
}

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    if !state.chat_rate_limiter.check() {
        return Err((
            StatusCode::TOO_MANY_REQUESTS,
            "Rate limit exceeded. Try again shortly.".to_string(),
        ));
    }
    if req.message.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            "message must not be empty".to_string(),
        ));
    }

    let session_id = req.session_id.unwrap_or_else(|| "default".to_string());
    let reply = state
        .agent
        .handle_turn(&IncomingMessage::new("web", session_id.as_str(), &req.message))
        .await;

    Ok(Json(ChatResponse {
        response: reply.text,
        session_id,
        payload: reply.payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_up_to_the_cap() {
        let limiter = RateLimiter::new(3, 60);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());
    }

    #[test]
    fn test_rate_limiter_resets_after_window() {
        // A zero-second window has always expired, so every check resets it.
        let limiter = RateLimiter::new(1, 0);
        assert!(limiter.check());
        assert!(limiter.check());
    }

    #[tokio::test]
    async fn test_health_reports_gateway_channel() {
        let response = health_handler().await;
        assert_eq!(response.0.status, "healthy");
        assert_eq!(response.0.channel, "gateway");
    }
}
