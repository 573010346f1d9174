//! onionchat node daemon.
//!
//! Hosts the inbound HTTP boundary of the protocol and wires it to the
//! validation/dispatch pipeline. The hidden service itself (the component
//! that owns the onion address and forwards connections to the local bind
//! address) is external; this daemon is the thing it forwards to.
//!
//! ## Usage
//!
//! ```bash
//! # Run with the hidden service's hostname, routing outbound through Tor
//! onionchat-node --address abcdefghij234567.onion --socks socks5h://127.0.0.1:9050
//!
//! # Enable debug logging
//! RUST_LOG=debug onionchat-node --address abcdefghij234567.onion
//! ```

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use onionchat::config::NodeConfig;
use onionchat::crypto::CryptoIdentity;
use onionchat::dispatch::EchoSink;
use onionchat::store::JsonFileStore;
use onionchat::transport::HttpTransport;
use onionchat::{OnionChatError, ProtocolContext, MAX_REQUEST_BODY_BYTES};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config).await {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}

async fn run(config: NodeConfig) -> onionchat::Result<()> {
    info!(data_dir = %config.data_dir.display(), "opening data directory");
    let store = Arc::new(JsonFileStore::open(&config.data_dir)?);

    let identity = CryptoIdentity::load_or_create(store.as_ref())?;
    info!(
        address = %config.my_address,
        key_bits = identity.key_size_bits(),
        "identity ready"
    );

    let transport = HttpTransport::new(config.socks_proxy.as_deref(), config.peer_port)?;
    let context = Arc::new(
        ProtocolContext::new(
            identity,
            config.my_address.clone(),
            store.clone(),
            store,
            Arc::new(transport),
            Arc::new(EchoSink),
        )
        .with_incoming_policy(config.incoming_policy)
        .with_min_peer_key_bits(config.min_peer_key_bits),
    );

    let app = Router::new()
        .route("/", get(handle_liveness).post(handle_envelope))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .with_state(context);

    let listener = TcpListener::bind(config.bind)
        .await
        .map_err(|e| OnionChatError::config(format!("failed to bind {}: {}", config.bind, e)))?;
    info!(bind = %config.bind, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| OnionChatError::transport(format!("server error: {}", e)))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to install shutdown handler: {}", e);
    } else {
        info!("shutdown signal received");
    }
}

async fn handle_liveness() -> &'static str {
    "onionchat node\n"
}

/// Inbound boundary: validate synchronously, answer the sender with the
/// verdict, and only then process the accepted envelope. The sender's 200
/// must not wait on decryption or a reciprocal send.
async fn handle_envelope(
    State(context): State<Arc<ProtocolContext>>,
    body: Bytes,
) -> impl IntoResponse {
    let verdict = match context.validate_inbound(&body) {
        Ok(verdict) => verdict,
        Err(e) => {
            error!(error = %e, "validator storage failure");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "reason": "internal" })),
            );
        }
    };

    if verdict.is_accepted() {
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(e) = context.dispatch_inbound(&body).await {
                error!(error = %e, "dispatch failure");
            }
        });
        (StatusCode::OK, Json(serde_json::json!({ "status": "OK" })))
    } else {
        let status =
            StatusCode::from_u16(verdict.code).unwrap_or(StatusCode::FORBIDDEN);
        (
            status,
            Json(serde_json::json!({ "reason": verdict.reason.unwrap_or_default() })),
        )
    }
}
