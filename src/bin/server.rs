//! lovehack HTTP server binary.
//!
//! Starts the axum server that receives LINE webhook events and Stripe
//! payment notifications.
//!
//! # Environment Variables
//!
//! - `PORT` — HTTP port (default: 5000)
//! - `LOVEHACK_DB` — SQLite database path (default: `user_data.db`)
//! - `QUESTIONNAIRE` — `standard`, `extended`, or a JSON file path
//! - `OPENAI_API_KEY`, `OPENAI_BASE_URL`, `OPENAI_MODEL` — AI consultation
//! - `STRIPE_SECRET_KEY`, `STRIPE_PRICE_ID`, `STRIPE_WEBHOOK_SECRET` — billing
//! - `CHECKOUT_SUCCESS_URL`, `CHECKOUT_CANCEL_URL` — checkout landing pages
//! - `LINE_CHANNEL_ACCESS_TOKEN` — outbound messaging
//! - `RUST_LOG` — Tracing filter (default: "info")
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin server
//! ```

use anyhow::Context;
use lovehack::server::{app_router, AppState};
use lovehack::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,lovehack=debug".into()),
        )
        .init();

    let config = AppConfig::from_env();
    config.log_missing_credentials();

    let state = AppState::from_config(&config).context("building application state")?;
    let app = app_router(state);

    let bind_addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("lovehack server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health          — liveness probe");
    tracing::info!("  POST /webhook         — LINE webhook events");
    tracing::info!("  POST /stripe_webhook  — payment completion");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("binding listener")?;

    axum::serve(listener, app).await.context("serving")?;
    Ok(())
}
