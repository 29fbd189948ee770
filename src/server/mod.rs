//! HTTP surface of the bot.
//!
//! Exposes the LINE webhook, the Stripe payment webhook, and the JSON
//! endpoints the companion frontends call.
//!
//! # Endpoints
//!
//! - `GET  /`, `GET /health`     — Liveness probe
//! - `POST /webhook`, `/callback` — LINE webhook events
//! - `POST /stripe_webhook`      — Payment completion
//! - `POST /create_payment_url`  — Checkout link for a user
//! - `POST /mbti_collect`        — Externally collected diagnosis answers
//! - `POST /mbti_detail`         — Paid long-form advice lookup
//! - `POST /ask`                 — Paid AI consultation
//! - `GET  /success`, `/cancel`  — Checkout landing pages

pub mod routes;

pub use routes::{app_router, AppState};
