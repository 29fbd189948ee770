//! # lovehack
//!
//! LINE bot that administers an MBTI-style love-type questionnaire, derives
//! a four-letter type code from the answers, and gates a conversational AI
//! advice feature behind a Stripe payment. Per-user state lives in a local
//! SQLite store.
//!
//! The conversational core is the [`router::ConversationRouter`]: inbound
//! webhook text is routed against the user's stored interaction mode
//! (idle, diagnosis, gender registration, partner-type registration), the
//! diagnosis session controller walks the questionnaire one question per
//! message, and the [`questionnaire::scorer`] reduces the collected answers
//! to one of the 16 type codes.

pub mod advice;
pub mod billing;
pub mod config;
pub mod content;
pub mod errors;
pub mod line;
pub mod profile;
pub mod questionnaire;
pub mod router;
pub mod server;

pub use config::AppConfig;
pub use errors::{BotError, BotResult};
pub use profile::{Gender, Mode, TypeCode, UserProfile};
pub use questionnaire::Questionnaire;
pub use router::{ConversationRouter, OutboundMessage};

/// Crate version, surfaced by the health endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
