//! Process configuration, read once from the environment at startup and
//! passed explicitly into every component. Nothing else in the crate reads
//! environment variables.
//!
//! A missing credential disables its collaborator (calls through it fail as
//! `ExternalService` and degrade to fallback messages); it never panics the
//! process.

use std::path::PathBuf;

use crate::errors::BotResult;
use crate::questionnaire::Questionnaire;

/// All runtime configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// HTTP listen port.
    pub port: u16,
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Questionnaire selection: `standard`, `extended`, or a JSON file path.
    pub questionnaire: String,

    // OpenAI
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,

    // Stripe
    pub stripe_secret_key: Option<String>,
    pub stripe_price_id: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub checkout_success_url: String,
    pub checkout_cancel_url: String,

    // LINE
    pub line_channel_access_token: Option<String>,
}

impl AppConfig {
    /// Load from environment variables.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5000),
            db_path: std::env::var("LOVEHACK_DB")
                .unwrap_or_else(|_| "user_data.db".into())
                .into(),
            questionnaire: std::env::var("QUESTIONNAIRE")
                .unwrap_or_else(|_| "standard".into()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            openai_model: std::env::var("OPENAI_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".into()),
            stripe_secret_key: std::env::var("STRIPE_SECRET_KEY").ok(),
            stripe_price_id: std::env::var("STRIPE_PRICE_ID").ok(),
            stripe_webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET").ok(),
            checkout_success_url: std::env::var("CHECKOUT_SUCCESS_URL")
                .unwrap_or_else(|_| "https://lovehack20.onrender.com/success".into()),
            checkout_cancel_url: std::env::var("CHECKOUT_CANCEL_URL")
                .unwrap_or_else(|_| "https://lovehack20.onrender.com/cancel".into()),
            line_channel_access_token: std::env::var("LINE_CHANNEL_ACCESS_TOKEN").ok(),
        }
    }

    /// Resolve the configured questionnaire.
    pub fn load_questionnaire(&self) -> BotResult<Questionnaire> {
        match self.questionnaire.as_str() {
            "standard" => Ok(Questionnaire::standard()),
            "extended" => Ok(Questionnaire::extended()),
            path => {
                let json = std::fs::read_to_string(path).map_err(|e| {
                    crate::errors::BotError::InvalidInput(format!(
                        "cannot read questionnaire {}: {}",
                        path, e
                    ))
                })?;
                Questionnaire::from_json(&json)
            }
        }
    }

    /// Warn about unset credentials so a misconfigured deployment is
    /// visible at startup instead of at first use.
    pub fn log_missing_credentials(&self) {
        for (name, set) in [
            ("OPENAI_API_KEY", self.openai_api_key.is_some()),
            ("STRIPE_SECRET_KEY", self.stripe_secret_key.is_some()),
            ("STRIPE_PRICE_ID", self.stripe_price_id.is_some()),
            ("STRIPE_WEBHOOK_SECRET", self.stripe_webhook_secret.is_some()),
            (
                "LINE_CHANNEL_ACCESS_TOKEN",
                self.line_channel_access_token.is_some(),
            ),
        ] {
            if !set {
                tracing::warn!("{} is not set; the dependent feature is disabled", name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            port: 5000,
            db_path: "test.db".into(),
            questionnaire: "standard".into(),
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".into(),
            openai_model: "gpt-4o-mini".into(),
            stripe_secret_key: None,
            stripe_price_id: None,
            stripe_webhook_secret: None,
            checkout_success_url: "https://example.com/success".into(),
            checkout_cancel_url: "https://example.com/cancel".into(),
            line_channel_access_token: None,
        }
    }

    #[test]
    fn test_builtin_questionnaire_selection() {
        let mut config = base_config();
        assert_eq!(config.load_questionnaire().unwrap().total_questions(), 10);
        config.questionnaire = "extended".into();
        assert_eq!(config.load_questionnaire().unwrap().total_questions(), 16);
    }

    #[test]
    fn test_missing_questionnaire_file_is_rejected() {
        let mut config = base_config();
        config.questionnaire = "/nonexistent/questions.json".into();
        assert!(config.load_questionnaire().is_err());
    }
}
