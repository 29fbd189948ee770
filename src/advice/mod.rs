//! Paid AI consultation.
//!
//! The router talks to an [`AdviceProvider`]; production wires in
//! [`OpenAiAdvice`], which renders the user's profile and recent chat
//! history into a love-advisor prompt and calls the chat-completions API.
//! Tests substitute a fake provider, so nothing in the core depends on the
//! network.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::content::Catalog;
use crate::errors::{BotError, BotResult};
use crate::profile::UserProfile;

/// Chat/LLM collaborator: turn a profile, history and question into advice.
#[async_trait]
pub trait AdviceProvider: Send + Sync {
    async fn advise(
        &self,
        profile: &UserProfile,
        history: &[String],
        question: &str,
    ) -> BotResult<String>;
}

/// System role for every advice call.
const SYSTEM_PROMPT: &str = "あなたはMBTI診断ベースの恋愛アドバイザーです。";

/// OpenAI chat-completions implementation.
pub struct OpenAiAdvice {
    api_key: Option<String>,
    base_url: String,
    model: String,
    catalog: Catalog,
    timeout: Duration,
    max_retries: u32,
}

impl OpenAiAdvice {
    pub fn new(
        api_key: Option<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        catalog: Catalog,
    ) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            model: model.into(),
            catalog,
            timeout: Duration::from_secs(30),
            max_retries: 2,
        }
    }

    /// Render the user-turn prompt. Type codes never appear verbatim; the
    /// model sees the display nicknames and is told not to echo them.
    fn build_prompt(&self, profile: &UserProfile, history: &[String], question: &str) -> String {
        let gender = profile
            .gender
            .map(|g| g.as_str())
            .unwrap_or("不明");
        format!(
            "ユーザーは{}の方で、性格タイプは{}です。\n\
             相手の性格タイプは{}です。\n\
             会話履歴:\n{}\n\
             質問: {}\n\n\
             性格タイプ名は出さず、ユーザーに寄り添い、親しみやすくタメ口で絵文字なども使ってわかりやすくアドバイスしてください。\n\
             ただし、ユーザーの性別や相手のタイプを踏まえた上で回答してください。",
            gender,
            self.catalog.nickname_or_unknown(profile.type_code.as_ref()),
            self.catalog
                .nickname_or_unknown(profile.partner_type_code.as_ref()),
            history.join("\n"),
            question,
        )
    }
}

#[async_trait]
impl AdviceProvider for OpenAiAdvice {
    async fn advise(
        &self,
        profile: &UserProfile,
        history: &[String],
        question: &str,
    ) -> BotResult<String> {
        let api_key = self.api_key.as_ref().ok_or_else(|| {
            BotError::ExternalService("OPENAI_API_KEY is not configured".into())
        })?;

        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": self.build_prompt(profile, history, question) },
            ],
        });

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| BotError::external("building http client", e))?;
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut last_error: Option<BotError> = None;
        let mut retry_delay = Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!("advice call retry {} after {:?}", attempt, retry_delay);
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let response = match client
                .post(&endpoint)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(BotError::external("advice request", e));
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = Some(BotError::ExternalService(format!(
                    "advice api returned {}",
                    status
                )));
                continue;
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|e| BotError::external("parsing advice response", e))?;

            if status.is_client_error() {
                return Err(BotError::ExternalService(format!(
                    "advice api error ({}): {}",
                    status, payload
                )));
            }

            let answer = payload
                .get("choices")
                .and_then(|c| c.get(0))
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|t| t.as_str())
                .ok_or_else(|| {
                    BotError::ExternalService("advice response had no content".into())
                })?;
            return Ok(answer.trim().to_string());
        }

        Err(last_error
            .unwrap_or_else(|| BotError::ExternalService("advice call failed".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{Gender, TypeCode};

    fn provider() -> OpenAiAdvice {
        OpenAiAdvice::new(
            None,
            "https://api.openai.com/v1",
            "gpt-4o-mini",
            Catalog::load_default(),
        )
    }

    #[test]
    fn test_prompt_includes_profile_and_history() {
        let p = provider();
        let mut profile = UserProfile::new("u1");
        profile.gender = Some(Gender::Female);
        profile.type_code = Some(TypeCode::parse("ENFP").unwrap());
        profile.partner_type_code = Some(TypeCode::parse("ISTJ").unwrap());

        let history = vec!["user: 前の質問".to_string(), "bot: 前の回答".to_string()];
        let prompt = p.build_prompt(&profile, &history, "会うたびに緊張する");

        assert!(prompt.contains("女性"));
        assert!(prompt.contains("かまってフェニックス🔥"));
        assert!(prompt.contains("恋愛ルールブック📘"));
        assert!(prompt.contains("user: 前の質問"));
        assert!(prompt.contains("質問: 会うたびに緊張する"));
        // The raw codes stay out of the prompt.
        assert!(!prompt.contains("ENFP"));
        assert!(!prompt.contains("ISTJ"));
    }

    #[test]
    fn test_prompt_renders_unknowns() {
        let p = provider();
        let profile = UserProfile::new("u1");
        let prompt = p.build_prompt(&profile, &[], "はじめまして");
        assert!(prompt.contains("ユーザーは不明の方で"));
        assert!(prompt.contains("性格タイプは不明です"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_external_error() {
        let p = provider();
        let profile = UserProfile::new("u1");
        let result = p.advise(&profile, &[], "質問").await;
        assert!(matches!(result, Err(BotError::ExternalService(_))));
    }
}
