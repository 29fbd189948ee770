//! LINE Messaging API transport.
//!
//! Owns the inbound webhook envelope types and the outbound serialization:
//! a [`OutboundMessage::Text`] becomes a plain text message, a
//! [`OutboundMessage::YesNoPrompt`] becomes a text message with two fixed
//! quick-reply buttons. The reply endpoint is preferred (free tier); push
//! is the fallback when no reply token is available, e.g. for
//! payment-completion notifications.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::errors::{BotError, BotResult};
use crate::router::OutboundMessage;

const LINE_API_BASE: &str = "https://api.line.me";

// ---------------------------------------------------------------------------
// Inbound webhook envelope
// ---------------------------------------------------------------------------

/// Top-level webhook body: a batch of events.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub events: Vec<WebhookEvent>,
}

/// One webhook event. Only text-message events are routed; everything else
/// (follows, stickers, redeliveries of non-text events) is skipped.
#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(rename = "webhookEventId", default)]
    pub webhook_event_id: Option<String>,
    #[serde(rename = "replyToken", default)]
    pub reply_token: Option<String>,
    #[serde(default)]
    pub source: Option<EventSource>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Deserialize)]
pub struct EventSource {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl WebhookEvent {
    /// Extract `(event_id, user_id, text)` if this is a routable text
    /// message event.
    pub fn as_text_message(&self) -> Option<(Option<&str>, &str, &str)> {
        if self.event_type != "message" {
            return None;
        }
        let message = self.message.as_ref()?;
        if message.message_type != "text" {
            return None;
        }
        let user_id = self.source.as_ref()?.user_id.as_deref()?;
        let text = message.text.as_deref()?;
        let event_id = self
            .webhook_event_id
            .as_deref()
            .or(message.id.as_deref());
        Some((event_id, user_id, text))
    }
}

// ---------------------------------------------------------------------------
// Outbound serialization
// ---------------------------------------------------------------------------

/// Serialize router replies to LINE message objects.
pub fn to_line_messages(messages: &[OutboundMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|message| match message {
            OutboundMessage::Text(text) => json!({ "type": "text", "text": text }),
            OutboundMessage::YesNoPrompt(text) => json!({
                "type": "text",
                "text": text,
                "quickReply": {
                    "items": [
                        {
                            "type": "action",
                            "action": { "type": "message", "label": "はい", "text": "はい" }
                        },
                        {
                            "type": "action",
                            "action": { "type": "message", "label": "いいえ", "text": "いいえ" }
                        }
                    ]
                }
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Push/reply client for the Messaging API.
pub struct LineClient {
    channel_access_token: Option<String>,
    api_base: String,
    timeout: Duration,
}

impl LineClient {
    pub fn new(channel_access_token: Option<String>) -> Self {
        Self {
            channel_access_token,
            api_base: LINE_API_BASE.to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    /// Answer an event via its reply token.
    pub async fn reply(
        &self,
        reply_token: &str,
        messages: &[OutboundMessage],
    ) -> BotResult<()> {
        self.post(
            "/v2/bot/message/reply",
            json!({
                "replyToken": reply_token,
                "messages": to_line_messages(messages),
            }),
        )
        .await
    }

    /// Push messages outside a reply window.
    pub async fn push(&self, to: &str, messages: &[OutboundMessage]) -> BotResult<()> {
        self.post(
            "/v2/bot/message/push",
            json!({
                "to": to,
                "messages": to_line_messages(messages),
            }),
        )
        .await
    }

    async fn post(&self, path: &str, body: Value) -> BotResult<()> {
        let token = self.channel_access_token.as_deref().ok_or_else(|| {
            BotError::ExternalService("LINE_CHANNEL_ACCESS_TOKEN is not configured".into())
        })?;

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| BotError::external("building http client", e))?;

        let response = client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| BotError::external("line request", e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BotError::ExternalService(format!(
                "line api error ({}): {}",
                status, detail
            )));
        }
        log::debug!("line {} delivered", path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_extracts_text_events() {
        let envelope: WebhookEnvelope = serde_json::from_str(
            r#"{
                "destination": "Udeadbeef",
                "events": [
                    {
                        "type": "message",
                        "webhookEventId": "evt-1",
                        "replyToken": "rt-1",
                        "source": { "type": "user", "userId": "u1" },
                        "message": { "type": "text", "id": "m1", "text": "はい" }
                    },
                    {
                        "type": "message",
                        "source": { "type": "user", "userId": "u1" },
                        "message": { "type": "sticker", "id": "m2" }
                    },
                    { "type": "follow", "source": { "type": "user", "userId": "u2" } }
                ]
            }"#,
        )
        .unwrap();

        let routable: Vec<_> = envelope
            .events
            .iter()
            .filter_map(WebhookEvent::as_text_message)
            .collect();
        assert_eq!(routable, vec![(Some("evt-1"), "u1", "はい")]);
    }

    #[test]
    fn test_event_id_falls_back_to_message_id() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{
                "type": "message",
                "source": { "userId": "u1" },
                "message": { "type": "text", "id": "m9", "text": "no" }
            }"#,
        )
        .unwrap();
        assert_eq!(event.as_text_message(), Some((Some("m9"), "u1", "no")));
    }

    #[test]
    fn test_text_serialization() {
        let rendered = to_line_messages(&[OutboundMessage::Text("こんにちは".into())]);
        assert_eq!(
            rendered,
            vec![json!({ "type": "text", "text": "こんにちは" })]
        );
    }

    #[test]
    fn test_yes_no_prompt_has_two_quick_replies() {
        let rendered =
            to_line_messages(&[OutboundMessage::YesNoPrompt("Q1/10\n質問".into())]);
        let items = rendered[0]
            .pointer("/quickReply/items")
            .and_then(Value::as_array)
            .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].pointer("/action/text"), Some(&json!("はい")));
        assert_eq!(items[1].pointer("/action/text"), Some(&json!("いいえ")));
    }
}
