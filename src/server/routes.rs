//! Axum route handlers.
//!
//! Handlers stay thin: parse, delegate to the router/store/collaborators,
//! map the error taxonomy to HTTP. Only persistence failures become 500s;
//! collaborator failures inside the conversational flow were already
//! degraded to fallback messages by the router.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::advice::{AdviceProvider, OpenAiAdvice};
use crate::billing::{self, BillingProvider, StripeBilling, StripeEvent};
use crate::config::AppConfig;
use crate::content::Catalog;
use crate::errors::{BotError, BotResult};
use crate::line::{LineClient, WebhookEnvelope, WebhookEvent};
use crate::profile::store::ProfileStore;
use crate::profile::{Gender, TypeCode};
use crate::questionnaire::{scorer, Questionnaire};
use crate::router::intent::KeywordClassifier;
use crate::router::{ConversationRouter, OutboundMessage};

/// Shared application state, built once from [`AppConfig`].
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ProfileStore>,
    pub questionnaire: Arc<Questionnaire>,
    pub catalog: Arc<Catalog>,
    pub router: ConversationRouter,
    pub advice: Arc<dyn AdviceProvider>,
    pub billing: Arc<dyn BillingProvider>,
    pub line: Arc<LineClient>,
    pub stripe_webhook_secret: Option<String>,
}

impl AppState {
    pub fn from_config(config: &AppConfig) -> BotResult<Self> {
        let store = Arc::new(ProfileStore::new(config.db_path.clone())?);
        let questionnaire = Arc::new(config.load_questionnaire()?);
        let catalog = Arc::new(Catalog::load_default());

        let advice: Arc<dyn AdviceProvider> = Arc::new(OpenAiAdvice::new(
            config.openai_api_key.clone(),
            config.openai_base_url.clone(),
            config.openai_model.clone(),
            (*catalog).clone(),
        ));
        let billing: Arc<dyn BillingProvider> = Arc::new(StripeBilling::new(
            config.stripe_secret_key.clone(),
            config.stripe_price_id.clone(),
            config.checkout_success_url.clone(),
            config.checkout_cancel_url.clone(),
        ));
        let line = Arc::new(LineClient::new(config.line_channel_access_token.clone()));

        let router = ConversationRouter::new(
            store.clone(),
            questionnaire.clone(),
            catalog.clone(),
            Arc::new(KeywordClassifier::new()),
            advice.clone(),
            billing.clone(),
        );

        Ok(Self {
            store,
            questionnaire,
            catalog,
            router,
            advice,
            billing,
            line,
            stripe_webhook_secret: config.stripe_webhook_secret.clone(),
        })
    }
}

/// Build the axum router with all routes.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/health", get(health_handler))
        .route("/webhook", post(line_webhook_handler))
        .route("/callback", post(line_webhook_handler))
        .route("/stripe_webhook", post(stripe_webhook_handler))
        .route("/create_payment_url", post(create_payment_url_handler))
        .route("/mbti_collect", post(mbti_collect_handler))
        .route("/mbti_detail", post(mbti_detail_handler))
        .route("/ask", post(ask_handler))
        .route("/success", get(success_handler))
        .route("/cancel", get(cancel_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

type HandlerError = (StatusCode, Json<Value>);

fn storage_error(e: impl std::fmt::Display) -> HandlerError {
    tracing::error!("storage failure: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "storage unavailable"})),
    )
}

fn bad_request(message: impl Into<String>) -> HandlerError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": message.into()})),
    )
}

// ---------------------------------------------------------------------------
// Liveness & landing pages
// ---------------------------------------------------------------------------

/// GET / and /health — liveness probe.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "lovehack",
        "version": crate::VERSION,
    }))
}

/// GET /success — checkout landing page.
async fn success_handler() -> Html<&'static str> {
    Html("<h1>決済が完了しました🎉 LINEに戻ってください！</h1>")
}

/// GET /cancel — checkout cancellation page.
async fn cancel_handler() -> Html<&'static str> {
    Html("<h1>決済をキャンセルしました。</h1>")
}

// ---------------------------------------------------------------------------
// LINE webhook
// ---------------------------------------------------------------------------

/// POST /webhook — LINE webhook event batch.
///
/// Each text-message event is routed through the conversation router and
/// answered via its reply token (push fallback). Delivery and collaborator
/// failures are logged and swallowed so the webhook still acknowledges; a
/// storage failure aborts with a 500 so the platform redelivers.
async fn line_webhook_handler(
    State(state): State<AppState>,
    Json(envelope): Json<WebhookEnvelope>,
) -> Result<StatusCode, HandlerError> {
    for event in &envelope.events {
        let Some((event_id, user_id, text)) = event.as_text_message() else {
            continue;
        };

        match state.router.handle_event(event_id, user_id, text).await {
            Ok(replies) => {
                if replies.is_empty() {
                    continue;
                }
                deliver(&state, event, user_id, &replies).await;
            }
            Err(BotError::Persistence(e)) => return Err(storage_error(e)),
            Err(e) => tracing::error!("event for {} failed: {}", user_id, e),
        }
    }
    Ok(StatusCode::OK)
}

async fn deliver(
    state: &AppState,
    event: &WebhookEvent,
    user_id: &str,
    replies: &[OutboundMessage],
) {
    let result = match event.reply_token.as_deref() {
        Some(token) => state.line.reply(token, replies).await,
        None => state.line.push(user_id, replies).await,
    };
    if let Err(e) = result {
        tracing::error!("delivery to {} failed: {}", user_id, e);
    }
}

// ---------------------------------------------------------------------------
// Stripe webhook & checkout
// ---------------------------------------------------------------------------

/// POST /stripe_webhook — payment completion.
///
/// Verified against `Stripe-Signature` when a webhook secret is configured.
/// On `checkout.session.completed` the customer mapping and the paid flag
/// are persisted, then the member is notified over LINE push with the
/// long-form advice for their type (best-effort).
async fn stripe_webhook_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, HandlerError> {
    if let Some(secret) = state.stripe_webhook_secret.as_deref() {
        let signature = headers
            .get("Stripe-Signature")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if let Err(e) = billing::verify_signature(&body, signature, secret) {
            tracing::warn!("rejected stripe webhook: {}", e);
            return Err(bad_request("invalid signature"));
        }
    } else {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set; accepting webhook unverified");
    }

    let event: StripeEvent = serde_json::from_slice(&body)
        .map_err(|e| bad_request(format!("unparseable event: {}", e)))?;
    if event.event_type != "checkout.session.completed" {
        return Ok(StatusCode::OK);
    }

    let user_id = event
        .data
        .object
        .user_id()
        .ok_or_else(|| bad_request("event has no userId metadata"))?;

    if let Some(customer) = event.data.object.customer.as_deref() {
        state
            .store
            .record_customer(customer, user_id)
            .map_err(storage_error)?;
    }
    state.store.set_paid(user_id, true).map_err(storage_error)?;
    tracing::info!("payment completed for {}", user_id);

    let mut messages = vec![OutboundMessage::Text(
        "決済ありがとう🎉 AI恋愛相談が使えるようになったよ！気になることをそのまま送ってね💘".into(),
    )];
    if let Ok(Some(profile)) = state.store.get(user_id) {
        if let Some(code) = profile.type_code {
            messages.push(OutboundMessage::Text(format!(
                "【{}】{}の詳細アドバイス📝\n\n{}",
                code,
                state.catalog.nickname(&code),
                state.catalog.advice(&code),
            )));
        }
    }
    if let Err(e) = state.line.push(user_id, &messages).await {
        tracing::warn!("payment notification to {} failed: {}", user_id, e);
    }

    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct CreatePaymentUrlRequest {
    #[serde(rename = "userId")]
    user_id: String,
}

/// POST /create_payment_url — checkout link for a user.
async fn create_payment_url_handler(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentUrlRequest>,
) -> Result<Json<Value>, HandlerError> {
    match state.billing.checkout_url(&request.user_id).await {
        Ok(url) => Ok(Json(json!({ "url": url }))),
        Err(e) => {
            tracing::error!("checkout url for {} failed: {}", request.user_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": e.to_string()})),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Diagnosis collection & paid content
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CollectRequest {
    #[serde(rename = "userId")]
    user_id: String,
    answers: Vec<bool>,
    #[serde(default)]
    gender: Option<String>,
    #[serde(rename = "targetMbti", default)]
    target_mbti: Option<String>,
}

/// POST /mbti_collect — persist an externally collected diagnosis.
///
/// Validates everything before mutating anything: a wrong answer count or a
/// malformed partner code rejects the whole request.
async fn mbti_collect_handler(
    State(state): State<AppState>,
    Json(request): Json<CollectRequest>,
) -> Result<Json<Value>, HandlerError> {
    let code = scorer::score(&state.questionnaire, &request.answers).map_err(|e| match e {
        BotError::InvalidInput(reason) => bad_request(reason),
        other => storage_error(other),
    })?;

    let gender = request.gender.as_deref().and_then(Gender::parse);
    let target = match request.target_mbti.as_deref() {
        Some(raw) => Some(
            TypeCode::parse(raw).map_err(|_| bad_request(format!("bad targetMbti: {}", raw)))?,
        ),
        None => None,
    };

    state
        .store
        .get_or_create(&request.user_id)
        .map_err(storage_error)?;
    state
        .store
        .commit_type_code(&request.user_id, &code)
        .map_err(storage_error)?;
    if let Some(gender) = gender {
        state
            .store
            .set_gender(&request.user_id, gender)
            .map_err(storage_error)?;
    }
    if let Some(target) = target {
        state
            .store
            .set_partner_type(&request.user_id, &target)
            .map_err(storage_error)?;
    }

    Ok(Json(json!({ "mbti": code.as_str() })))
}

#[derive(Debug, Deserialize)]
struct DetailRequest {
    #[serde(rename = "userId")]
    user_id: String,
}

/// POST /mbti_detail — long-form advice for the member's own type.
async fn mbti_detail_handler(
    State(state): State<AppState>,
    Json(request): Json<DetailRequest>,
) -> Result<Json<Value>, HandlerError> {
    let profile = state.store.get(&request.user_id).map_err(storage_error)?;
    let Some(profile) = profile.filter(|p| p.is_paid) else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "この機能は有料ユーザー限定です。"})),
        ));
    };

    let advice = match profile.type_code.as_ref() {
        Some(code) => state.catalog.advice(code).to_string(),
        None => "まずは「診断」で恋愛タイプを調べてね。".to_string(),
    };
    Ok(Json(json!({ "detailed_advice": advice })))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    #[serde(rename = "userId")]
    user_id: String,
    question: String,
}

/// POST /ask — paid AI consultation outside the LINE flow.
async fn ask_handler(
    State(state): State<AppState>,
    Json(request): Json<AskRequest>,
) -> Result<Json<Value>, HandlerError> {
    let profile = state.store.get(&request.user_id).map_err(storage_error)?;
    let Some(profile) = profile.filter(|p| p.is_paid) else {
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"error": "有料会員のみ利用可能です"})),
        ));
    };

    let history = state
        .store
        .recent_history(&request.user_id, 5)
        .map_err(storage_error)?;

    match state
        .advice
        .advise(&profile, &history, &request.question)
        .await
    {
        Ok(answer) => {
            state
                .store
                .save_message(&request.user_id, "user", &request.question)
                .map_err(storage_error)?;
            state
                .store
                .save_message(&request.user_id, "bot", &answer)
                .map_err(storage_error)?;
            Ok(Json(json!({ "answer": answer })))
        }
        Err(e) => {
            tracing::error!("ask for {} failed: {}", request.user_id, e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "AIの応答中にエラーが発生しました。時間を置いて再度お試しください。"
                })),
            ))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::Mode;
    use axum::body::Body;
    use axum::http::Request;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn test_state(dir: &TempDir) -> AppState {
        let config = AppConfig {
            port: 0,
            db_path: dir.path().join("test.db"),
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
        };
        AppState::from_config(&config).unwrap()
    }

    fn json_post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn line_text_event(event_id: &str, user_id: &str, text: &str) -> Value {
        json!({
            "events": [{
                "type": "message",
                "webhookEventId": event_id,
                "replyToken": "rt-1",
                "source": { "type": "user", "userId": user_id },
                "message": { "type": "text", "id": "m-1", "text": text }
            }]
        })
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = TempDir::new().unwrap();
        let app = app_router(test_state(&dir));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "lovehack");
    }

    #[tokio::test]
    async fn test_line_webhook_routes_first_contact() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        // Reply delivery fails (no LINE token) but the webhook still acks.
        let response = app
            .oneshot(json_post("/webhook", line_text_event("e1", "u1", "こんにちは")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let profile = state.store.get("u1").unwrap().unwrap();
        assert_eq!(profile.mode, Mode::Diagnosis);
    }

    #[tokio::test]
    async fn test_line_webhook_deduplicates_event_ids() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        app.clone()
            .oneshot(json_post("/webhook", line_text_event("e0", "u1", "start")))
            .await
            .unwrap();
        app.clone()
            .oneshot(json_post("/webhook", line_text_event("e1", "u1", "はい")))
            .await
            .unwrap();
        app.oneshot(json_post("/webhook", line_text_event("e1", "u1", "はい")))
            .await
            .unwrap();

        assert_eq!(state.store.pending_answers("u1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mbti_collect_scores_and_persists() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        let response = app
            .oneshot(json_post(
                "/mbti_collect",
                json!({
                    "userId": "u1",
                    "answers": [true, true, true, true, true, true, true, true, true, true],
                    "gender": "女性",
                    "targetMbti": "intj"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["mbti"], "ESTP");

        let profile = state.store.get("u1").unwrap().unwrap();
        assert_eq!(profile.type_code.unwrap().as_str(), "ESTP");
        assert_eq!(profile.gender, Some(Gender::Female));
        assert_eq!(profile.partner_type_code.unwrap().as_str(), "INTJ");
    }

    #[tokio::test]
    async fn test_mbti_collect_rejects_wrong_answer_count() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        let response = app
            .oneshot(json_post(
                "/mbti_collect",
                json!({
                    "userId": "u1",
                    "answers": [true, true, true, true, true, true, true, true, true]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.get("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mbti_collect_rejects_bad_partner_code_without_mutation() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        let response = app
            .oneshot(json_post(
                "/mbti_collect",
                json!({
                    "userId": "u1",
                    "answers": [false, false, false, false, false, false, false, false, false, false],
                    "targetMbti": "XXXX"
                }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.get("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mbti_detail_requires_payment() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        let response = app
            .clone()
            .oneshot(json_post("/mbti_detail", json!({ "userId": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        state.store.set_paid("u1", true).unwrap();
        let code = TypeCode::parse("ISTJ").unwrap();
        state.store.commit_type_code("u1", &code).unwrap();

        let response = app
            .oneshot(json_post("/mbti_detail", json!({ "userId": "u1" })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["detailed_advice"], state.catalog.advice(&code));
    }

    #[tokio::test]
    async fn test_ask_requires_payment() {
        let dir = TempDir::new().unwrap();
        let app = app_router(test_state(&dir));

        let response = app
            .oneshot(json_post(
                "/ask",
                json!({ "userId": "u1", "question": "どうしたらいい？" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_ask_degrades_when_provider_unconfigured() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());
        state.store.set_paid("u1", true).unwrap();

        let response = app
            .oneshot(json_post(
                "/ask",
                json!({ "userId": "u1", "question": "どうしたらいい？" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // The failed exchange leaves no history behind.
        assert!(state.store.recent_history("u1", 5).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stripe_webhook_marks_paid_and_records_customer() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        let event = json!({
            "type": "checkout.session.completed",
            "data": { "object": {
                "customer": "cus_7",
                "metadata": { "userId": "u1" }
            } }
        });
        let response = app
            .oneshot(json_post("/stripe_webhook", event))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        assert!(state.store.get("u1").unwrap().unwrap().is_paid);
        assert_eq!(state.store.customer_for_user("u1").unwrap(), "cus_7");
    }

    #[tokio::test]
    async fn test_stripe_webhook_ignores_other_event_types() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir);
        let app = app_router(state.clone());

        let response = app
            .oneshot(json_post(
                "/stripe_webhook",
                json!({ "type": "invoice.paid", "data": { "object": {} } }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get("u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stripe_webhook_rejects_bad_signature() {
        let dir = TempDir::new().unwrap();
        let mut state = test_state(&dir);
        state.stripe_webhook_secret = Some("whsec_test".into());
        let app = app_router(state.clone());

        let event = json!({
            "type": "checkout.session.completed",
            "data": { "object": { "metadata": { "userId": "u1" } } }
        });
        let request = Request::builder()
            .method("POST")
            .uri("/stripe_webhook")
            .header("Content-Type", "application/json")
            .header("Stripe-Signature", "t=1,v1=deadbeef")
            .body(Body::from(event.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.get("u1").unwrap().is_none());
    }
}
