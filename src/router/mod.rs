//! Conversation router: the per-message state machine.
//!
//! Every inbound `(user_id, text)` pair is routed against the user's stored
//! mode. Precedence is fixed: the unsubscribe keyword is checked first, an
//! active diagnosis session second, then the mode-specific branches, and
//! finally the idle keyword/advice dispatch. A first-ever contact skips all
//! of that and auto-starts a diagnosis.
//!
//! Routing runs in two phases so the per-user lock never spans an external
//! call: the locked phase reads the profile, applies the state transition
//! and returns either final replies or a deferred action; the unlocked
//! phase performs the external call (LLM, billing portal, checkout) and
//! persists its result in separate short store calls.
//!
//! Error policy: bad input becomes a re-prompt in the same state; external
//! failures become a fixed apology without touching the mode; only storage
//! failures propagate to the HTTP boundary.

pub mod diagnosis;
pub mod intent;
pub mod locks;

use std::sync::Arc;
use std::time::Duration;

use crate::advice::AdviceProvider;
use crate::billing::BillingProvider;
use crate::content::Catalog;
use crate::errors::{BotError, BotResult};
use crate::profile::store::ProfileStore;
use crate::profile::{Gender, Mode, TypeCode, UserProfile};
use crate::questionnaire::Questionnaire;

use diagnosis::{AnswerOutcome, DiagnosisController};
use intent::{Intent, IntentClassifier};
use locks::{EventDeduper, UserLocks};

/// How many history entries feed the advice prompt.
const HISTORY_LIMIT: usize = 5;

/// How long a processed webhook event id is remembered.
const EVENT_TTL: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// Fixed reply texts
// ---------------------------------------------------------------------------

const WELCOME: &str =
    "はじめまして！恋愛タイプ診断botだよ💘 まずはいくつかの質問で、あなたの恋愛タイプを診断するね。「はい」か「いいえ」で答えてね！";
const DIAG_INTRO: &str = "恋愛タイプ診断を始めるよ！「はい」か「いいえ」で答えてね。";
const ANSWER_YES_NO: &str = "「はい」か「いいえ」で答えてね！";
const SESSION_RESET: &str =
    "ごめんね、診断の途中経過がおかしくなったのでリセットしたよ。「診断」と送ってもう一度始めてね🙏";
const ASK_GENDER: &str = "性別を教えてね（男性・女性・その他）";
const GENDER_REPROMPT: &str = "ごめんね、「男性」「女性」「その他」のどれかで教えてね。";
const ASK_PARTNER: &str = "気になる相手の恋愛タイプ（例：ENFP）を送ってね。";
const PARTNER_FORMAT_HINT: &str =
    "うまく読み取れなかったよ。ENFPのように、E/I・S/N・T/F・J/Pを組み合わせた4文字で送ってね。";
const PAYWALL: &str =
    "AI恋愛相談は有料会員限定だよ💎 「診断」で恋愛タイプ診断、「性別登録」「相手登録」でプロフィール登録ができるよ。";
const UNSUBSCRIBE_PAID_ONLY: &str = "解約は有料会員のみ利用できるよ。";
const NO_BILLING_RECORD: &str = "決済の記録が見つからなかったよ。お手数だけどサポートまで問い合わせてね🙏";
const APOLOGY: &str =
    "ごめんね、いまうまく応答できないみたい。少し時間をおいてもう一度試してみて🙏";
const UPSELL_UNAVAILABLE: &str =
    "決済リンクがいま発行できなかったよ。少し時間をおいて「診断」と送ってもう一度試してね🙏";
const GREETING_REPLY: &str = "こんにちは！「診断」と送ると恋愛タイプ診断が始まるよ💘";
const THANKS_REPLY: &str = "どういたしまして！また相談してね💘";

// ---------------------------------------------------------------------------
// Reply payloads
// ---------------------------------------------------------------------------

/// A reply the transport serializes to the messaging platform.
///
/// `YesNoPrompt` renders as a text message with two fixed quick-reply
/// buttons; everything else is plain text. Multi-message replies are an
/// ordered `Vec` of these.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    Text(String),
    YesNoPrompt(String),
}

/// Outcome of the locked routing phase.
#[derive(Debug)]
enum Transition {
    /// Final replies; no external collaborator involved.
    Replies(Vec<OutboundMessage>),
    /// Diagnosis finished; append the checkout upsell after the result.
    CompletedDiagnosis { result_message: String },
    /// Paid user asked to unsubscribe; resolve the billing portal.
    Unsubscribe,
    /// Idle paid free text; ask the advice collaborator.
    Advice { profile: UserProfile, question: String },
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// The conversation state machine, constructed once at startup.
#[derive(Clone)]
pub struct ConversationRouter {
    store: Arc<ProfileStore>,
    diagnosis: DiagnosisController,
    intents: Arc<dyn IntentClassifier>,
    advice: Arc<dyn AdviceProvider>,
    billing: Arc<dyn BillingProvider>,
    locks: Arc<UserLocks>,
    deduper: Arc<EventDeduper>,
}

impl ConversationRouter {
    pub fn new(
        store: Arc<ProfileStore>,
        questionnaire: Arc<Questionnaire>,
        catalog: Arc<Catalog>,
        intents: Arc<dyn IntentClassifier>,
        advice: Arc<dyn AdviceProvider>,
        billing: Arc<dyn BillingProvider>,
    ) -> Self {
        Self {
            diagnosis: DiagnosisController::new(store.clone(), questionnaire, catalog),
            store,
            intents,
            advice,
            billing,
            locks: Arc::new(UserLocks::new()),
            deduper: Arc::new(EventDeduper::new(EVENT_TTL)),
        }
    }

    /// Route one webhook event. A redelivered event id yields no replies.
    ///
    /// A storage failure surfaces as a 500 at the HTTP boundary so the
    /// platform redelivers the event; that redelivery carries the same id,
    /// so the id is forgotten on that path to keep the retry routable.
    pub async fn handle_event(
        &self,
        event_id: Option<&str>,
        user_id: &str,
        text: &str,
    ) -> BotResult<Vec<OutboundMessage>> {
        if let Some(id) = event_id {
            if !self.deduper.first_delivery(id) {
                log::info!("dropping redelivered event {}", id);
                return Ok(Vec::new());
            }
        }
        match self.handle_message(user_id, text).await {
            Err(e @ BotError::Persistence(_)) => {
                if let Some(id) = event_id {
                    self.deduper.forget(id);
                }
                Err(e)
            }
            other => other,
        }
    }

    /// Route one inbound message to its replies.
    pub async fn handle_message(
        &self,
        user_id: &str,
        text: &str,
    ) -> BotResult<Vec<OutboundMessage>> {
        let transition = {
            let lock = self.locks.lock_for(user_id);
            let _guard = lock.lock().await;
            let this = self.clone();
            let uid = user_id.to_string();
            let msg = text.to_string();
            tokio::task::spawn_blocking(move || this.transition(&uid, &msg))
                .await
                .map_err(|e| {
                    BotError::ExternalService(format!("routing task failed: {}", e))
                })??
        };

        match transition {
            Transition::Replies(replies) => Ok(replies),
            Transition::CompletedDiagnosis { result_message } => {
                self.finish_diagnosis(user_id, result_message).await
            }
            Transition::Unsubscribe => self.unsubscribe(user_id).await,
            Transition::Advice { profile, question } => self.advise(profile, question).await,
        }
    }

    // -- locked phase -------------------------------------------------------

    fn transition(&self, user_id: &str, text: &str) -> BotResult<Transition> {
        let (profile, just_created) = self.store.get_or_create(user_id)?;

        // First contact goes straight into a diagnosis session.
        if just_created {
            let first_question = self.diagnosis.start_session(user_id)?;
            return Ok(Transition::Replies(vec![
                OutboundMessage::Text(WELCOME.into()),
                first_question,
            ]));
        }

        let intent = self.intents.classify(text);

        // Unsubscribe outranks everything, including an active session.
        if intent == Intent::Unsubscribe {
            return Ok(if profile.is_paid {
                Transition::Unsubscribe
            } else {
                Transition::Replies(vec![OutboundMessage::Text(UNSUBSCRIBE_PAID_ONLY.into())])
            });
        }

        // An active session captures yes/no and re-prompts everything else.
        if profile.mode == Mode::Diagnosis {
            return match intent {
                Intent::Yes => self.advance_session(user_id, true),
                Intent::No => self.advance_session(user_id, false),
                _ => Ok(Transition::Replies(vec![OutboundMessage::YesNoPrompt(
                    ANSWER_YES_NO.into(),
                )])),
            };
        }

        match profile.mode {
            Mode::RegisterGender => self.register_gender(user_id, text),
            Mode::RegisterPartnerType => self.register_partner(user_id, text),
            Mode::Idle => self.route_idle(user_id, profile, text, intent),
            Mode::Diagnosis => unreachable!("diagnosis handled above"),
        }
    }

    fn route_idle(
        &self,
        user_id: &str,
        profile: UserProfile,
        text: &str,
        intent: Intent,
    ) -> BotResult<Transition> {
        match intent {
            Intent::StartDiagnosis => {
                let first_question = self.diagnosis.start_session(user_id)?;
                Ok(Transition::Replies(vec![
                    OutboundMessage::Text(DIAG_INTRO.into()),
                    first_question,
                ]))
            }
            Intent::RegisterGender => {
                self.store.set_mode(user_id, Mode::RegisterGender)?;
                Ok(Transition::Replies(vec![OutboundMessage::Text(
                    ASK_GENDER.into(),
                )]))
            }
            Intent::RegisterPartnerType => {
                self.store.set_mode(user_id, Mode::RegisterPartnerType)?;
                Ok(Transition::Replies(vec![OutboundMessage::Text(
                    ASK_PARTNER.into(),
                )]))
            }
            Intent::Greeting => Ok(Transition::Replies(vec![OutboundMessage::Text(
                GREETING_REPLY.into(),
            )])),
            Intent::Thanks => Ok(Transition::Replies(vec![OutboundMessage::Text(
                THANKS_REPLY.into(),
            )])),
            _ => {
                if profile.is_paid {
                    Ok(Transition::Advice {
                        profile,
                        question: text.to_string(),
                    })
                } else {
                    Ok(Transition::Replies(vec![OutboundMessage::Text(
                        PAYWALL.into(),
                    )]))
                }
            }
        }
    }

    fn advance_session(&self, user_id: &str, answer: bool) -> BotResult<Transition> {
        match self.diagnosis.record_answer(user_id, answer) {
            Ok(AnswerOutcome::NextQuestion(message)) => Ok(Transition::Replies(vec![message])),
            Ok(AnswerOutcome::Completed { result_message, .. }) => {
                Ok(Transition::CompletedDiagnosis { result_message })
            }
            Err(BotError::InvalidInput(reason)) => {
                // Corrupted answer buffer; reset the session rather than
                // guessing a diagnosis.
                log::warn!("resetting session for {}: {}", user_id, reason);
                self.store.set_mode(user_id, Mode::Idle)?;
                self.store.clear_pending_answers(user_id)?;
                Ok(Transition::Replies(vec![OutboundMessage::Text(
                    SESSION_RESET.into(),
                )]))
            }
            Err(e) => Err(e),
        }
    }

    fn register_gender(&self, user_id: &str, text: &str) -> BotResult<Transition> {
        match Gender::parse(text) {
            Some(gender) => {
                self.store.set_gender(user_id, gender)?;
                Ok(Transition::Replies(vec![OutboundMessage::Text(format!(
                    "性別を「{}」で登録したよ！",
                    gender
                ))]))
            }
            None => Ok(Transition::Replies(vec![OutboundMessage::Text(
                GENDER_REPROMPT.into(),
            )])),
        }
    }

    fn register_partner(&self, user_id: &str, text: &str) -> BotResult<Transition> {
        match TypeCode::parse(text) {
            Ok(code) => {
                self.store.set_partner_type(user_id, &code)?;
                Ok(Transition::Replies(vec![OutboundMessage::Text(format!(
                    "相手の恋愛タイプを【{}】で登録したよ！",
                    code
                ))]))
            }
            Err(_) => Ok(Transition::Replies(vec![OutboundMessage::Text(
                PARTNER_FORMAT_HINT.into(),
            )])),
        }
    }

    // -- unlocked phase -----------------------------------------------------

    async fn finish_diagnosis(
        &self,
        user_id: &str,
        result_message: String,
    ) -> BotResult<Vec<OutboundMessage>> {
        let mut replies = vec![OutboundMessage::Text(result_message)];
        match self.billing.checkout_url(user_id).await {
            Ok(url) => replies.push(OutboundMessage::Text(format!(
                "もっと深く相談したい？有料プランならAI恋愛相談が使い放題だよ💎\n▶ {}",
                url
            ))),
            Err(e) => {
                log::error!("checkout url for {} failed: {}", user_id, e);
                replies.push(OutboundMessage::Text(UPSELL_UNAVAILABLE.into()));
            }
        }
        Ok(replies)
    }

    async fn unsubscribe(&self, user_id: &str) -> BotResult<Vec<OutboundMessage>> {
        let customer_id = match self.store.customer_for_user(user_id) {
            Ok(id) => id,
            Err(BotError::NotFound(_)) => {
                return Ok(vec![OutboundMessage::Text(NO_BILLING_RECORD.into())]);
            }
            Err(e) => return Err(e),
        };

        match self.billing.portal_url(&customer_id).await {
            Ok(url) => {
                self.store.set_paid(user_id, false)?;
                self.store.set_mode(user_id, Mode::Idle)?;
                self.store.clear_pending_answers(user_id)?;
                Ok(vec![OutboundMessage::Text(format!(
                    "解約手続きはこちらから👇\n{}\n手続きが終わると有料機能は使えなくなるよ。",
                    url
                ))])
            }
            Err(e) => {
                log::error!("billing portal for {} failed: {}", user_id, e);
                Ok(vec![OutboundMessage::Text(APOLOGY.into())])
            }
        }
    }

    async fn advise(
        &self,
        profile: UserProfile,
        question: String,
    ) -> BotResult<Vec<OutboundMessage>> {
        let history = self.store.recent_history(&profile.user_id, HISTORY_LIMIT)?;
        match self.advice.advise(&profile, &history, &question).await {
            Ok(answer) => {
                self.store.save_message(&profile.user_id, "user", &question)?;
                self.store.save_message(&profile.user_id, "bot", &answer)?;
                Ok(vec![OutboundMessage::Text(answer)])
            }
            Err(e) => {
                log::error!("advice call for {} failed: {}", profile.user_id, e);
                Ok(vec![OutboundMessage::Text(APOLOGY.into())])
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
