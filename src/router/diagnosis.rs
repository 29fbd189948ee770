//! Diagnosis session controller.
//!
//! Orchestrates the multi-turn questionnaire flow: starting a session
//! resets the answer buffer and enters diagnosis mode; each recorded answer
//! either yields the next question or, on the final answer, scores the
//! sequence, persists the type code (which also exits the mode) and yields
//! the completion payload.
//!
//! Mode management is the router's job — the controller assumes it is only
//! called while a session is active and does not re-validate the mode.

use std::sync::Arc;

use crate::content::Catalog;
use crate::errors::BotResult;
use crate::profile::store::ProfileStore;
use crate::profile::{Mode, TypeCode};
use crate::questionnaire::{scorer, Questionnaire};

use super::OutboundMessage;

/// Result of recording one answer.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerOutcome {
    /// Session continues; render this question next.
    NextQuestion(OutboundMessage),
    /// Session finished; the type code is already persisted and the mode is
    /// back to idle. The result message embeds the nickname and description;
    /// the upsell that follows it is rendered by the caller.
    Completed {
        code: TypeCode,
        result_message: String,
    },
}

/// Multi-turn questionnaire orchestrator.
#[derive(Debug, Clone)]
pub struct DiagnosisController {
    store: Arc<ProfileStore>,
    questionnaire: Arc<Questionnaire>,
    catalog: Arc<Catalog>,
}

impl DiagnosisController {
    pub fn new(
        store: Arc<ProfileStore>,
        questionnaire: Arc<Questionnaire>,
        catalog: Arc<Catalog>,
    ) -> Self {
        Self {
            store,
            questionnaire,
            catalog,
        }
    }

    /// Begin (or restart) a session: empty buffer, diagnosis mode, first
    /// question. Safe to call regardless of prior state.
    pub fn start_session(&self, user_id: &str) -> BotResult<OutboundMessage> {
        self.store.clear_pending_answers(user_id)?;
        self.store.set_mode(user_id, Mode::Diagnosis)?;
        Ok(self.render_question(0))
    }

    /// Record one yes/no answer and advance the session.
    pub fn record_answer(&self, user_id: &str, answer: bool) -> BotResult<AnswerOutcome> {
        self.store.append_pending_answer(user_id, answer)?;
        let answers = self.store.pending_answers(user_id)?;
        let total = self.questionnaire.total_questions();

        if answers.len() < total {
            return Ok(AnswerOutcome::NextQuestion(
                self.render_question(answers.len()),
            ));
        }

        // The scorer rejects any buffer that does not match the question
        // count, so a corrupted oversized buffer surfaces as InvalidInput
        // instead of a silently truncated diagnosis.
        let code = scorer::score(&self.questionnaire, &answers)?;
        self.store.commit_type_code(user_id, &code)?;

        let result_message = format!(
            "診断完了🎉 あなたの恋愛タイプは【{}】{} です！\n\n{}",
            code,
            self.catalog.nickname(&code),
            self.catalog.advice(&code),
        );
        Ok(AnswerOutcome::Completed {
            code,
            result_message,
        })
    }

    fn render_question(&self, index: usize) -> OutboundMessage {
        let prompt = self
            .questionnaire
            .question_at(index)
            .expect("question index below total_questions");
        OutboundMessage::YesNoPrompt(format!(
            "Q{}/{}\n{}",
            index + 1,
            self.questionnaire.total_questions(),
            prompt
        ))
    }
}
