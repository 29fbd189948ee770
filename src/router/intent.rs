//! Keyword intent classification for inbound free text.
//!
//! The router never matches substrings inline; every recognizable phrase
//! goes through an [`IntentClassifier`] so the keyword sets are testable in
//! isolation and swappable. Matching is exact-phrase after normalization
//! (trim, lowercase, inner whitespace collapsed), Japanese primary with
//! English aliases.

use once_cell::sync::Lazy;
use regex::Regex;

/// What an inbound message is asking for, before any state is consulted.
///
/// Yes/No only matter while a diagnosis session is active; the router
/// interprets every intent against the stored mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Cancel the paid subscription.
    Unsubscribe,
    /// Start (or restart) a diagnosis session.
    StartDiagnosis,
    /// Enter gender registration.
    RegisterGender,
    /// Enter partner-type registration.
    RegisterPartnerType,
    /// Affirmative questionnaire answer.
    Yes,
    /// Negative questionnaire answer.
    No,
    /// Exact-phrase greeting, answered ahead of the paid advice path.
    Greeting,
    /// Exact-phrase thanks, answered ahead of the paid advice path.
    Thanks,
    /// Anything else; falls through to mode-specific handling.
    Other,
}

/// Pluggable message classifier.
pub trait IntentClassifier: Send + Sync {
    fn classify(&self, text: &str) -> Intent;
}

static INNER_WHITESPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\s\u{3000}]+").expect("whitespace pattern compiles"));

/// Collapse whitespace (ASCII and full-width) and lowercase.
fn normalize(text: &str) -> String {
    INNER_WHITESPACE
        .replace_all(text.trim(), " ")
        .to_lowercase()
}

const UNSUBSCRIBE: &[&str] = &["解約", "解約したい", "退会", "unsubscribe", "cancel subscription"];
const START_DIAGNOSIS: &[&str] = &["診断", "診断開始", "診断スタート", "もう一度診断", "diagnosis", "start diagnosis"];
const REGISTER_GENDER: &[&str] = &["性別登録", "性別を登録", "register gender"];
const REGISTER_PARTNER: &[&str] = &["相手登録", "相手タイプ登録", "相手のタイプ登録", "register partner", "register partner type"];
const YES: &[&str] = &["はい", "うん", "yes", "y"];
const NO: &[&str] = &["いいえ", "いや", "no", "n"];
const GREETING: &[&str] = &["こんにちは", "こんばんは", "おはよう", "hello", "hi"];
const THANKS: &[&str] = &["ありがとう", "ありがとうございます", "thanks", "thank you"];

/// Exact-phrase keyword classifier used in production.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }
}

impl IntentClassifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Intent {
        let normalized = normalize(text);
        let matches = |set: &[&str]| set.contains(&normalized.as_str());

        if matches(UNSUBSCRIBE) {
            Intent::Unsubscribe
        } else if matches(START_DIAGNOSIS) {
            Intent::StartDiagnosis
        } else if matches(REGISTER_GENDER) {
            Intent::RegisterGender
        } else if matches(REGISTER_PARTNER) {
            Intent::RegisterPartnerType
        } else if matches(YES) {
            Intent::Yes
        } else if matches(NO) {
            Intent::No
        } else if matches(GREETING) {
            Intent::Greeting
        } else if matches(THANKS) {
            Intent::Thanks
        } else {
            Intent::Other
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_japanese_keywords() {
        let c = KeywordClassifier::new();
        assert_eq!(c.classify("診断"), Intent::StartDiagnosis);
        assert_eq!(c.classify("解約"), Intent::Unsubscribe);
        assert_eq!(c.classify("はい"), Intent::Yes);
        assert_eq!(c.classify("いいえ"), Intent::No);
        assert_eq!(c.classify("性別登録"), Intent::RegisterGender);
        assert_eq!(c.classify("相手タイプ登録"), Intent::RegisterPartnerType);
        assert_eq!(c.classify("ありがとう"), Intent::Thanks);
    }

    #[test]
    fn test_english_aliases_and_case() {
        let c = KeywordClassifier::new();
        assert_eq!(c.classify("YES"), Intent::Yes);
        assert_eq!(c.classify("Start  Diagnosis"), Intent::StartDiagnosis);
        assert_eq!(c.classify(" hello "), Intent::Greeting);
    }

    #[test]
    fn test_exact_phrase_not_substring() {
        let c = KeywordClassifier::new();
        // Free text containing a keyword must not short-circuit the advice path.
        assert_eq!(c.classify("診断ってどういう仕組み？"), Intent::Other);
        assert_eq!(c.classify("彼がはいと言った"), Intent::Other);
    }

    #[test]
    fn test_fullwidth_space_normalization() {
        let c = KeywordClassifier::new();
        assert_eq!(c.classify("thank\u{3000}you"), Intent::Thanks);
    }
}
