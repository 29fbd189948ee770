//! Per-user profile domain types.
//!
//! A [`UserProfile`] is the durable record the conversation router reads and
//! writes on every inbound message: identity, the derived love type, two
//! free-text registration attributes, the payment flag, the current
//! interaction [`Mode`], and the in-progress answer buffer of an active
//! diagnosis session.
//!
//! Storage lives in [`store`]; this module holds only the domain types and
//! their parsing/validation rules.

pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{BotError, BotResult};

// ---------------------------------------------------------------------------
// Type code
// ---------------------------------------------------------------------------

/// The four personality axes, each a `(first, second)` letter pair.
///
/// The first letter of each pair is the tie-break winner when a diagnosis
/// scores an axis evenly; changing this order silently changes borderline
/// classifications.
pub const AXES: [(char, char); 4] = [('E', 'I'), ('S', 'N'), ('T', 'F'), ('J', 'P')];

/// A validated four-letter type code over {E,I}×{S,N}×{T,F}×{J,P}.
///
/// Exactly 16 values are representable. Parsing is case-insensitive and
/// rejects everything else, including codes with valid letters in the wrong
/// axis position ("TSEJ") and non-ASCII lookalikes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TypeCode(String);

impl TypeCode {
    /// Parse a user-supplied code. Whitespace is trimmed, case is ignored.
    pub fn parse(input: &str) -> BotResult<Self> {
        let trimmed = input.trim();
        if trimmed.chars().count() != 4 {
            return Err(BotError::InvalidInput(format!(
                "type code must be 4 letters, got {:?}",
                trimmed
            )));
        }
        let mut code = String::with_capacity(4);
        for (i, ch) in trimmed.chars().enumerate() {
            let upper = ch.to_ascii_uppercase();
            let (first, second) = AXES[i];
            if upper != first && upper != second {
                return Err(BotError::InvalidInput(format!(
                    "{:?} is not a valid type code (position {} must be {} or {})",
                    trimmed,
                    i + 1,
                    first,
                    second
                )));
            }
            code.push(upper);
        }
        Ok(Self(code))
    }

    /// The canonical upper-case four-letter string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// All 16 valid codes, in axis order.
    pub fn all() -> Vec<TypeCode> {
        let mut codes = Vec::with_capacity(16);
        for a in [AXES[0].0, AXES[0].1] {
            for b in [AXES[1].0, AXES[1].1] {
                for c in [AXES[2].0, AXES[2].1] {
                    for d in [AXES[3].0, AXES[3].1] {
                        codes.push(TypeCode(format!("{}{}{}{}", a, b, c, d)));
                    }
                }
            }
        }
        codes
    }
}

impl fmt::Display for TypeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TypeCode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TypeCode::parse(&value).map_err(|e| e.to_string())
    }
}

impl From<TypeCode> for String {
    fn from(code: TypeCode) -> Self {
        code.0
    }
}

// ---------------------------------------------------------------------------
// Gender
// ---------------------------------------------------------------------------

/// Self-reported gender, a small closed set.
///
/// Stored and displayed with the Japanese token; English aliases are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    /// Parse a registration token. Returns `None` for anything outside the
    /// closed set so the router can re-prompt without mutating state.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "男性" | "男" | "male" | "m" => Some(Self::Male),
            "女性" | "女" | "female" | "f" => Some(Self::Female),
            "その他" | "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Canonical storage/display token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "男性",
            Self::Female => "女性",
            Self::Other => "その他",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Interaction mode
// ---------------------------------------------------------------------------

/// Current interaction mode of a user. Empty string in storage means idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// No multi-turn flow active; free text goes to the paid advice path.
    #[default]
    Idle,
    /// A questionnaire session is in progress.
    Diagnosis,
    /// The next message is expected to be a gender token.
    RegisterGender,
    /// The next message is expected to be a partner type code.
    RegisterPartnerType,
}

impl Mode {
    /// Storage token. Idle is the empty string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "",
            Self::Diagnosis => "diagnosis",
            Self::RegisterGender => "register_gender",
            Self::RegisterPartnerType => "register_partner_type",
        }
    }

    /// Parse a storage token. Unknown tokens fall back to idle.
    pub fn from_db(value: &str) -> Self {
        match value {
            "diagnosis" => Self::Diagnosis,
            "register_gender" => Self::RegisterGender,
            "register_partner_type" => Self::RegisterPartnerType,
            _ => Self::Idle,
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Durable per-user record, keyed by the platform user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// Opaque stable identifier from the messaging platform.
    pub user_id: String,
    /// Derived type code; `None` before the first completed diagnosis.
    pub type_code: Option<TypeCode>,
    /// Self-reported gender; `None` until registered.
    pub gender: Option<Gender>,
    /// Partner's type code, user-supplied; `None` until registered.
    pub partner_type_code: Option<TypeCode>,
    /// Set only by the payment webhook; cleared by unsubscribe.
    pub is_paid: bool,
    /// Current interaction mode.
    pub mode: Mode,
    /// Answers recorded so far in the active diagnosis session.
    pub pending_answers: Vec<bool>,
}

impl UserProfile {
    /// Fresh profile with default values for a first-contact user.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            type_code: None,
            gender: None,
            partner_type_code: None,
            is_paid: false,
            mode: Mode::Idle,
            pending_answers: Vec::new(),
        }
    }
}
