//! Static lookup tables: type code → nickname and type code → long-form
//! advice.
//!
//! Both tables are external data, not derived logic. They are embedded at
//! compile time as JSON, parsed once, and exposed through [`Catalog`] with a
//! fixed fallback string for unknown keys so a missing entry can never take
//! down a reply.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::profile::TypeCode;

/// Raw nickname table JSON, embedded at compile time.
const NICKNAMES_JSON: &str = include_str!("nicknames.json");

/// Raw long-form advice table JSON, embedded at compile time.
const ADVICE_JSON: &str = include_str!("advice.json");

/// Fallback when a code has no nickname entry.
const UNKNOWN_NICKNAME: &str = "不明";

/// Fallback when a code has no advice entry.
const ADVICE_IN_PREPARATION: &str = "詳細アドバイスは現在準備中です。";

static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(|| {
    Catalog::from_json(NICKNAMES_JSON, ADVICE_JSON)
        .expect("embedded content tables parse as string maps")
});

/// Read-only content catalog, constructed once at startup and passed into
/// the router and controllers.
#[derive(Debug, Clone)]
pub struct Catalog {
    nicknames: HashMap<String, String>,
    advice: HashMap<String, String>,
}

impl Catalog {
    /// The embedded default tables.
    pub fn load_default() -> Self {
        DEFAULT_CATALOG.clone()
    }

    /// Parse a catalog from two JSON objects mapping type codes to strings.
    pub fn from_json(nicknames: &str, advice: &str) -> Result<Self, serde_json::Error> {
        Ok(Self {
            nicknames: serde_json::from_str(nicknames)?,
            advice: serde_json::from_str(advice)?,
        })
    }

    /// Display nickname for a type code.
    pub fn nickname(&self, code: &TypeCode) -> &str {
        self.nicknames
            .get(code.as_str())
            .map(String::as_str)
            .unwrap_or(UNKNOWN_NICKNAME)
    }

    /// Nickname for an optional code; `None` renders as the unknown marker.
    pub fn nickname_or_unknown(&self, code: Option<&TypeCode>) -> &str {
        match code {
            Some(c) => self.nickname(c),
            None => UNKNOWN_NICKNAME,
        }
    }

    /// Long-form advice text for a type code.
    pub fn advice(&self, code: &TypeCode) -> &str {
        self.advice
            .get(code.as_str())
            .map(String::as_str)
            .unwrap_or(ADVICE_IN_PREPARATION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_code_has_both_entries() {
        let catalog = Catalog::load_default();
        for code in TypeCode::all() {
            assert_ne!(catalog.nickname(&code), UNKNOWN_NICKNAME, "{}", code);
            assert_ne!(catalog.advice(&code), ADVICE_IN_PREPARATION, "{}", code);
        }
    }

    #[test]
    fn test_known_nickname() {
        let catalog = Catalog::load_default();
        let code = TypeCode::parse("ISTJ").unwrap();
        assert_eq!(catalog.nickname(&code), "恋愛ルールブック📘");
    }

    #[test]
    fn test_fallbacks_for_missing_entries() {
        let catalog = Catalog::from_json("{}", "{}").unwrap();
        let code = TypeCode::parse("ENTJ").unwrap();
        assert_eq!(catalog.nickname(&code), UNKNOWN_NICKNAME);
        assert_eq!(catalog.nickname_or_unknown(None), UNKNOWN_NICKNAME);
        assert_eq!(catalog.advice(&code), ADVICE_IN_PREPARATION);
    }
}
