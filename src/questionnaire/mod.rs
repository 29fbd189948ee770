//! Questionnaire definition: an ordered, immutable list of yes/no prompts
//! with a parallel list of axis-letter pairs.
//!
//! Each question maps a yes answer to one of the 8 axis letters and a no
//! answer to the opposite letter of the same axis. Two sets ship embedded:
//! the 10-question production set (`standard`) and a 16-question set with
//! four questions per axis (`extended`); arbitrary sets load from JSON with
//! the same schema:
//!
//! ```json
//! [ { "prompt": "...", "yes": "E", "no": "I" }, ... ]
//! ```
//!
//! No mutation after construction.

pub mod scorer;

use serde::Deserialize;

use crate::errors::{BotError, BotResult};
use crate::profile::AXES;

/// 10-question production set, embedded at compile time.
const STANDARD_JSON: &str = include_str!("questions_standard.json");

/// 16-question extended set (4 questions per axis), embedded at compile time.
const EXTENDED_JSON: &str = include_str!("questions_extended.json");

/// One questionnaire entry: prompt text plus the letter each answer maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub prompt: String,
    /// Letter tallied on a yes answer.
    pub yes: char,
    /// Letter tallied on a no answer. Always the other letter of `yes`'s axis.
    pub no: char,
}

/// Raw JSON shape of a question entry.
#[derive(Debug, Deserialize)]
struct QuestionDef {
    prompt: String,
    yes: String,
    no: String,
}

/// Immutable ordered questionnaire.
#[derive(Debug, Clone)]
pub struct Questionnaire {
    questions: Vec<Question>,
}

impl Questionnaire {
    /// Build a questionnaire, validating the definition:
    ///
    /// - at least one question;
    /// - every `(yes, no)` pair is the two letters of a single axis, in
    ///   either order;
    /// - every axis is covered by at least one question.
    pub fn new(questions: Vec<Question>) -> BotResult<Self> {
        if questions.is_empty() {
            return Err(BotError::InvalidInput(
                "questionnaire must contain at least one question".into(),
            ));
        }
        let mut axis_counts = [0usize; 4];
        for (i, q) in questions.iter().enumerate() {
            let axis = AXES.iter().position(|&(first, second)| {
                (q.yes == first && q.no == second) || (q.yes == second && q.no == first)
            });
            match axis {
                Some(a) => axis_counts[a] += 1,
                None => {
                    return Err(BotError::InvalidInput(format!(
                        "question {} maps to ({}, {}), which is not an axis pair",
                        i + 1,
                        q.yes,
                        q.no
                    )))
                }
            }
        }
        if let Some(a) = axis_counts.iter().position(|&c| c == 0) {
            let (first, second) = AXES[a];
            return Err(BotError::InvalidInput(format!(
                "no question covers the {}/{} axis",
                first, second
            )));
        }
        Ok(Self { questions })
    }

    /// Parse a questionnaire from its JSON representation.
    pub fn from_json(json: &str) -> BotResult<Self> {
        let defs: Vec<QuestionDef> = serde_json::from_str(json)
            .map_err(|e| BotError::InvalidInput(format!("bad questionnaire JSON: {}", e)))?;
        let mut questions = Vec::with_capacity(defs.len());
        for (i, def) in defs.into_iter().enumerate() {
            let yes = single_letter(&def.yes).ok_or_else(|| {
                BotError::InvalidInput(format!("question {}: bad yes letter {:?}", i + 1, def.yes))
            })?;
            let no = single_letter(&def.no).ok_or_else(|| {
                BotError::InvalidInput(format!("question {}: bad no letter {:?}", i + 1, def.no))
            })?;
            questions.push(Question {
                prompt: def.prompt,
                yes,
                no,
            });
        }
        Self::new(questions)
    }

    /// The embedded 10-question production set.
    pub fn standard() -> Self {
        Self::from_json(STANDARD_JSON).expect("embedded standard questionnaire is valid")
    }

    /// The embedded 16-question extended set.
    pub fn extended() -> Self {
        Self::from_json(EXTENDED_JSON).expect("embedded extended questionnaire is valid")
    }

    /// Prompt text of the question at `index`, if in range.
    pub fn question_at(&self, index: usize) -> Option<&str> {
        self.questions.get(index).map(|q| q.prompt.as_str())
    }

    /// The `(yes, no)` letter pair of the question at `index`.
    pub fn pair_at(&self, index: usize) -> Option<(char, char)> {
        self.questions.get(index).map(|q| (q.yes, q.no))
    }

    /// Number of questions, N.
    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }
}

fn single_letter(s: &str) -> Option<char> {
    let mut chars = s.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Some(c.to_ascii_uppercase()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_set_shape() {
        let q = Questionnaire::standard();
        assert_eq!(q.total_questions(), 10);
        assert_eq!(q.pair_at(0), Some(('E', 'I')));
        assert_eq!(q.pair_at(1), Some(('P', 'J')));
        assert_eq!(q.pair_at(7), Some(('I', 'E')));
        assert_eq!(q.pair_at(9), Some(('P', 'J')));
        assert!(q.question_at(0).unwrap().contains("初対面"));
        assert!(q.question_at(10).is_none());
    }

    #[test]
    fn test_extended_set_covers_each_axis_four_times() {
        let q = Questionnaire::extended();
        assert_eq!(q.total_questions(), 16);
        let mut counts = [0usize; 4];
        for i in 0..16 {
            let (yes, no) = q.pair_at(i).unwrap();
            let axis = AXES
                .iter()
                .position(|&(a, b)| (yes == a && no == b) || (yes == b && no == a))
                .unwrap();
            counts[axis] += 1;
        }
        assert_eq!(counts, [4, 4, 4, 4]);
    }

    #[test]
    fn test_rejects_non_axis_pair() {
        let result = Questionnaire::new(vec![Question {
            prompt: "?".into(),
            yes: 'E',
            no: 'S',
        }]);
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_uncovered_axis() {
        // Only the E/I axis is covered.
        let result = Questionnaire::new(vec![Question {
            prompt: "?".into(),
            yes: 'E',
            no: 'I',
        }]);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("S/N"), "unexpected error: {}", err);
    }

    #[test]
    fn test_rejects_empty() {
        assert!(Questionnaire::new(Vec::new()).is_err());
    }

    #[test]
    fn test_from_json_lowercase_letters() {
        let q = Questionnaire::from_json(
            r#"[
                { "prompt": "a?", "yes": "e", "no": "i" },
                { "prompt": "b?", "yes": "s", "no": "n" },
                { "prompt": "c?", "yes": "t", "no": "f" },
                { "prompt": "d?", "yes": "j", "no": "p" }
            ]"#,
        )
        .unwrap();
        assert_eq!(q.pair_at(0), Some(('E', 'I')));
    }
}
