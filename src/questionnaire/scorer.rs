//! Deterministic reduction of an answer sequence to a four-letter type code.
//!
//! Pure: no state, identical input yields identical output. The tie-break
//! rule is load-bearing — an axis that scores even resolves to the
//! first-listed letter of the pair (E, S, T, J), which silently decides
//! every borderline diagnosis.

use crate::errors::{BotError, BotResult};
use crate::profile::{TypeCode, AXES};

use super::Questionnaire;

/// Score a completed answer sequence against a questionnaire.
///
/// The answer count must equal the question count exactly; a mismatch is an
/// [`BotError::InvalidInput`], never a silent truncation.
pub fn score(questionnaire: &Questionnaire, answers: &[bool]) -> BotResult<TypeCode> {
    let n = questionnaire.total_questions();
    if answers.len() != n {
        return Err(BotError::InvalidInput(format!(
            "expected {} answers, got {}",
            n,
            answers.len()
        )));
    }

    let mut tally = [0u32; 8];
    for (i, &answer) in answers.iter().enumerate() {
        let (yes, no) = questionnaire
            .pair_at(i)
            .expect("answer index within questionnaire length");
        let letter = if answer { yes } else { no };
        tally[letter_index(letter)] += 1;
    }

    let mut code = String::with_capacity(4);
    for &(first, second) in &AXES {
        // >= keeps the first-listed letter on a tie.
        if tally[letter_index(first)] >= tally[letter_index(second)] {
            code.push(first);
        } else {
            code.push(second);
        }
    }

    TypeCode::parse(&code)
}

/// Fixed index of each axis letter into the tally array.
fn letter_index(letter: char) -> usize {
    match letter {
        'E' => 0,
        'I' => 1,
        'S' => 2,
        'N' => 3,
        'T' => 4,
        'F' => 5,
        'J' => 6,
        'P' => 7,
        other => unreachable!("non-axis letter {:?} in questionnaire", other),
    }
}
