//! Shape and range checks for a search request.
//!
//! Runs before any network traffic: a request that fails here is never sent
//! to the word source.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::config::{BONUS_ROW_COUNT, LETTER_COUNT, MAX_ROUND, MIN_ROUND, MIN_WORD_LENGTH};
use crate::error::InputError;

// One visible character. Matched after uppercasing, since some letters
// (ß -> SS) grow when uppercased.
static SINGLE_TILE_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\S$").unwrap());

/// Per-length, per-position bonus tokens. Row `i` belongs to words of
/// length `i + 3` and holds one token per letter position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BonusTable {
    rows: Vec<Vec<String>>,
}

impl BonusTable {
    /// JSON text sent as the `puntos_extra` query parameter.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.rows).unwrap_or_else(|_| "[]".to_string())
    }
}

/// A request that passed validation. Letters are uppercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    letters: Vec<String>,
    bonus: BonusTable,
    round: u8,
}

impl SearchQuery {
    pub fn letters(&self) -> &[String] {
        &self.letters
    }

    pub fn bonus_table(&self) -> &BonusTable {
        &self.bonus
    }

    pub fn round(&self) -> u8 {
        self.round
    }
}

/// Check the three search parameters and normalize the letters.
///
/// Fails with the first rule that is broken, checked in order: letter
/// count, each letter, bonus row count, each row's length, round range.
pub fn validate<S: AsRef<str>>(
    letters: &[S],
    bonus_rows: &[Vec<S>],
    round: i64,
) -> Result<SearchQuery, InputError> {
    if letters.len() != LETTER_COUNT {
        return Err(InputError::LetterCount {
            expected: LETTER_COUNT,
            found: letters.len(),
        });
    }

    let letters = letters
        .iter()
        .enumerate()
        .map(|(position, token)| normalize_letter(position, token.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    if bonus_rows.len() != BONUS_ROW_COUNT {
        return Err(InputError::BonusRowCount {
            expected: BONUS_ROW_COUNT,
            found: bonus_rows.len(),
        });
    }

    for (idx, row) in bonus_rows.iter().enumerate() {
        let word_length = idx + MIN_WORD_LENGTH;
        if row.len() != word_length {
            return Err(InputError::BonusRowLength {
                word_length,
                expected: word_length,
                found: row.len(),
            });
        }
    }

    if !(MIN_ROUND..=MAX_ROUND).contains(&round) {
        return Err(InputError::RoundOutOfRange {
            min: MIN_ROUND,
            max: MAX_ROUND,
            found: round,
        });
    }

    let rows = bonus_rows
        .iter()
        .map(|row| row.iter().map(|t| t.as_ref().to_string()).collect())
        .collect();

    Ok(SearchQuery {
        letters,
        bonus: BonusTable { rows },
        // Range checked above
        round: round as u8,
    })
}

/// Convert a round number from a dynamically typed caller.
///
/// Rejects fractional and non-finite values; range is left to [`validate`].
pub fn round_from_f64(value: f64) -> Result<i64, InputError> {
    if !value.is_finite() || value.fract() != 0.0 {
        return Err(InputError::RoundNotInteger { found: value });
    }
    Ok(value as i64)
}

fn normalize_letter(position: usize, token: &str) -> Result<String, InputError> {
    let upper = token.trim().to_uppercase();
    if !SINGLE_TILE_REGEX.is_match(&upper) {
        return Err(InputError::InvalidLetter {
            position,
            token: token.to_string(),
        });
    }
    Ok(upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letters(s: &str) -> Vec<String> {
        s.chars().map(|c| c.to_string()).collect()
    }

    fn bonus_rows() -> Vec<Vec<String>> {
        (3..=7).map(|len| vec!["0".to_string(); len]).collect()
    }

    #[test]
    fn accepts_valid_input_and_uppercases() {
        let query = validate(&letters("casaron"), &bonus_rows(), 3).unwrap();
        assert_eq!(query.letters(), letters("CASARON").as_slice());
        assert_eq!(query.round(), 3);
        let rows: Vec<Vec<String>> = serde_json::from_str(&query.bonus_table().to_json()).unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn repeated_letters_are_allowed() {
        assert!(validate(&letters("aaaaaaa"), &bonus_rows(), 1).is_ok());
    }

    #[test]
    fn accepts_enye_and_trims_whitespace() {
        let mut input = letters("nabcdef");
        input[0] = " ñ ".to_string();
        let query = validate(&input, &bonus_rows(), 5).unwrap();
        assert_eq!(query.letters()[0], "Ñ");
    }

    #[test]
    fn rejects_six_letters() {
        let err = validate(&letters("abcdef"), &bonus_rows(), 1).unwrap_err();
        assert_eq!(
            err,
            InputError::LetterCount {
                expected: 7,
                found: 6
            }
        );
    }

    #[test]
    fn rejects_multi_character_and_empty_tokens() {
        let mut input = letters("abcdefg");
        input[2] = "cd".to_string();
        assert!(matches!(
            validate(&input, &bonus_rows(), 1),
            Err(InputError::InvalidLetter { position: 2, .. })
        ));

        input[2] = "  ".to_string();
        assert!(matches!(
            validate(&input, &bonus_rows(), 1),
            Err(InputError::InvalidLetter { position: 2, .. })
        ));

        input[2] = String::new();
        assert!(validate(&input, &bonus_rows(), 1).is_err());
    }

    #[test]
    fn rejects_letter_that_uppercases_to_two() {
        let mut input = letters("abcdefg");
        input[0] = "ß".to_string();
        assert_eq!(
            validate(&input, &bonus_rows(), 1).unwrap_err(),
            InputError::InvalidLetter {
                position: 0,
                token: "ß".to_string()
            }
        );
    }

    #[test]
    fn blank_tile_mark_is_passed_through() {
        let mut input = letters("abcdefg");
        input[6] = "?".to_string();
        let query = validate(&input, &bonus_rows(), 1).unwrap();
        assert_eq!(query.letters()[6], "?");
        assert!(query.letters().iter().all(|l| l.chars().count() == 1));
    }

    #[test]
    fn rejects_four_row_table() {
        let mut rows = bonus_rows();
        rows.pop();
        assert_eq!(
            validate(&letters("abcdefg"), &rows, 1).unwrap_err(),
            InputError::BonusRowCount {
                expected: 5,
                found: 4
            }
        );
    }

    #[test]
    fn rejects_row_length_mismatch() {
        let mut rows = bonus_rows();
        rows[2].push("x2".to_string());
        assert_eq!(
            validate(&letters("abcdefg"), &rows, 1).unwrap_err(),
            InputError::BonusRowLength {
                word_length: 5,
                expected: 5,
                found: 6
            }
        );
    }

    #[test]
    fn rejects_round_out_of_range() {
        for round in [0, 6, -1] {
            assert!(matches!(
                validate(&letters("abcdefg"), &bonus_rows(), round),
                Err(InputError::RoundOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn round_from_f64_rejects_fractions() {
        assert_eq!(round_from_f64(4.0), Ok(4));
        assert!(round_from_f64(2.5).is_err());
        assert!(round_from_f64(f64::NAN).is_err());
    }

    #[test]
    fn bonus_table_serializes_as_nested_arrays() {
        let query = validate(&letters("abcdefg"), &bonus_rows(), 2).unwrap();
        let json = query.bonus_table().to_json();
        assert!(json.starts_with("[[\"0\",\"0\",\"0\"],"));
    }
}
