//! Error types for the search pipeline and the offline layer.

use serde::Serialize;

use crate::config::DEFAULT_REJECTION_MESSAGE;

/// Which input rule a search request broke.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InputError {
    #[error("expected {expected} letters, got {found}")]
    LetterCount { expected: usize, found: usize },
    #[error("letter {position} ({token:?}) is not a single character")]
    InvalidLetter { position: usize, token: String },
    #[error("expected {expected} bonus rows, got {found}")]
    BonusRowCount { expected: usize, found: usize },
    #[error("bonus row for {word_length}-letter words needs {expected} entries, got {found}")]
    BonusRowLength {
        word_length: usize,
        expected: usize,
        found: usize,
    },
    #[error("round must be between {min} and {max}, got {found}")]
    RoundOutOfRange { min: i64, max: i64, found: i64 },
    #[error("round must be a whole number, got {found}")]
    RoundNotInteger { found: f64 },
    #[error("{field} is not in the expected shape")]
    Malformed { field: &'static str },
}

/// Terminal outcome of a failed search. None of these are retried.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SearchError {
    #[error("invalid input: {0}")]
    InvalidInput(#[from] InputError),
    #[error("the word source could not be reached")]
    SourceUnavailable,
    #[error("the word source sent a response that could not be read")]
    MalformedResponse,
    #[error("the word source rejected the search: {0}")]
    SourceRejected(String),
}

/// A message-and-detail pair shown to the player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMessage {
    pub title: String,
    pub detail: String,
}

impl SearchError {
    /// Collapse any error kind into something the player can read.
    ///
    /// Transport and parser details never reach this message; only the word
    /// source's own rejection text is passed through.
    pub fn user_message(&self) -> UserMessage {
        let (title, detail) = match self {
            SearchError::InvalidInput(reason) => ("Check your input", reason.to_string()),
            SearchError::SourceUnavailable => (
                "Connection problem",
                "The word service could not be reached. Try again in a moment.".to_string(),
            ),
            SearchError::MalformedResponse => (
                "Unexpected answer",
                "The word service answered with something we could not read.".to_string(),
            ),
            SearchError::SourceRejected(reason) => {
                let reason = if reason.trim().is_empty() {
                    DEFAULT_REJECTION_MESSAGE.to_string()
                } else {
                    reason.clone()
                };
                ("Search failed", reason)
            }
        };
        UserMessage {
            title: title.to_string(),
            detail,
        }
    }
}

/// A network round trip that never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("network request failed: {0}")]
pub struct FetchError(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache storage failed: {0}")]
    Storage(String),
    #[error("could not precache {url}: {reason}")]
    Precache { url: String, reason: String },
    #[error("worker host refused: {0}")]
    Host(String),
    #[error("cannot {operation} while the worker is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid settings: {0}")]
    Settings(#[from] serde_json::Error),
    #[error("invalid URL {url:?}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid API host pattern: {0}")]
    ApiHostPattern(#[from] regex::Error),
    #[error("cache version must not be empty")]
    EmptyVersion,
    #[error("offline message must not be empty")]
    EmptyOfflineMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_passes_source_message_through() {
        let msg = SearchError::SourceRejected("Letras inválidas".into()).user_message();
        assert_eq!(msg.title, "Search failed");
        assert_eq!(msg.detail, "Letras inválidas");
    }

    #[test]
    fn blank_rejection_uses_default_message() {
        let msg = SearchError::SourceRejected("  ".into()).user_message();
        assert_eq!(msg.detail, DEFAULT_REJECTION_MESSAGE);
    }

    #[test]
    fn malformed_response_does_not_leak_parser_details() {
        let msg = SearchError::MalformedResponse.user_message();
        assert!(!msg.detail.contains("line"));
        assert!(!msg.detail.contains("column"));
    }

    #[test]
    fn invalid_input_names_the_rule() {
        let err: SearchError = InputError::LetterCount {
            expected: 7,
            found: 6,
        }
        .into();
        assert_eq!(err.user_message().detail, "expected 7 letters, got 6");
    }
}
