//! Client for the remote word-scoring endpoint.
//!
//! The endpoint receives the letters, bonus table and round as query
//! parameters and answers with a JSON envelope:
//!
//! ```text
//! { "success": true,  "data": { "palabras": [ { "CASA": 12 }, ... ] } }
//! { "success": false, "mensaje": "..." }
//! ```

use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::config::DEFAULT_REJECTION_MESSAGE;
use crate::error::SearchError;
use crate::net::{Fetch, ResourceRequest};
use crate::ranking::{Score, ScoredWord};
use crate::validation::SearchQuery;

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    data: Option<EnvelopeData>,
    #[serde(default)]
    mensaje: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    palabras: Vec<Value>,
}

pub struct WordSourceClient<F> {
    endpoint: Url,
    transport: F,
}

impl<F: Fetch> WordSourceClient<F> {
    pub fn new(endpoint: Url, transport: F) -> Self {
        Self {
            endpoint,
            transport,
        }
    }

    /// Endpoint URL with `letras`, `puntos_extra` and `ronda` appended.
    pub fn request_url(&self, query: &SearchQuery) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("letras", &query.letters().join(","))
            .append_pair("puntos_extra", &query.bonus_table().to_json())
            .append_pair("ronda", &query.round().to_string());
        url
    }

    /// Ask the word source for every scored word it can build.
    ///
    /// One request, no retries. The response status is not consulted: the
    /// envelope alone decides between success and rejection.
    pub async fn fetch_candidates(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<ScoredWord>, SearchError> {
        let request = ResourceRequest::get(self.request_url(query));
        let response = self.transport.fetch(&request).await.map_err(|e| {
            warn!("Word source request failed: {}", e);
            SearchError::SourceUnavailable
        })?;
        debug!("Word source answered with status {}", response.status);
        decode_envelope(&response.body)
    }
}

/// Decode a word-source response body into scored words.
pub fn decode_envelope(body: &[u8]) -> Result<Vec<ScoredWord>, SearchError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|e| {
        debug!("Unreadable word source body: {}", e);
        SearchError::MalformedResponse
    })?;

    if !envelope.success {
        let reason = envelope
            .mensaje
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REJECTION_MESSAGE.to_string());
        return Err(SearchError::SourceRejected(reason));
    }

    let data = envelope.data.ok_or(SearchError::MalformedResponse)?;
    let total = data.palabras.len();
    let words: Vec<ScoredWord> = data.palabras.into_iter().filter_map(flatten_entry).collect();

    if words.len() < total {
        debug!(
            "Dropped {} malformed word entries out of {}",
            total - words.len(),
            total
        );
    }

    Ok(words)
}

/// `{"CASA": 12}` or `{"palabra": "CASA", "puntos": 12}` into a [`ScoredWord`].
fn flatten_entry(entry: Value) -> Option<ScoredWord> {
    let Value::Object(map) = entry else {
        return None;
    };

    if map.len() == 1 {
        let (word, score) = map.into_iter().next()?;
        return match score {
            Value::Number(n) if !word.is_empty() => Some(ScoredWord {
                word,
                score: Score::from_number(n),
            }),
            _ => None,
        };
    }

    match (map.get("palabra"), map.get("puntos")) {
        (Some(Value::String(word)), Some(Value::Number(n))) if map.len() == 2 => {
            Some(ScoredWord {
                word: word.clone(),
                score: Score::from_number(n.clone()),
            })
        }
        _ => None,
    }
}
