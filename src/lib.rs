//! Best-word finder for a seven-letter tile game.
//!
//! A search validates the held letters, bonus table and round, asks the
//! remote word source for every scored word it can build, and ranks the
//! answer into the top words per length. The [`offline`] module is the
//! service-worker side: it sits between the page and the network and keeps
//! the app usable without a connection.

use log::{debug, info};
use serde::Serialize;

pub mod cache;
pub mod config;
pub mod error;
pub mod net;
pub mod offline;
pub mod ranking;
pub mod source;
pub mod validation;

#[cfg(target_arch = "wasm32")]
pub mod service_worker;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use error::{SearchError, UserMessage};
pub use ranking::{rank, RankedResult, ScoredWord};
pub use source::WordSourceClient;
pub use validation::{validate, SearchQuery};

use net::Fetch;

/// Run one search: validate, query the word source, rank.
///
/// Invalid input fails before any request is made. The request and body
/// decoding are the only suspension points and run strictly in sequence.
pub async fn search<F, S>(
    client: &WordSourceClient<F>,
    letters: &[S],
    bonus_rows: &[Vec<S>],
    round: i64,
) -> Result<RankedResult, SearchError>
where
    F: Fetch,
    S: AsRef<str>,
{
    let query = validate(letters, bonus_rows, round)?;
    debug!(
        "Searching {} in round {}",
        query.letters().join(""),
        query.round()
    );

    let candidates = client.fetch_candidates(&query).await?;
    let result = rank(candidates);

    info!(
        "Search returned {} words ({} before filtering)",
        result.total_returned, result.total_before_truncation
    );
    Ok(result)
}

/// What the presentation layer receives for a finished search.
///
/// Success: `{success: true, data: {palabras, total, total_antes_filtro, estadisticas}}`.
/// Failure: `{success: false, mensaje: <title>, detalle: <detail>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RankedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mensaje: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detalle: Option<String>,
}

impl From<Result<RankedResult, SearchError>> for SearchResponse {
    fn from(outcome: Result<RankedResult, SearchError>) -> Self {
        match outcome {
            Ok(result) => SearchResponse {
                success: true,
                data: Some(result),
                mensaje: None,
                detalle: None,
            },
            Err(e) => {
                let UserMessage { title, detail } = e.user_message();
                SearchResponse {
                    success: false,
                    data: None,
                    mensaje: Some(title),
                    detalle: Some(detail),
                }
            }
        }
    }
}
