//! Grouping and ranking of scored candidate words.
//!
//! Candidates are bucketed by length (3..=7 letters), each bucket is sorted
//! best-first and cut to the top [`TOP_PER_LENGTH`], and the survivors are
//! merged and sorted again so the final list is best-first across lengths.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use log::debug;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::config::{MAX_WORD_LENGTH, MIN_WORD_LENGTH, TOP_PER_LENGTH};

/// A score exactly as the word source sent it.
///
/// Ordering uses the numeric value; the original representation is kept so
/// an integer score is written back as an integer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(serde_json::Number);

impl Score {
    pub fn from_number(number: serde_json::Number) -> Self {
        Score(number)
    }

    /// Returns `None` for NaN and infinities, which have no JSON form.
    pub fn as_f64(&self) -> f64 {
        self.0.as_f64().unwrap_or(0.0)
    }
}

impl From<i64> for Score {
    fn from(value: i64) -> Self {
        Score(value.into())
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_f64().total_cmp(&other.as_f64())
    }
}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredWord {
    #[serde(rename = "palabra")]
    pub word: String,
    #[serde(rename = "puntos")]
    pub score: Score,
}

impl ScoredWord {
    pub fn new(word: impl Into<String>, score: impl Into<Score>) -> Self {
        Self {
            word: word.into(),
            score: score.into(),
        }
    }

    /// Length in letters, not bytes.
    pub fn len(&self) -> usize {
        self.word.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LengthStats {
    /// Words of this length before truncation.
    pub total: usize,
    /// Words of this length that made the cut.
    #[serde(rename = "mejores")]
    pub kept: usize,
    #[serde(rename = "puntos_max")]
    pub max_score: Score,
    /// Lowest score among the kept words.
    #[serde(rename = "puntos_min")]
    pub min_score: Score,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedResult {
    #[serde(rename = "palabras")]
    pub words: Vec<ScoredWord>,
    #[serde(rename = "total")]
    pub total_returned: usize,
    #[serde(rename = "total_antes_filtro")]
    pub total_before_truncation: usize,
    #[serde(rename = "estadisticas", serialize_with = "serialize_stats")]
    pub per_length_stats: BTreeMap<usize, LengthStats>,
}

impl RankedResult {
    pub fn stats_for(&self, word_length: usize) -> Option<&LengthStats> {
        self.per_length_stats.get(&word_length)
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

/// Wire key for a length's statistics, e.g. `longitud_4`.
pub fn stats_key(word_length: usize) -> String {
    format!("longitud_{}", word_length)
}

fn serialize_stats<S: Serializer>(
    stats: &BTreeMap<usize, LengthStats>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(stats.len()))?;
    for (length, entry) in stats {
        map.serialize_entry(&stats_key(*length), entry)?;
    }
    map.end()
}

/// Best-first ordering. `sort_by` is stable, so equal scores keep arrival order.
fn by_score_desc(a: &ScoredWord, b: &ScoredWord) -> Ordering {
    b.score.cmp(&a.score)
}

/// Rank candidates into the top words per length plus statistics.
///
/// Never fails: words outside 3..=7 letters are dropped, and an empty input
/// gives an empty result.
pub fn rank<I>(candidates: I) -> RankedResult
where
    I: IntoIterator<Item = ScoredWord>,
{
    let mut buckets: BTreeMap<usize, Vec<ScoredWord>> = BTreeMap::new();
    let mut dropped = 0usize;

    for candidate in candidates {
        let length = candidate.len();
        if (MIN_WORD_LENGTH..=MAX_WORD_LENGTH).contains(&length) {
            buckets.entry(length).or_default().push(candidate);
        } else {
            dropped += 1;
        }
    }

    if dropped > 0 {
        debug!(
            "Ignored {} candidates outside {}..={} letters",
            dropped, MIN_WORD_LENGTH, MAX_WORD_LENGTH
        );
    }

    let mut words = Vec::new();
    let mut per_length_stats = BTreeMap::new();
    let mut total_before_truncation = 0;

    // BTreeMap iteration gives lengths 3 -> 7
    for (length, mut bucket) in buckets {
        bucket.sort_by(by_score_desc);
        let total = bucket.len();
        bucket.truncate(TOP_PER_LENGTH);

        if let (Some(best), Some(worst)) = (bucket.first(), bucket.last()) {
            per_length_stats.insert(
                length,
                LengthStats {
                    total,
                    kept: bucket.len(),
                    max_score: best.score.clone(),
                    min_score: worst.score.clone(),
                },
            );
        }

        total_before_truncation += total;
        words.extend(bucket);
    }

    words.sort_by(by_score_desc);

    debug!(
        "Ranked {} of {} words across {} lengths",
        words.len(),
        total_before_truncation,
        per_length_stats.len()
    );

    RankedResult {
        total_returned: words.len(),
        total_before_truncation,
        per_length_stats,
        words,
    }
}
