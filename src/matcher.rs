//! Relative-timing matcher.
//!
//! Every query hash that truly comes from a catalog recording shares the
//! same offset between its database anchor time and its query anchor time
//! (the query's start position within the recording). Colliding hashes
//! scatter offsets uniformly, so the tallest 100 ms offset bucket is a
//! near-linear statistic of true overlap. A small bonus on total matches
//! breaks ties in favor of coverage.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;

use crate::error::Result;
use crate::store::{Database, Posting};

/// Minimum score for a match to be reported; filters weak coincidental
/// overlap.
pub const MIN_SCORE: f64 = 15.0;

/// Offset bucket width in milliseconds; absorbs frame-boundary jitter.
pub const OFFSET_BUCKET_MS: i64 = 100;

/// Addresses per index lookup. The soft deadline is checked between
/// batches.
const LOOKUP_BATCH: usize = 256;

/// A ranked identification result.
#[derive(Debug, Clone, Serialize)]
pub struct Match {
    pub song_id: i64,
    pub title: String,
    pub artist: String,
    pub external_ref: String,
    /// Earliest database anchor time seen for this song, i.e. where in
    /// the recording the query audio starts.
    pub timestamp_ms: u32,
    pub score: f64,
}

/// Per-song histogram outcome, before metadata resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredSong {
    pub song_id: i64,
    pub score: f64,
    pub earliest_anchor_ms: u32,
}

/// Score candidate songs from raw index hits.
///
/// Pure: bucket `db_ms - query_ms` per song at 100 ms, score as the
/// tallest bucket plus a 10% bonus on total matches, drop songs under
/// [`MIN_SCORE`], order by score descending (song id breaks ties).
pub fn score_hits(
    query: &HashMap<u32, u32>,
    hits: &HashMap<u32, Vec<Posting>>,
) -> Vec<ScoredSong> {
    struct Tally {
        buckets: HashMap<i64, u32>,
        total: u32,
        earliest_ms: u32,
    }

    let mut tallies: HashMap<i64, Tally> = HashMap::new();

    for (address, postings) in hits {
        let Some(&query_ms) = query.get(address) else {
            continue;
        };
        for posting in postings {
            let delta = i64::from(posting.anchor_time_ms) - i64::from(query_ms);
            let bucket = delta.div_euclid(OFFSET_BUCKET_MS);

            let tally = tallies.entry(posting.song_id).or_insert(Tally {
                buckets: HashMap::new(),
                total: 0,
                earliest_ms: u32::MAX,
            });
            *tally.buckets.entry(bucket).or_default() += 1;
            tally.total += 1;
            tally.earliest_ms = tally.earliest_ms.min(posting.anchor_time_ms);
        }
    }

    let mut scored: Vec<ScoredSong> = tallies
        .into_iter()
        .filter_map(|(song_id, tally)| {
            let tallest = tally.buckets.values().copied().max().unwrap_or(0);
            let score = f64::from(tallest) + 0.1 * f64::from(tally.total);
            (score >= MIN_SCORE).then_some(ScoredSong {
                song_id,
                score,
                earliest_anchor_ms: tally.earliest_ms,
            })
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.song_id.cmp(&b.song_id))
    });
    scored
}

/// Identify the query fingerprint against the catalog.
///
/// Returns the ranked match list; an empty list means no recording
/// cleared the threshold, which is not an error. When `deadline` passes,
/// the remaining lookup batches are skipped and whatever was gathered is
/// scored.
pub async fn find_matches(
    db: &Database,
    query: &HashMap<u32, u32>,
    deadline: Option<Instant>,
) -> Result<Vec<Match>> {
    let addresses: Vec<u32> = query.keys().copied().collect();

    let mut hits: HashMap<u32, Vec<Posting>> = HashMap::new();
    let mut looked_up = 0usize;
    for batch in addresses.chunks(LOOKUP_BATCH) {
        if let Some(deadline) = deadline {
            if Instant::now() >= deadline {
                tracing::warn!(
                    looked_up,
                    skipped = addresses.len() - looked_up,
                    "query deadline reached, scoring partial hits"
                );
                break;
            }
        }
        hits.extend(db.lookup(batch).await?);
        looked_up += batch.len();
    }

    let mut matches = Vec::new();
    let mut orphaned = 0u32;

    for scored in score_hits(query, &hits) {
        match db.song_by_id(scored.song_id).await? {
            Some(song) => matches.push(Match {
                song_id: song.id,
                title: song.title,
                artist: song.artist,
                external_ref: song.external_ref,
                timestamp_ms: scored.earliest_anchor_ms,
                score: scored.score,
            }),
            None => {
                // Posting survived without its song row; skip it.
                orphaned += 1;
                tracing::warn!(song_id = scored.song_id, "orphaned postings matched, skipping");
            }
        }
    }

    if orphaned > 0 {
        tracing::warn!(orphaned, "orphaned candidates skipped; consider a sweep");
    }

    Ok(matches)
}
