//! End-to-end scenarios over synthetic audio and an in-memory store.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tuneprint::config::{AnalysisParams, CANONICAL_RATE};
use tuneprint::ingest::{self, CancelToken, IngestJob};
use tuneprint::store::Database;
use tuneprint::{dsp, matcher, wav};

/// Linear sine sweep from `f0` to `f1` Hz at the canonical rate.
fn sine_sweep(f0: f64, f1: f64, duration_secs: f64) -> Vec<f64> {
    let rate = f64::from(CANONICAL_RATE);
    let n = (duration_secs * rate) as usize;
    (0..n)
        .map(|i| {
            let t = i as f64 / rate;
            let phase = 2.0 * std::f64::consts::PI
                * (f0 * t + (f1 - f0) * t * t / (2.0 * duration_secs));
            0.8 * phase.sin()
        })
        .collect()
}

async fn catalog() -> Database {
    Database::in_memory(&AnalysisParams::default())
        .await
        .expect("in-memory store")
}

async fn ingest_samples(db: &Database, samples: &[f64], title: &str, artist: &str) -> i64 {
    let params = AnalysisParams::default();
    let fps = dsp::fingerprint_samples(samples, CANONICAL_RATE, &params).unwrap();
    assert!(!fps.is_empty());
    ingest::ingest_recording(db, title, artist, "", &fps)
        .await
        .unwrap()
}

async fn query_samples(db: &Database, samples: &[f64]) -> Vec<matcher::Match> {
    let params = AnalysisParams::default();
    let fps = dsp::fingerprint_samples(samples, CANONICAL_RATE, &params).unwrap();
    let query = dsp::fold_query(&fps);
    matcher::find_matches(db, &query, None).await.unwrap()
}

/// S1 + P2: a full-recording query of the only catalog entry is a single
/// dominant self-match anchored at the start.
#[tokio::test]
async fn full_query_matches_itself() {
    let db = catalog().await;
    let sweep = sine_sweep(100.0, 3000.0, 30.0);

    let params = AnalysisParams::default();
    let fps = dsp::fingerprint_samples(&sweep, CANONICAL_RATE, &params).unwrap();
    let song_id = ingest::ingest_recording(&db, "Sweep Up", "Oscillator", "yt:sweep-up", &fps)
        .await
        .unwrap();

    let query = dsp::fold_query(&fps);
    let matches = matcher::find_matches(&db, &query, None).await.unwrap();

    assert_eq!(matches.len(), 1);
    let top = &matches[0];
    assert_eq!(top.song_id, song_id);
    assert_eq!(top.timestamp_ms, 0);
    assert!(top.score >= 100.0, "score was {}", top.score);
    // Every folded query address hits its own posting at offset zero.
    assert!(top.score >= query.len() as f64, "score {} < {}", top.score, query.len());
}

/// S2 + P3: a 10 s excerpt localizes to its position in the recording.
#[tokio::test]
async fn segment_query_localizes() {
    let db = catalog().await;
    let sweep = sine_sweep(100.0, 3000.0, 30.0);
    let song_id = ingest_samples(&db, &sweep, "Sweep Up", "Oscillator").await;

    let rate = CANONICAL_RATE as usize;
    let segment = &sweep[10 * rate..20 * rate];
    let matches = query_samples(&db, segment).await;

    assert!(!matches.is_empty());
    assert_eq!(matches[0].song_id, song_id);
    let ts = i64::from(matches[0].timestamp_ms);
    assert!((9900..=10100).contains(&ts), "timestamp_ms was {ts}");
}

/// S3: an empty catalog yields an empty result, not an error.
#[tokio::test]
async fn empty_catalog_returns_empty() {
    let db = catalog().await;
    let matches = query_samples(&db, &sine_sweep(200.0, 2000.0, 8.0)).await;
    assert!(matches.is_empty());
}

/// S4: opposite sweeps are distinguished with a clear margin.
#[tokio::test]
async fn opposite_sweeps_are_distinguished() {
    let db = catalog().await;
    let up = sine_sweep(100.0, 3000.0, 30.0);
    let down = sine_sweep(3000.0, 100.0, 30.0);
    let up_id = ingest_samples(&db, &up, "Sweep Up", "Oscillator").await;
    let down_id = ingest_samples(&db, &down, "Sweep Down", "Oscillator").await;
    assert_ne!(up_id, down_id);

    let matches = query_samples(&db, &down).await;
    assert_eq!(matches[0].song_id, down_id);
    if let Some(runner_up) = matches.iter().find(|m| m.song_id == up_id) {
        assert!(
            matches[0].score > 2.0 * runner_up.score,
            "margin too thin: {} vs {}",
            matches[0].score,
            runner_up.score
        );
    }
}

/// S5 + P5: orphaned postings never influence results, and the sweep
/// reports what it removed.
#[tokio::test]
async fn orphan_sweep_restores_invariants() {
    let db = catalog().await;
    let sweep = sine_sweep(100.0, 3000.0, 20.0);
    let song_id = ingest_samples(&db, &sweep, "Doomed", "Oscillator").await;

    let posting_count = db.posting_count().await.unwrap();
    assert!(posting_count > 0);

    // Simulate corruption: the song row vanishes, postings stay.
    db.delete_song_row_only(song_id).await.unwrap();

    let before = query_samples(&db, &sweep).await;
    let removed = db.sweep_orphans().await.unwrap();
    let after = query_samples(&db, &sweep).await;

    assert_eq!(removed, posting_count as u64);
    assert!(before.is_empty());
    assert_eq!(
        before.iter().map(|m| m.song_id).collect::<Vec<_>>(),
        after.iter().map(|m| m.song_id).collect::<Vec<_>>()
    );
    assert_eq!(db.posting_count().await.unwrap(), 0);
}

/// S6: concurrent ingest of two recordings through the shared writer
/// loses nothing.
#[tokio::test]
async fn concurrent_ingest_is_complete() {
    let params = AnalysisParams::default();
    let up = sine_sweep(100.0, 3000.0, 15.0);
    let down = sine_sweep(3000.0, 100.0, 15.0);

    let dir = tempfile::tempdir().unwrap();
    let mut jobs = Vec::new();
    let mut expected = 0i64;
    for (name, samples) in [("up", &up), ("down", &down)] {
        let bytes = wav::write_wav(samples, CANONICAL_RATE);
        // Expected counts go through the same 16-bit quantization the
        // ingested files do.
        let audio = wav::read_wav(&bytes).unwrap();
        expected +=
            dsp::fingerprint_pcm(&audio.samples, audio.sample_rate, &params).unwrap().len() as i64;

        let path = dir.path().join(format!("{name}.wav"));
        std::fs::write(&path, bytes).unwrap();
        jobs.push(IngestJob {
            title: name.to_string(),
            artist: "Oscillator".to_string(),
            external_ref: String::new(),
            path,
        });
    }

    let db = Arc::new(catalog().await);
    let report =
        ingest::ingest_batch(Arc::clone(&db), jobs, 2, params, CancelToken::new()).await;

    assert_eq!(report.ingested, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(db.total_songs().await.unwrap(), 2);
    assert_eq!(db.posting_count().await.unwrap(), expected);
}

/// A bad file in a batch is isolated; the rest ingests.
#[tokio::test]
async fn batch_isolates_per_recording_failures() {
    let params = AnalysisParams::default();
    let dir = tempfile::tempdir().unwrap();

    let good = dir.path().join("good.wav");
    std::fs::write(&good, wav::write_wav(&sine_sweep(200.0, 2500.0, 12.0), CANONICAL_RATE))
        .unwrap();
    let bad = dir.path().join("bad.wav");
    std::fs::write(&bad, b"not audio at all").unwrap();

    let jobs = vec![
        IngestJob {
            title: "Good".into(),
            artist: "Oscillator".into(),
            external_ref: String::new(),
            path: good,
        },
        IngestJob {
            title: "Bad".into(),
            artist: "Oscillator".into(),
            external_ref: String::new(),
            path: bad,
        },
    ];

    let db = Arc::new(catalog().await);
    let report = ingest::ingest_batch(Arc::clone(&db), jobs, 2, params, CancelToken::new()).await;

    assert_eq!(report.ingested, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(db.total_songs().await.unwrap(), 1);
}

/// P7: silence and noise against a non-empty catalog stay unmatched.
#[tokio::test]
async fn distractors_are_rejected() {
    let db = catalog().await;
    ingest_samples(&db, &sine_sweep(100.0, 3000.0, 30.0), "Sweep Up", "Oscillator").await;

    // Pure silence produces no peaks at all.
    let params = AnalysisParams::default();
    let silence = vec![0.0; 10 * CANONICAL_RATE as usize];
    let fps = dsp::fingerprint_samples(&silence, CANONICAL_RATE, &params).unwrap();
    assert!(fps.is_empty());

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let noise: Vec<f64> = (0..10 * CANONICAL_RATE as usize)
        .map(|_| rng.gen_range(-0.8..0.8))
        .collect();
    let matches = query_samples(&db, &noise).await;
    assert!(matches.is_empty(), "noise matched: {:?}", matches[0].title);
}

/// P4: identification survives additive noise at 10 dB SNR. Statistical
/// and slower than the rest of the suite.
#[tokio::test]
#[ignore = "statistical noise-robustness sweep, run explicitly"]
async fn noisy_queries_still_identify() {
    let db = catalog().await;

    // A small varied catalog of sweeps.
    let mut ids = Vec::new();
    for i in 0..10 {
        let f0 = 100.0 + 250.0 * i as f64;
        let f1 = 3000.0 - 200.0 * i as f64;
        let samples = sine_sweep(f0, f1, 30.0);
        ids.push(ingest_samples(&db, &samples, &format!("Sweep {i}"), "Oscillator").await);
    }

    // Ten 10-second queries from song 3 with white noise at 10 dB SNR.
    let target = sine_sweep(100.0 + 250.0 * 3.0, 3000.0 - 200.0 * 3.0, 30.0);
    let signal_rms = (target.iter().map(|s| s * s).sum::<f64>() / target.len() as f64).sqrt();
    let noise_rms = signal_rms / 10f64.powf(10.0 / 20.0);

    let mut rng = StdRng::seed_from_u64(42);
    let rate = CANONICAL_RATE as usize;
    let mut correct = 0;
    for q in 0..10 {
        let start = (q % 15) * rate;
        let noisy: Vec<f64> = target[start..start + 10 * rate]
            .iter()
            .map(|&s| s + rng.gen_range(-1.0..1.0f64) * noise_rms * 3f64.sqrt())
            .collect();
        let matches = query_samples(&db, &noisy).await;
        if matches.first().map(|m| m.song_id) == Some(ids[3]) {
            correct += 1;
        }
    }
    assert!(correct >= 9, "only {correct}/10 noisy queries identified");
}
