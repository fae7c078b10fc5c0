//! Batch ingest orchestrator.
//!
//! The DSP path is CPU-bound and embarrassingly parallel per recording,
//! so a bounded pool of workers decodes and fingerprints concurrently.
//! All database writes funnel through one consumer of a bounded channel:
//! the embedded store dislikes concurrent writers, and the channel
//! provides backpressure when the DSP outruns the disk.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::{mpsc, Semaphore};

use crate::config::AnalysisParams;
use crate::decode;
use crate::dsp::{self, Fingerprint};
use crate::error::{Error, Result};
use crate::store::Database;

pub const DEFAULT_WORKERS: usize = 4;

/// One manifest entry: where the audio lives and how to register it.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestJob {
    pub title: String,
    pub artist: String,
    #[serde(default)]
    pub external_ref: String,
    pub path: PathBuf,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestReport {
    pub ingested: usize,
    pub failed: usize,
}

/// Cooperative cancellation, checked between recordings and between
/// pipeline stages.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Prepared {
    job: IngestJob,
    fingerprints: Vec<Fingerprint>,
}

/// Register one recording and write its postings. The registry row and
/// the postings land under the writer's serial execution, so a re-run
/// with the same title/artist replaces rather than accumulates.
pub async fn ingest_recording(
    db: &Database,
    title: &str,
    artist: &str,
    external_ref: &str,
    fingerprints: &[Fingerprint],
) -> Result<i64> {
    let song_id = db.register_song(title, artist, external_ref).await?;
    db.store_postings(song_id, fingerprints).await?;
    Ok(song_id)
}

/// Ingest a batch of recordings with `workers` parallel DSP workers and
/// a single database writer.
///
/// Per-recording failures are isolated: one bad file is logged and
/// counted, the rest of the batch proceeds.
pub async fn ingest_batch(
    db: Arc<Database>,
    jobs: Vec<IngestJob>,
    workers: usize,
    params: AnalysisParams,
    cancel: CancelToken,
) -> IngestReport {
    let workers = workers.max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<Prepared>(workers);
    let failed = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::with_capacity(jobs.len());
    for job in jobs {
        let semaphore = Arc::clone(&semaphore);
        let tx = tx.clone();
        let failed = Arc::clone(&failed);
        let cancel = cancel.clone();

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore open");
            if cancel.is_cancelled() {
                return;
            }

            let title = job.title.clone();
            let path = job.path.clone();
            let prepared = tokio::task::spawn_blocking(move || fingerprint_file(job, &params))
                .await
                .unwrap_or_else(|join_err| Err(Error::InputMalformed(join_err.to_string())));

            match prepared {
                Ok(prepared) => {
                    if !cancel.is_cancelled() {
                        // Writer gone means shutdown; nothing to record.
                        let _ = tx.send(prepared).await;
                    }
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::SeqCst);
                    tracing::error!(%title, path = %path.display(), error = %e, "ingest failed");
                }
            }
        }));
    }
    drop(tx);

    // Single writer: all store mutations happen here, in arrival order.
    let mut ingested = 0usize;
    while let Some(prepared) = rx.recv().await {
        if cancel.is_cancelled() {
            break;
        }
        let job = &prepared.job;
        match ingest_recording(
            &db,
            &job.title,
            &job.artist,
            &job.external_ref,
            &prepared.fingerprints,
        )
        .await
        {
            Ok(song_id) => {
                ingested += 1;
                tracing::info!(
                    song_id,
                    title = %job.title,
                    fingerprints = prepared.fingerprints.len(),
                    "ingested"
                );
            }
            Err(e) => {
                failed.fetch_add(1, Ordering::SeqCst);
                tracing::error!(title = %job.title, error = %e, "store write failed");
            }
        }
    }

    futures::future::join_all(handles).await;

    IngestReport {
        ingested,
        failed: failed.load(Ordering::SeqCst),
    }
}

fn fingerprint_file(job: IngestJob, params: &AnalysisParams) -> Result<Prepared> {
    let (samples, source_rate) = decode::load_audio(&job.path)?;
    let fingerprints = dsp::fingerprint_samples(&samples, source_rate, params)?;
    Ok(Prepared { job, fingerprints })
}
