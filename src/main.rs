//! Command-line entrypoint.
//!
//! Subcommands cover the service lifecycle: batch ingest from a manifest,
//! one-shot identification of a file, orphan sweeping, catalog stats and
//! the HTTP server.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tuneprint::config::AnalysisParams;
use tuneprint::ingest::{self, CancelToken, IngestJob, DEFAULT_WORKERS};
use tuneprint::server::{self, AppState, TOP_MATCHES};
use tuneprint::store::Database;
use tuneprint::{decode, dsp, matcher};

#[derive(Parser)]
#[command(name = "tuneprint")]
#[command(about = "Acoustic fingerprinting: ingest a catalog, identify excerpts")]
struct Cli {
    /// Path to the fingerprint store.
    #[arg(long, default_value = "tuneprint.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every recording listed in a JSON manifest.
    Ingest {
        /// Manifest: a JSON array of {title, artist, external_ref, path}.
        manifest: PathBuf,

        /// Parallel DSP workers.
        #[arg(short, long, default_value_t = DEFAULT_WORKERS)]
        jobs: usize,
    },

    /// Identify a single audio file against the catalog.
    Find { file: PathBuf },

    /// Delete postings whose song row is gone.
    Sweep,

    /// Print catalog counters.
    Stats,

    /// Start the HTTP identification server.
    Serve {
        #[arg(short, long, default_value_t = 8080)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let params = AnalysisParams::default();
    let db = Database::open(&cli.db, &params).await?;

    match cli.command {
        Commands::Ingest { manifest, jobs } => {
            let raw = std::fs::read_to_string(&manifest)?;
            let batch: Vec<IngestJob> = serde_json::from_str(&raw)?;
            tracing::info!(recordings = batch.len(), jobs, "starting ingest");

            let report =
                ingest::ingest_batch(Arc::new(db), batch, jobs, params, CancelToken::new()).await;
            println!("Ingested {} recording(s), {} failed.", report.ingested, report.failed);
        }

        Commands::Find { file } => {
            let started = Instant::now();
            let (samples, source_rate) = decode::load_audio(&file)?;
            let fingerprints = dsp::fingerprint_samples(&samples, source_rate, &params)?;
            let query = dsp::fold_query(&fingerprints);

            let deadline = Instant::now() + Duration::from_secs(10);
            let mut matches = matcher::find_matches(&db, &query, Some(deadline)).await?;

            if matches.is_empty() {
                println!("No match found.");
            } else {
                matches.truncate(TOP_MATCHES);
                println!("Matches:");
                for m in &matches {
                    println!(
                        "\t- {} by {}, score {:.2} (at {:.1}s)",
                        m.title,
                        m.artist,
                        m.score,
                        f64::from(m.timestamp_ms) / 1000.0
                    );
                }
                let top = &matches[0];
                println!("\nBest match: {} by {}", top.title, top.artist);
            }
            println!("Search took {:?}", started.elapsed());
        }

        Commands::Sweep => {
            let removed = db.sweep_orphans().await?;
            println!("Removed {removed} orphaned posting(s).");
        }

        Commands::Stats => {
            println!("Songs:    {}", db.total_songs().await?);
            println!("Postings: {}", db.posting_count().await?);
        }

        Commands::Serve { port } => {
            let state = Arc::new(AppState { db, params });
            server::serve(state, port).await?;
        }
    }

    Ok(())
}
