use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for the fingerprinting pipeline and store.
///
/// A query that finds nothing is not an error; it returns an empty match
/// list. Orphaned postings are skipped and logged, never surfaced.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unsupported audio input (bad WAV header, wrong depth).
    #[error("malformed input: {0}")]
    InputMalformed(String),

    /// The canonical analysis rate is zero or negative.
    #[error("target sample rate must be positive, got {0}")]
    TargetRateInvalid(i64),

    /// Source audio is sampled below the canonical rate.
    #[error("source rate {source_rate} Hz is below the canonical rate {target} Hz")]
    SourceRateInvalid { source_rate: u32, target: u32 },

    /// An empty sample buffer was handed to the pipeline.
    #[error("empty input buffer")]
    EmptyInput,

    /// Container decode failure from the transcoding collaborator.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The store was created with different analysis parameters than the
    /// ones configured now; cross-version queries are refused.
    #[error("index schema mismatch: store has {stored}, configured {configured}")]
    SchemaMismatch { stored: String, configured: String },

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
