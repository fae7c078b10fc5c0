//! SQLite-backed fingerprint index and song registry.
//!
//! One embedded store holds both tables. The index is keyed by the 32-bit
//! address; a secondary index on `song_id` supports whole-song deletes.
//! The `meta` table pins the analysis parameters the index was built with,
//! and opening with different parameters is refused.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::config::{AnalysisParams, SchemaDescriptor};
use crate::dsp::Fingerprint;
use crate::error::{Error, Result};
use crate::store::{source_key, Posting, Song};

const SCHEMA_KEY: &str = "analysis_schema";

/// Rows per INSERT statement when writing postings. Three binds per row
/// keeps this well under SQLite's bound-parameter ceiling.
const INSERT_CHUNK: usize = 300;

const BUSY_RETRIES: u32 = 3;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS meta (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS songs (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        title        TEXT NOT NULL,
        artist       TEXT NOT NULL,
        external_ref TEXT NOT NULL,
        source_key   TEXT NOT NULL UNIQUE,
        created_at   INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS postings (
        address        INTEGER NOT NULL,
        anchor_time_ms INTEGER NOT NULL,
        song_id        INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_postings_address ON postings(address)",
    "CREATE INDEX IF NOT EXISTS idx_postings_song ON postings(song_id)",
];

#[derive(Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) a file-backed store.
    pub async fn open(path: &Path, params: &AnalysisParams) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        Self::with_options(options, 5, params).await
    }

    /// Open an in-memory store. Single connection so every handle sees
    /// the same database; intended for tests.
    pub async fn in_memory(params: &AnalysisParams) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(Error::Store)?;
        Self::with_options(options, 1, params).await
    }

    async fn with_options(
        options: SqliteConnectOptions,
        max_connections: u32,
        params: &AnalysisParams,
    ) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }

        let db = Self { pool };
        db.check_schema(&params.descriptor()).await?;
        Ok(db)
    }

    /// Compare the configured analysis descriptor against the stored one,
    /// claiming the store on first open.
    async fn check_schema(&self, configured: &SchemaDescriptor) -> Result<()> {
        let stored: Option<String> = sqlx::query_scalar("SELECT value FROM meta WHERE key = ?")
            .bind(SCHEMA_KEY)
            .fetch_optional(&self.pool)
            .await?;

        match stored {
            None => {
                let value = serde_json::to_string(configured)
                    .expect("schema descriptor serializes");
                sqlx::query("INSERT INTO meta (key, value) VALUES (?, ?)")
                    .bind(SCHEMA_KEY)
                    .bind(value)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }
            Some(value) => {
                let matches = serde_json::from_str::<SchemaDescriptor>(&value)
                    .map(|d| &d == configured)
                    .unwrap_or(false);
                if matches {
                    Ok(())
                } else {
                    Err(Error::SchemaMismatch {
                        stored: value,
                        configured: serde_json::to_string(configured)
                            .expect("schema descriptor serializes"),
                    })
                }
            }
        }
    }

    /// Insert a song, or return the existing id when the same
    /// title/artist pair was registered before.
    pub async fn register_song(
        &self,
        title: &str,
        artist: &str,
        external_ref: &str,
    ) -> Result<i64> {
        let key = source_key(title, artist);
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO songs (title, artist, external_ref, source_key, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(source_key) DO UPDATE SET external_ref = excluded.external_ref
             RETURNING id",
        )
        .bind(title)
        .bind(artist)
        .bind(external_ref)
        .bind(&key)
        .bind(chrono::Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Replace a song's postings with `fingerprints`, atomically.
    ///
    /// Re-ingesting a recording therefore converges to the same index
    /// state. Transient lock contention is retried a bounded number of
    /// times before surfacing.
    pub async fn store_postings(&self, song_id: i64, fingerprints: &[Fingerprint]) -> Result<()> {
        let mut attempt = 0;
        loop {
            match self.store_postings_once(song_id, fingerprints).await {
                Ok(()) => return Ok(()),
                Err(Error::Store(e)) if is_busy(&e) && attempt + 1 < BUSY_RETRIES => {
                    attempt += 1;
                    tracing::debug!(song_id, attempt, "store busy, retrying");
                    tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn store_postings_once(&self, song_id: i64, fingerprints: &[Fingerprint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM postings WHERE song_id = ?")
            .bind(song_id)
            .execute(&mut *tx)
            .await?;

        for chunk in fingerprints.chunks(INSERT_CHUNK) {
            let mut statement =
                String::from("INSERT INTO postings (address, anchor_time_ms, song_id) VALUES ");
            statement.push_str(&vec!["(?, ?, ?)"; chunk.len()].join(", "));

            let mut query = sqlx::query(&statement);
            for fp in chunk {
                query = query
                    .bind(i64::from(fp.address))
                    .bind(i64::from(fp.anchor_time_ms))
                    .bind(song_id);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Fetch postings for a batch of addresses.
    ///
    /// One indexed IN query per call; postings whose song row is gone are
    /// filtered out by the join. Callers batch addresses and may check
    /// deadlines between calls.
    pub async fn lookup(&self, addresses: &[u32]) -> Result<HashMap<u32, Vec<Posting>>> {
        let mut hits: HashMap<u32, Vec<Posting>> = HashMap::new();
        if addresses.is_empty() {
            return Ok(hits);
        }

        let mut statement = String::from(
            "SELECT p.address, p.anchor_time_ms, p.song_id
             FROM postings p
             JOIN songs s ON s.id = p.song_id
             WHERE p.address IN (",
        );
        statement.push_str(&vec!["?"; addresses.len()].join(", "));
        statement.push(')');

        let mut query = sqlx::query(&statement);
        for &address in addresses {
            query = query.bind(i64::from(address));
        }

        let rows = query.fetch_all(&self.pool).await?;
        for row in rows {
            let address = row.get::<i64, _>("address") as u32;
            hits.entry(address).or_default().push(Posting {
                song_id: row.get::<i64, _>("song_id"),
                anchor_time_ms: row.get::<i64, _>("anchor_time_ms") as u32,
            });
        }

        Ok(hits)
    }

    pub async fn song_by_id(&self, song_id: i64) -> Result<Option<Song>> {
        let row = sqlx::query(
            "SELECT id, title, artist, external_ref, source_key FROM songs WHERE id = ?",
        )
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Song {
            id: row.get("id"),
            title: row.get("title"),
            artist: row.get("artist"),
            external_ref: row.get("external_ref"),
            source_key: row.get("source_key"),
        }))
    }

    /// Remove a song and its postings in one transaction.
    pub async fn delete_song(&self, song_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM postings WHERE song_id = ?")
            .bind(song_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(song_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete postings that reference a missing song row. Returns the
    /// number removed.
    pub async fn sweep_orphans(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM postings WHERE song_id NOT IN (SELECT id FROM songs)")
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    pub async fn total_songs(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM songs")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn posting_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM postings")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Delete only the song row, leaving its postings orphaned. Exists to
    /// exercise corruption recovery; not part of the normal API surface.
    #[doc(hidden)]
    pub async fn delete_song_row_only(&self, song_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM songs WHERE id = ?")
            .bind(song_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn is_busy(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let message = db.message();
            message.contains("locked") || message.contains("busy")
        }
        _ => false,
    }
}
