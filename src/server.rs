//! HTTP surface of the identification service.
//!
//! A query uploads audio and receives the ranked match list. The DSP
//! pipeline runs on the blocking pool so the reactor stays responsive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;

use crate::config::AnalysisParams;
use crate::matcher::{self, Match};
use crate::store::Database;
use crate::{decode, dsp};

/// Soft deadline for a single identification query.
const QUERY_DEADLINE: Duration = Duration::from_secs(10);

/// Presentation cap on the ranked list.
pub const TOP_MATCHES: usize = 20;

pub struct AppState {
    pub db: Database,
    pub params: AnalysisParams,
}

#[derive(Serialize)]
struct IdentifyResponse {
    matches: Vec<Match>,
}

#[derive(Serialize)]
struct StatsResponse {
    total_songs: i64,
    total_postings: i64,
}

#[derive(Serialize)]
struct SweepResponse {
    removed: u64,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/identify", post(identify))
        .route("/sweep", post(sweep))
        .route("/stats", get(stats))
        .route("/health", get(|| async { "healthy" }))
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<AppState>, port: u16) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

/// Accept a multipart upload (field `file`) and identify it.
async fn identify(
    State(state): State<Arc<AppState>>,
    mut upload: Multipart,
) -> Result<Json<IdentifyResponse>, StatusCode> {
    let mut audio_bytes = Vec::new();

    while let Some(field) = upload
        .next_field()
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?
    {
        if field.name() == Some("file") {
            audio_bytes = field
                .bytes()
                .await
                .map_err(|_| StatusCode::BAD_REQUEST)?
                .to_vec();
        }
    }
    if audio_bytes.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let params = state.params;
    let query = tokio::task::spawn_blocking(move || {
        let (samples, source_rate) = decode::load_bytes(&audio_bytes, None)?;
        let fingerprints = dsp::fingerprint_samples(&samples, source_rate, &params)?;
        Ok::<_, crate::error::Error>(dsp::fold_query(&fingerprints))
    })
    .await
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
    .map_err(|e| {
        tracing::warn!(error = %e, "rejected query audio");
        StatusCode::UNPROCESSABLE_ENTITY
    })?;

    let deadline = Instant::now() + QUERY_DEADLINE;
    let mut matches = matcher::find_matches(&state.db, &query, Some(deadline))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "match lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    matches.truncate(TOP_MATCHES);

    Ok(Json(IdentifyResponse { matches }))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<Json<StatsResponse>, StatusCode> {
    let total_songs = state
        .db
        .total_songs()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let total_postings = state
        .db
        .posting_count()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(StatsResponse {
        total_songs,
        total_postings,
    }))
}

/// Administrative orphan sweep.
async fn sweep(State(state): State<Arc<AppState>>) -> Result<Json<SweepResponse>, StatusCode> {
    let removed = state.db.sweep_orphans().await.map_err(|e| {
        tracing::error!(error = %e, "sweep failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    tracing::info!(removed, "orphan sweep complete");
    Ok(Json(SweepResponse { removed }))
}
