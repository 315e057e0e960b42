//! Route handlers.
//!
//! Store calls are synchronous SQLite work, so each one runs on the blocking
//! pool via [`tokio::task::spawn_blocking`] and never on a runtime worker.

use super::error::ApiError;
use axum::Json;
use axum::extract::{Path, Query, State};
use relatedness::{
    AdmissionQueue, BatchSet, DistanceStore, InsertReport, LeaseId, NearestNeighbor,
    NeighborQuery, NeighborTracker, QueueConfig, SqliteLeaseQueue, Species, Store,
    parse_comparisons, parse_guid_list,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a handler needs, cloned per request.
#[derive(Debug, Clone)]
pub struct AppState {
    queue: SqliteLeaseQueue,
    batch: BatchSet,
    distances: DistanceStore,
    neighbors: NeighborTracker,
}

impl AppState {
    pub fn new(store: Store, queue: QueueConfig) -> Self {
        Self {
            queue: SqliteLeaseQueue::new(store.clone(), queue),
            batch: BatchSet::new(store.clone()),
            distances: DistanceStore::new(store.clone()),
            neighbors: NeighborTracker::new(store),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockResponse {
    /// `null` when the sample was batched, or when the queue is empty.
    pub lock: Option<LeaseId>,
}

#[derive(Debug, Deserialize)]
pub struct ClearLockParams {
    pub lock: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearedResponse {
    pub cleared: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct NeighboursResponse {
    /// `null` for a QC-failed sample.
    pub distances: Option<BTreeMap<String, i64>>,
    #[serde(rename = "QC")]
    pub qc: String,
}

async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> relatedness::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Requests a lease for `guid`, batching it if the queue is full.
pub async fn check_lock(
    State(state): State<AppState>,
    Path((species, guid)): Path<(String, String)>,
) -> Result<Json<LockResponse>, ApiError> {
    let species = Species::new(species)?;
    let admission = blocking(move || state.queue.acquire(&species, &guid)).await?;
    Ok(Json(LockResponse {
        lock: admission.lease(),
    }))
}

pub async fn next_lock(
    State(state): State<AppState>,
    Path(species): Path<String>,
) -> Result<Json<LockResponse>, ApiError> {
    let species = Species::new(species)?;
    let lock = blocking(move || state.queue.peek_next(&species)).await?;
    Ok(Json(LockResponse { lock }))
}

/// Releases a lease. Unknown leases are ignored.
pub async fn clear_lock(
    State(state): State<AppState>,
    Path(species): Path<String>,
    Query(params): Query<ClearLockParams>,
) -> Result<Json<LockResponse>, ApiError> {
    let species = Species::new(species)?;
    let lease = LeaseId::new(params.lock);
    blocking(move || state.queue.release(&species, lease)).await?;
    Ok(Json(LockResponse { lock: None }))
}

pub async fn get_batch(
    State(state): State<AppState>,
    Path(species): Path<String>,
) -> Result<Json<BatchResponse>, ApiError> {
    let species = Species::new(species)?;
    let batch = blocking(move || state.batch.list(&species)).await?;
    Ok(Json(BatchResponse { batch }))
}

/// Removes the guids listed one per line in the body.
pub async fn clear_batch(
    State(state): State<AppState>,
    Path(species): Path<String>,
    body: String,
) -> Result<Json<ClearedResponse>, ApiError> {
    let species = Species::new(species)?;
    let guids = parse_guid_list(&body);
    let cleared = blocking(move || state.batch.clear(&species, guids)).await?;
    Ok(Json(ClearedResponse { cleared }))
}

/// Stores `a b dist` lines from the body.
pub async fn add_distances(
    State(state): State<AppState>,
    Path(species): Path<String>,
    body: String,
) -> Result<Json<InsertReport>, ApiError> {
    let species = Species::new(species)?;
    let comparisons = parse_comparisons(&body)?;
    let report = blocking(move || state.distances.insert_many(&species, &comparisons)).await?;
    Ok(Json(report))
}

pub async fn neighbours(
    State(state): State<AppState>,
    Path((species, guid)): Path<(String, String)>,
) -> Result<Json<NeighboursResponse>, ApiError> {
    let species = Species::new(species)?;
    let lookup = guid.clone();
    let query = blocking(move || state.distances.query_neighbors(&species, &lookup)).await?;
    let response = match query {
        NeighborQuery::NotFound => return Err(ApiError::NotFound(guid)),
        NeighborQuery::QcFail => NeighboursResponse {
            distances: None,
            qc: "FAIL".to_string(),
        },
        NeighborQuery::Found(distances) => NeighboursResponse {
            distances: Some(distances),
            qc: "PASS".to_string(),
        },
    };
    Ok(Json(response))
}

pub async fn nearest(
    State(state): State<AppState>,
    Path((species, guid)): Path<(String, String)>,
) -> Result<Json<NearestNeighbor>, ApiError> {
    let species = Species::new(species)?;
    let lookup = guid.clone();
    blocking(move || state.neighbors.nearest(&species, &lookup))
        .await?
        .map(Json)
        .ok_or(ApiError::NotFound(guid))
}
