//! The synchronization engine: diffs a source playlist against a
//! destination playlist by fingerprint, estimates the quota bill up front,
//! and performs the additive transfer one track at a time so quota
//! consumption stays predictable and partial failures stay countable.

use crate::fingerprint::{self, Fingerprint};
use crate::models::{CostTable, PlaylistSummary, QuotaEstimate, Track, TransferOutcome, TransferPlan};
use async_trait::async_trait;
use log::{debug, info, warn};
use std::collections::HashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// How many per-item failures keep their detail in the outcome; the rest
/// are only counted.
const MAX_DETAILED_ERRORS: usize = 3;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("remote call failed: {0}")]
    Remote(String),
    #[error("authorization rejected by the remote service")]
    Unauthorized,
}

/// The destination service as the engine needs it. Lookups resolve a
/// free-text query to a destination-addressable identifier; adds are
/// independently fallible per item.
#[async_trait]
pub trait DestinationCatalog: Send + Sync {
    async fn search_track(&self, query: &str) -> Result<Option<String>, CatalogError>;

    async fn create_playlist(&self, title: &str, description: &str)
        -> Result<String, CatalogError>;

    async fn add_item(&self, playlist_id: &str, item_id: &str) -> Result<(), CatalogError>;

    async fn playlists(&self) -> Result<Vec<PlaylistSummary>, CatalogError>;

    async fn playlist_items(&self, playlist_id: &str) -> Result<Vec<Track>, CatalogError>;
}

/// One engine instance per run. It owns the lookup cache exclusively;
/// nothing here is shared across runs or threads.
pub struct TransferEngine<D> {
    destination: D,
    cost_table: CostTable,
    lookup_cache: HashMap<String, String>,
}

impl<D: DestinationCatalog> TransferEngine<D> {
    pub fn new(destination: D) -> Self {
        Self::with_cost_table(destination, CostTable::default())
    }

    pub fn with_cost_table(destination: D, cost_table: CostTable) -> Self {
        Self {
            destination,
            cost_table,
            lookup_cache: HashMap::new(),
        }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    /// Computes the pending subset: source tracks whose fingerprint is
    /// absent from the destination, in source order. Pure, so re-running it
    /// after a transfer converges on an empty plan.
    pub fn plan(source: &[Track], destination: &[Track]) -> TransferPlan {
        let existing = fingerprint::build_set(destination);
        let pending: Vec<Track> = source
            .iter()
            .filter(|track| !existing.contains(&Fingerprint::of(track)))
            .cloned()
            .collect();

        debug!(
            "planned transfer: {} of {} source tracks missing from {} destination tracks",
            pending.len(),
            source.len(),
            destination.len()
        );

        TransferPlan {
            pending,
            source_total: source.len(),
            destination_total: destination.len(),
        }
    }

    /// Pure arithmetic: one search and one add per pending item, plus the
    /// fixed creation cost when a destination playlist must be created.
    pub fn estimate_quota(&self, pending_count: usize, include_create: bool) -> QuotaEstimate {
        let table = &self.cost_table;
        let pending = pending_count as u64;

        let search_cost = pending * table.search;
        let add_cost = pending * table.add;
        let create_cost = if include_create { table.create } else { 0 };
        let total = search_cost + add_cost + create_cost;

        let per_item = table.search + table.add;
        let fixed = if include_create { table.create } else { 0 };
        let max_safe_items = if per_item == 0 {
            0
        } else {
            table.ceiling.saturating_sub(fixed) / per_item
        };

        QuotaEstimate {
            search_cost,
            create_cost,
            add_cost,
            total,
            ceiling: table.ceiling,
            exceeds: total > table.ceiling,
            max_safe_items,
        }
    }

    /// Transfers the pending tracks one at a time, in source order. A
    /// failed lookup or add is counted and the run moves on; nothing is
    /// retried within the run, because re-invoking the whole sync later is
    /// the retry mechanism and the plan re-detects what already landed.
    /// The cancellation token is checked once per item, so a cancelled run
    /// stops cleanly between adds.
    pub async fn execute(
        &mut self,
        plan: &TransferPlan,
        playlist_id: &str,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let mut outcome = TransferOutcome::default();
        let total = plan.pending.len();

        for (index, track) in plan.pending.iter().enumerate() {
            if cancel.is_cancelled() {
                warn!(
                    "transfer cancelled after {} of {} tracks; already-added tracks stay in place",
                    index, total
                );
                outcome.cancelled = true;
                break;
            }

            let item_id = match self.lookup(track).await {
                Ok(Some(id)) => {
                    outcome.matched += 1;
                    id
                }
                Ok(None) => {
                    outcome.lookup_failed += 1;
                    record_error(
                        &mut outcome,
                        format!("[{}/{}] {}: no match found", index + 1, total, track),
                    );
                    continue;
                }
                Err(e) => {
                    outcome.lookup_failed += 1;
                    record_error(
                        &mut outcome,
                        format!("[{}/{}] {}: lookup failed: {}", index + 1, total, track, e),
                    );
                    continue;
                }
            };

            match self.destination.add_item(playlist_id, &item_id).await {
                Ok(()) => {
                    outcome.added += 1;
                    debug!("[{}/{}] added {}", index + 1, total, track);
                }
                Err(e) => {
                    outcome.add_failed += 1;
                    record_error(
                        &mut outcome,
                        format!("[{}/{}] {}: add failed: {}", index + 1, total, track, e),
                    );
                }
            }
        }

        info!("transfer finished: {}", outcome);
        outcome
    }

    /// Duplicate track entries within one playlist resolve to the same
    /// normalized query, so the second occurrence is served from memory
    /// instead of spending another search against the quota.
    async fn lookup(&mut self, track: &Track) -> Result<Option<String>, CatalogError> {
        let query = track.search_query();
        let cache_key = query.trim().to_lowercase();

        if let Some(id) = self.lookup_cache.get(&cache_key) {
            debug!("lookup cache hit for {}", track);
            return Ok(Some(id.clone()));
        }

        let resolved = self.destination.search_track(&query).await?;
        if let Some(id) = &resolved {
            self.lookup_cache.insert(cache_key, id.clone());
        }
        Ok(resolved)
    }
}

fn record_error(outcome: &mut TransferOutcome, message: String) {
    if outcome.errors.len() < MAX_DETAILED_ERRORS {
        outcome.errors.push(message);
    }
}
