//! Eviction and registry/index reconciliation
//!
//! Runs at most once per cleanup interval, guarded by the `last_cleanup`
//! stamp in the registry. Expired entries leave both the registry and the
//! index; registry entries with no live index record are dropped. The
//! inverse (index record with no registry entry) is reported but never
//! auto-removed: the index is authoritative on identity.

use std::collections::BTreeSet;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::pipeline::OpportunityIngestor;
use crate::IngestError;

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// True when the daily guard suppressed the run.
    pub skipped: bool,
    pub expired_removed: usize,
    pub orphans_dropped: Vec<String>,
    /// Ids present in the index but missing from the registry. Reported
    /// only; the index wins.
    pub index_only: Vec<String>,
}

impl OpportunityIngestor {
    /// Expire and reconcile. `force` bypasses the interval guard.
    pub fn run_cleanup(&mut self, force: bool) -> Result<CleanupReport, IngestError> {
        let now = Utc::now();

        if !force {
            if let Some(last) = self.registry.last_cleanup() {
                if now - last < Duration::hours(self.config.cleanup_interval_hours) {
                    return Ok(CleanupReport {
                        skipped: true,
                        ..Default::default()
                    });
                }
            }
        }

        let today = now.date_naive();

        // Expire: registry entries whose absolute deadline has passed
        let expired_ids: Vec<String> = self
            .registry
            .entries()
            .filter(|(_, entry)| entry.expiration_date.is_some_and(|d| d < today))
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired_ids {
            // Best-effort index delete; a degraded collection does not stop
            // registry cleanup
            let outcome = self.index.opportunities.delete(std::slice::from_ref(id));
            if outcome.is_degraded() {
                warn!(%id, "index delete skipped, opportunities collection degraded");
            }
            self.registry.remove(id);
        }

        // Reconcile: registry keys with no live index record
        let live: BTreeSet<String> = self.index.opportunities.ids().into_iter().collect();
        let orphans: Vec<String> = self
            .registry
            .ids()
            .into_iter()
            .filter(|id| !live.contains(id))
            .collect();

        for id in &orphans {
            self.registry.remove(id);
        }

        let registered: BTreeSet<String> = self.registry.ids().into_iter().collect();
        let index_only: Vec<String> = live
            .iter()
            .filter(|id| !registered.contains(*id))
            .cloned()
            .collect();

        if !index_only.is_empty() {
            warn!(
                count = index_only.len(),
                "ids present in index but not in registry; leaving in place"
            );
        }

        self.registry.set_last_cleanup(now);
        self.registry.save()?;

        info!(
            expired = expired_ids.len(),
            orphans = orphans.len(),
            index_only = index_only.len(),
            "cleanup pass complete"
        );

        Ok(CleanupReport {
            skipped: false,
            expired_removed: expired_ids.len(),
            orphans_dropped: orphans,
            index_only,
        })
    }
}
