//! Dedup/Escalation Store: window-indexed map of live alert groups
//!
//! Plain owned state; callers serialize access (the pipeline wraps it in a
//! mutex so one event's lookup, hit and decision form one critical section).
//! Snapshots are written as JSON for restart persistence.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::state::{AlertGroup, GroupKey};
use crate::config::TierDurations;
use crate::error::{StoreError, StoreResult};
use crate::event::LevelTier;

/// Current snapshot schema version. Bump on incompatible changes.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Shared reference to an AlertStore
pub type SharedAlertStore = Arc<Mutex<AlertStore>>;

/// Serialized form of the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub schema_version: u32,
    pub saved_at: DateTime<Utc>,
    pub groups: Vec<AlertGroup>,
}

/// Keyed, time-windowed alert group state.
#[derive(Debug, Clone)]
pub struct AlertStore {
    groups: HashMap<GroupKey, AlertGroup>,
    ring_capacity: usize,
}

impl AlertStore {
    /// Empty store whose new groups keep `ring_capacity` recent events.
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            groups: HashMap::new(),
            ring_capacity: ring_capacity.max(1),
        }
    }

    /// Create a shared reference to this store
    pub fn shared(self) -> SharedAlertStore {
        Arc::new(Mutex::new(self))
    }

    /// Return the live group for `key`, replacing it with a fresh one when
    /// its own window has elapsed at `now` (or when none exists). A fresh
    /// group lives under `tier`; a live group keeps the tier it was created
    /// with, whatever the level of the event now landing in it.
    pub fn lookup_or_create(
        &mut self,
        key: &GroupKey,
        now: DateTime<Utc>,
        tier: LevelTier,
        windows: &TierDurations,
    ) -> &mut AlertGroup {
        let capacity = self.ring_capacity;
        let fresh = || AlertGroup::new(key.clone(), now, capacity).with_window_tier(tier);
        let group = self.groups.entry(key.clone()).or_insert_with(fresh);

        if group.window_elapsed(now, windows) {
            debug!(
                key = %key,
                hits = group.hit_count,
                tier = ?group.window_tier,
                "Alert group window elapsed, starting a new one"
            );
            *group = fresh();
        }
        group
    }

    /// Read-only view of a group, live or not.
    pub fn get(&self, key: &GroupKey) -> Option<&AlertGroup> {
        self.groups.get(key)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn ring_capacity(&self) -> usize {
        self.ring_capacity
    }

    /// Iterate all tracked groups in no particular order.
    pub fn groups(&self) -> impl Iterator<Item = &AlertGroup> {
        self.groups.values()
    }

    /// Evict groups whose own window has elapsed. Returns how many were
    /// dropped.
    pub fn prune_expired(&mut self, now: DateTime<Utc>, windows: &TierDurations) -> usize {
        let before = self.groups.len();
        self.groups.retain(|_, g| !g.window_elapsed(now, windows));
        let pruned = before - self.groups.len();
        if pruned > 0 {
            debug!(pruned, remaining = self.groups.len(), "Pruned expired alert groups");
        }
        pruned
    }

    /// Capture the current state.
    pub fn snapshot(&self, now: DateTime<Utc>) -> StoreSnapshot {
        let mut groups: Vec<AlertGroup> = self.groups.values().cloned().collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        StoreSnapshot {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            saved_at: now,
            groups,
        }
    }

    /// Rebuild a store from a snapshot, dropping groups already expired at
    /// `now` and re-bounding rings to `ring_capacity`.
    pub fn from_snapshot(
        snapshot: StoreSnapshot,
        ring_capacity: usize,
        now: DateTime<Utc>,
        windows: &TierDurations,
    ) -> StoreResult<Self> {
        if snapshot.schema_version != SNAPSHOT_SCHEMA_VERSION {
            return Err(StoreError::SchemaVersion {
                found: snapshot.schema_version,
                expected: SNAPSHOT_SCHEMA_VERSION,
            });
        }

        let mut store = Self::new(ring_capacity);
        for mut group in snapshot.groups {
            if group.window_elapsed(now, windows) {
                continue;
            }
            group.set_capacity(store.ring_capacity);
            store.groups.insert(group.key.clone(), group);
        }
        Ok(store)
    }

    /// Write a snapshot to `path` atomically (temp file + rename).
    pub fn save(&self, path: &Path, now: DateTime<Utc>) -> StoreResult<()> {
        let json = serde_json::to_string_pretty(&self.snapshot(now))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), groups = self.groups.len(), "Alert store saved");
        Ok(())
    }

    /// Load a snapshot from `path`. A missing file yields an empty store.
    pub fn load(
        path: &Path,
        ring_capacity: usize,
        now: DateTime<Utc>,
        windows: &TierDurations,
    ) -> StoreResult<Self> {
        if !path.exists() {
            return Ok(Self::new(ring_capacity));
        }

        let json = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let snapshot: StoreSnapshot = serde_json::from_str(&json)?;
        let total = snapshot.groups.len();
        let store = Self::from_snapshot(snapshot, ring_capacity, now, windows)?;
        info!(
            path = %path.display(),
            live = store.len(),
            expired = total - store.len(),
            "Alert store restored"
        );
        Ok(store)
    }
}
