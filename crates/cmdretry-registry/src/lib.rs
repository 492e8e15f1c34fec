//! Module C: the in-memory request registry (spec §4.C).
//!
//! A read/write-locked mapping from `resource_id` to an ordered,
//! append-on-insert list of live [`ScheduledRequest`]s, kept sorted by
//! `scheduled_at` on insert per §9's recommendation (`O(log n + k)` window
//! queries instead of `O(n)`).

use cmdretry_scheduler::{can_schedule, next_slot, RateLimit, SearchConfig, SlotOutcome, WallClock};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

#[cfg(feature = "tracing")]
use tracing::debug;

/// A single committed future event that counts against a resource's rate
/// limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRequest {
    /// Unique (per `resource_id`) identifier for this commitment.
    pub id: String,
    /// The rate-limited resource this commitment counts against.
    pub resource_id: String,
    /// The wall-clock instant the commitment is scheduled for.
    pub scheduled_at: WallClock,
    /// When this commitment stops being live.
    pub expires_at: WallClock,
}

/// Errors the registry can return. All surfaced as `register_response` per
/// §7's error table; no partial registration ever occurs.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    /// An entry in a batch had an empty `id`.
    #[error("entry has an empty id")]
    EmptyId,
    /// `expires_at` did not exceed `scheduled_at`.
    #[error("entry {id} has expires_at <= scheduled_at")]
    InvalidExpiry {
        /// The offending entry's id.
        id: String,
    },
    /// Two entries in the registry (existing or within the same batch)
    /// share an id for the same `resource_id`.
    #[error("duplicate id {id} for resource {resource_id}")]
    DuplicateId {
        /// The offending id.
        id: String,
        /// The resource it collided within.
        resource_id: String,
    },
}

/// The in-memory commitment registry.
#[derive(Default)]
pub struct Registry {
    resources: RwLock<HashMap<String, Vec<ScheduledRequest>>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn validate_entry(entry: &ScheduledRequest) -> Result<(), RegistryError> {
        if entry.id.is_empty() {
            return Err(RegistryError::EmptyId);
        }
        if entry.expires_at <= entry.scheduled_at {
            return Err(RegistryError::InvalidExpiry {
                id: entry.id.clone(),
            });
        }
        Ok(())
    }

    /// Adds a single commitment. Rejects a duplicate `id` within the same
    /// `resource_id`.
    pub async fn add(&self, entry: ScheduledRequest) -> Result<(), RegistryError> {
        self.add_batch(vec![entry]).await
    }

    /// Adds a batch of commitments, all-or-nothing: either every entry is
    /// accepted, or none are (invariant 2 in spec §8).
    pub async fn add_batch(&self, entries: Vec<ScheduledRequest>) -> Result<(), RegistryError> {
        for entry in &entries {
            Self::validate_entry(entry)?;
        }

        // Reject duplicates within the batch itself.
        for i in 0..entries.len() {
            for j in (i + 1)..entries.len() {
                if entries[i].resource_id == entries[j].resource_id && entries[i].id == entries[j].id {
                    return Err(RegistryError::DuplicateId {
                        id: entries[i].id.clone(),
                        resource_id: entries[i].resource_id.clone(),
                    });
                }
            }
        }

        let mut resources = self.resources.write().await;
        for entry in &entries {
            if let Some(existing) = resources.get(&entry.resource_id) {
                if existing.iter().any(|e| e.id == entry.id) {
                    return Err(RegistryError::DuplicateId {
                        id: entry.id.clone(),
                        resource_id: entry.resource_id.clone(),
                    });
                }
            }
        }

        for entry in entries {
            let list = resources.entry(entry.resource_id.clone()).or_default();
            let position = list
                .binary_search_by(|existing| existing.scheduled_at.cmp(&entry.scheduled_at))
                .unwrap_or_else(|pos| pos);
            list.insert(position, entry);
        }

        #[cfg(feature = "tracing")]
        debug!("registry batch accepted");

        Ok(())
    }

    /// Returns the live (non-expired) commitments for `resource_id`.
    pub async fn active(&self, resource_id: &str) -> Vec<ScheduledRequest> {
        let now = WallClock::now();
        let resources = self.resources.read().await;
        resources
            .get(resource_id)
            .map(|list| {
                list.iter()
                    .filter(|e| e.expires_at > now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Removes expired entries from every resource in a single exclusive-lock
    /// pass.
    pub async fn purge_expired(&self) {
        let now = WallClock::now();
        let mut resources = self.resources.write().await;
        for list in resources.values_mut() {
            list.retain(|e| e.expires_at > now);
        }
        resources.retain(|_, list| !list.is_empty());
    }

    /// Delegates to [`cmdretry_scheduler::can_schedule`] using the active
    /// commitment instants for `resource_id`.
    pub async fn can_schedule_with_strategy(
        &self,
        resource_id: &str,
        candidate: WallClock,
        rate_limit: RateLimit,
        retry_offsets: &[Duration],
    ) -> bool {
        let active = self.active(resource_id).await;
        let instants: Vec<WallClock> = active.iter().map(|e| e.scheduled_at).collect();
        can_schedule(&instants, candidate, rate_limit, retry_offsets)
    }

    /// Delegates to [`cmdretry_scheduler::next_slot`] using the active
    /// commitment instants for `resource_id`.
    pub async fn next_slot_with_strategy(
        &self,
        resource_id: &str,
        preferred: WallClock,
        rate_limit: RateLimit,
        retry_offsets: &[Duration],
        config: SearchConfig,
    ) -> SlotOutcome {
        let active = self.active(resource_id).await;
        let instants: Vec<WallClock> = active.iter().map(|e| e.scheduled_at).collect();
        next_slot(&instants, preferred, rate_limit, retry_offsets, config)
    }
}
