/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Hybrid Queue Module
//!
//! [`HybridQueue`] absorbs the impedance mismatch between fast in-memory
//! production/consumption and the durable store, while bounding memory use.
//! Every entry is persisted; when the inflight buffer is enabled and open,
//! a copy of the persisted row is also buffered so consumers can drain it
//! without touching the store.
//!
//! Two gates decide where reads and writes go:
//!
//! - **open for write**: inserts are buffered (as well as persisted). The
//!   gate closes when an insert finds the buffer at capacity; the entry
//!   falls through to the durable path, so writers are never blocked and
//!   nothing is dropped. It reopens once a durable fetch comes back smaller
//!   than the claim limit, i.e. the durable backlog has drained below one
//!   claim window.
//! - **open for read**: the buffer is known to hold a contiguous, gap-free
//!   prefix of the durable ordering, so reads can come from memory. The
//!   queue starts closed for read whenever ready entries already exist on
//!   disk (restart with backlog) and reopens when a durable fetch catches
//!   up with the buffered window.
//!
//! Entries served from memory are returned exactly as they were persisted
//! at insert time; they are not re-read from the store, so their claim
//! metadata (owner, lease, state) still reflects insert time. Entries
//! served from the durable path go through the claim protocol and carry a
//! fresh lease.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::models::{NewQueueEntry, ProcessingState, QueueEntry};
use crate::store::EntryStore;

/// A startup backlog of at least `queue_capacity / REOPEN_THRESHOLD_RATIO`
/// ready entries keeps the write gate closed until the backlog drains.
const REOPEN_THRESHOLD_RATIO: usize = 10;

#[derive(Default)]
struct InflightState {
    buffer: VecDeque<QueueEntry>,
    open_for_read: bool,
    open_for_write: bool,
    total_insert: u64,
    total_inflight_insert: u64,
    total_fetched: u64,
    total_inflight_fetched: u64,
}

enum MemoryRead {
    /// Entries drained from the buffer
    Served(Vec<QueueEntry>),
    /// Reads must go to the durable store
    Durable,
}

/// A durable queue fronted by a bounded in-memory inflight buffer.
///
/// Generic over the [`EntryStore`] so the claim protocol can be exercised
/// against an in-memory store in tests.
pub struct HybridQueue<S: EntryStore> {
    store: S,
    config: QueueConfig,
    clock: Arc<dyn Clock>,
    owner: String,
    reopen_threshold: usize,
    state: Mutex<InflightState>,
}

impl<S: EntryStore> HybridQueue<S> {
    /// Creates a queue over the given store.
    ///
    /// The owner identity (used for leases and sticky claims) is unique per
    /// queue instance.
    pub fn new(store: S, config: QueueConfig, clock: Arc<dyn Clock>) -> Self {
        let owner = format!("{}-{}", config.queue_name, Uuid::new_v4());
        let reopen_threshold = (config.queue_capacity / REOPEN_THRESHOLD_RATIO).max(1);

        Self {
            store,
            config,
            clock,
            owner,
            reopen_threshold,
            state: Mutex::new(InflightState::default()),
        }
    }

    /// Returns this instance's owner identity.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns the store backing this queue.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Probes the store and sets the initial gate positions.
    ///
    /// With no ready entries on disk both gates open. With a backlog the
    /// queue starts in durable mode for reads (ordering would otherwise
    /// skip the backlog), and for writes too if the backlog is already
    /// sizeable.
    pub async fn initialize(&self) -> Result<(), QueueError> {
        if !self.config.use_inflight_queue {
            return Ok(());
        }

        let now = self.clock.now().naive_utc();
        let probe = self
            .store
            .fetch_ready(now, None, self.reopen_threshold as i64)
            .await?;

        let mut state = self.state.lock().unwrap();
        if probe.is_empty() {
            state.open_for_read = true;
            state.open_for_write = true;
        } else {
            state.open_for_read = false;
            state.open_for_write = probe.len() < self.reopen_threshold;
        }

        info!(
            queue_name = %self.config.queue_name,
            backlog = probe.len(),
            open_for_read = state.open_for_read,
            open_for_write = state.open_for_write,
            "queue initialized"
        );
        Ok(())
    }

    /// Persists an entry and, when the write gate is open, buffers it.
    pub async fn insert_entry(&self, entry: NewQueueEntry) -> Result<(), QueueError> {
        let now = self.clock.now().naive_utc();
        let persisted = self.store.insert(entry, now).await?;
        self.track_insert(persisted);
        Ok(())
    }

    /// Persists an entry inside a transaction owned by the caller, so the
    /// enqueue commits or rolls back atomically with the caller's other
    /// writes.
    ///
    /// This never begins, commits or rolls back the transaction, and may be
    /// called several times within one transaction.
    pub fn insert_entry_from_transaction(
        &self,
        tx: &mut S::Tx,
        entry: NewQueueEntry,
    ) -> Result<(), QueueError> {
        let now = self.clock.now().naive_utc();
        let persisted = self.store.insert_in_transaction(tx, entry, now)?;
        self.track_insert(persisted);
        Ok(())
    }

    fn track_insert(&self, persisted: QueueEntry) {
        let mut state = self.state.lock().unwrap();
        state.total_insert += 1;

        // The buffer may only hold claim-eligible entries; a deferred entry
        // waits on disk until its effective date and is picked up by a
        // durable fetch.
        let deferred = persisted.effective_date > persisted.created_date;

        if self.config.use_inflight_queue && state.open_for_write && !deferred {
            if state.buffer.len() < self.config.queue_capacity {
                state.buffer.push_back(persisted);
                state.total_inflight_insert += 1;
            } else {
                // Overflow: the entry stays durable-only and the buffer is
                // no longer a complete prefix, so writes demote to disk
                // until the durable backlog drains.
                state.open_for_write = false;
                debug!(
                    queue_name = %self.config.queue_name,
                    capacity = self.config.queue_capacity,
                    "inflight buffer full, demoting writes to durable mode"
                );
            }
        }
    }

    /// Returns the next batch of ready entries, from memory when the buffer
    /// is a faithful prefix of the durable ordering, otherwise from the
    /// store via the claim protocol.
    pub async fn get_ready_entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let claim_limit = if self.config.is_sticky {
            self.config.max_inflight_entries_claimed
        } else {
            self.config.max_entries_claimed
        };

        if self.config.use_inflight_queue {
            match self.read_from_memory(claim_limit) {
                MemoryRead::Served(entries) => return Ok(entries),
                MemoryRead::Durable => {}
            }
        }

        self.read_from_store(claim_limit).await
    }

    fn read_from_memory(&self, claim_limit: i64) -> MemoryRead {
        let mut state = self.state.lock().unwrap();
        if !state.open_for_read {
            return MemoryRead::Durable;
        }

        if !state.buffer.is_empty() {
            let n = (claim_limit.max(0) as usize).min(state.buffer.len());
            let drained: Vec<QueueEntry> = state.buffer.drain(..n).collect();
            state.total_inflight_fetched += drained.len() as u64;
            state.total_fetched += drained.len() as u64;
            return MemoryRead::Served(drained);
        }

        // Buffer exhausted: anything still unread (overflowed entries,
        // deferred entries now due, other processes' inserts) lives on
        // disk. Reads demote when the buffer stopped being a complete
        // prefix; otherwise the durable fetch below simply comes back
        // empty on an idle queue.
        if !state.open_for_write {
            state.open_for_read = false;
        }
        MemoryRead::Durable
    }

    async fn read_from_store(&self, claim_limit: i64) -> Result<Vec<QueueEntry>, QueueError> {
        let now = self.clock.now().naive_utc();
        let owner_filter = if self.config.is_sticky {
            Some(self.owner.clone())
        } else {
            None
        };

        let prefetched = self
            .store
            .fetch_ready(now, owner_filter, claim_limit)
            .await?;

        if self.config.use_inflight_queue {
            let mut state = self.state.lock().unwrap();

            if (prefetched.len() as i64) < claim_limit && !state.open_for_write {
                // This fetch consumed everything ready on disk, so no entry
                // can be stranded behind the buffer: safe to buffer writes
                // again.
                state.open_for_write = true;
                debug!(
                    queue_name = %self.config.queue_name,
                    "durable backlog drained, promoting writes to the inflight buffer"
                );
            }

            if Self::reconcile_buffer(&mut state, &prefetched) {
                state.open_for_read = true;
                debug!(
                    queue_name = %self.config.queue_name,
                    "durable fetch caught up with the inflight buffer, promoting reads"
                );
            }
        }

        let lease_until = now
            + chrono::Duration::milliseconds(self.config.claimed_time.as_millis() as i64);

        let mut claimed = Vec::with_capacity(prefetched.len());
        for entry in prefetched {
            let affected = self
                .store
                .claim(entry.record_id, self.owner.clone(), now, lease_until)
                .await?;
            if affected == 1 {
                claimed.push(QueueEntry {
                    processing_owner: Some(self.owner.clone()),
                    processing_available_date: Some(lease_until),
                    processing_state: ProcessingState::InProcessing.as_str().to_string(),
                    ..entry
                });
            } else {
                // Lost the race to a concurrent claimant; not an error.
                debug!(
                    queue_name = %self.config.queue_name,
                    record_id = entry.record_id,
                    "entry already claimed elsewhere, skipping"
                );
            }
        }

        let mut state = self.state.lock().unwrap();
        state.total_fetched += claimed.len() as u64;
        Ok(claimed)
    }

    /// Drops every fetched id from the buffer so nothing is served twice
    /// across a mode switch. Returns whether the fetch caught up with the
    /// buffered window: it was empty, or its last row was buffered.
    fn reconcile_buffer(state: &mut InflightState, prefetched: &[QueueEntry]) -> bool {
        if prefetched.is_empty() {
            return true;
        }

        let mut last_found = false;
        for entry in prefetched {
            let found = state
                .buffer
                .iter()
                .position(|buffered| buffered.record_id == entry.record_id);
            if let Some(index) = found {
                state.buffer.remove(index);
            }
            last_found = found.is_some();
        }
        last_found
    }

    /// Writes the entry's terminal row to the history table and removes the
    /// original.
    pub async fn move_entry_to_history(&self, entry: QueueEntry) -> Result<(), QueueError> {
        self.store.move_to_history(entry).await?;
        self.refresh_gates();
        Ok(())
    }

    /// Batch form of [`HybridQueue::move_entry_to_history`].
    pub async fn move_entries_to_history(
        &self,
        entries: Vec<QueueEntry>,
    ) -> Result<(), QueueError> {
        self.store.move_many_to_history(entries).await?;
        self.refresh_gates();
        Ok(())
    }

    fn refresh_gates(&self) {
        let mut state = self.state.lock().unwrap();
        if self.config.use_inflight_queue && state.buffer.len() >= self.config.queue_capacity {
            state.open_for_write = false;
        }
    }

    /// Whether reads are currently served from the inflight buffer.
    pub fn is_queue_open_for_read(&self) -> bool {
        self.state.lock().unwrap().open_for_read
    }

    /// Whether inserts are currently buffered in addition to being persisted.
    pub fn is_queue_open_for_write(&self) -> bool {
        self.state.lock().unwrap().open_for_write
    }

    /// Total entries inserted through this queue instance.
    pub fn total_insert(&self) -> u64 {
        self.state.lock().unwrap().total_insert
    }

    /// Inserted entries that were also buffered.
    pub fn total_inflight_insert(&self) -> u64 {
        self.state.lock().unwrap().total_inflight_insert
    }

    /// Total entries returned by `get_ready_entries`.
    pub fn total_fetched(&self) -> u64 {
        self.state.lock().unwrap().total_fetched
    }

    /// Entries returned from the inflight buffer.
    pub fn total_inflight_fetched(&self) -> u64 {
        self.state.lock().unwrap().total_inflight_fetched
    }
}

impl<S: EntryStore> std::fmt::Debug for HybridQueue<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().unwrap();
        f.debug_struct("HybridQueue")
            .field("queue_name", &self.config.queue_name)
            .field("owner", &self.owner)
            .field("buffered", &state.buffer.len())
            .field("open_for_read", &state.open_for_read)
            .field("open_for_write", &state.open_for_write)
            .finish_non_exhaustive()
    }
}
