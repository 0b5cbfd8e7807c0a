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

//! Entry store contract.
//!
//! The hybrid queue talks to durable storage exclusively through
//! [`EntryStore`]. The contract is the claim protocol: `fetch_ready` is a
//! plain read, and exclusivity comes from `claim`, a conditional update that
//! succeeds for exactly one of any set of concurrent claimants. The SQL
//! implementation lives in the `dal` module; tests substitute an in-memory
//! store.
//!
//! Multiple workers, possibly across processes, race for the same rows; a
//! caller must treat a claim count of 0 as "someone else got there first",
//! not as an error.

use async_trait::async_trait;
use chrono::NaiveDateTime;

use crate::error::QueueError;
use crate::models::{NewQueueEntry, QueueEntry};

/// Durable storage operations for one logical queue.
///
/// `Tx` is the handle for enlisting an insert in a caller-owned transaction;
/// for the SQL store it is the raw connection inside `Connection::transaction`.
#[async_trait]
pub trait EntryStore: Send + Sync + 'static {
    /// Caller-owned transaction handle accepted by [`EntryStore::insert_in_transaction`].
    type Tx;

    /// Persists an entry and returns the stored row with its assigned
    /// `record_id`.
    async fn insert(&self, entry: NewQueueEntry, now: NaiveDateTime)
        -> Result<QueueEntry, QueueError>;

    /// Persists an entry inside a transaction owned by the caller.
    ///
    /// Never begins, commits or rolls back the transaction, and may be
    /// called several times within the same transaction.
    fn insert_in_transaction(
        &self,
        tx: &mut Self::Tx,
        entry: NewQueueEntry,
        now: NaiveDateTime,
    ) -> Result<QueueEntry, QueueError>;

    /// Persists a batch of entries within a single transaction.
    async fn insert_many(
        &self,
        entries: Vec<NewQueueEntry>,
        now: NaiveDateTime,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    /// Returns ready entries ordered by `record_id` ascending, capped at
    /// `limit`.
    ///
    /// An entry is ready when its effective date has passed and it is either
    /// `AVAILABLE` (unowned or, when `owner_filter` is set, owned by that
    /// owner) or `IN_PROCESSING` with an expired lease — expired leases are
    /// reclaimable regardless of any owner filter. This is a plain read and
    /// claims nothing.
    async fn fetch_ready(
        &self,
        now: NaiveDateTime,
        owner_filter: Option<String>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    /// Returns live entries by id, ordered by `record_id` ascending.
    async fn fetch_by_ids(&self, record_ids: Vec<i64>) -> Result<Vec<QueueEntry>, QueueError>;

    /// Conditionally leases an entry to `owner` until `lease_until`.
    ///
    /// The update applies only if the row is still claimable (`AVAILABLE` or
    /// expired-`IN_PROCESSING`, effective date passed). Returns the number
    /// of rows affected: 0 or 1.
    async fn claim(
        &self,
        record_id: i64,
        owner: String,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> Result<usize, QueueError>;

    /// Writes the entry (already stamped with its terminal state) to the
    /// history table and deletes the original. Idempotent at row identity.
    async fn move_to_history(&self, entry: QueueEntry) -> Result<(), QueueError>;

    /// Batch form of [`EntryStore::move_to_history`], one transaction.
    async fn move_many_to_history(&self, entries: Vec<QueueEntry>) -> Result<(), QueueError>;

    /// Deletes an entry without writing a history row. Idempotent.
    async fn remove(&self, record_id: i64) -> Result<(), QueueError>;

    /// Returns history entries by id, ordered by `record_id` ascending.
    async fn fetch_history_by_ids(
        &self,
        record_ids: Vec<i64>,
    ) -> Result<Vec<QueueEntry>, QueueError>;
}

/// Delegating impl so one store (e.g. a shared DAL) can back several queue
/// instances.
#[async_trait]
impl<S: EntryStore> EntryStore for std::sync::Arc<S> {
    type Tx = S::Tx;

    async fn insert(
        &self,
        entry: NewQueueEntry,
        now: NaiveDateTime,
    ) -> Result<QueueEntry, QueueError> {
        (**self).insert(entry, now).await
    }

    fn insert_in_transaction(
        &self,
        tx: &mut Self::Tx,
        entry: NewQueueEntry,
        now: NaiveDateTime,
    ) -> Result<QueueEntry, QueueError> {
        (**self).insert_in_transaction(tx, entry, now)
    }

    async fn insert_many(
        &self,
        entries: Vec<NewQueueEntry>,
        now: NaiveDateTime,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).insert_many(entries, now).await
    }

    async fn fetch_ready(
        &self,
        now: NaiveDateTime,
        owner_filter: Option<String>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).fetch_ready(now, owner_filter, limit).await
    }

    async fn fetch_by_ids(&self, record_ids: Vec<i64>) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).fetch_by_ids(record_ids).await
    }

    async fn claim(
        &self,
        record_id: i64,
        owner: String,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> Result<usize, QueueError> {
        (**self).claim(record_id, owner, now, lease_until).await
    }

    async fn move_to_history(&self, entry: QueueEntry) -> Result<(), QueueError> {
        (**self).move_to_history(entry).await
    }

    async fn move_many_to_history(&self, entries: Vec<QueueEntry>) -> Result<(), QueueError> {
        (**self).move_many_to_history(entries).await
    }

    async fn remove(&self, record_id: i64) -> Result<(), QueueError> {
        (**self).remove(record_id).await
    }

    async fn fetch_history_by_ids(
        &self,
        record_ids: Vec<i64>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        (**self).fetch_history_by_ids(record_ids).await
    }
}
