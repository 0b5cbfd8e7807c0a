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

//! Queue entry DAL: the SQL implementation of the entry-store contract.
//!
//! Async methods check a connection out of the pool and run the synchronous
//! query cores through `interact`. The insert core also backs
//! `insert_in_transaction`, where the caller owns the surrounding
//! transaction; it never opens or closes one itself.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::database::schema::{queue_entries, queue_entries_history};
use crate::database::{AnyConnection, Database};
use crate::error::QueueError;
use crate::models::{
    NewQueueEntry, NewQueueEntryRow, ProcessingState, QueueEntry, QueueEntryHistoryRow,
};
use crate::store::EntryStore;

#[derive(QueryableByName)]
struct LastInsertRowId {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    record_id: i64,
}

/// Data access for one logical queue's entries and history.
#[derive(Clone, Debug)]
pub struct QueueEntryDal {
    database: Database,
    queue_name: String,
}

impl QueueEntryDal {
    /// Creates a DAL handle for the given logical queue.
    pub fn new(database: Database, queue_name: &str) -> Self {
        Self {
            database,
            queue_name: queue_name.to_string(),
        }
    }

    /// Returns the logical queue name this handle serves.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    fn insert_core(
        conn: &mut AnyConnection,
        queue_name: &str,
        entry: NewQueueEntry,
        now: NaiveDateTime,
    ) -> Result<QueueEntry, QueueError> {
        let row = NewQueueEntryRow::from_entry(queue_name, entry, now);

        // Identity retrieval is the one backend-specific step: PostgreSQL
        // returns it from the insert, SQLite exposes last_insert_rowid().
        let record_id = match conn {
            AnyConnection::Postgres(conn) => diesel::insert_into(queue_entries::table)
                .values(&row)
                .returning(queue_entries::record_id)
                .get_result::<i64>(conn)?,
            AnyConnection::Sqlite(conn) => {
                diesel::insert_into(queue_entries::table)
                    .values(&row)
                    .execute(conn)?;
                diesel::sql_query("SELECT last_insert_rowid() AS record_id")
                    .get_result::<LastInsertRowId>(conn)?
                    .record_id
            }
        };

        Ok(QueueEntry {
            record_id,
            queue_name: row.queue_name,
            class_name: row.class_name,
            event_json: row.event_json,
            user_token: row.user_token,
            future_user_token: row.future_user_token,
            created_date: row.created_date,
            effective_date: row.effective_date,
            search_key1: row.search_key1,
            search_key2: row.search_key2,
            processing_owner: row.processing_owner,
            processing_available_date: row.processing_available_date,
            processing_state: row.processing_state,
        })
    }

    fn fetch_ready_core(
        conn: &mut AnyConnection,
        queue_name: &str,
        now: NaiveDateTime,
        owner_filter: Option<&str>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let available = ProcessingState::Available.as_str();
        let in_processing = ProcessingState::InProcessing.as_str();
        let limit = limit.max(0);

        // Expired leases are claimable by anyone, so the owner filter only
        // narrows the AVAILABLE arm.
        let rows = match owner_filter {
            Some(owner) => queue_entries::table
                .filter(queue_entries::queue_name.eq(queue_name))
                .filter(queue_entries::effective_date.le(now))
                .filter(
                    queue_entries::processing_state
                        .eq(available)
                        .and(
                            queue_entries::processing_owner
                                .is_null()
                                .or(queue_entries::processing_owner.eq(owner)),
                        )
                        .or(queue_entries::processing_state
                            .eq(in_processing)
                            .and(queue_entries::processing_available_date.le(now))),
                )
                .order(queue_entries::record_id.asc())
                .limit(limit)
                .load::<QueueEntry>(conn)?,
            None => queue_entries::table
                .filter(queue_entries::queue_name.eq(queue_name))
                .filter(queue_entries::effective_date.le(now))
                .filter(
                    queue_entries::processing_state.eq(available).or(
                        queue_entries::processing_state
                            .eq(in_processing)
                            .and(queue_entries::processing_available_date.le(now)),
                    ),
                )
                .order(queue_entries::record_id.asc())
                .limit(limit)
                .load::<QueueEntry>(conn)?,
        };

        Ok(rows)
    }

    fn claim_core(
        conn: &mut AnyConnection,
        record_id: i64,
        owner: &str,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> Result<usize, QueueError> {
        let available = ProcessingState::Available.as_str();
        let in_processing = ProcessingState::InProcessing.as_str();

        // Conditional update: succeeds only while the row is still
        // claimable, so exactly one of any set of racing claimants wins.
        let updated = diesel::update(
            queue_entries::table
                .filter(queue_entries::record_id.eq(record_id))
                .filter(queue_entries::effective_date.le(now))
                .filter(
                    queue_entries::processing_state.eq(available).or(
                        queue_entries::processing_state
                            .eq(in_processing)
                            .and(queue_entries::processing_available_date.le(now)),
                    ),
                ),
        )
        .set((
            queue_entries::processing_owner.eq(owner),
            queue_entries::processing_available_date.eq(lease_until),
            queue_entries::processing_state.eq(in_processing),
        ))
        .execute(conn)?;

        Ok(updated)
    }

    fn move_to_history_core(
        conn: &mut AnyConnection,
        entry: QueueEntry,
    ) -> Result<(), QueueError> {
        let record_id = entry.record_id;
        let history: QueueEntryHistoryRow = entry.into();

        // Idempotent at row identity: a replayed move finds the history row
        // already present and nothing left to delete.
        let already_archived: i64 = queue_entries_history::table
            .filter(queue_entries_history::record_id.eq(record_id))
            .count()
            .get_result(conn)?;
        if already_archived == 0 {
            diesel::insert_into(queue_entries_history::table)
                .values(&history)
                .execute(conn)?;
        }

        diesel::delete(queue_entries::table.filter(queue_entries::record_id.eq(record_id)))
            .execute(conn)?;

        Ok(())
    }

    fn fetch_by_ids_core(
        conn: &mut AnyConnection,
        queue_name: &str,
        record_ids: &[i64],
    ) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(queue_entries::table
            .filter(queue_entries::queue_name.eq(queue_name))
            .filter(queue_entries::record_id.eq_any(record_ids))
            .order(queue_entries::record_id.asc())
            .load::<QueueEntry>(conn)?)
    }

    fn fetch_history_by_ids_core(
        conn: &mut AnyConnection,
        queue_name: &str,
        record_ids: &[i64],
    ) -> Result<Vec<QueueEntry>, QueueError> {
        Ok(queue_entries_history::table
            .filter(queue_entries_history::queue_name.eq(queue_name))
            .filter(queue_entries_history::record_id.eq_any(record_ids))
            .order(queue_entries_history::record_id.asc())
            .load::<QueueEntry>(conn)?)
    }
}

#[async_trait]
impl EntryStore for QueueEntryDal {
    type Tx = AnyConnection;

    async fn insert(
        &self,
        entry: NewQueueEntry,
        now: NaiveDateTime,
    ) -> Result<QueueEntry, QueueError> {
        let conn = self.database.conn().await?;
        let queue_name = self.queue_name.clone();
        conn.interact(move |conn| {
            conn.transaction::<_, QueueError, _>(|conn| {
                Self::insert_core(conn, &queue_name, entry, now)
            })
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    fn insert_in_transaction(
        &self,
        tx: &mut AnyConnection,
        entry: NewQueueEntry,
        now: NaiveDateTime,
    ) -> Result<QueueEntry, QueueError> {
        Self::insert_core(tx, &self.queue_name, entry, now)
    }

    async fn insert_many(
        &self,
        entries: Vec<NewQueueEntry>,
        now: NaiveDateTime,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let conn = self.database.conn().await?;
        let queue_name = self.queue_name.clone();
        conn.interact(move |conn| {
            conn.transaction::<_, QueueError, _>(|conn| {
                entries
                    .into_iter()
                    .map(|entry| Self::insert_core(conn, &queue_name, entry, now))
                    .collect()
            })
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn fetch_ready(
        &self,
        now: NaiveDateTime,
        owner_filter: Option<String>,
        limit: i64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let conn = self.database.conn().await?;
        let queue_name = self.queue_name.clone();
        conn.interact(move |conn| {
            Self::fetch_ready_core(conn, &queue_name, now, owner_filter.as_deref(), limit)
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn fetch_by_ids(&self, record_ids: Vec<i64>) -> Result<Vec<QueueEntry>, QueueError> {
        let conn = self.database.conn().await?;
        let queue_name = self.queue_name.clone();
        conn.interact(move |conn| Self::fetch_by_ids_core(conn, &queue_name, &record_ids))
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn claim(
        &self,
        record_id: i64,
        owner: String,
        now: NaiveDateTime,
        lease_until: NaiveDateTime,
    ) -> Result<usize, QueueError> {
        let conn = self.database.conn().await?;
        conn.interact(move |conn| Self::claim_core(conn, record_id, &owner, now, lease_until))
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn move_to_history(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let conn = self.database.conn().await?;
        conn.interact(move |conn| {
            conn.transaction::<_, QueueError, _>(|conn| Self::move_to_history_core(conn, entry))
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn move_many_to_history(&self, entries: Vec<QueueEntry>) -> Result<(), QueueError> {
        let conn = self.database.conn().await?;
        conn.interact(move |conn| {
            conn.transaction::<_, QueueError, _>(|conn| {
                for entry in entries {
                    Self::move_to_history_core(conn, entry)?;
                }
                Ok(())
            })
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn remove(&self, record_id: i64) -> Result<(), QueueError> {
        let conn = self.database.conn().await?;
        conn.interact(move |conn| {
            diesel::delete(queue_entries::table.filter(queue_entries::record_id.eq(record_id)))
                .execute(conn)
                .map(|_| ())
                .map_err(QueueError::Database)
        })
        .await
        .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }

    async fn fetch_history_by_ids(
        &self,
        record_ids: Vec<i64>,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let conn = self.database.conn().await?;
        let queue_name = self.queue_name.clone();
        conn.interact(move |conn| Self::fetch_history_by_ids_core(conn, &queue_name, &record_ids))
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))?
    }
}
