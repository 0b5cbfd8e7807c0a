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

//! Queue Entry Model
//!
//! This module defines the data structures for durable queue entries: the
//! stored row, the producer-facing input shape, and the insertable rows for
//! the live and history tables. The payload (`event_json`) is opaque to the
//! queue core; `class_name` is the type tag used by the dispatch registry.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a queue entry.
///
/// `Processed` and `Removed` are terminal: rows carrying them live in the
/// history table and are never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessingState {
    /// Eligible for claim once its effective date has passed
    Available,
    /// Leased to an owner until its lease expiry
    InProcessing,
    /// Successfully consumed and moved to history
    Processed,
    /// Removed without processing
    Removed,
}

impl ProcessingState {
    /// Returns the database representation of this state.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Available => "AVAILABLE",
            ProcessingState::InProcessing => "IN_PROCESSING",
            ProcessingState::Processed => "PROCESSED",
            ProcessingState::Removed => "REMOVED",
        }
    }

    /// Parses a database state string.
    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "AVAILABLE" => Some(ProcessingState::Available),
            "IN_PROCESSING" => Some(ProcessingState::InProcessing),
            "PROCESSED" => Some(ProcessingState::Processed),
            "REMOVED" => Some(ProcessingState::Removed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A durable queue entry as stored in the `queue_entries` table.
///
/// The same shape is used for history rows; `record_id` is carried over
/// unchanged when an entry is moved to history.
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::database::schema::queue_entries)]
pub struct QueueEntry {
    /// Store-assigned monotonic identity; unique, never reused
    pub record_id: i64,
    /// Logical queue this entry belongs to
    pub queue_name: String,
    /// Type tag used to look up a payload decoder
    pub class_name: String,
    /// Serialized payload; opaque to the queue core
    pub event_json: String,
    /// Correlation identifier (notifications only)
    pub user_token: Option<String>,
    /// Correlation identifier for follow-up notifications
    pub future_user_token: Option<String>,
    /// Set at insert, immutable
    pub created_date: NaiveDateTime,
    /// The entry becomes eligible for claim at or after this time
    pub effective_date: NaiveDateTime,
    /// Caller-defined partition/filter key
    pub search_key1: i64,
    /// Caller-defined partition/filter key
    pub search_key2: i64,
    /// Identity of the process currently leasing the entry
    pub processing_owner: Option<String>,
    /// Lease expiry; once passed the entry is reclaimable by any owner
    pub processing_available_date: Option<NaiveDateTime>,
    /// Current `ProcessingState`, stored as text
    pub processing_state: String,
}

impl QueueEntry {
    /// Returns the parsed processing state, defaulting to `Available` for
    /// unrecognized values.
    pub fn state(&self) -> ProcessingState {
        ProcessingState::from_str(&self.processing_state).unwrap_or(ProcessingState::Available)
    }

    /// Stamps this entry with a terminal state for the history table.
    pub fn into_history(
        self,
        owner: &str,
        now: NaiveDateTime,
        state: ProcessingState,
    ) -> QueueEntry {
        QueueEntry {
            processing_owner: Some(owner.to_string()),
            processing_available_date: Some(now),
            processing_state: state.as_str().to_string(),
            ..self
        }
    }
}

/// Producer input for a new queue entry.
///
/// Identity, timestamps and lease fields are filled in by the store at
/// insert time. A missing `effective_date` means "ready now": the entry
/// gets its creation date (the bus-event shape; notifications schedule a
/// future effective date).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueEntry {
    /// Type tag used to look up a payload decoder
    pub class_name: String,
    /// Serialized payload
    pub event_json: String,
    /// Correlation identifier (notifications only)
    pub user_token: Option<String>,
    /// Correlation identifier for follow-up notifications
    pub future_user_token: Option<String>,
    /// Claim eligibility time; `None` means ready at insert
    pub effective_date: Option<NaiveDateTime>,
    /// Caller-defined partition/filter key
    pub search_key1: i64,
    /// Caller-defined partition/filter key
    pub search_key2: i64,
}

impl NewQueueEntry {
    /// Creates an immediately-ready entry with the given type tag and payload.
    pub fn new(class_name: impl Into<String>, event_json: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            event_json: event_json.into(),
            user_token: None,
            future_user_token: None,
            effective_date: None,
            search_key1: 0,
            search_key2: 0,
        }
    }
}

/// Insertable row for the `queue_entries` table.
///
/// `record_id` is absent: the store assigns it.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::queue_entries)]
pub struct NewQueueEntryRow {
    pub queue_name: String,
    pub class_name: String,
    pub event_json: String,
    pub user_token: Option<String>,
    pub future_user_token: Option<String>,
    pub created_date: NaiveDateTime,
    pub effective_date: NaiveDateTime,
    pub search_key1: i64,
    pub search_key2: i64,
    pub processing_owner: Option<String>,
    pub processing_available_date: Option<NaiveDateTime>,
    pub processing_state: String,
}

impl NewQueueEntryRow {
    /// Builds the insertable row for a producer entry, stamping creation
    /// and effective dates.
    pub fn from_entry(queue_name: &str, entry: NewQueueEntry, now: NaiveDateTime) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            class_name: entry.class_name,
            event_json: entry.event_json,
            user_token: entry.user_token,
            future_user_token: entry.future_user_token,
            created_date: now,
            effective_date: entry.effective_date.unwrap_or(now),
            search_key1: entry.search_key1,
            search_key2: entry.search_key2,
            processing_owner: None,
            processing_available_date: None,
            processing_state: ProcessingState::Available.as_str().to_string(),
        }
    }
}

/// Insertable row for the `queue_entries_history` table.
///
/// Unlike [`NewQueueEntryRow`] this carries the `record_id`: history rows
/// keep the identity of the entry they archive.
#[derive(Debug, Insertable)]
#[diesel(table_name = crate::database::schema::queue_entries_history)]
pub struct QueueEntryHistoryRow {
    pub record_id: i64,
    pub queue_name: String,
    pub class_name: String,
    pub event_json: String,
    pub user_token: Option<String>,
    pub future_user_token: Option<String>,
    pub created_date: NaiveDateTime,
    pub effective_date: NaiveDateTime,
    pub search_key1: i64,
    pub search_key2: i64,
    pub processing_owner: Option<String>,
    pub processing_available_date: Option<NaiveDateTime>,
    pub processing_state: String,
}

impl From<QueueEntry> for QueueEntryHistoryRow {
    fn from(entry: QueueEntry) -> Self {
        Self {
            record_id: entry.record_id,
            queue_name: entry.queue_name,
            class_name: entry.class_name,
            event_json: entry.event_json,
            user_token: entry.user_token,
            future_user_token: entry.future_user_token,
            created_date: entry.created_date,
            effective_date: entry.effective_date,
            search_key1: entry.search_key1,
            search_key2: entry.search_key2,
            processing_owner: entry.processing_owner,
            processing_available_date: entry.processing_available_date,
            processing_state: entry.processing_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_processing_state_round_trip() {
        for state in [
            ProcessingState::Available,
            ProcessingState::InProcessing,
            ProcessingState::Processed,
            ProcessingState::Removed,
        ] {
            assert_eq!(ProcessingState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(ProcessingState::from_str("BOGUS"), None);
    }

    #[test]
    fn test_new_entry_defaults_effective_date_to_creation() {
        let now = chrono::Utc::now().naive_utc();
        let row = NewQueueEntryRow::from_entry(
            "bus_events",
            NewQueueEntry::new("com.example.Event", "{}"),
            now,
        );

        assert_eq!(row.created_date, now);
        assert_eq!(row.effective_date, now);
        assert_eq!(row.processing_state, "AVAILABLE");
        assert!(row.processing_owner.is_none());
    }
}
