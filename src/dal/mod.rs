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

//! Data Access Layer with runtime backend selection.
//!
//! All queries run against [`AnyConnection`](crate::database::AnyConnection),
//! so a single implementation serves both PostgreSQL and SQLite; the only
//! per-backend divergence is identity retrieval on insert.

mod queue_entry;

pub use queue_entry::QueueEntryDal;

use crate::database::Database;

/// Data access layer facade.
///
/// Hands out per-queue DAL handles over a shared connection pool.
#[derive(Clone, Debug)]
pub struct DAL {
    database: Database,
}

impl DAL {
    /// Creates a new DAL over the given database.
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    /// Returns the queue-entry DAL for one logical queue.
    pub fn queue_entries(&self, queue_name: &str) -> QueueEntryDal {
        QueueEntryDal::new(self.database.clone(), queue_name)
    }
}
