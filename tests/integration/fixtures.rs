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

//! Shared test fixtures: a migrated scratch SQLite database per test.

use eventq::{Database, NewQueueEntry, QueueEntryDal, DAL};
use tempfile::TempDir;

/// A scratch database that lives as long as the returned guard.
pub struct TestDatabase {
    pub database: Database,
    _tempdir: TempDir,
}

/// Creates a migrated SQLite database in a temporary directory.
pub async fn test_database() -> TestDatabase {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let tempdir = TempDir::new().expect("failed to create temp dir");
    let db_path = tempdir.path().join("eventq_test.db");
    let database = Database::new(db_path.to_str().expect("non-utf8 temp path"), 1);
    database
        .run_migrations()
        .await
        .expect("failed to run migrations");

    TestDatabase {
        database,
        _tempdir: tempdir,
    }
}

/// DAL handle for a logical queue on the scratch database.
pub fn queue_dal(db: &TestDatabase, queue_name: &str) -> QueueEntryDal {
    DAL::new(db.database.clone()).queue_entries(queue_name)
}

/// A ready-now entry with the given search key.
pub fn bus_event(search_key1: i64) -> NewQueueEntry {
    NewQueueEntry {
        search_key1,
        search_key2: 1,
        ..NewQueueEntry::new("com.example.BusEvent", "{}")
    }
}
