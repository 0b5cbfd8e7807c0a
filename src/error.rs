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

//! Error types for queue operations.
//!
//! All fallible queue and store operations return [`QueueError`]. Store
//! unavailability surfaces to producers from the synchronous insert path;
//! on the consumer side the worker loop contains these errors and keeps
//! polling (see the `executor` module).

use thiserror::Error;

/// Errors surfaced by queue and entry-store operations.
#[derive(Error, Debug)]
pub enum QueueError {
    /// A database operation failed
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// A pooled connection could not be obtained or the interact closure failed
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// An event payload could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database migrations could not be applied
    #[error("Migration error: {0}")]
    Migration(String),
}
