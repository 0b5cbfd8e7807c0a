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

//! Configuration for a queue instance.
//!
//! One [`QueueConfig`] drives both the hybrid queue (capacity, claim limits,
//! lease TTL) and the worker pool (thread count, poll cadence, kill switch).
//! How the values are loaded is the caller's concern; the queue consumes
//! them as plain data.

use std::time::Duration;

/// Configuration values for one queue instance.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Logical queue name; selects this queue's rows in the shared tables
    pub queue_name: String,
    /// Deployment-time kill switch: when set, `start_queue`/`stop_queue`
    /// are permanent no-ops
    pub is_processing_off: bool,
    /// Number of worker tasks polling this queue
    pub nb_threads: usize,
    /// Target delay between polling iterations; actual sleep is reduced by
    /// the time the iteration itself took
    pub sleep_time: Duration,
    /// Enables the in-memory inflight buffer in front of the durable store
    pub use_inflight_queue: bool,
    /// Restricts durable claims to entries already associated with this
    /// instance's owner identity
    pub is_sticky: bool,
    /// Maximum number of entries held in the inflight buffer
    pub queue_capacity: usize,
    /// Maximum entries claimed per durable fetch
    pub max_entries_claimed: i64,
    /// Claim limit used instead of `max_entries_claimed` when sticky mode
    /// is enabled
    pub max_inflight_entries_claimed: i64,
    /// Lease TTL: how long a claimed entry stays owned before any worker
    /// may reclaim it
    pub claimed_time: Duration,
}

impl QueueConfig {
    /// Creates a configuration with default values for the given queue name.
    pub fn new(queue_name: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            ..Default::default()
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_name: "default".to_string(),
            is_processing_off: false,
            nb_threads: 1,
            sleep_time: Duration::from_secs(3),
            use_inflight_queue: true,
            is_sticky: false,
            queue_capacity: 100,
            max_entries_claimed: 10,
            max_inflight_entries_claimed: 100,
            claimed_time: Duration::from_secs(300),
        }
    }
}
