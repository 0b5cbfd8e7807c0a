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

//! # eventq
//!
//! A durable, at-least-once work queue for deferred notifications and bus
//! events, backed by PostgreSQL or SQLite.
//!
//! Producers enqueue typed entries — optionally from within an ongoing
//! database transaction, so the enqueue commits atomically with the
//! caller's business writes. Worker pools poll for ready entries, lease
//! them through a conditional-update claim protocol that tolerates
//! concurrent claimants across processes, dispatch them to registered
//! handlers, and archive them to a history table.
//!
//! The center of the crate is the [`HybridQueue`]: a bounded in-memory
//! inflight buffer in front of the durable table. While the buffer is a
//! faithful prefix of the durable ordering, consumers drain it without
//! touching the store; on restart backlogs, buffer overflow or multi-process
//! contention the queue demotes itself to durable reads and writes, so no
//! entry is ever lost or reordered.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use eventq::{
//!     Clock, Database, EventDispatcher, EventRegistry, HybridQueue, NewQueueEntry,
//!     QueueConfig, QueueEventHandler, QueueLifecycle, SystemClock, DAL,
//! };
//!
//! # #[derive(serde::Deserialize)]
//! # struct OrderShipped { order_id: i64 }
//! # struct MyHandler;
//! # #[async_trait::async_trait]
//! # impl QueueEventHandler for MyHandler {
//! #     async fn handle(&self, _event: eventq::DecodedEvent, _metadata: eventq::EventMetadata) {}
//! # }
//! # async fn example() -> Result<(), eventq::QueueError> {
//! let database = Database::new("postgres://localhost:5432/queues", 10);
//! database.run_migrations().await?;
//!
//! let config = QueueConfig::new("order-events");
//! let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
//! let store = DAL::new(database).queue_entries(&config.queue_name);
//! let queue = Arc::new(HybridQueue::new(store, config.clone(), Arc::clone(&clock)));
//! queue.initialize().await?;
//!
//! let mut registry = EventRegistry::new();
//! registry.register::<OrderShipped>("com.example.OrderShipped");
//!
//! let dispatcher = EventDispatcher::new(
//!     Arc::clone(&queue),
//!     registry,
//!     Arc::new(MyHandler),
//!     Arc::clone(&clock),
//! );
//! let lifecycle = QueueLifecycle::new(config, Arc::new(dispatcher));
//! lifecycle.start_queue().await;
//!
//! queue
//!     .insert_entry(NewQueueEntry::new(
//!         "com.example.OrderShipped",
//!         r#"{"order_id": 42}"#,
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod dal;
pub mod database;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod models;
pub mod queue;
pub mod store;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::QueueConfig;
pub use dal::{QueueEntryDal, DAL};
pub use database::{AnyConnection, BackendType, Database};
pub use dispatch::{
    DecodedEvent, EventDispatcher, EventMetadata, EventRegistry, QueueEventHandler,
};
pub use error::QueueError;
pub use executor::{EventProcessor, QueueLifecycle};
pub use models::{NewQueueEntry, ProcessingState, QueueEntry};
pub use queue::HybridQueue;
pub use store::EntryStore;
