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

//! Event dispatch: payload decoding and handler invocation.
//!
//! Payloads are decoded through an explicit [`EventRegistry`] keyed by the
//! entry's `class_name` tag, populated at startup by the queue's owner. A
//! payload that cannot be decoded (unknown tag or malformed JSON) is logged
//! with the offending payload and still moved to history, so one bad entry
//! can neither crash a worker nor be reprocessed forever.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::clock::Clock;
use crate::error::QueueError;
use crate::executor::EventProcessor;
use crate::models::{ProcessingState, QueueEntry};
use crate::queue::HybridQueue;
use crate::store::EntryStore;

/// A decoded event payload, downcast by the handler to its concrete type.
pub type DecodedEvent = Box<dyn Any + Send>;

type DecodeFn = Box<dyn Fn(&str) -> Result<DecodedEvent, serde_json::Error> + Send + Sync>;

/// Correlation metadata delivered to the handler alongside the decoded
/// payload.
#[derive(Debug, Clone)]
pub struct EventMetadata {
    pub record_id: i64,
    pub user_token: Option<String>,
    pub future_user_token: Option<String>,
    pub created_date: NaiveDateTime,
    pub effective_date: NaiveDateTime,
    pub search_key1: i64,
    pub search_key2: i64,
}

impl From<&QueueEntry> for EventMetadata {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            record_id: entry.record_id,
            user_token: entry.user_token.clone(),
            future_user_token: entry.future_user_token.clone(),
            created_date: entry.created_date,
            effective_date: entry.effective_date,
            search_key1: entry.search_key1,
            search_key2: entry.search_key2,
        }
    }
}

/// Callback invoked once per ready entry.
#[async_trait]
pub trait QueueEventHandler: Send + Sync + 'static {
    /// Handles one decoded event.
    async fn handle(&self, event: DecodedEvent, metadata: EventMetadata);
}

/// Maps type tags to payload decoders.
///
/// The explicit registry replaces dynamic class lookup: each queue owner
/// registers the payload types it expects at startup.
#[derive(Default)]
pub struct EventRegistry {
    decoders: HashMap<String, DecodeFn>,
}

impl EventRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as the payload type for the given tag.
    pub fn register<T: DeserializeOwned + Send + 'static>(
        &mut self,
        class_name: impl Into<String>,
    ) {
        self.decoders.insert(
            class_name.into(),
            Box::new(|json| {
                serde_json::from_str::<T>(json).map(|event| Box::new(event) as DecodedEvent)
            }),
        );
    }

    /// Decodes a payload by tag.
    ///
    /// `None` means no decoder is registered for the tag; `Some(Err(_))`
    /// means the payload did not parse as the registered type.
    pub fn decode(
        &self,
        class_name: &str,
        json: &str,
    ) -> Option<Result<DecodedEvent, serde_json::Error>> {
        self.decoders.get(class_name).map(|decode| decode(json))
    }

    /// Whether a decoder is registered for the tag.
    pub fn is_registered(&self, class_name: &str) -> bool {
        self.decoders.contains_key(class_name)
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("registered", &self.decoders.len())
            .finish()
    }
}

/// Drains a hybrid queue and dispatches each ready entry to a handler.
///
/// This is the concrete [`EventProcessor`] wired into a
/// [`QueueLifecycle`](crate::executor::QueueLifecycle): each unit of work
/// claims the next batch of ready entries, invokes the handler per entry,
/// and moves every entry to history as `PROCESSED`.
pub struct EventDispatcher<S: EntryStore> {
    queue: Arc<HybridQueue<S>>,
    registry: EventRegistry,
    handler: Arc<dyn QueueEventHandler>,
    clock: Arc<dyn Clock>,
}

impl<S: EntryStore> EventDispatcher<S> {
    /// Creates a dispatcher over the given queue, registry and handler.
    pub fn new(
        queue: Arc<HybridQueue<S>>,
        registry: EventRegistry,
        handler: Arc<dyn QueueEventHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            registry,
            handler,
            clock,
        }
    }
}

#[async_trait]
impl<S: EntryStore> EventProcessor for EventDispatcher<S> {
    async fn process_events(&self) -> Result<usize, QueueError> {
        let entries = self.queue.get_ready_entries().await?;
        let count = entries.len();

        for entry in entries {
            let metadata = EventMetadata::from(&entry);

            match self.registry.decode(&entry.class_name, &entry.event_json) {
                Some(Ok(event)) => self.handler.handle(event, metadata).await,
                Some(Err(e)) => error!(
                    class_name = %entry.class_name,
                    payload = %entry.event_json,
                    error = %e,
                    "failed to decode event payload, moving entry to history unhandled"
                ),
                None => error!(
                    class_name = %entry.class_name,
                    payload = %entry.event_json,
                    "no decoder registered for event type, moving entry to history unhandled"
                ),
            }

            let now = self.clock.now().naive_utc();
            let history =
                entry.into_history(self.queue.owner(), now, ProcessingState::Processed);
            self.queue.move_entry_to_history(history).await?;
        }

        Ok(count)
    }
}
