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

//! End-to-end queue tests over SQLite: transactional enqueue and the full
//! producer → worker pool → handler → history path.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use diesel::Connection;
use serde::Deserialize;
use serial_test::serial;

use eventq::{
    Clock, DecodedEvent, EntryStore, EventDispatcher, EventMetadata, EventRegistry, HybridQueue,
    ProcessingState, QueueConfig, QueueError, QueueEventHandler, QueueLifecycle, SystemClock,
};

use crate::fixtures::{bus_event, queue_dal, test_database};

#[tokio::test]
async fn test_transactional_enqueue_commits_with_the_caller() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let config = QueueConfig {
        use_inflight_queue: false,
        max_entries_claimed: 10,
        ..QueueConfig::new("bus_events")
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let queue = Arc::new(HybridQueue::new(store, config, clock));

    // Three inserts batched in one caller-owned transaction
    let conn = db.database.conn().await.unwrap();
    let enqueue = Arc::clone(&queue);
    conn.interact(move |conn| {
        conn.transaction::<_, QueueError, _>(|conn| {
            enqueue.insert_entry_from_transaction(conn, bus_event(0))?;
            enqueue.insert_entry_from_transaction(conn, bus_event(1))?;
            enqueue.insert_entry_from_transaction(conn, bus_event(2))?;
            Ok(())
        })
    })
    .await
    .expect("interact failed")
    .expect("transaction failed");

    // A rolled-back transaction leaves nothing behind
    let enqueue = Arc::clone(&queue);
    let rolled_back = conn
        .interact(move |conn| {
            conn.transaction::<(), QueueError, _>(|conn| {
                enqueue.insert_entry_from_transaction(conn, bus_event(99))?;
                Err(QueueError::ConnectionPool("forced rollback".to_string()))
            })
        })
        .await
        .expect("interact failed");
    assert!(rolled_back.is_err());

    let claimed = queue.get_ready_entries().await.unwrap();
    let keys: Vec<i64> = claimed.iter().map(|e| e.search_key1).collect();
    assert_eq!(keys, vec![0, 1, 2]);

    let ids: Vec<i64> = claimed.iter().map(|e| e.record_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
}

#[derive(Debug, Deserialize)]
struct OrderShipped {
    order_id: i64,
}

#[derive(Default)]
struct CountingHandler {
    seen: Mutex<Vec<(i64, i64)>>,
}

impl CountingHandler {
    fn seen_count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl QueueEventHandler for CountingHandler {
    async fn handle(&self, event: DecodedEvent, metadata: EventMetadata) {
        let order = event
            .downcast::<OrderShipped>()
            .expect("unexpected payload type");
        self.seen
            .lock()
            .unwrap()
            .push((metadata.record_id, order.order_id));
    }
}

#[tokio::test]
#[serial]
async fn test_worker_pool_drains_queue_to_history() {
    let db = test_database().await;
    let store = queue_dal(&db, "order-events");
    let config = QueueConfig {
        nb_threads: 2,
        sleep_time: Duration::from_millis(20),
        max_entries_claimed: 5,
        ..QueueConfig::new("order-events")
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let queue = Arc::new(HybridQueue::new(
        store,
        config.clone(),
        Arc::clone(&clock),
    ));
    queue.initialize().await.unwrap();

    let mut registry = EventRegistry::new();
    registry.register::<OrderShipped>("com.example.OrderShipped");

    let handler = Arc::new(CountingHandler::default());
    let dispatcher = EventDispatcher::new(
        Arc::clone(&queue),
        registry,
        handler.clone() as Arc<dyn QueueEventHandler>,
        clock,
    );
    let lifecycle = QueueLifecycle::new(config, Arc::new(dispatcher));

    assert!(lifecycle.start_queue().await);

    for i in 0..10 {
        let payload = format!(r#"{{"order_id": {}}}"#, i);
        queue
            .insert_entry(eventq::NewQueueEntry::new("com.example.OrderShipped", payload))
            .await
            .unwrap();
    }

    let deadline = Instant::now() + Duration::from_secs(15);
    while handler.seen_count() < 10 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    lifecycle.stop_queue().await;

    let seen = handler.seen.lock().unwrap();
    assert_eq!(seen.len(), 10, "not all events were dispatched");
    let mut order_ids: Vec<i64> = seen.iter().map(|(_, order_id)| *order_id).collect();
    order_ids.sort_unstable();
    assert_eq!(order_ids, (0..10).collect::<Vec<i64>>());

    // Every consumed entry was archived with a terminal state
    let record_ids: Vec<i64> = seen.iter().map(|(record_id, _)| *record_id).collect();
    drop(seen);
    let history = queue
        .store()
        .fetch_history_by_ids(record_ids)
        .await
        .unwrap();
    assert_eq!(history.len(), 10);
    for entry in &history {
        assert_eq!(entry.state(), ProcessingState::Processed);
    }

    assert_eq!(queue.total_fetched(), 10);
    assert_eq!(queue.total_insert(), 10);
}
