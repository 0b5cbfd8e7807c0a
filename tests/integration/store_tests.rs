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

//! Claim-protocol tests against the SQL entry store.

use chrono::{Duration, Utc};
use eventq::{EntryStore, NewQueueEntry, ProcessingState};

use crate::fixtures::{bus_event, queue_dal, test_database};

#[tokio::test]
async fn test_insert_assigns_ascending_record_ids() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();

    let mut previous = 0;
    for i in 0..3 {
        let entry = store.insert(bus_event(i), now).await.unwrap();
        assert!(entry.record_id > previous);
        previous = entry.record_id;
        assert_eq!(entry.state(), ProcessingState::Available);
        assert!(entry.processing_owner.is_none());
    }
}

#[tokio::test]
async fn test_claim_succeeds_exactly_once() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();
    let lease_until = now + Duration::seconds(300);

    let entry = store.insert(bus_event(0), now).await.unwrap();

    let first = store
        .claim(entry.record_id, "owner-a".to_string(), now, lease_until)
        .await
        .unwrap();
    assert_eq!(first, 1);

    // The row is no longer AVAILABLE and its lease has not expired, so a
    // second claimant must observe zero affected rows.
    let second = store
        .claim(entry.record_id, "owner-b".to_string(), now, lease_until)
        .await
        .unwrap();
    assert_eq!(second, 0);
}

#[tokio::test]
async fn test_expired_lease_is_reclaimable_by_another_owner() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();

    let entry = store.insert(bus_event(0), now).await.unwrap();

    // Lease that expires immediately
    let claimed = store
        .claim(
            entry.record_id,
            "owner-a".to_string(),
            now,
            now - Duration::seconds(1),
        )
        .await
        .unwrap();
    assert_eq!(claimed, 1);

    let ready = store.fetch_ready(now, None, 10).await.unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].state(), ProcessingState::InProcessing);

    let reclaimed = store
        .claim(
            entry.record_id,
            "owner-b".to_string(),
            now,
            now + Duration::seconds(300),
        )
        .await
        .unwrap();
    assert_eq!(reclaimed, 1);

    let rows = store.fetch_by_ids(vec![entry.record_id]).await.unwrap();
    assert_eq!(rows[0].processing_owner.as_deref(), Some("owner-b"));
}

#[tokio::test]
async fn test_fetch_ready_hides_future_effective_dates() {
    let db = test_database().await;
    let store = queue_dal(&db, "notifications");
    let now = Utc::now().naive_utc();

    let mut deferred = NewQueueEntry::new("com.example.Reminder", "{}");
    deferred.effective_date = Some(now + Duration::hours(1));
    store.insert(deferred, now).await.unwrap();
    store.insert(bus_event(1), now).await.unwrap();

    let ready_now = store.fetch_ready(now, None, 10).await.unwrap();
    assert_eq!(ready_now.len(), 1);
    assert_eq!(ready_now[0].search_key1, 1);

    let later = now + Duration::hours(2);
    let ready_later = store.fetch_ready(later, None, 10).await.unwrap();
    assert_eq!(ready_later.len(), 2);
}

#[tokio::test]
async fn test_fetch_ready_owner_filter_skips_foreign_unexpired_leases() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();

    let first = store.insert(bus_event(0), now).await.unwrap();
    store.insert(bus_event(1), now).await.unwrap();

    // A foreign instance holds a live lease on the first entry
    store
        .claim(
            first.record_id,
            "owner-b".to_string(),
            now,
            now + Duration::seconds(300),
        )
        .await
        .unwrap();

    let visible = store
        .fetch_ready(now, Some("owner-a".to_string()), 10)
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].search_key1, 1);

    // Once expired, the foreign lease is visible regardless of the filter
    let after_expiry = now + Duration::seconds(301);
    let visible = store
        .fetch_ready(after_expiry, Some("owner-a".to_string()), 10)
        .await
        .unwrap();
    assert_eq!(visible.len(), 2);
}

#[tokio::test]
async fn test_move_to_history_is_idempotent() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();

    let entry = store.insert(bus_event(0), now).await.unwrap();
    let record_id = entry.record_id;
    let archived = entry.into_history("owner-a", now, ProcessingState::Processed);

    store.move_to_history(archived.clone()).await.unwrap();
    // Replaying the terminal transition must not fail or duplicate
    store.move_to_history(archived).await.unwrap();

    assert!(store.fetch_by_ids(vec![record_id]).await.unwrap().is_empty());

    let history = store.fetch_history_by_ids(vec![record_id]).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record_id, record_id);
    assert_eq!(history[0].state(), ProcessingState::Processed);
    assert_eq!(history[0].processing_owner.as_deref(), Some("owner-a"));
}

#[tokio::test]
async fn test_remove_deletes_without_history_row() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();

    let entry = store.insert(bus_event(0), now).await.unwrap();

    store.remove(entry.record_id).await.unwrap();
    // Idempotent
    store.remove(entry.record_id).await.unwrap();

    assert!(store
        .fetch_by_ids(vec![entry.record_id])
        .await
        .unwrap()
        .is_empty());
    assert!(store
        .fetch_history_by_ids(vec![entry.record_id])
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_insert_many_preserves_order() {
    let db = test_database().await;
    let store = queue_dal(&db, "bus_events");
    let now = Utc::now().naive_utc();

    let entries = (0..5).map(bus_event).collect();
    let stored = store.insert_many(entries, now).await.unwrap();
    assert_eq!(stored.len(), 5);

    let ids: Vec<i64> = stored.iter().map(|e| e.record_id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);

    let keys: Vec<i64> = stored.iter().map(|e| e.search_key1).collect();
    assert_eq!(keys, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_queue_name_partitions_the_shared_table() {
    let db = test_database().await;
    let bus = queue_dal(&db, "bus_events");
    let notifications = queue_dal(&db, "notifications");
    let now = Utc::now().naive_utc();

    bus.insert(bus_event(0), now).await.unwrap();
    let notification = notifications.insert(bus_event(1), now).await.unwrap();

    let bus_ready = bus.fetch_ready(now, None, 10).await.unwrap();
    assert_eq!(bus_ready.len(), 1);
    assert_eq!(bus_ready[0].search_key1, 0);

    let notification_ready = notifications.fetch_ready(now, None, 10).await.unwrap();
    assert_eq!(notification_ready.len(), 1);
    assert_eq!(notification_ready[0].record_id, notification.record_id);
}
