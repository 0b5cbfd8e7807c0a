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

//! Diesel schema for the queue tables.
//!
//! Both tables share the same shape. Logical queues are partitioned by the
//! `queue_name` column; history rows keep the `record_id` of the entry they
//! archive, so the history primary key is not auto-assigned.

diesel::table! {
    queue_entries (record_id) {
        record_id -> BigInt,
        queue_name -> Text,
        class_name -> Text,
        event_json -> Text,
        user_token -> Nullable<Text>,
        future_user_token -> Nullable<Text>,
        created_date -> Timestamp,
        effective_date -> Timestamp,
        search_key1 -> BigInt,
        search_key2 -> BigInt,
        processing_owner -> Nullable<Text>,
        processing_available_date -> Nullable<Timestamp>,
        processing_state -> Text,
    }
}

diesel::table! {
    queue_entries_history (record_id) {
        record_id -> BigInt,
        queue_name -> Text,
        class_name -> Text,
        event_json -> Text,
        user_token -> Nullable<Text>,
        future_user_token -> Nullable<Text>,
        created_date -> Timestamp,
        effective_date -> Timestamp,
        search_key1 -> BigInt,
        search_key2 -> BigInt,
        processing_owner -> Nullable<Text>,
        processing_available_date -> Nullable<Timestamp>,
        processing_state -> Text,
    }
}
