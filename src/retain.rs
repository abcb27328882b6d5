// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The retained-message store interface the [`crate::router::Router`]
//! consults on publish (to store) and subscribe (to replay).
//!
//! Durable persistence is this collaborator's own contract — out of scope
//! here — so only the interface and an in-memory reference implementation
//! are provided.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::router::{Context, Message, PoolId};
use crate::topic::TopicFilter;

/// Stores the latest retained message per topic, looked up by filter on
/// subscribe.
///
/// See spec "Retain Store (interface only)" (`SPEC_FULL.md` §4.3).
#[async_trait]
pub trait RetainStore: Send + Sync {
    /// Stores `message` keyed by its topic, replacing any prior entry for
    /// that topic. An empty payload deletes the entry (MQTT-5 semantic).
    async fn retain(&self, pool: PoolId, message: Message, publisher_context: Option<Context>);

    /// Returns every retained entry whose topic matches `filter`.
    async fn lookup(&self, pool: PoolId, filter: &TopicFilter) -> Vec<(Message, Option<Context>)>;
}

struct Entry {
    message: Message,
    publisher_context: Option<Context>,
}

/// A non-durable, process-local [`RetainStore`]: retained messages are lost
/// on restart. Suitable as a reference implementation or for tests; a
/// production deployment wanting durability owns its own implementation.
#[derive(Default)]
pub struct InMemoryRetainStore {
    entries: DashMap<(PoolId, String), Entry>,
}

impl InMemoryRetainStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetainStore for InMemoryRetainStore {
    async fn retain(&self, pool: PoolId, message: Message, publisher_context: Option<Context>) {
        let key = (pool, message.topic.to_string());
        if message.payload.is_empty() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(
                key,
                Entry {
                    message,
                    publisher_context,
                },
            );
        }
    }

    async fn lookup(&self, pool: PoolId, filter: &TopicFilter) -> Vec<(Message, Option<Context>)> {
        self.entries
            .iter()
            .filter(|entry| entry.key().0 == pool)
            .filter_map(|entry| {
                filter
                    .matches(&entry.value().message.topic)
                    .map(|_| (entry.value().message.clone(), entry.value().publisher_context.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::router::QoS;
    use crate::topic::TopicName;

    fn message(topic: &str, payload: &str) -> Message {
        Message {
            topic: TopicName::new(topic).unwrap(),
            payload: Bytes::from(payload.to_owned()),
            qos: QoS::AtMostOnce,
            retain: true,
            properties: Vec::new(),
        }
    }

    #[tokio::test]
    async fn stores_and_replaces_latest_per_topic() {
        let store = InMemoryRetainStore::new();
        let pool = PoolId::new();

        store.retain(pool, message("a/b", "first"), None).await;
        store.retain(pool, message("a/b", "second"), None).await;

        let filter = TopicFilter::new("a/b").unwrap();
        let hits = store.lookup(pool, &filter).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.payload, Bytes::from_static(b"second"));
    }

    #[tokio::test]
    async fn empty_payload_deletes_entry() {
        let store = InMemoryRetainStore::new();
        let pool = PoolId::new();

        store.retain(pool, message("a/b", "first"), None).await;
        store.retain(pool, message("a/b", ""), None).await;

        let filter = TopicFilter::new("a/b").unwrap();
        assert!(store.lookup(pool, &filter).await.is_empty());
    }

    #[tokio::test]
    async fn lookup_matches_wildcards() {
        let store = InMemoryRetainStore::new();
        let pool = PoolId::new();

        store.retain(pool, message("a/b/c", "hi"), None).await;

        let filter = TopicFilter::new("a/+/c").unwrap();
        assert_eq!(store.lookup(pool, &filter).await.len(), 1);
    }

    #[tokio::test]
    async fn isolates_pools() {
        let store = InMemoryRetainStore::new();
        let pool_a = PoolId::new();
        let pool_b = PoolId::new();

        store.retain(pool_a, message("a/b", "first"), None).await;

        let filter = TopicFilter::new("a/b").unwrap();
        assert!(store.lookup(pool_b, &filter).await.is_empty());
        assert_eq!(store.lookup(pool_a, &filter).await.len(), 1);
    }
}
