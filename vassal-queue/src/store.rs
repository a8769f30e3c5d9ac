//! Process-wide queue registry

use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::config::QueueConfig;
use crate::coordinator::QueueCoordinator;
use vassal_core::SqsError;

/// Registry mapping queue name to its coordinator.
///
/// Creation and deletion serialize per map shard; reads run concurrently.
/// There is no ordering between a concurrent create and lookup, so callers
/// must treat `NonExistentQueue` as always possible.
pub struct QueueStore {
    base_url: String,
    /// Handed to coordinators so dead-letter routing can resolve its target.
    self_weak: Weak<QueueStore>,
    queues: DashMap<String, Arc<QueueCoordinator>>,
}

impl QueueStore {
    pub fn new(base_url: impl Into<String>) -> Arc<Self> {
        let base_url = base_url.into();
        Arc::new_cyclic(|self_weak| Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            self_weak: self_weak.clone(),
            queues: DashMap::new(),
        })
    }

    /// Register a queue. Returns `(true, url)` when newly created and
    /// `(false, url)` when a queue with identical config already exists;
    /// an existing queue with a different config is an error.
    pub fn add_queue(&self, name: &str, config: QueueConfig) -> Result<(bool, String), SqsError> {
        match self.queues.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().config() == &config {
                    Ok((false, existing.get().url().to_string()))
                } else {
                    Err(SqsError::QueueNameExists(name.to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let url = format!("{}/{}", self.base_url, name);
                info!(name = %name, url = %url, "Creating queue");
                slot.insert(QueueCoordinator::new(
                    name.to_string(),
                    url.clone(),
                    config,
                    self.self_weak.clone(),
                ));
                Ok((true, url))
            }
        }
    }

    /// Idempotent removal; tears down the queue's runtime, waking any
    /// receives still blocked on it.
    pub fn remove_queue(&self, name: &str) {
        if let Some((_, coordinator)) = self.queues.remove(name) {
            info!(name = %name, "Deleting queue");
            coordinator.shutdown();
        }
    }

    pub fn queue_exists(&self, name: &str) -> bool {
        self.queues.contains_key(name)
    }

    pub fn queue_config(&self, name: &str) -> Result<QueueConfig, SqsError> {
        self.queue_handle(name).map(|q| q.config().clone())
    }

    pub fn queue_handle(&self, name: &str) -> Result<Arc<QueueCoordinator>, SqsError> {
        self.queues
            .get(name)
            .map(|q| q.value().clone())
            .ok_or_else(|| SqsError::NonExistentQueue(name.to_string()))
    }

    /// Queue URLs, optionally filtered by name prefix, sorted by name.
    pub fn list_queues(&self, prefix: Option<&str>) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .filter(|q| prefix.map_or(true, |p| q.key().starts_with(p)))
            .map(|q| q.key().clone())
            .collect();
        names.sort();
        names
            .into_iter()
            .map(|name| format!("{}/{}", self.base_url, name))
            .collect()
    }

    /// Tear down every queue. Used on shutdown and between test cases.
    pub fn reset(&self) {
        let names: Vec<String> = self.queues.iter().map(|q| q.key().clone()).collect();
        for name in names {
            self.remove_queue(&name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_lookup() {
        let store = QueueStore::new("http://localhost:4589");

        let (created, url) = store.add_queue("q1", QueueConfig::default()).unwrap();
        assert!(created);
        assert_eq!(url, "http://localhost:4589/q1");

        assert!(store.queue_exists("q1"));
        assert_eq!(store.queue_handle("q1").unwrap().url(), url);
    }

    #[tokio::test]
    async fn test_create_is_idempotent_on_identical_config() {
        let store = QueueStore::new("http://localhost:4589");

        let (_, first_url) = store.add_queue("q1", QueueConfig::default()).unwrap();
        let (created, second_url) = store.add_queue("q1", QueueConfig::default()).unwrap();

        assert!(!created);
        assert_eq!(first_url, second_url);
    }

    #[tokio::test]
    async fn test_create_conflicts_on_different_config() {
        let store = QueueStore::new("http://localhost:4589");

        store.add_queue("q1", QueueConfig::default()).unwrap();
        let different = QueueConfig {
            visibility_timeout: std::time::Duration::from_secs(5),
            ..QueueConfig::default()
        };

        assert!(matches!(
            store.add_queue("q1", different),
            Err(SqsError::QueueNameExists(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_queue_errors() {
        let store = QueueStore::new("http://localhost:4589");

        assert!(!store.queue_exists("ghost"));
        assert!(matches!(
            store.queue_handle("ghost"),
            Err(SqsError::NonExistentQueue(_))
        ));
        assert!(store.queue_config("ghost").is_err());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let store = QueueStore::new("http://localhost:4589");

        store.add_queue("q1", QueueConfig::default()).unwrap();
        store.remove_queue("q1");
        store.remove_queue("q1");
        assert!(!store.queue_exists("q1"));
    }

    #[tokio::test]
    async fn test_list_queues_with_prefix() {
        let store = QueueStore::new("http://localhost:4589");

        store.add_queue("orders", QueueConfig::default()).unwrap();
        store.add_queue("orders-dlq", QueueConfig::default()).unwrap();
        store.add_queue("payments", QueueConfig::default()).unwrap();

        assert_eq!(store.list_queues(None).len(), 3);

        let orders = store.list_queues(Some("orders"));
        assert_eq!(
            orders,
            vec![
                "http://localhost:4589/orders".to_string(),
                "http://localhost:4589/orders-dlq".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_drops_everything() {
        let store = QueueStore::new("http://localhost:4589");

        store.add_queue("a", QueueConfig::default()).unwrap();
        store.add_queue("b", QueueConfig::default()).unwrap();
        store.reset();

        assert!(store.list_queues(None).is_empty());
    }
}
