//! Category subscription registry.
//!
//! The registry keeps a category → connections index for fan-out and the
//! reverse connection → categories index for teardown. Both maps live behind
//! one mutex so they are always updated together; every method copies what
//! it returns before releasing the lock.

use crate::category::{normalize_category, CategorySet};
use crate::connection::ConnectionId;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, info};

/// Registry errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Category is not in the configured set.
    #[error("Category '{0}' does not exist")]
    CategoryUnknown(String),

    /// Connection is already subscribed to the category.
    #[error("Already subscribed to '{0}'")]
    AlreadySubscribed(String),

    /// Connection is not subscribed to the category.
    #[error("Not subscribed to '{0}'")]
    NotSubscribed(String),
}

#[derive(Default)]
struct Index {
    by_category: HashMap<String, HashSet<ConnectionId>>,
    by_connection: HashMap<ConnectionId, HashSet<String>>,
}

/// Bidirectional category ↔ connection index.
pub struct SubscriptionRegistry {
    categories: CategorySet,
    index: Mutex<Index>,
}

impl SubscriptionRegistry {
    /// Create a registry over a fixed category set.
    #[must_use]
    pub fn new(categories: CategorySet) -> Self {
        info!(
            categories = categories.len(),
            "Creating subscription registry"
        );
        let by_category = categories
            .iter()
            .map(|c| (c.to_string(), HashSet::new()))
            .collect();
        Self {
            categories,
            index: Mutex::new(Index {
                by_category,
                by_connection: HashMap::new(),
            }),
        }
    }

    // No method panics between updating the two maps, so a poisoned index
    // is still consistent.
    fn lock(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured categories.
    #[must_use]
    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Subscribe a connection to a category.
    ///
    /// Returns the normalized category name.
    ///
    /// # Errors
    ///
    /// Returns an error if the category is unknown or already subscribed.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        category: &str,
    ) -> Result<String, RegistryError> {
        let name = self
            .categories
            .resolve(category)
            .ok_or_else(|| RegistryError::CategoryUnknown(normalize_category(category)))?
            .to_string();

        let mut index = self.lock();

        let subscribed = index.by_connection.entry(connection).or_default();
        if !subscribed.insert(name.clone()) {
            return Err(RegistryError::AlreadySubscribed(name));
        }

        let subscribers = index.by_category.entry(name.clone()).or_default();
        subscribers.insert(connection);

        debug!(
            category = %name,
            connection = %connection,
            subscribers = subscribers.len(),
            "Subscribed"
        );

        Ok(name)
    }

    /// Unsubscribe a connection from a category.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not subscribed.
    pub fn unsubscribe(
        &self,
        connection: ConnectionId,
        category: &str,
    ) -> Result<String, RegistryError> {
        let name = normalize_category(category);
        let mut index = self.lock();

        let removed = match index.by_connection.get_mut(&connection) {
            Some(subscribed) => subscribed.remove(&name),
            None => false,
        };
        if !removed {
            return Err(RegistryError::NotSubscribed(name));
        }

        if index
            .by_connection
            .get(&connection)
            .is_some_and(HashSet::is_empty)
        {
            index.by_connection.remove(&connection);
        }
        if let Some(subscribers) = index.by_category.get_mut(&name) {
            subscribers.remove(&connection);
        }

        debug!(category = %name, connection = %connection, "Unsubscribed");

        Ok(name)
    }

    /// Snapshot of the connections subscribed to a category.
    #[must_use]
    pub fn subscribers_of(&self, category: &str) -> HashSet<ConnectionId> {
        let name = normalize_category(category);
        self.lock()
            .by_category
            .get(&name)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of the categories a connection is subscribed to.
    #[must_use]
    pub fn categories_of(&self, connection: ConnectionId) -> HashSet<String> {
        self.lock()
            .by_connection
            .get(&connection)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove a connection from every category.
    ///
    /// Returns the categories it was subscribed to; calling this again for
    /// the same connection returns an empty set.
    pub fn remove_connection(&self, connection: ConnectionId) -> HashSet<String> {
        let mut index = self.lock();

        let Some(categories) = index.by_connection.remove(&connection) else {
            return HashSet::new();
        };
        for name in &categories {
            if let Some(subscribers) = index.by_category.get_mut(name) {
                subscribers.remove(&connection);
            }
        }
        drop(index);

        debug!(
            connection = %connection,
            categories = categories.len(),
            "Removed connection from registry"
        );

        categories
    }

    /// All configured categories, sorted.
    #[must_use]
    pub fn list_categories(&self) -> Vec<String> {
        self.categories.sorted()
    }

    /// Get registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let index = self.lock();
        RegistryStats {
            subscribers_per_category: index
                .by_category
                .iter()
                .map(|(name, subs)| (name.clone(), subs.len()))
                .collect(),
            connection_count: index.by_connection.len(),
            total_subscriptions: index.by_connection.values().map(HashSet::len).sum(),
        }
    }
}

/// Registry statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    /// Subscriber count for every configured category.
    pub subscribers_per_category: BTreeMap<String, usize>,
    /// Number of connections holding at least one subscription.
    pub connection_count: usize,
    /// Total number of subscriptions.
    pub total_subscriptions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(CategorySet::default())
    }

    fn assert_consistent(registry: &SubscriptionRegistry, connections: &[ConnectionId]) {
        for category in registry.list_categories() {
            for conn in connections {
                assert_eq!(
                    registry.subscribers_of(&category).contains(conn),
                    registry.categories_of(*conn).contains(&category),
                    "{conn} / {category}"
                );
            }
        }
    }

    #[test]
    fn test_subscribe_then_list() {
        let registry = registry();
        let conn = ConnectionId::from_raw(1);

        assert_eq!(registry.subscribe(conn, "tech"), Ok("tech".to_string()));
        assert!(registry.list_categories().contains(&"tech".to_string()));
        assert_eq!(registry.subscribers_of("tech"), HashSet::from([conn]));
        assert_eq!(registry.categories_of(conn), HashSet::from(["tech".to_string()]));
    }

    #[test]
    fn test_subscribe_normalizes_category() {
        let registry = registry();
        let conn = ConnectionId::from_raw(1);

        registry.subscribe(conn, " TECH ").unwrap();
        assert!(registry.subscribers_of("tech").contains(&conn));
        assert_eq!(
            registry.subscribe(conn, "Tech"),
            Err(RegistryError::AlreadySubscribed("tech".to_string()))
        );
    }

    #[test]
    fn test_unknown_category() {
        let registry = registry();
        let conn = ConnectionId::from_raw(1);

        assert_eq!(
            registry.subscribe(conn, "Weather"),
            Err(RegistryError::CategoryUnknown("weather".to_string()))
        );
        assert!(registry.categories_of(conn).is_empty());
        assert_eq!(registry.stats().connection_count, 0);
    }

    #[test]
    fn test_unsubscribe_not_subscribed_leaves_state() {
        let registry = registry();
        let conn = ConnectionId::from_raw(1);
        registry.subscribe(conn, "tech").unwrap();
        let before = registry.stats();

        assert_eq!(
            registry.unsubscribe(conn, "economy"),
            Err(RegistryError::NotSubscribed("economy".to_string()))
        );
        assert_eq!(
            registry.unsubscribe(ConnectionId::from_raw(2), "tech"),
            Err(RegistryError::NotSubscribed("tech".to_string()))
        );
        assert_eq!(registry.stats(), before);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = registry();
        let conn = ConnectionId::from_raw(1);
        registry.subscribe(conn, "tech").unwrap();
        registry.subscribe(conn, "sports").unwrap();

        registry.unsubscribe(conn, "tech").unwrap();
        assert!(registry.subscribers_of("tech").is_empty());
        assert_eq!(registry.categories_of(conn), HashSet::from(["sports".to_string()]));
        assert_consistent(&registry, &[conn]);
    }

    #[test]
    fn test_remove_connection_is_idempotent() {
        let registry = registry();
        let conn = ConnectionId::from_raw(1);
        let other = ConnectionId::from_raw(2);
        registry.subscribe(conn, "tech").unwrap();
        registry.subscribe(conn, "culture").unwrap();
        registry.subscribe(other, "tech").unwrap();

        assert_eq!(registry.remove_connection(conn).len(), 2);
        let after_first = registry.stats();
        assert!(registry.remove_connection(conn).is_empty());
        assert_eq!(registry.stats(), after_first);

        assert_eq!(registry.subscribers_of("tech"), HashSet::from([other]));
        assert!(registry.subscribers_of("culture").is_empty());
        assert_consistent(&registry, &[conn, other]);
    }

    #[test]
    fn test_registry_stats() {
        let registry = registry();
        let c1 = ConnectionId::from_raw(1);
        let c2 = ConnectionId::from_raw(2);
        registry.subscribe(c1, "tech").unwrap();
        registry.subscribe(c1, "sports").unwrap();
        registry.subscribe(c2, "tech").unwrap();

        let stats = registry.stats();
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.total_subscriptions, 3);
        assert_eq!(stats.subscribers_per_category["tech"], 2);
        assert_eq!(stats.subscribers_per_category["economy"], 0);
    }

    #[test]
    fn test_concurrent_mutation_keeps_index_consistent() {
        let registry = Arc::new(registry());
        let categories = registry.list_categories();

        let handles: Vec<_> = (1..=8u64)
            .map(|raw| {
                let registry = Arc::clone(&registry);
                let categories = categories.clone();
                std::thread::spawn(move || {
                    let conn = ConnectionId::from_raw(raw);
                    for round in 0..200 {
                        let category = &categories[(raw as usize + round) % categories.len()];
                        let _ = registry.subscribe(conn, category);
                        if round % 3 == 0 {
                            let _ = registry.unsubscribe(conn, category);
                        }
                        if round % 50 == 49 {
                            registry.remove_connection(conn);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let connections: Vec<_> = (1..=8).map(ConnectionId::from_raw).collect();
        assert_consistent(&registry, &connections);
    }
}
