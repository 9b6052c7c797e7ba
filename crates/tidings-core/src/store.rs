//! Bounded, persistent news history.
//!
//! The store keeps the newest `max_items` news items in memory and rewrites
//! the whole list to a JSON file after every mutation. The file write happens
//! inside the store lock so two appends can never interleave their writes.
//! In-memory state is authoritative: a failed write is logged and the
//! operation still succeeds.

use crate::category::normalize_category;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tidings_protocol::{NewsId, NewsItem};
use tracing::{debug, error, info, warn};

/// Default history cap.
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// None of the requested ids exist.
    #[error("News not found: {}", format_ids(.0))]
    NotFound(Vec<NewsId>),

    /// Durable read or write failed.
    #[error("Persistence error on {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn format_ids(ids: &[NewsId]) -> String {
    ids.iter()
        .map(NewsId::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of [`NewsStore::remove_by_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveOutcome {
    /// Number of items removed.
    pub removed: usize,
    /// Requested ids that were not present, in request order.
    pub not_found: Vec<NewsId>,
}

impl RemoveOutcome {
    /// Treat "nothing removed, some ids missing" as [`StoreError::NotFound`].
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when no requested id existed.
    pub fn require_any(self) -> Result<Self, StoreError> {
        if self.removed == 0 && !self.not_found.is_empty() {
            return Err(StoreError::NotFound(self.not_found));
        }
        Ok(self)
    }
}

struct StoreState {
    items: VecDeque<NewsItem>,
    next_id: NewsId,
}

/// The news history store.
pub struct NewsStore {
    path: Option<PathBuf>,
    max_items: usize,
    state: Mutex<StoreState>,
}

impl NewsStore {
    /// Open a store backed by `path`, loading any previous history.
    ///
    /// A missing file starts an empty store. An unreadable or corrupt file is
    /// logged and also starts an empty store; it is overwritten by the next
    /// mutation.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>, max_items: usize) -> Self {
        let path = path.into();
        let items = match load_items(&path) {
            Ok(Some(items)) => {
                info!(path = %path.display(), count = items.len(), "Loaded news history");
                items
            }
            Ok(None) => {
                debug!(path = %path.display(), "No news history file, starting empty");
                Vec::new()
            }
            Err(e) => {
                error!(error = %e, "Failed to load news history, starting empty");
                Vec::new()
            }
        };
        Self::with_items(Some(path), max_items, items)
    }

    /// Create a store that never touches the filesystem.
    #[must_use]
    pub fn in_memory(max_items: usize) -> Self {
        Self::with_items(None, max_items, Vec::new())
    }

    fn with_items(path: Option<PathBuf>, max_items: usize, items: Vec<NewsItem>) -> Self {
        let max_items = max_items.max(1);
        let next_id = items.iter().map(|n| n.id).max().unwrap_or(0) + 1;

        let mut items = VecDeque::from(items);
        if items.len() > max_items {
            warn!(
                count = items.len(),
                max_items, "Loaded history exceeds cap, dropping oldest items"
            );
            items.drain(..items.len() - max_items);
        }

        Self {
            path,
            max_items,
            state: Mutex::new(StoreState { items, next_id }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The configured history cap.
    #[must_use]
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    /// The backing file, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Store a new item and return it.
    pub fn append(
        &self,
        title: impl Into<String>,
        body: impl Into<String>,
        category: &str,
    ) -> NewsItem {
        let mut state = self.lock();

        let id = state.next_id;
        state.next_id += 1;

        let item = NewsItem::new(id, title, body, normalize_category(category));
        state.items.push_back(item.clone());

        while state.items.len() > self.max_items {
            if let Some(evicted) = state.items.pop_front() {
                debug!(id = evicted.id, "Evicted oldest news item");
            }
        }

        self.persist_logged(&state.items);

        debug!(id, category = %item.category, "Stored news item");
        item
    }

    /// The newest `limit` items of a category, oldest first.
    #[must_use]
    pub fn query_by_category(&self, category: &str, limit: usize) -> Vec<NewsItem> {
        let category = normalize_category(category);
        let state = self.lock();
        let mut items: Vec<NewsItem> = state
            .items
            .iter()
            .rev()
            .filter(|n| n.category == category)
            .take(limit)
            .cloned()
            .collect();
        items.reverse();
        items
    }

    /// The newest `limit` items of any category, oldest first.
    #[must_use]
    pub fn query_all(&self, limit: usize) -> Vec<NewsItem> {
        let state = self.lock();
        let skip = state.items.len().saturating_sub(limit);
        state.items.iter().skip(skip).cloned().collect()
    }

    /// Remove items by id.
    ///
    /// Missing ids are reported, not treated as failure.
    pub fn remove_by_ids(&self, ids: &[NewsId]) -> RemoveOutcome {
        let mut state = self.lock();

        let present: HashSet<NewsId> = state.items.iter().map(|n| n.id).collect();
        let mut seen = BTreeSet::new();
        let not_found: Vec<NewsId> = ids
            .iter()
            .copied()
            .filter(|id| !present.contains(id) && seen.insert(*id))
            .collect();

        let doomed: HashSet<NewsId> = ids.iter().copied().filter(|id| present.contains(id)).collect();
        let before = state.items.len();
        state.items.retain(|n| !doomed.contains(&n.id));
        let removed = before - state.items.len();

        if removed > 0 {
            self.persist_logged(&state.items);
            info!(removed, "Removed news items");
        }

        RemoveOutcome { removed, not_found }
    }

    /// Drop every item.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.items.clear();
        self.persist_logged(&state.items);
        info!("News history cleared");
    }

    /// Current number of stored items.
    #[must_use]
    pub fn count(&self) -> usize {
        self.lock().items.len()
    }

    fn persist_logged(&self, items: &VecDeque<NewsItem>) {
        if let Err(e) = self.persist(items) {
            error!(error = %e, "Failed to persist news history");
        }
    }

    fn persist(&self, items: &VecDeque<NewsItem>) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        write_items(path, items).map_err(|source| StoreError::Persistence {
            path: path.clone(),
            source,
        })
    }
}

fn load_items(path: &Path) -> Result<Option<Vec<NewsItem>>, StoreError> {
    let to_err = |source: io::Error| StoreError::Persistence {
        path: path.to_path_buf(),
        source,
    };

    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(to_err(e)),
    };

    let items = serde_json::from_slice(&contents).map_err(|e| to_err(e.into()))?;
    Ok(Some(items))
}

// Write to a sibling file and rename it over the target.
fn write_items(path: &Path, items: &VecDeque<NewsItem>) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let json = serde_json::to_vec_pretty(items)?;
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&json)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ids(items: &[NewsItem]) -> Vec<NewsId> {
        items.iter().map(|n| n.id).collect()
    }

    #[test]
    fn test_append_assigns_increasing_ids() {
        let store = NewsStore::in_memory(10);
        let a = store.append("a", "body", "tech");
        let b = store.append("b", "body", "Sports");

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(b.category, "sports");
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn test_ids_never_reused_after_deletion() {
        let store = NewsStore::in_memory(10);
        let mut seen = Vec::new();
        for i in 0..5 {
            seen.push(store.append(format!("n{i}"), "", "tech").id);
        }
        store.remove_by_ids(&[4, 5]);
        seen.push(store.append("after", "", "tech").id);
        store.clear();
        seen.push(store.append("after clear", "", "tech").id);

        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let store = NewsStore::in_memory(3);
        for i in 0..7 {
            store.append(format!("n{i}"), "", "tech");
        }

        assert_eq!(store.count(), 3);
        assert_eq!(ids(&store.query_all(100)), vec![5, 6, 7]);
    }

    #[test]
    fn test_query_by_category_returns_newest_oldest_first() {
        let store = NewsStore::in_memory(100);
        for i in 0..5 {
            store.append(format!("tech {i}"), "", "tech");
            store.append(format!("sports {i}"), "", "sports");
        }

        let items = store.query_by_category("TECH", 2);
        let titles: Vec<_> = items.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["tech 3", "tech 4"]);
        assert!(items[0].id < items[1].id);

        assert!(store.query_by_category("economy", 10).is_empty());
        assert!(store.query_by_category("tech", 0).is_empty());
    }

    #[test]
    fn test_query_all_limit() {
        let store = NewsStore::in_memory(100);
        for i in 0..4 {
            store.append(format!("n{i}"), "", if i % 2 == 0 { "tech" } else { "culture" });
        }
        assert_eq!(ids(&store.query_all(2)), vec![3, 4]);
        assert_eq!(ids(&store.query_all(50)), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_remove_by_ids_partial() {
        let store = NewsStore::in_memory(100);
        for _ in 0..3 {
            store.append("t", "b", "tech");
        }

        let outcome = store.remove_by_ids(&[2, 9, 3, 9]);
        assert_eq!(
            outcome,
            RemoveOutcome {
                removed: 2,
                not_found: vec![9],
            }
        );
        assert_eq!(ids(&store.query_all(10)), vec![1]);
        assert!(outcome.require_any().is_ok());
    }

    #[test]
    fn test_remove_by_ids_none_found() {
        let store = NewsStore::in_memory(100);
        store.append("t", "b", "tech");

        let outcome = store.remove_by_ids(&[42, 43]);
        assert_eq!(outcome.removed, 0);
        match outcome.require_any() {
            Err(StoreError::NotFound(missing)) => assert_eq!(missing, vec![42, 43]),
            other => panic!("Expected NotFound, got {:?}", other),
        }
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_persistence_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data").join("news.json");

        let store = NewsStore::open(&path, 10);
        store.append("first", "body one", "tech");
        store.append("second", "body two", "culture");
        store.remove_by_ids(&[1]);
        drop(store);

        let reopened = NewsStore::open(&path, 10);
        let items = reopened.query_all(10);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "second");
        assert_eq!(items[0].body, "body two");

        // The counter resumes past the highest persisted id.
        assert_eq!(reopened.append("third", "", "tech").id, 3);
    }

    #[test]
    fn test_loads_history_with_naive_timestamps() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news.json");
        std::fs::write(
            &path,
            r#"[
                {"id": 1, "title": "A", "lead": "first", "category": "tech", "timestamp": "2024-05-01T12:00:00.123456"},
                {"id": 2, "title": "B", "lead": "second", "category": "sports", "timestamp": "2024-05-01T12:05:00"}
            ]"#,
        )
        .unwrap();

        let store = NewsStore::open(&path, 10);
        assert_eq!(store.count(), 2);
        assert_eq!(store.query_by_category("tech", 10)[0].body, "first");
        assert_eq!(store.append("C", "third", "tech").id, 3);

        // The rewritten file still loads in full.
        drop(store);
        assert_eq!(NewsStore::open(&path, 10).count(), 3);
    }

    #[test]
    fn test_clear_persists_empty_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news.json");

        let store = NewsStore::open(&path, 10);
        store.append("a", "b", "tech");
        store.clear();
        assert_eq!(store.count(), 0);

        let on_disk: Vec<NewsItem> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!(on_disk.is_empty());
    }

    #[test]
    fn test_corrupt_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news.json");
        std::fs::write(&path, b"{ this is not json").unwrap();

        let store = NewsStore::open(&path, 10);
        assert_eq!(store.count(), 0);
        assert_eq!(store.append("fresh", "", "tech").id, 1);

        let reopened = NewsStore::open(&path, 10);
        assert_eq!(reopened.count(), 1);
    }

    #[test]
    fn test_loaded_history_is_capped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("news.json");

        let store = NewsStore::open(&path, 10);
        for i in 0..6 {
            store.append(format!("n{i}"), "", "tech");
        }
        drop(store);

        let smaller = NewsStore::open(&path, 4);
        assert_eq!(ids(&smaller.query_all(10)), vec![3, 4, 5, 6]);
        assert_eq!(smaller.append("next", "", "tech").id, 7);
    }

    #[test]
    fn test_write_failure_keeps_memory_state() {
        let dir = tempdir().unwrap();
        // A directory where the file should be makes every rename fail.
        let path = dir.path().join("news.json");
        std::fs::create_dir(&path).unwrap();

        let store = NewsStore::open(&path, 10);
        let item = store.append("still stored", "", "tech");
        assert_eq!(item.id, 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn test_concurrent_appends_have_distinct_ids() {
        let store = std::sync::Arc::new(NewsStore::in_memory(1000));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = std::sync::Arc::clone(&store);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| store.append(format!("{t}-{i}"), "", "tech").id)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<NewsId> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 200);
        assert_eq!(ids(&store.query_all(1000)), (1..=200).collect::<Vec<_>>());
    }
}
