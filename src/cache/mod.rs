use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Invalidation scope label. Cached aggregates carry a composite tag set
/// (role scope, entity scope, owning user) so a status change evicts
/// exactly the affected scopes and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    /// Everything cached for one student's own view.
    pub fn student(user_id: Uuid) -> Self {
        Tag(format!("student:{}", user_id))
    }

    /// Staff aggregates are computed across all users, so every payment or
    /// concept change invalidates this scope.
    pub fn staff() -> Self {
        Tag("staff".to_string())
    }

    pub fn entity(kind: &str) -> Self {
        Tag(format!("entity:{}", kind))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The tag set flushed when a payment belonging to `user_id` changes
/// status. Both scopes, unconditionally: the student sees their own
/// dashboard, staff totals span everyone.
pub fn payment_scope_tags(user_id: Uuid) -> Vec<Tag> {
    vec![Tag::student(user_id), Tag::staff()]
}

/// Deterministic composite cache key.
pub fn make_key(prefix: &str, suffix: &str) -> String {
    format!("{}:{}", prefix, suffix)
}

struct Entry {
    value: serde_json::Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, Entry>,
    /// Explicit tag -> key index so invalidation scope is first-class and
    /// testable, not a property of the backing store.
    tag_index: HashMap<Tag, HashSet<String>>,
    key_tags: HashMap<String, HashSet<Tag>>,
}

impl CacheInner {
    fn remove_key(&mut self, key: &str) {
        self.entries.remove(key);
        if let Some(tags) = self.key_tags.remove(key) {
            for tag in tags {
                if let Some(keys) = self.tag_index.get_mut(&tag) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.tag_index.remove(&tag);
                    }
                }
            }
        }
    }
}

/// In-memory tag-scoped cache for derived aggregates (dashboards, pending/
/// paid/overdue totals, staff summaries). TTL entries expire lazily on read.
#[derive(Default)]
pub struct CacheService {
    inner: RwLock<CacheInner>,
}

impl CacheService {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        {
            let inner = self.inner.read().await;
            match inner.entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    return serde_json::from_value(entry.value.clone()).ok();
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so the tag index stays honest.
        self.inner.write().await.remove_key(key);
        None
    }

    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        tags: &[Tag],
    ) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| AppError::Internal(format!("cache serialize: {}", e)))?;
        let mut inner = self.inner.write().await;
        inner.remove_key(key);
        inner.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        let tag_set: HashSet<Tag> = tags.iter().cloned().collect();
        for tag in &tag_set {
            inner
                .tag_index
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
        inner.key_tags.insert(key.to_string(), tag_set);
        Ok(())
    }

    /// Cache-aside helper: return the cached value or compute, store and
    /// return it.
    pub async fn remember<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        tags: &[Tag],
        compute: F,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }
        let value = compute().await?;
        self.put(key, &value, ttl, tags).await?;
        Ok(value)
    }

    pub async fn increment(&self, key: &str, delta: i64) -> Result<i64> {
        let mut inner = self.inner.write().await;
        let current = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired() => entry.value.as_i64().unwrap_or(0),
            _ => 0,
        };
        let next = current + delta;
        match inner.entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => entry.value = serde_json::json!(next),
            _ => {
                inner.entries.insert(
                    key.to_string(),
                    Entry {
                        value: serde_json::json!(next),
                        expires_at: None,
                    },
                );
            }
        }
        Ok(next)
    }

    pub async fn decrement(&self, key: &str, delta: i64) -> Result<i64> {
        self.increment(key, -delta).await
    }

    /// Evicts every key carrying any of the given tags. The whole point:
    /// no global flush, just the named scopes.
    pub async fn flush_tags(&self, tags: &[Tag]) -> usize {
        let mut inner = self.inner.write().await;
        let keys: HashSet<String> = tags
            .iter()
            .filter_map(|tag| inner.tag_index.get(tag))
            .flatten()
            .cloned()
            .collect();
        for key in &keys {
            inner.remove_key(key);
        }
        keys.len()
    }

    pub async fn remove(&self, key: &str) {
        self.inner.write().await.remove_key(key);
    }
}
