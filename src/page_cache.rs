//! TTL cache for rendered pages.
//!
//! An entry is either absent or holds a blob with an expiry time. A read
//! after expiry removes the entry; `clear` and `invalidate_prefix` remove
//! entries at once. Writes are last-writer-wins.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{page_cache_key, FOLLOW_PAGE_CACHE_KEY, HOME_PAGE_CACHE_KEY, PAGE_CACHE_INDEX_KEY};
use crate::core::db::KeyValue;
use crate::core::errors::BlogResult;

pub trait PageCache {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, blob: &[u8]) -> anyhow::Result<()>;
    /// Drop every entry.
    fn clear(&self) -> anyhow::Result<()>;
    /// Drop every entry whose key starts with `prefix`.
    fn invalidate_prefix(&self, prefix: &str) -> anyhow::Result<()>;
    /// Whether the mutation layer should invalidate pages it affects.
    fn invalidates_on_write(&self) -> bool;
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Serialize, Deserialize)]
struct CachedPage {
    body: Vec<u8>,
    expires_at: DateTime<Utc>,
}

/// [`PageCache`] kept in a key-value store under `page:{key}`, with a key
/// index so the whole cache can be cleared.
#[derive(Clone)]
pub struct KvPageCache<S: KeyValue> {
    store: S,
    ttl: Duration,
    invalidate_on_write: bool,
    clock: Clock,
    index_lock: Arc<Mutex<()>>,
}

impl<S: KeyValue> KvPageCache<S> {
    pub fn new(store: S, ttl: Duration, invalidate_on_write: bool) -> Self {
        Self::with_clock(store, ttl, invalidate_on_write, Arc::new(Utc::now))
    }

    pub fn with_clock(store: S, ttl: Duration, invalidate_on_write: bool, clock: Clock) -> Self {
        KvPageCache {
            store,
            ttl,
            invalidate_on_write,
            clock,
            index_lock: Arc::new(Mutex::new(())),
        }
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.store.get_json(PAGE_CACHE_INDEX_KEY)?.unwrap_or_default())
    }

    fn remove_matching(&self, matches: impl Fn(&str) -> bool) -> anyhow::Result<usize> {
        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("page cache lock poisoned"))?;
        let (dropped, kept): (Vec<String>, Vec<String>) =
            self.keys()?.into_iter().partition(|k| matches(k));
        for key in &dropped {
            self.store.delete(&page_cache_key(key))?;
        }
        self.store.set_json(PAGE_CACHE_INDEX_KEY, &kept)?;
        Ok(dropped.len())
    }
}

impl<S: KeyValue> PageCache for KvPageCache<S> {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let Some(entry) = self.store.get_json::<CachedPage>(&page_cache_key(key))? else {
            return Ok(None);
        };
        if (self.clock)() >= entry.expires_at {
            debug!(key, "page cache entry expired");
            self.remove_matching(|k| k == key)?;
            return Ok(None);
        }
        Ok(Some(entry.body))
    }

    fn set(&self, key: &str, blob: &[u8]) -> anyhow::Result<()> {
        let entry = CachedPage {
            body: blob.to_vec(),
            expires_at: (self.clock)() + self.ttl,
        };
        self.store.set_json(&page_cache_key(key), &entry)?;

        let _guard = self
            .index_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("page cache lock poisoned"))?;
        let mut keys = self.keys()?;
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
            self.store.set_json(PAGE_CACHE_INDEX_KEY, &keys)?;
        }
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        let dropped = self.remove_matching(|_| true)?;
        debug!(dropped, "page cache cleared");
        Ok(())
    }

    fn invalidate_prefix(&self, prefix: &str) -> anyhow::Result<()> {
        let dropped = self.remove_matching(|k| k.starts_with(prefix))?;
        debug!(prefix, dropped, "page cache prefix invalidated");
        Ok(())
    }

    fn invalidates_on_write(&self) -> bool {
        self.invalidate_on_write
    }
}

pub fn home_page_key(page: &str, anchor: Option<&str>) -> String {
    format!("{}:{}:{}", HOME_PAGE_CACHE_KEY, page, anchor.unwrap_or(""))
}

pub fn follow_page_prefix(user_id: &str) -> String {
    format!("{}:{}:", FOLLOW_PAGE_CACHE_KEY, user_id)
}

pub fn follow_page_key(user_id: &str, page: &str, anchor: Option<&str>) -> String {
    format!("{}{}:{}", follow_page_prefix(user_id), page, anchor.unwrap_or(""))
}

/// Serve `key` from the cache, or render, store and return it. A failing
/// cache backend degrades to rendering on every request.
pub fn get_or_render<C, F>(cache: &C, key: &str, render: F) -> BlogResult<Vec<u8>>
where
    C: PageCache + ?Sized,
    F: FnOnce() -> BlogResult<Vec<u8>>,
{
    get_or_render_if(cache, key, || Ok((render()?, true)))
}

/// Like [`get_or_render`], but the renderer also says whether its output may
/// be stored. Pages that only exist for odd requests (past the last page, an
/// anchor outside the listing) are served without filling the cache.
pub fn get_or_render_if<C, F>(cache: &C, key: &str, render: F) -> BlogResult<Vec<u8>>
where
    C: PageCache + ?Sized,
    F: FnOnce() -> BlogResult<(Vec<u8>, bool)>,
{
    match cache.get(key) {
        Ok(Some(blob)) => {
            debug!(key, "page cache hit");
            return Ok(blob);
        }
        Ok(None) => debug!(key, "page cache miss"),
        Err(e) => warn!(key, error = %e, "page cache read failed"),
    }

    let (blob, cacheable) = render()?;
    if !cacheable {
        debug!(key, "page not cached");
        return Ok(blob);
    }
    if let Err(e) = cache.set(key, &blob) {
        warn!(key, error = %e, "page cache write failed");
    }
    Ok(blob)
}

/// Invalidation after a post by `author_id` was created, changed or removed:
/// the home page and the follow pages of the author's followers.
pub fn invalidate_for_author<C, R>(cache: &C, repo: &R, author_id: &str)
where
    C: PageCache + ?Sized,
    R: crate::repository::FollowRepository + ?Sized,
{
    if !cache.invalidates_on_write() {
        return;
    }
    let mut prefixes = vec![HOME_PAGE_CACHE_KEY.to_string()];
    match repo.list_followers(author_id) {
        Ok(followers) => prefixes.extend(followers.iter().map(|f| follow_page_prefix(f))),
        Err(e) => warn!(author_id, error = %e, "could not load followers for invalidation"),
    }
    for prefix in prefixes {
        if let Err(e) = cache.invalidate_prefix(&prefix) {
            warn!(prefix = %prefix, error = %e, "page cache invalidation failed");
        }
    }
}

/// Invalidation after `user_id` followed or unfollowed someone.
pub fn invalidate_follow_pages<C: PageCache + ?Sized>(cache: &C, user_id: &str) {
    if !cache.invalidates_on_write() {
        return;
    }
    if let Err(e) = cache.invalidate_prefix(&follow_page_prefix(user_id)) {
        warn!(user_id, error = %e, "page cache invalidation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::MemoryStore;

    fn manual_clock() -> (Arc<Mutex<DateTime<Utc>>>, Clock) {
        let now = Arc::new(Mutex::new(Utc::now()));
        let handle = now.clone();
        let clock: Clock = Arc::new(move || *handle.lock().unwrap());
        (now, clock)
    }

    #[test]
    fn entry_lives_until_ttl_elapses() {
        let (now, clock) = manual_clock();
        let cache = KvPageCache::with_clock(MemoryStore::new(), Duration::seconds(20), true, clock);

        assert_eq!(cache.get("home-page:1:").unwrap(), None);
        cache.set("home-page:1:", b"<p>P1</p>").unwrap();

        *now.lock().unwrap() += Duration::seconds(19);
        assert_eq!(cache.get("home-page:1:").unwrap().as_deref(), Some(&b"<p>P1</p>"[..]));

        *now.lock().unwrap() += Duration::seconds(1);
        assert_eq!(cache.get("home-page:1:").unwrap(), None);
        assert!(cache.keys().unwrap().is_empty());
    }

    #[test]
    fn uncacheable_renders_leave_no_entry() {
        let cache = KvPageCache::new(MemoryStore::new(), Duration::seconds(60), true);
        for i in 0..5 {
            let blob = get_or_render_if(&cache, &format!("home-page:{}:", i), || Ok((b"empty".to_vec(), false)))
                .unwrap();
            assert_eq!(blob, b"empty");
        }
        assert!(cache.keys().unwrap().is_empty());
    }

    #[test]
    fn clear_and_prefix_invalidation() {
        let cache = KvPageCache::new(MemoryStore::new(), Duration::seconds(60), true);
        cache.set(&home_page_key("1", None), b"home").unwrap();
        cache.set(&follow_page_key("alice", "1", None), b"alice feed").unwrap();
        cache.set(&follow_page_key("bob", "1", None), b"bob feed").unwrap();

        cache.invalidate_prefix(&follow_page_prefix("alice")).unwrap();
        assert_eq!(cache.get(&follow_page_key("alice", "1", None)).unwrap(), None);
        assert!(cache.get(&follow_page_key("bob", "1", None)).unwrap().is_some());
        assert!(cache.get(&home_page_key("1", None)).unwrap().is_some());

        cache.clear().unwrap();
        assert_eq!(cache.get(&home_page_key("1", None)).unwrap(), None);
        assert_eq!(cache.get(&follow_page_key("bob", "1", None)).unwrap(), None);
    }

    #[test]
    fn get_or_render_renders_once_per_entry() {
        let cache = KvPageCache::new(MemoryStore::new(), Duration::seconds(60), true);
        let first = get_or_render(&cache, "k", || Ok(b"first".to_vec())).unwrap();
        let second = get_or_render(&cache, "k", || Ok(b"second".to_vec())).unwrap();
        assert_eq!(first, b"first");
        assert_eq!(second, b"first");

        cache.clear().unwrap();
        let third = get_or_render(&cache, "k", || Ok(b"third".to_vec())).unwrap();
        assert_eq!(third, b"third");
    }

    #[test]
    fn follow_prefix_does_not_match_other_users_with_same_start() {
        let cache = KvPageCache::new(MemoryStore::new(), Duration::seconds(60), true);
        cache.set(&follow_page_key("ann", "1", None), b"ann").unwrap();
        cache.set(&follow_page_key("anna", "1", None), b"anna").unwrap();
        cache.invalidate_prefix(&follow_page_prefix("ann")).unwrap();
        assert!(cache.get(&follow_page_key("anna", "1", None)).unwrap().is_some());
    }
}
