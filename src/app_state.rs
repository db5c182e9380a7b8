use crate::config::Settings;
use crate::core::db::{KeyValue, MemoryStore};
use crate::page_cache::KvPageCache;
use crate::repository::KvRepository;

/// Everything a request handler needs: persistence, the page cache and
/// settings. Data and cache may live in different stores.
#[derive(Clone)]
pub struct Blog<S: KeyValue> {
    pub repo: KvRepository<S>,
    pub cache: KvPageCache<S>,
    pub settings: Settings,
}

impl<S: KeyValue> Blog<S> {
    pub fn new(data: S, cache: S, settings: Settings) -> Self {
        let cache = KvPageCache::new(cache, settings.page_cache_ttl, settings.invalidate_on_write);
        Blog {
            repo: KvRepository::new(data),
            cache,
            settings,
        }
    }

    pub fn with_cache(data: S, cache: KvPageCache<S>, settings: Settings) -> Self {
        Blog {
            repo: KvRepository::new(data),
            cache,
            settings,
        }
    }
}

impl Blog<MemoryStore> {
    pub fn in_memory(settings: Settings) -> Self {
        Blog::new(MemoryStore::new(), MemoryStore::new(), settings)
    }
}
