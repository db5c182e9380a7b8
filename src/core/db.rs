use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use spin_sdk::key_value::Store;
use tracing::info;

use crate::core::helpers::hash_password;
use crate::follow::follow_author;
use crate::groups::create_group;
use crate::models::{Actor, User};
use crate::page_cache::PageCache;
use crate::posts::{create_post, PostDraft};
use crate::repository::{Repository, UserRepository};

/// Byte-oriented key-value storage. Everything the service persists goes
/// through this trait, either to the Spin store or to [`MemoryStore`].
pub trait KeyValue {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        Self: Sized,
    {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>
    where
        Self: Sized,
    {
        self.set(key, &serde_json::to_vec(value)?)
    }
}

impl KeyValue for Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(Store::get(self, key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(Store::set(self, key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(Store::delete(self, key)?)
    }
}

/// Process-wide key-value map used by the native server and by tests.
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValue for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

fn ensure_user<R: Repository + ?Sized>(repo: &R, username: &str) -> anyhow::Result<User> {
    if let Some(user) = repo.find_user_by_username(username)? {
        return Ok(user);
    }
    repo.create_user(username, &hash_password(username)?)
}

/// Seed demo accounts and content. Safe to call on every start: nothing is
/// created twice.
pub fn init_demo_data<R, C>(repo: &R, cache: &C) -> anyhow::Result<()>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    if repo.find_user_by_username("test")?.is_some() {
        return Ok(()); // Already initialized
    }

    let test = ensure_user(repo, "test")?;
    let alice = ensure_user(repo, "alice")?;
    let bob = ensure_user(repo, "bob")?;

    let cats = create_group(repo, "Cats", Some("cats"), "Everything about cats")?;

    let seed_posts = [
        (&test, "This is my first post on Quill!", None),
        (&alice, "Welcome to my blog! Excited to share thoughts here.", None),
        (&alice, "Our cat learned to open the fridge today.", Some(cats.slug.clone())),
        (&bob, "Hey everyone! Just joined, looking forward to connecting with you all.", None),
    ];

    for (author, text, group) in seed_posts {
        let draft = PostDraft {
            text: text.to_string(),
            group,
            image: None,
        };
        create_post(repo, cache, &Actor::Authenticated(author.clone()), draft)?;
    }

    follow_author(repo, cache, &Actor::Authenticated(test.clone()), &bob.username)?;

    info!(users = 3, "demo data seeded");
    Ok(())
}
