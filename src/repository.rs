//! Per-entity persistence traits and their key-value implementation.
//!
//! Lists of ids are stored as JSON arrays under well-known keys (see
//! [`crate::config`]); entities are stored as JSON under `{kind}:{id}`.

use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::*;
use crate::core::db::KeyValue;
use crate::core::helpers::{new_id, now};
use crate::models::{Comment, Follow, Group, Post, TokenData, User};

pub trait UserRepository {
    fn create_user(&self, username: &str, password_hash: &str) -> anyhow::Result<User>;
    fn get_user(&self, id: &str) -> anyhow::Result<Option<User>>;
    fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>>;

    fn insert_token(&self, token: &str, data: &TokenData) -> anyhow::Result<()>;
    fn get_token(&self, token: &str) -> anyhow::Result<Option<TokenData>>;
    fn delete_token(&self, token: &str) -> anyhow::Result<()>;
}

pub trait GroupRepository {
    /// Returns `false` without writing when the slug is already taken.
    fn insert_group(&self, group: &Group) -> anyhow::Result<bool>;
    fn get_group(&self, slug: &str) -> anyhow::Result<Option<Group>>;
    fn list_groups(&self) -> anyhow::Result<Vec<Group>>;
    /// Posts of the group stay, with their group cleared.
    fn delete_group(&self, slug: &str) -> anyhow::Result<()>;
}

pub trait PostRepository {
    fn insert_post(&self, post: &Post) -> anyhow::Result<()>;
    fn get_post(&self, id: &str) -> anyhow::Result<Option<Post>>;
    fn update_post(&self, post: &Post) -> anyhow::Result<()>;
    /// Removes the post and every comment under it.
    fn delete_post(&self, id: &str) -> anyhow::Result<()>;
    /// All posts, newest first.
    fn list_posts(&self) -> anyhow::Result<Vec<Post>>;
}

pub trait CommentRepository {
    fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()>;
    /// Comments of a post, oldest first.
    fn list_comments(&self, post_id: &str) -> anyhow::Result<Vec<Comment>>;
    fn count_comments(&self, post_id: &str) -> anyhow::Result<usize>;
    fn delete_comments(&self, post_id: &str) -> anyhow::Result<()>;
}

pub trait FollowRepository {
    /// Returns `false` without writing when the pair already exists.
    fn insert_follow(&self, user_id: &str, author_id: &str) -> anyhow::Result<bool>;
    /// Returns whether a row was removed.
    fn delete_follow(&self, user_id: &str, author_id: &str) -> anyhow::Result<bool>;
    fn get_follow(&self, user_id: &str, author_id: &str) -> anyhow::Result<Option<Follow>>;
    /// Ids of the authors `user_id` follows.
    fn list_followings(&self, user_id: &str) -> anyhow::Result<Vec<String>>;
    /// Ids of the users following `author_id`.
    fn list_followers(&self, author_id: &str) -> anyhow::Result<Vec<String>>;
}

pub trait Repository:
    UserRepository + GroupRepository + PostRepository + CommentRepository + FollowRepository
{
}

impl<T> Repository for T where
    T: UserRepository + GroupRepository + PostRepository + CommentRepository + FollowRepository
{
}

/// All repositories over one key-value backend.
///
/// Read-modify-write sequences on id lists hold `write_lock` so that
/// concurrent requests in one process cannot lose updates.
#[derive(Clone)]
pub struct KvRepository<S: KeyValue> {
    store: S,
    write_lock: Arc<Mutex<()>>,
}

impl<S: KeyValue> KvRepository<S> {
    pub fn new(store: S) -> Self {
        KvRepository {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, ()>> {
        self.write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("repository write lock poisoned"))
    }

    fn id_list(&self, key: &str) -> anyhow::Result<Vec<String>> {
        Ok(self.store.get_json(key)?.unwrap_or_default())
    }

    fn load_all<T: serde::de::DeserializeOwned>(
        &self,
        ids: &[String],
        key: fn(&str) -> String,
    ) -> anyhow::Result<Vec<T>> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self.store.get_json::<T>(&key(id))? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

impl<S: KeyValue> UserRepository for KvRepository<S> {
    fn create_user(&self, username: &str, password_hash: &str) -> anyhow::Result<User> {
        let _guard = self.lock()?;
        if self.store.get(&username_key(username))?.is_some() {
            anyhow::bail!("username {} already exists", username);
        }

        let user = User {
            id: new_id(),
            username: username.to_string(),
            password: password_hash.to_string(),
        };
        self.store.set_json(&user_key(&user.id), &user)?;
        self.store.set_json(&username_key(username), &user.id)?;
        Ok(user)
    }

    fn get_user(&self, id: &str) -> anyhow::Result<Option<User>> {
        self.store.get_json(&user_key(id))
    }

    fn find_user_by_username(&self, username: &str) -> anyhow::Result<Option<User>> {
        match self.store.get_json::<String>(&username_key(username))? {
            Some(id) => self.get_user(&id),
            None => Ok(None),
        }
    }

    fn insert_token(&self, token: &str, data: &TokenData) -> anyhow::Result<()> {
        self.store.set_json(&token_key(token), data)
    }

    fn get_token(&self, token: &str) -> anyhow::Result<Option<TokenData>> {
        self.store.get_json(&token_key(token))
    }

    fn delete_token(&self, token: &str) -> anyhow::Result<()> {
        self.store.delete(&token_key(token))
    }
}

impl<S: KeyValue> GroupRepository for KvRepository<S> {
    fn insert_group(&self, group: &Group) -> anyhow::Result<bool> {
        let _guard = self.lock()?;
        if self.store.get(&group_key(&group.slug))?.is_some() {
            return Ok(false);
        }
        self.store.set_json(&group_key(&group.slug), group)?;
        let mut slugs = self.id_list(GROUPS_LIST_KEY)?;
        slugs.push(group.slug.clone());
        self.store.set_json(GROUPS_LIST_KEY, &slugs)?;
        Ok(true)
    }

    fn get_group(&self, slug: &str) -> anyhow::Result<Option<Group>> {
        self.store.get_json(&group_key(slug))
    }

    fn list_groups(&self) -> anyhow::Result<Vec<Group>> {
        let slugs = self.id_list(GROUPS_LIST_KEY)?;
        self.load_all(&slugs, group_key)
    }

    fn delete_group(&self, slug: &str) -> anyhow::Result<()> {
        let _guard = self.lock()?;
        for id in self.id_list(FEED_KEY)? {
            if let Some(mut post) = self.store.get_json::<Post>(&post_key(&id))? {
                if post.group_slug.as_deref() == Some(slug) {
                    post.group_slug = None;
                    self.store.set_json(&post_key(&id), &post)?;
                }
            }
        }
        self.store.delete(&group_key(slug))?;
        let mut slugs = self.id_list(GROUPS_LIST_KEY)?;
        slugs.retain(|s| s != slug);
        self.store.set_json(GROUPS_LIST_KEY, &slugs)
    }
}

impl<S: KeyValue> PostRepository for KvRepository<S> {
    fn insert_post(&self, post: &Post) -> anyhow::Result<()> {
        let _guard = self.lock()?;
        self.store.set_json(&post_key(&post.id), post)?;

        // Prepend: the feed list is kept newest first
        let mut feed = self.id_list(FEED_KEY)?;
        feed.insert(0, post.id.clone());
        self.store.set_json(FEED_KEY, &feed)
    }

    fn get_post(&self, id: &str) -> anyhow::Result<Option<Post>> {
        self.store.get_json(&post_key(id))
    }

    fn update_post(&self, post: &Post) -> anyhow::Result<()> {
        let _guard = self.lock()?;
        if self.store.get(&post_key(&post.id))?.is_none() {
            anyhow::bail!("post {} does not exist", post.id);
        }
        self.store.set_json(&post_key(&post.id), post)
    }

    fn delete_post(&self, id: &str) -> anyhow::Result<()> {
        self.delete_comments(id)?;

        let _guard = self.lock()?;
        self.store.delete(&post_key(id))?;
        let mut feed = self.id_list(FEED_KEY)?;
        feed.retain(|p| p != id);
        self.store.set_json(FEED_KEY, &feed)
    }

    fn list_posts(&self) -> anyhow::Result<Vec<Post>> {
        let feed = self.id_list(FEED_KEY)?;
        self.load_all(&feed, post_key)
    }
}

impl<S: KeyValue> CommentRepository for KvRepository<S> {
    fn insert_comment(&self, comment: &Comment) -> anyhow::Result<()> {
        let _guard = self.lock()?;
        self.store.set_json(&comment_key(&comment.id), comment)?;
        let mut ids = self.id_list(&comments_key(&comment.post_id))?;
        ids.push(comment.id.clone());
        self.store.set_json(&comments_key(&comment.post_id), &ids)
    }

    fn list_comments(&self, post_id: &str) -> anyhow::Result<Vec<Comment>> {
        let ids = self.id_list(&comments_key(post_id))?;
        self.load_all(&ids, comment_key)
    }

    fn count_comments(&self, post_id: &str) -> anyhow::Result<usize> {
        Ok(self.id_list(&comments_key(post_id))?.len())
    }

    fn delete_comments(&self, post_id: &str) -> anyhow::Result<()> {
        let _guard = self.lock()?;
        for id in self.id_list(&comments_key(post_id))? {
            self.store.delete(&comment_key(&id))?;
        }
        self.store.delete(&comments_key(post_id))
    }
}

impl<S: KeyValue> FollowRepository for KvRepository<S> {
    fn insert_follow(&self, user_id: &str, author_id: &str) -> anyhow::Result<bool> {
        let _guard = self.lock()?;
        let key = follow_key(user_id, author_id);
        if self.store.get(&key)?.is_some() {
            return Ok(false);
        }

        let follow = Follow {
            id: new_id(),
            user_id: user_id.to_string(),
            author_id: author_id.to_string(),
        };
        self.store.set_json(&key, &follow)?;

        let mut followings = self.id_list(&followings_key(user_id))?;
        followings.push(author_id.to_string());
        self.store.set_json(&followings_key(user_id), &followings)?;

        let mut followers = self.id_list(&followers_key(author_id))?;
        followers.push(user_id.to_string());
        self.store.set_json(&followers_key(author_id), &followers)?;

        Ok(true)
    }

    fn delete_follow(&self, user_id: &str, author_id: &str) -> anyhow::Result<bool> {
        let _guard = self.lock()?;
        let key = follow_key(user_id, author_id);
        if self.store.get(&key)?.is_none() {
            return Ok(false);
        }
        self.store.delete(&key)?;

        let mut followings = self.id_list(&followings_key(user_id))?;
        followings.retain(|id| id != author_id);
        self.store.set_json(&followings_key(user_id), &followings)?;

        let mut followers = self.id_list(&followers_key(author_id))?;
        followers.retain(|id| id != user_id);
        self.store.set_json(&followers_key(author_id), &followers)?;

        Ok(true)
    }

    fn get_follow(&self, user_id: &str, author_id: &str) -> anyhow::Result<Option<Follow>> {
        self.store.get_json(&follow_key(user_id, author_id))
    }

    fn list_followings(&self, user_id: &str) -> anyhow::Result<Vec<String>> {
        self.id_list(&followings_key(user_id))
    }

    fn list_followers(&self, author_id: &str) -> anyhow::Result<Vec<String>> {
        self.id_list(&followers_key(author_id))
    }
}

/// Timestamped record builders shared by the mutation layer and tests.
pub fn new_post(author_id: &str, text: &str, group_slug: Option<String>, image: Option<String>) -> Post {
    Post {
        id: new_id(),
        author_id: author_id.to_string(),
        text: text.to_string(),
        created_at: now(),
        updated_at: None,
        group_slug,
        image,
    }
}

pub fn new_comment(post_id: &str, author_id: &str, text: &str) -> Comment {
    Comment {
        id: new_id(),
        post_id: post_id.to_string(),
        author_id: author_id.to_string(),
        text: text.to_string(),
        created_at: now(),
    }
}
