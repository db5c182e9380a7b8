use tracing::info;

use crate::core::errors::{BlogError, BlogResult};
use crate::models::{Actor, User};
use crate::page_cache::{invalidate_follow_pages, PageCache};
use crate::repository::Repository;

/// Result of a follow request. Following twice is not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowOutcome {
    Followed,
    AlreadyFollowing,
}

fn author_by_username<R: Repository + ?Sized>(repo: &R, username: &str) -> BlogResult<User> {
    repo.find_user_by_username(username)?
        .ok_or_else(|| BlogError::NotFound(format!("user {}", username)))
}

pub fn follow_author<R, C>(repo: &R, cache: &C, actor: &Actor, author_username: &str) -> BlogResult<FollowOutcome>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    let user = actor.user().ok_or(BlogError::Unauthorized)?;
    let author = author_by_username(repo, author_username)?;
    if author.id == user.id {
        return Err(BlogError::validation("author", "You cannot follow yourself."));
    }

    if !repo.insert_follow(&user.id, &author.id)? {
        return Ok(FollowOutcome::AlreadyFollowing);
    }
    info!(user = %user.username, author = %author.username, "followed");

    invalidate_follow_pages(cache, &user.id);
    Ok(FollowOutcome::Followed)
}

/// Remove the subscription if there is one.
pub fn unfollow_author<R, C>(repo: &R, cache: &C, actor: &Actor, author_username: &str) -> BlogResult<()>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    let user = actor.user().ok_or(BlogError::Unauthorized)?;
    let author = author_by_username(repo, author_username)?;

    if repo.delete_follow(&user.id, &author.id)? {
        info!(user = %user.username, author = %author.username, "unfollowed");
        invalidate_follow_pages(cache, &user.id);
    }
    Ok(())
}

pub fn is_following<R: Repository + ?Sized>(repo: &R, actor: &Actor, author_id: &str) -> BlogResult<bool> {
    match actor.id() {
        Some(id) => Ok(repo.get_follow(id, author_id)?.is_some()),
        None => Ok(false),
    }
}
