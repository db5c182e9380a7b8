use tracing::{info, warn};

use crate::core::errors::{BlogError, BlogResult};
use crate::config::HOME_PAGE_CACHE_KEY;
use crate::models::{Actor, Comment};
use crate::page_cache::PageCache;
use crate::repository::{new_comment, Repository};

/// Append a comment to a post. Anonymous actors are refused before anything
/// is looked up.
pub fn add_comment<R, C>(repo: &R, cache: &C, actor: &Actor, post_id: &str, text: &str) -> BlogResult<Comment>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    let author = actor.user().ok_or(BlogError::Unauthorized)?;
    if repo.get_post(post_id)?.is_none() {
        return Err(BlogError::NotFound(format!("post {}", post_id)));
    }
    if text.trim().is_empty() {
        return Err(BlogError::required("text"));
    }

    let comment = new_comment(post_id, &author.id, text);
    repo.insert_comment(&comment)?;
    info!(post_id, comment_id = %comment.id, author = %author.username, "comment added");

    // Listings show comment counts
    if cache.invalidates_on_write() {
        if let Err(e) = cache.invalidate_prefix(HOME_PAGE_CACHE_KEY) {
            warn!(error = %e, "page cache invalidation failed");
        }
    }
    Ok(comment)
}
