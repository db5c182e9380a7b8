use std::sync::OnceLock;

use html_escape::{encode_double_quoted_attribute, encode_text};
use regex::Regex;
use tracing::info;

use crate::core::errors::{BlogError, BlogResult};
use crate::core::helpers::now;
use crate::models::{Actor, Post};
use crate::page_cache::{invalidate_for_author, PageCache};
use crate::repository::{new_post, Repository};

/// Fields of the post form.
#[derive(Clone, Debug, Default)]
pub struct PostDraft {
    pub text: String,
    pub group: Option<String>,
    pub image: Option<String>,
}

/// Partial update: `None` leaves the field as it is.
#[derive(Clone, Debug, Default)]
pub struct PostChanges {
    pub text: Option<String>,
    pub group: Option<Option<String>>,
    pub image: Option<Option<String>>,
}

fn require_text(text: &str) -> BlogResult<()> {
    if text.trim().is_empty() {
        return Err(BlogError::required("text"));
    }
    Ok(())
}

fn check_group<R: Repository + ?Sized>(repo: &R, group: Option<&str>) -> BlogResult<()> {
    if let Some(slug) = group {
        if repo.get_group(slug)?.is_none() {
            return Err(BlogError::validation(
                "group",
                "Select a valid choice. That choice is not one of the available choices.",
            ));
        }
    }
    Ok(())
}

/// Load a post and make sure `actor` wrote it.
fn owned_post<R: Repository + ?Sized>(repo: &R, actor: &Actor, post_id: &str) -> BlogResult<Post> {
    let post = repo
        .get_post(post_id)?
        .ok_or_else(|| BlogError::NotFound(format!("post {}", post_id)))?;
    match actor.id() {
        Some(id) if id == post.author_id => Ok(post),
        _ => Err(BlogError::Unauthorized),
    }
}

pub fn create_post<R, C>(repo: &R, cache: &C, actor: &Actor, draft: PostDraft) -> BlogResult<Post>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    let author = actor.user().ok_or(BlogError::Unauthorized)?;
    require_text(&draft.text)?;
    check_group(repo, draft.group.as_deref())?;

    let post = new_post(&author.id, &draft.text, draft.group, draft.image);
    repo.insert_post(&post)?;
    info!(post_id = %post.id, author = %author.username, "post created");

    invalidate_for_author(cache, repo, &author.id);
    Ok(post)
}

pub fn edit_post<R, C>(repo: &R, cache: &C, actor: &Actor, post_id: &str, changes: PostChanges) -> BlogResult<Post>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    let mut post = owned_post(repo, actor, post_id)?;

    if let Some(text) = changes.text {
        require_text(&text)?;
        post.text = text;
    }
    if let Some(group) = changes.group {
        check_group(repo, group.as_deref())?;
        post.group_slug = group;
    }
    if let Some(image) = changes.image {
        post.image = image;
    }
    post.updated_at = Some(now());

    repo.update_post(&post)?;
    info!(post_id = %post.id, "post edited");

    invalidate_for_author(cache, repo, &post.author_id);
    Ok(post)
}

pub fn delete_post<R, C>(repo: &R, cache: &C, actor: &Actor, post_id: &str) -> BlogResult<()>
where
    R: Repository + ?Sized,
    C: PageCache + ?Sized,
{
    let post = owned_post(repo, actor, post_id)?;
    repo.delete_post(&post.id)?;
    info!(post_id = %post.id, "post deleted");

    invalidate_for_author(cache, repo, &post.author_id);
    Ok(())
}

fn url_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"https?://[^\s<]+").expect("Regex should compile"))
}

/// Post text as HTML: escaped, line breaks kept, URLs made clickable.
/// URLs are found in the raw text so each piece is escaped exactly once.
pub fn render_text(text: &str) -> String {
    let mut html = String::with_capacity(text.len());
    let mut last = 0;
    for url in url_regex().find_iter(text) {
        html.push_str(&encode_text(&text[last..url.start()]));
        html.push_str(&format!(
            r#"<a href="{}" target="_blank" rel="noopener noreferrer">{}</a>"#,
            encode_double_quoted_attribute(url.as_str()),
            encode_text(url.as_str())
        ));
        last = url.end();
    }
    html.push_str(&encode_text(&text[last..]));
    html.replace('\n', "<br>\n")
}
