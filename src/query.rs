//! Read side: post listings joined with their display metadata, the
//! follow feed, comment threads and pagination.

use std::collections::{HashMap, HashSet};

use crate::core::errors::{BlogError, BlogResult};
use crate::models::{Comment, Group, Post, User};
use crate::repository::Repository;

#[derive(Clone, Debug, Default)]
pub struct PostFilter {
    pub group: Option<String>,
    pub author: Option<String>,
}

impl PostFilter {
    pub fn group(slug: &str) -> Self {
        PostFilter {
            group: Some(slug.to_string()),
            author: None,
        }
    }

    pub fn author(author_id: &str) -> Self {
        PostFilter {
            group: None,
            author: Some(author_id.to_string()),
        }
    }

    fn matches(&self, post: &Post) -> bool {
        let group_ok = match &self.group {
            Some(slug) => post.group_slug.as_deref() == Some(slug.as_str()),
            None => true,
        };
        let author_ok = match &self.author {
            Some(id) => &post.author_id == id,
            None => true,
        };
        group_ok && author_ok
    }
}

/// A post together with what a listing shows next to it.
#[derive(Clone, Debug)]
pub struct PostView {
    pub post: Post,
    pub author: User,
    pub group: Option<Group>,
    pub comment_count: usize,
}

#[derive(Clone, Debug)]
pub struct CommentView {
    pub comment: Comment,
    pub author: User,
}

/// Memoizes user and group lookups for the duration of one listing.
struct Joiner<'a, R: Repository + ?Sized> {
    repo: &'a R,
    users: HashMap<String, User>,
    groups: HashMap<String, Option<Group>>,
}

impl<'a, R: Repository + ?Sized> Joiner<'a, R> {
    fn new(repo: &'a R) -> Self {
        Joiner {
            repo,
            users: HashMap::new(),
            groups: HashMap::new(),
        }
    }

    fn user(&mut self, id: &str) -> BlogResult<Option<User>> {
        if let Some(user) = self.users.get(id) {
            return Ok(Some(user.clone()));
        }
        let user = self.repo.get_user(id)?;
        if let Some(u) = &user {
            self.users.insert(id.to_string(), u.clone());
        }
        Ok(user)
    }

    fn group(&mut self, slug: &str) -> BlogResult<Option<Group>> {
        if let Some(group) = self.groups.get(slug) {
            return Ok(group.clone());
        }
        let group = self.repo.get_group(slug)?;
        self.groups.insert(slug.to_string(), group.clone());
        Ok(group)
    }

    fn post_view(&mut self, post: Post) -> BlogResult<Option<PostView>> {
        // Posts whose author vanished are not shown
        let Some(author) = self.user(&post.author_id)? else {
            return Ok(None);
        };
        let group = match &post.group_slug {
            Some(slug) => self.group(slug)?,
            None => None,
        };
        let comment_count = self.repo.count_comments(&post.id)?;
        Ok(Some(PostView {
            post,
            author,
            group,
            comment_count,
        }))
    }

    fn post_views(&mut self, posts: impl IntoIterator<Item = Post>) -> BlogResult<Vec<PostView>> {
        let mut views = Vec::new();
        for post in posts {
            if let Some(view) = self.post_view(post)? {
                views.push(view);
            }
        }
        Ok(views)
    }
}

/// Posts newest first, optionally restricted to a group and/or an author.
pub fn list_posts<R: Repository + ?Sized>(repo: &R, filter: &PostFilter) -> BlogResult<Vec<PostView>> {
    let posts = repo
        .list_posts()?
        .into_iter()
        .filter(|p| filter.matches(p));
    Joiner::new(repo).post_views(posts)
}

/// Posts of every author `subscriber_id` follows, newest first.
pub fn list_feed<R: Repository + ?Sized>(repo: &R, subscriber_id: &str) -> BlogResult<Vec<PostView>> {
    let followed: HashSet<String> = repo.list_followings(subscriber_id)?.into_iter().collect();
    if followed.is_empty() {
        return Ok(Vec::new());
    }
    let posts = repo
        .list_posts()?
        .into_iter()
        .filter(|p| followed.contains(&p.author_id));
    Joiner::new(repo).post_views(posts)
}

pub fn get_post_view<R: Repository + ?Sized>(repo: &R, post_id: &str) -> BlogResult<PostView> {
    let post = repo
        .get_post(post_id)?
        .ok_or_else(|| BlogError::NotFound(format!("post {}", post_id)))?;
    Joiner::new(repo)
        .post_view(post)?
        .ok_or_else(|| BlogError::NotFound(format!("author of post {}", post_id)))
}

/// Comments of a post, oldest first.
pub fn list_comments<R: Repository + ?Sized>(repo: &R, post_id: &str) -> BlogResult<Vec<CommentView>> {
    let mut joiner = Joiner::new(repo);
    let mut views = Vec::new();
    for comment in repo.list_comments(post_id)? {
        if let Some(author) = joiner.user(&comment.author_id)? {
            views.push(CommentView { comment, author });
        }
    }
    Ok(views)
}

/// Drop posts newer than the anchor post so that later pages keep their
/// contents when new posts arrive at the head. An anchor that is no longer
/// in the sequence is ignored.
pub fn anchor_at(posts: Vec<PostView>, anchor: Option<&str>) -> Vec<PostView> {
    let Some(anchor) = anchor else {
        return posts;
    };
    match posts.iter().position(|v| v.post.id == anchor) {
        Some(start) => posts.into_iter().skip(start).collect(),
        None => posts,
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: usize,
    pub num_pages: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }
}

/// Read the `page` query value: absent or blank means page 1; anything that
/// is not a positive integer is rejected.
pub fn parse_page_number(raw: Option<&str>) -> BlogResult<usize> {
    let raw = match raw.map(str::trim) {
        None | Some("") => return Ok(1),
        Some(raw) => raw,
    };
    let number: i64 = raw
        .parse()
        .map_err(|_| BlogError::validation("page", "Page number is not an integer."))?;
    if number < 1 {
        return Err(BlogError::validation("page", "Page number must be at least 1."));
    }
    usize::try_from(number).map_err(|_| BlogError::validation("page", "Page number is too large."))
}

/// Slice `items` into pages of `page_size`. Pages past the end are empty;
/// an empty sequence still has one (empty) page.
pub fn paginate<T>(items: Vec<T>, page_size: usize, page_number: usize) -> BlogResult<Page<T>> {
    if page_number < 1 {
        return Err(BlogError::validation("page", "Page number must be at least 1."));
    }
    let page_size = page_size.max(1);
    let total = items.len();
    let num_pages = total.div_ceil(page_size).max(1);
    let start = (page_number - 1).saturating_mul(page_size);

    Ok(Page {
        items: items.into_iter().skip(start).take(page_size).collect(),
        number: page_number,
        num_pages,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_page_holds_the_remainder() {
        let items: Vec<u32> = (0..23).collect();
        let last = paginate(items.clone(), 10, 3).unwrap();
        assert_eq!(last.items, vec![20, 21, 22]);
        assert_eq!(last.num_pages, 3);
        assert!(!last.has_next());
        assert!(last.has_previous());

        let exact: Vec<u32> = (0..20).collect();
        let last = paginate(exact, 10, 2).unwrap();
        assert_eq!(last.items.len(), 10);
        assert_eq!(last.num_pages, 2);
    }

    #[test]
    fn out_of_range_page_is_empty() {
        let page = paginate(vec![1, 2, 3], 10, 7).unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.num_pages, 1);

        let empty = paginate(Vec::<u8>::new(), 10, 1).unwrap();
        assert!(empty.items.is_empty());
        assert_eq!(empty.num_pages, 1);
        assert!(!empty.has_next());
    }

    #[test]
    fn page_zero_is_rejected() {
        assert!(matches!(
            paginate(vec![1], 10, 0),
            Err(BlogError::Validation { field: "page", .. })
        ));
    }

    #[test]
    fn page_number_parsing() {
        assert_eq!(parse_page_number(None).unwrap(), 1);
        assert_eq!(parse_page_number(Some("")).unwrap(), 1);
        assert_eq!(parse_page_number(Some("4")).unwrap(), 4);
        assert!(parse_page_number(Some("0")).is_err());
        assert!(parse_page_number(Some("-2")).is_err());
        assert!(parse_page_number(Some("two")).is_err());
    }
}
