use tracing::info;

use crate::core::errors::{BlogError, BlogResult};
use crate::core::helpers::{is_valid_slug, new_id, slugify};
use crate::models::Group;
use crate::repository::GroupRepository;

/// Create a group. Without an explicit slug one is derived from the title.
pub fn create_group<R: GroupRepository + ?Sized>(
    repo: &R,
    title: &str,
    slug: Option<&str>,
    description: &str,
) -> BlogResult<Group> {
    let title = title.trim();
    if title.is_empty() {
        return Err(BlogError::required("title"));
    }

    let slug = match slug.map(str::trim).filter(|s| !s.is_empty()) {
        Some(slug) => slug.to_string(),
        None => slugify(title),
    };
    if !is_valid_slug(&slug) {
        return Err(BlogError::validation(
            "slug",
            "Enter a valid slug consisting of letters, numbers, underscores or hyphens.",
        ));
    }

    let group = Group {
        id: new_id(),
        title: title.to_string(),
        slug,
        description: description.to_string(),
    };
    if !repo.insert_group(&group)? {
        return Err(BlogError::Conflict(format!("group with slug {} already exists", group.slug)));
    }
    info!(slug = %group.slug, "group created");
    Ok(group)
}

pub fn get_group<R: GroupRepository + ?Sized>(repo: &R, slug: &str) -> BlogResult<Group> {
    repo.get_group(slug)?
        .ok_or_else(|| BlogError::NotFound(format!("group {}", slug)))
}
