//! Page handlers and the request router shared by the Spin component and
//! the native server.

use std::collections::HashMap;

use http::StatusCode;
use spin_sdk::http::{Method, Request, Response};
use tracing::{debug, error, warn};

use crate::app_state::Blog;
use crate::auth::{issue_token, log_in, log_out, request_token, resolve_actor, sign_up};
use crate::comments::add_comment;
use crate::config::SESSION_COOKIE;
use crate::core::db::KeyValue;
use crate::core::errors::{BlogError, BlogResult};
use crate::core::helpers::validate_uuid;
use crate::core::query_params::{get_string, parse_form, parse_query_params};
use crate::follow::{follow_author, is_following, unfollow_author, FollowOutcome};
use crate::groups::get_group;
use crate::models::{Actor, User};
use crate::page_cache::{follow_page_key, get_or_render_if, home_page_key};
use crate::posts::{create_post, delete_post, edit_post, PostChanges, PostDraft};
use crate::query::{
    anchor_at, get_post_view, list_comments, list_feed, list_posts, paginate, parse_page_number, Page,
    PostFilter, PostView,
};
use crate::repository::{FollowRepository, GroupRepository, PostRepository, UserRepository};
use crate::templates::{self, FormErrors, PostFormValues, ProfileStats};

type Params = HashMap<String, String>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Verb {
    Get,
    Post,
    Other,
}

// === Response helpers ===

fn html_response(status: StatusCode, body: impl Into<Vec<u8>>) -> Response {
    let body: Vec<u8> = body.into();
    Response::builder()
        .status(status.as_u16())
        .header("content-type", "text/html; charset=utf-8")
        .body(body)
        .build()
}

fn redirect(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND.as_u16())
        .header("location", location)
        .body(Vec::new())
        .build()
}

fn redirect_with_cookie(location: &str, cookie: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND.as_u16())
        .header("location", location)
        .header("set-cookie", cookie)
        .body(Vec::new())
        .build()
}

fn login_redirect(next: &str) -> Response {
    redirect(&format!("/auth/login/?next={}", urlencoding::encode(next)))
}

fn session_cookie(token: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, token)
}

fn page(title: &str, actor: &Actor, content: &str) -> BlogResult<Response> {
    Ok(html_response(StatusCode::OK, templates::layout(title, actor, content)?))
}

fn form_errors(err: &BlogError) -> FormErrors {
    match err {
        BlogError::Validation { field, message } => vec![(*field, message.clone())],
        BlogError::Conflict(message) => vec![("__all__", message.clone())],
        other => vec![("__all__", other.to_string())],
    }
}

fn is_form_error(err: &BlogError) -> bool {
    matches!(err, BlogError::Validation { .. } | BlogError::Conflict(_))
}

/// Only local paths are accepted as post-login destinations.
fn safe_next(next: Option<String>) -> String {
    next.filter(|n| n.starts_with('/') && !n.starts_with("//"))
        .unwrap_or_else(|| "/".to_string())
}

fn post_route_id(id: &str) -> BlogResult<&str> {
    if validate_uuid(id) {
        Ok(id)
    } else {
        Err(BlogError::NotFound(format!("post {}", id)))
    }
}

/// Anchor the sequence, then cut the requested page. Returns the anchor
/// that page links should carry.
fn paged(
    posts: Vec<PostView>,
    page_size: usize,
    number: usize,
    anchor: Option<&str>,
) -> BlogResult<(Page<PostView>, Option<String>)> {
    let anchored = anchor_at(posts, anchor);
    let anchor = anchored.first().map(|v| v.post.id.clone());
    Ok((paginate(anchored, page_size, number)?, anchor))
}

fn page_params(params: &Params) -> BlogResult<(usize, Option<String>)> {
    let number = parse_page_number(params.get("page").map(String::as_str))?;
    Ok((number, get_string(params, "anchor")))
}

/// An anchor naming no post is dropped, so it cannot mint new cache keys.
fn known_anchor<S: KeyValue>(blog: &Blog<S>, anchor: Option<String>) -> BlogResult<Option<String>> {
    match anchor {
        Some(id) if blog.repo.get_post(&id)?.is_some() => Ok(Some(id)),
        _ => Ok(None),
    }
}

/// Paginate a listing for the page cache. The flag is false for pages not
/// worth keeping: past the last page, or anchored on a post outside the
/// listing.
fn cached_page(
    posts: Vec<PostView>,
    page_size: usize,
    number: usize,
    anchor: Option<&str>,
) -> BlogResult<(Page<PostView>, Option<String>, bool)> {
    let anchored = anchor.map_or(true, |a| posts.iter().any(|v| v.post.id == a));
    let (page, links_anchor) = paged(posts, page_size, number, anchor)?;
    let keep = anchored && page.number <= page.num_pages;
    Ok((page, links_anchor, keep))
}

// === Listing pages ===

fn index<S: KeyValue>(blog: &Blog<S>, actor: &Actor, params: &Params) -> BlogResult<Response> {
    let (number, anchor) = page_params(params)?;
    let anchor = known_anchor(blog, anchor)?;
    let key = home_page_key(&number.to_string(), anchor.as_deref());

    let content = get_or_render_if(&blog.cache, &key, || {
        let posts = list_posts(&blog.repo, &PostFilter::default())?;
        let (page, links_anchor, keep) = cached_page(posts, blog.settings.page_size, number, anchor.as_deref())?;
        Ok((templates::index_content(&page, links_anchor.as_deref()).into_bytes(), keep))
    })?;

    page("Latest posts", actor, &String::from_utf8_lossy(&content))
}

fn follow_index<S: KeyValue>(blog: &Blog<S>, actor: &Actor, params: &Params) -> BlogResult<Response> {
    let Some(user) = actor.user() else {
        return Ok(login_redirect("/follow/"));
    };
    let (number, anchor) = page_params(params)?;
    let anchor = known_anchor(blog, anchor)?;
    let key = follow_page_key(&user.id, &number.to_string(), anchor.as_deref());

    let content = get_or_render_if(&blog.cache, &key, || {
        let posts = list_feed(&blog.repo, &user.id)?;
        let (page, links_anchor, keep) = cached_page(posts, blog.settings.page_size, number, anchor.as_deref())?;
        Ok((templates::follow_content(&page, links_anchor.as_deref()).into_bytes(), keep))
    })?;

    page("Subscriptions", actor, &String::from_utf8_lossy(&content))
}

fn group_posts<S: KeyValue>(blog: &Blog<S>, actor: &Actor, slug: &str, params: &Params) -> BlogResult<Response> {
    let group = get_group(&blog.repo, slug)?;
    let (number, anchor) = page_params(params)?;

    let posts = list_posts(&blog.repo, &PostFilter::group(&group.slug))?;
    let (posts_page, anchor) = paged(posts, blog.settings.page_size, number, anchor.as_deref())?;

    let content = templates::group_content(&group, &posts_page, anchor.as_deref());
    page(&group.title, actor, &content)
}

fn find_author<S: KeyValue>(blog: &Blog<S>, username: &str) -> BlogResult<User> {
    blog.repo
        .find_user_by_username(username)?
        .ok_or_else(|| BlogError::NotFound(format!("user {}", username)))
}

fn profile<S: KeyValue>(blog: &Blog<S>, actor: &Actor, username: &str, params: &Params) -> BlogResult<Response> {
    let author = find_author(blog, username)?;
    let (number, anchor) = page_params(params)?;

    let posts = list_posts(&blog.repo, &PostFilter::author(&author.id))?;
    let stats = ProfileStats {
        posts: posts.len(),
        followers: blog.repo.list_followers(&author.id)?.len(),
        following: blog.repo.list_followings(&author.id)?.len(),
    };
    let following = match actor.id() {
        Some(id) if id != author.id => Some(is_following(&blog.repo, actor, &author.id)?),
        _ => None,
    };
    let (posts_page, anchor) = paged(posts, blog.settings.page_size, number, anchor.as_deref())?;

    let content = templates::profile_content(&author, stats, following, &posts_page, anchor.as_deref());
    page(&format!("Profile of {}", author.username), actor, &content)
}

// === Post pages ===

fn render_post_detail<S: KeyValue>(
    blog: &Blog<S>,
    actor: &Actor,
    post_id: &str,
    errors: &FormErrors,
) -> BlogResult<Response> {
    let view = get_post_view(&blog.repo, post_id)?;
    let comments = list_comments(&blog.repo, post_id)?;
    let content = templates::post_detail_content(&view, &comments, actor, errors);
    page(&format!("Post {}", view.post), actor, &content)
}

fn post_detail<S: KeyValue>(blog: &Blog<S>, actor: &Actor, post_id: &str) -> BlogResult<Response> {
    render_post_detail(blog, actor, post_route_id(post_id)?, &FormErrors::new())
}

fn post_comment<S: KeyValue>(blog: &Blog<S>, actor: &Actor, post_id: &str, form: &Params) -> BlogResult<Response> {
    let post_id = post_route_id(post_id)?;
    let detail = format!("/posts/{}/", post_id);
    let text = form.get("text").map(String::as_str).unwrap_or_default();

    match add_comment(&blog.repo, &blog.cache, actor, post_id, text) {
        Ok(_) => Ok(redirect(&detail)),
        Err(BlogError::Unauthorized) => {
            debug!(post_id, "anonymous comment ignored");
            Ok(redirect(&detail))
        }
        Err(err) if is_form_error(&err) => render_post_detail(blog, actor, post_id, &form_errors(&err)),
        Err(err) => Err(err),
    }
}

fn post_form_page<S: KeyValue>(
    blog: &Blog<S>,
    actor: &Actor,
    heading: &str,
    action: &str,
    values: &PostFormValues,
    errors: &FormErrors,
) -> BlogResult<Response> {
    let groups = blog.repo.list_groups()?;
    let content = templates::post_form(heading, action, values, &groups, errors);
    page(heading, actor, &content)
}

fn form_values(form: &Params) -> PostFormValues {
    PostFormValues {
        text: form.get("text").cloned().unwrap_or_default(),
        group: get_string(form, "group"),
        image: get_string(form, "image"),
    }
}

fn post_create<S: KeyValue>(blog: &Blog<S>, actor: &Actor, verb: Verb, form: &Params) -> BlogResult<Response> {
    let Some(user) = actor.user() else {
        return Ok(login_redirect("/create/"));
    };
    if verb != Verb::Post {
        return post_form_page(blog, actor, "New post", "/create/", &PostFormValues::default(), &FormErrors::new());
    }

    let values = form_values(form);
    let draft = PostDraft {
        text: values.text.clone(),
        group: values.group.clone(),
        image: values.image.clone(),
    };
    match create_post(&blog.repo, &blog.cache, actor, draft) {
        Ok(_) => Ok(redirect(&format!("/profile/{}/", user.username))),
        Err(err) if is_form_error(&err) => {
            post_form_page(blog, actor, "New post", "/create/", &values, &form_errors(&err))
        }
        Err(err) => Err(err),
    }
}

fn post_edit<S: KeyValue>(
    blog: &Blog<S>,
    actor: &Actor,
    verb: Verb,
    post_id: &str,
    form: &Params,
) -> BlogResult<Response> {
    let post_id = post_route_id(post_id)?;
    let action = format!("/posts/{}/edit/", post_id);
    let detail = format!("/posts/{}/", post_id);
    let Some(user) = actor.user() else {
        return Ok(login_redirect(&action));
    };

    let post = blog
        .repo
        .get_post(post_id)
        .map_err(BlogError::from)?
        .ok_or_else(|| BlogError::NotFound(format!("post {}", post_id)))?;
    if post.author_id != user.id {
        return Ok(redirect(&detail));
    }

    if verb != Verb::Post {
        let values = PostFormValues {
            text: post.text,
            group: post.group_slug,
            image: post.image,
        };
        return post_form_page(blog, actor, "Edit post", &action, &values, &FormErrors::new());
    }

    let values = form_values(form);
    let changes = PostChanges {
        text: Some(values.text.clone()),
        group: Some(values.group.clone()),
        // An empty image field keeps the current image
        image: values.image.clone().map(Some),
    };
    match edit_post(&blog.repo, &blog.cache, actor, post_id, changes) {
        Ok(_) => Ok(redirect(&detail)),
        Err(BlogError::Unauthorized) => Ok(redirect(&detail)),
        Err(err) if is_form_error(&err) => {
            post_form_page(blog, actor, "Edit post", &action, &values, &form_errors(&err))
        }
        Err(err) => Err(err),
    }
}

fn post_delete<S: KeyValue>(blog: &Blog<S>, actor: &Actor, post_id: &str) -> BlogResult<Response> {
    let post_id = post_route_id(post_id)?;
    let Some(user) = actor.user() else {
        return Ok(login_redirect(&format!("/posts/{}/", post_id)));
    };
    match delete_post(&blog.repo, &blog.cache, actor, post_id) {
        Ok(()) => Ok(redirect(&format!("/profile/{}/", user.username))),
        Err(BlogError::Unauthorized) => Ok(redirect(&format!("/posts/{}/", post_id))),
        Err(err) => Err(err),
    }
}

// === Follow actions ===

fn profile_follow<S: KeyValue>(blog: &Blog<S>, actor: &Actor, username: &str) -> BlogResult<Response> {
    let profile_path = format!("/profile/{}/", username);
    if !actor.is_authenticated() {
        return Ok(login_redirect(&format!("{}follow/", profile_path)));
    }
    match follow_author(&blog.repo, &blog.cache, actor, username) {
        Ok(FollowOutcome::Followed) | Ok(FollowOutcome::AlreadyFollowing) => Ok(redirect(&profile_path)),
        Err(BlogError::Validation { message, .. }) => {
            debug!(username, %message, "follow refused");
            Ok(redirect(&profile_path))
        }
        Err(err) => Err(err),
    }
}

fn profile_unfollow<S: KeyValue>(blog: &Blog<S>, actor: &Actor, username: &str) -> BlogResult<Response> {
    if !actor.is_authenticated() {
        return Ok(login_redirect(&format!("/profile/{}/unfollow/", username)));
    }
    unfollow_author(&blog.repo, &blog.cache, actor, username)?;
    Ok(redirect("/"))
}

// === Session pages ===

fn login<S: KeyValue>(blog: &Blog<S>, actor: &Actor, verb: Verb, params: &Params, form: &Params) -> BlogResult<Response> {
    if verb != Verb::Post {
        let next = get_string(params, "next");
        return page("Log in", actor, &templates::login_form(next.as_deref(), "", &FormErrors::new()));
    }

    let username = form.get("username").map(String::as_str).unwrap_or_default();
    let password = form.get("password").map(String::as_str).unwrap_or_default();
    let next = get_string(form, "next");
    match log_in(&blog.repo, username, password) {
        Ok((_, token)) => Ok(redirect_with_cookie(&safe_next(next), &session_cookie(&token))),
        Err(err) if is_form_error(&err) => {
            let content = templates::login_form(next.as_deref(), username, &form_errors(&err));
            page("Log in", actor, &content)
        }
        Err(err) => Err(err),
    }
}

fn signup<S: KeyValue>(blog: &Blog<S>, actor: &Actor, verb: Verb, form: &Params) -> BlogResult<Response> {
    if verb != Verb::Post {
        return page("Sign up", actor, &templates::signup_form("", &FormErrors::new()));
    }

    let username = form.get("username").map(String::as_str).unwrap_or_default();
    let password = form.get("password").map(String::as_str).unwrap_or_default();
    match sign_up(&blog.repo, username, password) {
        Ok(user) => {
            let token = issue_token(&blog.repo, &user.id)?;
            Ok(redirect_with_cookie("/", &session_cookie(&token)))
        }
        Err(err) if is_form_error(&err) => {
            page("Sign up", actor, &templates::signup_form(username, &form_errors(&err)))
        }
        Err(err) => Err(err),
    }
}

fn logout<S: KeyValue>(blog: &Blog<S>, req: &Request) -> BlogResult<Response> {
    if let Some(token) = request_token(req) {
        log_out(&blog.repo, &token)?;
    }
    Ok(redirect_with_cookie(
        "/",
        &format!("{}=; Path=/; HttpOnly; Max-Age=0", SESSION_COOKIE),
    ))
}

// === Router ===

fn not_found_page(actor: &Actor, path: &str) -> anyhow::Result<Response> {
    let content = templates::not_found_content(path)?;
    Ok(html_response(
        StatusCode::NOT_FOUND,
        templates::layout("Page not found", actor, &content)?,
    ))
}

fn server_error_page(actor: &Actor) -> anyhow::Result<Response> {
    let content = templates::server_error_content()?;
    Ok(html_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        templates::layout("Server error", actor, &content)?,
    ))
}

pub fn handle_request<S: KeyValue>(blog: &Blog<S>, req: Request) -> anyhow::Result<Response> {
    let path = req.path().to_string();
    let params = parse_query_params(&req.uri());
    let verb = match req.method() {
        Method::Get | Method::Head => Verb::Get,
        Method::Post => Verb::Post,
        _ => Verb::Other,
    };
    let is_head = matches!(req.method(), Method::Head);
    let form = if verb == Verb::Post {
        parse_form(req.body())
    } else {
        Params::new()
    };

    let actor = resolve_actor(&blog.repo, &req, blog.settings.token_expiration_hours)?;
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let outcome = match (verb, segments.as_slice()) {
        (Verb::Get, []) => index(blog, &actor, &params),
        (Verb::Get, ["group", slug]) => group_posts(blog, &actor, slug, &params),
        (Verb::Get, ["profile", username]) => profile(blog, &actor, username, &params),
        (Verb::Get, ["profile", username, "follow"]) => profile_follow(blog, &actor, username),
        (Verb::Get, ["profile", username, "unfollow"]) => profile_unfollow(blog, &actor, username),
        (Verb::Get, ["posts", id]) => post_detail(blog, &actor, id),
        (Verb::Post, ["posts", id, "comment"]) => post_comment(blog, &actor, id, &form),
        (Verb::Get | Verb::Post, ["posts", id, "edit"]) => post_edit(blog, &actor, verb, id, &form),
        (Verb::Post, ["posts", id, "delete"]) => post_delete(blog, &actor, id),
        (Verb::Get | Verb::Post, ["create"]) => post_create(blog, &actor, verb, &form),
        (Verb::Get, ["follow"]) => follow_index(blog, &actor, &params),
        (Verb::Get | Verb::Post, ["auth", "login"]) => login(blog, &actor, verb, &params, &form),
        (Verb::Get | Verb::Post, ["auth", "signup"]) => signup(blog, &actor, verb, &form),
        (Verb::Get | Verb::Post, ["auth", "logout"]) => logout(blog, &req),
        _ => Err(BlogError::NotFound(path.clone())),
    };

    let mut response = match outcome {
        Ok(resp) => resp,
        Err(BlogError::NotFound(what)) => {
            debug!(%path, %what, "not found");
            not_found_page(&actor, &path)?
        }
        Err(BlogError::Unauthorized) => redirect("/"),
        Err(err @ (BlogError::Validation { .. } | BlogError::Conflict(_))) => {
            warn!(%path, error = %err, "rejected request");
            let content = format!("<h1>Bad request</h1>\n<p>{}</p>\n", html_escape::encode_text(&err.to_string()));
            html_response(
                StatusCode::BAD_REQUEST,
                templates::layout("Bad request", &actor, &content)?,
            )
        }
        Err(BlogError::Storage(e)) => {
            error!(%path, error = %e, "request failed");
            server_error_page(&actor)?
        }
    };
    // HEAD is answered like GET, minus the body.
    if is_head {
        response.body_mut().clear();
    }
    Ok(response)
}
