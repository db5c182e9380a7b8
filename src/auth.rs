use ammonia::Builder;
use spin_sdk::http::Request;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::*;
use crate::core::errors::{BlogError, BlogResult};
use crate::core::helpers::{hash_password, now, verify_password};
use crate::models::{Actor, TokenData, User};
use crate::repository::UserRepository;

fn sanitize_text(text: &str) -> String {
    // Plain text only: strip every tag
    Builder::default()
        .tags(std::collections::HashSet::new())
        .clean(text)
        .to_string()
}

/// Usernames are used verbatim as URL path segments.
fn is_username_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || matches!(ch, '@' | '+' | '-' | '_')
}

pub fn sign_up<R: UserRepository + ?Sized>(repo: &R, username: &str, password: &str) -> BlogResult<User> {
    let username = sanitize_text(username.trim());
    if username.is_empty() {
        return Err(BlogError::required("username"));
    }
    if username.len() < MIN_USERNAME_LENGTH || username.len() > MAX_USERNAME_LENGTH {
        return Err(BlogError::validation("username", "Username must be 3-50 characters."));
    }
    if !username.chars().all(is_username_char) {
        return Err(BlogError::validation(
            "username",
            "Username may contain only letters, digits and @/+/-/_ characters.",
        ));
    }
    if password.is_empty() {
        return Err(BlogError::required("password"));
    }
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(BlogError::validation("password", "Password must be at least 3 characters."));
    }

    if repo.find_user_by_username(&username)?.is_some() {
        return Err(BlogError::Conflict("A user with that username already exists.".to_string()));
    }
    let user = repo.create_user(&username, &hash_password(password)?)?;
    info!(user = %user.username, "user signed up");
    Ok(user)
}

pub fn issue_token<R: UserRepository + ?Sized>(repo: &R, user_id: &str) -> anyhow::Result<String> {
    let token = Uuid::new_v4().to_string();
    let data = TokenData {
        user_id: user_id.to_string(),
        created_at: now(),
    };
    repo.insert_token(&token, &data)?;
    Ok(token)
}

/// Check credentials and open a session; returns the session token.
pub fn log_in<R: UserRepository + ?Sized>(repo: &R, username: &str, password: &str) -> BlogResult<(User, String)> {
    let invalid = || BlogError::validation("credentials", "Please enter a correct username and password.");

    let user = repo.find_user_by_username(username.trim())?.ok_or_else(invalid)?;
    if !verify_password(password, &user.password) {
        return Err(invalid());
    }
    let token = issue_token(repo, &user.id)?;
    info!(user = %user.username, "user logged in");
    Ok((user, token))
}

pub fn log_out<R: UserRepository + ?Sized>(repo: &R, token: &str) -> anyhow::Result<()> {
    repo.delete_token(token)
}

fn cookie_value<'a>(cookies: &'a str, name: &str) -> Option<&'a str> {
    cookies
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value)
}

/// Session token from the `session` cookie or an `Authorization: Bearer` header.
pub fn request_token(req: &Request) -> Option<String> {
    if let Some(cookies) = req.header("cookie").and_then(|h| h.as_str()) {
        if let Some(token) = cookie_value(cookies, SESSION_COOKIE).filter(|t| !t.is_empty()) {
            return Some(token.to_string());
        }
    }
    let auth_header = req.header("authorization").and_then(|h| h.as_str())?;
    auth_header
        .strip_prefix("Bearer ")
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// User behind a session token, if the token exists, has not expired and
/// its user still exists.
pub fn validate_token<R: UserRepository + ?Sized>(
    repo: &R,
    token: &str,
    expiration_hours: i64,
) -> anyhow::Result<Option<User>> {
    let Some(data) = repo.get_token(token)? else {
        return Ok(None);
    };
    let age_hours = (now() - data.created_at).num_hours();
    if age_hours > expiration_hours {
        debug!(age_hours, "session token expired");
        repo.delete_token(token)?;
        return Ok(None);
    }
    repo.get_user(&data.user_id)
}

pub fn resolve_actor<R: UserRepository + ?Sized>(
    repo: &R,
    req: &Request,
    expiration_hours: i64,
) -> anyhow::Result<Actor> {
    let Some(token) = request_token(req) else {
        return Ok(Actor::Anonymous);
    };
    Ok(match validate_token(repo, &token, expiration_hours)? {
        Some(user) => Actor::Authenticated(user),
        None => Actor::Anonymous,
    })
}
