use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::DISPLAY_TEXT_LENGTH;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Group {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub group_slug: Option<String>,
    pub image: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// Subscription of `user_id` to the posts of `author_id`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Follow {
    pub id: String,
    pub user_id: String,
    pub author_id: String,
}

#[derive(Serialize, Deserialize)]
pub struct TokenData {
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Identity of whoever issued the current request.
#[derive(Clone, Debug, PartialEq)]
pub enum Actor {
    Anonymous,
    Authenticated(User),
}

impl Actor {
    pub fn user(&self) -> Option<&User> {
        match self {
            Actor::Anonymous => None,
            Actor::Authenticated(user) => Some(user),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.user().map(|u| u.id.as_str())
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Actor::Authenticated(_))
    }
}

fn truncated(text: &str) -> String {
    text.chars().take(DISPLAY_TEXT_LENGTH).collect()
}

impl fmt::Display for Post {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&truncated(&self.text))
    }
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&truncated(&self.text))
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title)
    }
}

impl Follow {
    /// Follow rows only carry ids, so the caller supplies both usernames.
    pub fn display(subscriber: &User, author: &User) -> String {
        format!("{}, {}", subscriber.username, author.username)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User {
            id: format!("id-{}", name),
            username: name.to_string(),
            password: String::new(),
        }
    }

    #[test]
    fn post_and_comment_display_first_fifteen_chars() {
        let post = Post {
            id: "p".into(),
            author_id: "a".into(),
            text: "Тестовый постпостпост".into(),
            created_at: Utc::now(),
            updated_at: None,
            group_slug: None,
            image: None,
        };
        assert_eq!(post.to_string(), "Тестовый постпо");

        let comment = Comment {
            id: "c".into(),
            post_id: "p".into(),
            author_id: "a".into(),
            text: "short".into(),
            created_at: Utc::now(),
        };
        assert_eq!(comment.to_string(), "short");
    }

    #[test]
    fn group_displays_title_and_follow_pairs_usernames() {
        let group = Group {
            id: "g".into(),
            title: "Cats".into(),
            slug: "cats".into(),
            description: String::new(),
        };
        assert_eq!(group.to_string(), "Cats");
        assert_eq!(Follow::display(&user("HaHaHa"), &user("Alice")), "HaHaHa, Alice");
    }

    #[test]
    fn anonymous_actor_has_no_id() {
        assert_eq!(Actor::Anonymous.id(), None);
        assert!(!Actor::Anonymous.is_authenticated());
        let actor = Actor::Authenticated(user("bob"));
        assert_eq!(actor.id(), Some("id-bob"));
    }
}
