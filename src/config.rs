pub const POSTS_PER_PAGE: usize = 10;
pub const DISPLAY_TEXT_LENGTH: usize = 15;

pub const MIN_USERNAME_LENGTH: usize = 3;
pub const MAX_USERNAME_LENGTH: usize = 50;
pub const MIN_PASSWORD_LENGTH: usize = 3;

pub const HOME_PAGE_CACHE_KEY: &str = "home-page";
pub const FOLLOW_PAGE_CACHE_KEY: &str = "follow-page";

pub const SESSION_COOKIE: &str = "session";

// === Storage keys ===
pub const GROUPS_LIST_KEY: &str = "groups_list";
pub const FEED_KEY: &str = "feed";
pub const PAGE_CACHE_INDEX_KEY: &str = "page_cache_keys";

pub fn user_key(id: &str) -> String {
    format!("user:{}", id)
}

pub fn username_key(username: &str) -> String {
    format!("username:{}", username)
}

pub fn group_key(slug: &str) -> String {
    format!("group:{}", slug)
}

pub fn post_key(id: &str) -> String {
    format!("post:{}", id)
}

pub fn comment_key(id: &str) -> String {
    format!("comment:{}", id)
}

pub fn comments_key(post_id: &str) -> String {
    format!("comments:{}", post_id)
}

pub fn follow_key(user_id: &str, author_id: &str) -> String {
    format!("follow:{}:{}", user_id, author_id)
}

pub fn followings_key(user_id: &str) -> String {
    format!("followings:{}", user_id)
}

pub fn followers_key(author_id: &str) -> String {
    format!("followers:{}", author_id)
}

pub fn token_key(token: &str) -> String {
    format!("token:{}", token)
}

pub fn page_cache_key(key: &str) -> String {
    format!("page:{}", key)
}

// === Runtime settings ===

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

pub fn token_expiration_hours() -> i64 {
    env_or("QUILL_TOKEN_EXPIRATION_HOURS", 24)
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub page_size: usize,
    pub page_cache_ttl: chrono::Duration,
    pub invalidate_on_write: bool,
    pub token_expiration_hours: i64,
    pub bind_address: String,
    pub seed_demo_data: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            page_size: POSTS_PER_PAGE,
            page_cache_ttl: chrono::Duration::seconds(20),
            invalidate_on_write: true,
            token_expiration_hours: 24,
            bind_address: "0.0.0.0:80".to_string(),
            seed_demo_data: true,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Settings::default();
        Settings {
            page_size: defaults.page_size,
            page_cache_ttl: chrono::Duration::seconds(env_or("QUILL_PAGE_CACHE_TTL_SECONDS", 20)),
            invalidate_on_write: env_or("QUILL_CACHE_INVALIDATE_ON_WRITE", defaults.invalidate_on_write),
            token_expiration_hours: token_expiration_hours(),
            bind_address: env_or("QUILL_BIND_ADDRESS", defaults.bind_address),
            seed_demo_data: env_or("QUILL_SEED_DEMO_DATA", defaults.seed_demo_data),
        }
    }
}
