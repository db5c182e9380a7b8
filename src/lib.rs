pub mod app_state;
pub mod auth;
pub mod comments;
pub mod config;
pub mod core;
pub mod follow;
pub mod groups;
pub mod handlers;
pub mod models;
pub mod page_cache;
pub mod posts;
pub mod query;
pub mod repository;
pub mod templates;

#[cfg(not(target_arch = "wasm32"))]
pub mod server;

pub use app_state::Blog;
pub use crate::core::errors::{BlogError, BlogResult};

// === Component entrypoint ===
#[cfg(target_arch = "wasm32")]
mod component {
    use spin_sdk::{
        http::{IntoResponse, Request},
        http_component,
        key_value::Store,
    };

    use crate::{config::Settings, handlers, Blog};

    #[http_component]
    fn handle(req: Request) -> anyhow::Result<impl IntoResponse> {
        let blog = Blog::new(Store::open_default()?, Store::open_default()?, Settings::from_env());
        handlers::handle_request(&blog, req)
    }
}
