#[cfg(not(target_arch = "wasm32"))]
mod native {
    extern crate quill;

    use quill::config::Settings;
    use quill::core::db::init_demo_data;
    use quill::Blog;
    use tracing::warn;

    pub async fn run() -> std::io::Result<()> {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .init();

        let blog = Blog::in_memory(Settings::from_env());
        if blog.settings.seed_demo_data {
            if let Err(e) = init_demo_data(&blog.repo, &blog.cache) {
                warn!(error = %e, "could not seed demo data");
            }
        }

        quill::server::run(blog).await
    }
}

#[cfg(not(target_arch = "wasm32"))]
#[actix_web::main]
async fn main() -> std::io::Result<()> {
    native::run().await
}

#[cfg(target_arch = "wasm32")]
fn main() {}
