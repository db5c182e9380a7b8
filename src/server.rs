//! Native HTTP server: actix-web in front of the same router the Spin
//! component uses.

use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer};
use tracing::{error, info};

use crate::app_state::Blog;
use crate::core::db::MemoryStore;
use crate::handlers::handle_request;

mod adapter {
    use actix_web::HttpRequest;
    use spin_sdk::http::{Method, Request, Response};

    pub fn actix_to_spin_request(req: &HttpRequest, body: actix_web::web::Bytes) -> Request {
        let method = match req.method().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            "PUT" => Method::Put,
            "DELETE" => Method::Delete,
            "HEAD" => Method::Head,
            "OPTIONS" => Method::Options,
            "PATCH" => Method::Patch,
            _ => Method::Get,
        };

        let mut builder = Request::builder();
        builder.method(method).uri(req.uri().to_string());
        for (name, value) in req.headers() {
            if let Ok(val_str) = value.to_str() {
                builder.header(name.as_str(), val_str);
            }
        }
        builder.body(body.to_vec()).build()
    }

    pub fn spin_to_actix_response(spin_resp: Response) -> actix_web::HttpResponse {
        let status = *spin_resp.status();
        let mut response = actix_web::HttpResponse::build(
            actix_web::http::StatusCode::from_u16(status)
                .unwrap_or(actix_web::http::StatusCode::INTERNAL_SERVER_ERROR),
        );
        for (name, value) in spin_resp.headers() {
            if let Some(val_str) = value.as_str() {
                response.append_header((name, val_str));
            }
        }
        response.body(spin_resp.body().to_vec())
    }
}

pub async fn handle_all(
    blog: web::Data<Blog<MemoryStore>>,
    req: HttpRequest,
    body: web::Bytes,
) -> HttpResponse {
    let spin_req = adapter::actix_to_spin_request(&req, body);
    match handle_request(blog.get_ref(), spin_req) {
        Ok(spin_resp) => adapter::spin_to_actix_response(spin_resp),
        Err(e) => {
            error!(path = %req.path(), error = %e, "request failed");
            HttpResponse::InternalServerError()
                .content_type("text/plain; charset=utf-8")
                .body("Internal server error")
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.default_service(web::route().to(handle_all));
}

pub async fn run(blog: Blog<MemoryStore>) -> std::io::Result<()> {
    let address = blog.settings.bind_address.clone();
    info!(%address, "server listening");

    let data = web::Data::new(blog);
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind(address)?
        .run()
        .await
}
