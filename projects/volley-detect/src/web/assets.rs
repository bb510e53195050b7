use axum::{
    body::Body,
    extract::Path,
    http::{header, Response, StatusCode},
    response::IntoResponse,
};
use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "dashboard/"]
pub struct Assets;

pub async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    let path = path.trim_start_matches('/');

    if path.is_empty() || path == "index.html" {
        return index_response();
    }

    serve_asset(path).unwrap_or_else(|status| (status, "404 Not Found").into_response())
}

pub async fn index_handler() -> impl IntoResponse {
    index_response()
}

fn index_response() -> axum::response::Response {
    serve_asset("index.html").unwrap_or_else(|status| {
        (status, "Analysis form is missing from this build.").into_response()
    })
}

fn serve_asset(path: &str) -> Result<axum::response::Response, StatusCode> {
    let asset = Assets::get(path).ok_or(StatusCode::NOT_FOUND)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    Response::builder()
        .header(header::CONTENT_TYPE, mime.as_ref())
        .body(Body::from(asset.data.into_owned()))
        .map(IntoResponse::into_response)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
