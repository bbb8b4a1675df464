use axum::http::header;
use axum::response::{Html, IntoResponse};

const INDEX_HTML: &str = include_str!("../../../static/index.html");
const MAIN_JS: &str = include_str!("../../../static/main.js");

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

pub async fn main_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        MAIN_JS,
    )
}
