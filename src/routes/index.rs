use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use rust_embed::Embed;

use crate::error::{AppError, Result};

use super::router::{Matcher, RouteMatch, RouteTable};
use super::SharedState;

/// Embedded browser client
#[derive(Embed)]
#[folder = "static/"]
struct Assets;

const INDEX: &str = "index.html";

pub fn register(table: &mut RouteTable) {
    table.register(Matcher::Exact("/".to_string()), "index", serve_index);
    table.register(Matcher::Exact(format!("/{}", INDEX)), "index", serve_index);
}

async fn serve_index(_state: SharedState, _matched: RouteMatch) -> Result<Response> {
    let content = Assets::get(INDEX).ok_or(AppError::NotFound)?;
    let mime = mime_guess::from_path(INDEX).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.as_ref().to_string())], content.data.into_owned()).into_response())
}
