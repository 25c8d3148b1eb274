use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::{Result, TEXT_PLAIN};
use crate::git::repository::DEFAULT_REFERENCE;
use crate::git::tree::{guess_content_type, is_binary_path};

use super::router::{RouteMatch, RouteTable};
use super::{pattern, SharedState, REPO_SEGMENT};

pub fn register(table: &mut RouteTable, prefix: &str) -> std::result::Result<(), regex::Error> {
    let list = pattern(prefix, &format!("(?P<repo>{})/list", REPO_SEGMENT))?;
    let get = pattern(
        prefix,
        &format!(r#"(?P<repo>{})/get/(?P<path>[^&`'"|<>]+)"#, REPO_SEGMENT),
    )?;
    table.register(list, "files", list_files);
    table.register(get, "file", get_file);
    Ok(())
}

async fn list_files(state: SharedState, matched: RouteMatch) -> Result<Response> {
    let repo = state.open(matched.capture("repo")?)?;
    let reference = matched.query("branch").unwrap_or(DEFAULT_REFERENCE);

    let files = repo.list_files(reference).await?;
    Ok(Json(files).into_response())
}

async fn get_file(state: SharedState, matched: RouteMatch) -> Result<Response> {
    let repo = state.open(matched.capture("repo")?)?;
    let path = matched.capture("path")?;
    let reference = matched.query("branch").unwrap_or(DEFAULT_REFERENCE);

    let raw = matched.query("raw").is_some_and(|value| !value.is_empty());
    let content_type = if raw || is_binary_path(path) {
        guess_content_type(path)
    } else {
        TEXT_PLAIN
    };
    let body = repo.show_file(reference, path)?.prime().await?;
    Ok(([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response())
}
