use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};
use chrono::{Months, Utc};

use crate::error::{Result, TEXT_PLAIN};

use super::router::{RouteMatch, RouteTable};
use super::{pattern, SharedState, REPO_SEGMENT};

/// A commit's diff never changes, so let clients keep it for ten years.
const CACHE_FOREVER: &str = "public, max-age=315360000";
const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

pub fn register(table: &mut RouteTable, prefix: &str) -> std::result::Result<(), regex::Error> {
    let diff = pattern(
        prefix,
        &format!("(?P<repo>{})/(?P<commit>[0-9a-fA-F]{{4,64}})", REPO_SEGMENT),
    )?;
    table.register(diff, "diff", get_diff);
    Ok(())
}

async fn get_diff(state: SharedState, matched: RouteMatch) -> Result<Response> {
    let repo = state.open(matched.capture("repo")?)?;
    let body = repo.diff(matched.capture("commit")?)?.prime().await?;

    let now = Utc::now();
    let expires = now.checked_add_months(Months::new(120)).unwrap_or(now);
    Ok((
        [
            (header::CONTENT_TYPE, TEXT_PLAIN.to_string()),
            (header::CACHE_CONTROL, CACHE_FOREVER.to_string()),
            (header::EXPIRES, expires.format(HTTP_DATE).to_string()),
        ],
        Body::from_stream(body),
    )
        .into_response())
}
