use axum::{
    response::{IntoResponse, Response},
    Json,
};

use crate::error::{AppError, Result};

use super::router::{RouteMatch, RouteTable};
use super::{pattern, SharedState, REPO_SEGMENT};

pub fn register(table: &mut RouteTable, prefix: &str) -> std::result::Result<(), regex::Error> {
    let log = pattern(prefix, &format!("(?P<repo>{})", REPO_SEGMENT))?;
    table.register(log, "log", get_commits);
    Ok(())
}

/// Parse an optional non-negative integer query parameter.
fn parse_number(value: Option<&str>) -> Result<Option<u32>> {
    value
        .map(|raw| {
            raw.trim()
                .parse::<u32>()
                .map_err(|_| AppError::NotANumber(raw.to_string()))
        })
        .transpose()
}

async fn get_commits(state: SharedState, matched: RouteMatch) -> Result<Response> {
    let repo = state.open(matched.capture("repo")?)?;
    let skip = parse_number(matched.query("skip"))?;
    let count = parse_number(matched.query("count"))?.unwrap_or(state.config.page_size);

    let commits = repo.log(count, skip).await?;
    Ok(Json(commits).into_response())
}
