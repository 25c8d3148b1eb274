use axum::{
    http::header,
    response::{IntoResponse, Response},
    Json,
};

use crate::error::Result;
use crate::git::RepositoryLister;

use super::router::{Matcher, RouteMatch, RouteTable};
use super::SharedState;

pub fn register(table: &mut RouteTable, prefix: &str) {
    table.register(Matcher::Exact(format!("{}/list", prefix)), "list", list_repositories);
}

async fn list_repositories(state: SharedState, matched: RouteMatch) -> Result<Response> {
    if matched.is_head() {
        return Ok(([(header::CONTENT_TYPE, "application/json")], ()).into_response());
    }

    let config = &state.config;
    let lister = RepositoryLister::new(
        &state.resolver,
        &state.tools,
        &config.filter,
        &config.metadata_dir,
        config.listing_concurrency,
    );
    let listings = lister.list().await?;
    Ok(Json(listings).into_response())
}
