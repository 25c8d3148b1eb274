//! HTTP surface - maps request paths to repository operations.
//!
//! Every request goes through one ordered `RouteTable` mounted as the axum
//! fallback. Registration order decides precedence:
//! - `index`: embedded browser client at `/` (optional)
//! - `repository`: `GET <prefix>/list`
//! - `archive`: `GET <prefix>/<repo>.<ext>`
//! - `commits`: `GET <prefix>/<repo>`
//! - `diff`: `GET <prefix>/<repo>/<commit>`
//! - `tree`: `GET <prefix>/<repo>/list` and `GET <prefix>/<repo>/get/<path>`

pub mod archive;
pub mod commits;
pub mod diff;
pub mod index;
pub mod repository;
pub mod router;
pub mod tree;

use std::sync::Arc;

use axum::{
    http::{Method, Uri},
    Router,
};
use regex::Regex;
use tracing::debug;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::git::{GitRepository, GitTools, RepoResolver};

use router::{Matcher, RouteTable};

/// A repository id as it may appear in a path: no `/` and no shell-hazardous
/// characters.
pub const REPO_SEGMENT: &str = r#"[^/`'"&|<>]+"#;

pub struct AppState {
    pub config: Config,
    pub resolver: RepoResolver,
    pub tools: GitTools,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            resolver: RepoResolver::new(&config.root),
            tools: GitTools::from_config(&config),
            config,
        }
    }

    /// Open the repository named by a request id.
    ///
    /// 404 unless the id names a repository that `/list` would report.
    pub fn open(&self, id: &str) -> Result<GitRepository<'_>> {
        let identity = self.resolver.locate(id)?;
        let listed = self.config.filter.exposes(&identity.relative_dir)
            && identity.location.join(&self.config.metadata_dir).is_dir();
        if !listed {
            debug!(repo = %identity.display_name, "repository is not exposed");
            return Err(AppError::RepoNotFound(identity.display_name));
        }
        Ok(self.tools.open(identity))
    }
}

/// Anchored matcher for `<prefix>/<tail>`.
pub fn pattern(prefix: &str, tail: &str) -> std::result::Result<Matcher, regex::Error> {
    Regex::new(&format!("^{}/{}$", regex::escape(prefix), tail)).map(Matcher::Pattern)
}

pub fn route_table(config: &Config) -> std::result::Result<RouteTable, regex::Error> {
    let prefix = config.api_prefix.as_str();
    let mut table = RouteTable::new();
    if config.serve_index {
        index::register(&mut table);
    }
    repository::register(&mut table, prefix);
    archive::register(&mut table, prefix)?;
    commits::register(&mut table, prefix)?;
    diff::register(&mut table, prefix)?;
    tree::register(&mut table, prefix)?;
    Ok(table)
}

pub fn create_router(state: SharedState) -> std::result::Result<Router, regex::Error> {
    let table = Arc::new(route_table(&state.config)?);
    Ok(Router::new().fallback(move |method: Method, uri: Uri| {
        let table = Arc::clone(&table);
        let state = Arc::clone(&state);
        async move { table.dispatch(state, method, uri).await }
    }))
}
