//! Ordered route table.
//!
//! Routes are tried in registration order and the first match wins. Only GET
//! and HEAD are served; HEAD runs the GET handler and drops the body, which
//! also stops any subprocess feeding it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::Query,
    http::{Method, Uri},
    response::{IntoResponse, Response},
};
use futures::future::{BoxFuture, FutureExt};
use regex::Regex;
use tracing::debug;

use crate::error::{AppError, Result};

use super::SharedState;

/// Characters a path segment may never carry, even percent-encoded.
const HAZARDOUS_CHARS: &[char] = &['`', '\'', '"', '&', '|', '<', '>'];

/// True if `segment` contains none of the shell-hazardous characters.
pub fn is_safe_segment(segment: &str) -> bool {
    !segment.chars().any(|c| HAZARDOUS_CHARS.contains(&c) || c.is_control())
}

pub enum Matcher {
    Exact(String),
    Pattern(Regex),
}

impl Matcher {
    /// Named captures if `path` matches; an exact match has none.
    fn captures(&self, path: &str) -> Option<HashMap<String, String>> {
        match self {
            Matcher::Exact(expected) => (expected == path).then(HashMap::new),
            Matcher::Pattern(regex) => {
                let caps = regex.captures(path)?;
                Some(
                    regex
                        .capture_names()
                        .flatten()
                        .filter_map(|name| {
                            caps.name(name)
                                .map(|m| (name.to_string(), m.as_str().to_string()))
                        })
                        .collect(),
                )
            }
        }
    }
}

type Handler = Arc<dyn Fn(SharedState, RouteMatch) -> BoxFuture<'static, Result<Response>> + Send + Sync>;

pub struct Route {
    pub matcher: Matcher,
    pub label: &'static str,
    handler: Handler,
}

/// Request data extracted by a successful match.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub method: Method,
    captures: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl RouteMatch {
    /// A named capture of the route pattern, percent-decoded.
    pub fn capture(&self, name: &str) -> Result<&str> {
        self.captures
            .get(name)
            .map(String::as_str)
            .ok_or(AppError::NotFound)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }
}

#[derive(Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a GET/HEAD route after every route registered so far.
    pub fn register<F, Fut>(&mut self, matcher: Matcher, label: &'static str, handler: F)
    where
        F: Fn(SharedState, RouteMatch) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response>> + Send + 'static,
    {
        self.routes.push(Route {
            matcher,
            label,
            handler: Arc::new(move |state: SharedState, matched: RouteMatch| {
                handler(state, matched).boxed()
            }),
        });
    }

    /// Find the first route matching `path`, with its decoded captures.
    pub fn find(&self, path: &str) -> Result<(&Route, HashMap<String, String>)> {
        for route in &self.routes {
            let Some(raw) = route.matcher.captures(path) else {
                continue;
            };
            let mut captures = HashMap::with_capacity(raw.len());
            for (name, value) in raw {
                let decoded = urlencoding::decode(&value).map_err(|_| AppError::NotFound)?;
                if !is_safe_segment(&decoded) {
                    debug!(route = route.label, %name, "rejecting hazardous capture");
                    return Err(AppError::NotFound);
                }
                captures.insert(name, decoded.into_owned());
            }
            return Ok((route, captures));
        }
        Err(AppError::NotFound)
    }

    pub async fn dispatch(&self, state: SharedState, method: Method, uri: Uri) -> Response {
        let head = method == Method::HEAD;
        let response = match self.resolve(state, method, &uri) {
            Ok(future) => future.await.unwrap_or_else(IntoResponse::into_response),
            Err(e) => e.into_response(),
        };
        if head {
            let (parts, _) = response.into_parts();
            return Response::from_parts(parts, Body::empty());
        }
        response
    }

    fn resolve(
        &self,
        state: SharedState,
        method: Method,
        uri: &Uri,
    ) -> Result<BoxFuture<'static, Result<Response>>> {
        if method != Method::GET && method != Method::HEAD {
            return Err(AppError::MethodNotAllowed);
        }
        let (route, captures) = self.find(uri.path())?;

        let Query(query) = Query::<HashMap<String, String>>::try_from_uri(uri)
            .map_err(|e| AppError::InvalidArgument(e.to_string()))?;
        debug!(route = route.label, path = uri.path(), "dispatching");

        let matched = RouteMatch {
            method,
            captures,
            query,
        };
        Ok((route.handler)(state, matched))
    }
}
