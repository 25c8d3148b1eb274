use chrono::{DateTime, Utc};
use serde::Serialize;

/// One entry of a repository's history, as decoded from `git log` output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub hash: String,
    pub author: String,
    #[serde(rename = "email")]
    pub author_email: String,
    pub message: String,
    pub date: DateTime<Utc>,
    pub commit_date: String,
    pub age: String,
}
