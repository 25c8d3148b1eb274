//! Repository identity and listing DTOs.
//!
//! - `RepositoryIdentity`: resolved path/identifier pair for one repository
//! - `RepositoryListing`: identity enriched with description and last commit
//!
//! Used by: `/list` endpoint and every per-repository handler

use serde::Serialize;
use std::path::PathBuf;

use super::CommitRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepositoryIdentity {
    pub location: PathBuf,
    #[serde(rename = "dir")]
    pub relative_dir: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub id: String,
    #[serde(rename = "archive")]
    pub archive_base_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryListing {
    #[serde(flatten)]
    pub identity: RepositoryIdentity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit: Option<CommitRecord>,
}
