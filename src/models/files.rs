use chrono::{DateTime, Utc};
use serde::Serialize;

/// A single non-directory entry of a recursive file listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileEntry {
    /// Permission string as printed by `tar -tv`, e.g. `-rw-r--r--`
    #[serde(rename = "type")]
    pub mode: String,
    pub name: String,
    pub size: u64,
    pub date: Option<DateTime<Utc>>,
    pub path: String,
}
