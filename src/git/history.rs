//! Commit history via `git log`.
//!
//! git is asked to print one JSON-like object per commit, with the rare token
//! `^@^` standing in for every quotation mark. Commit subjects may contain
//! quotes and backslashes, so the real quotes are only introduced after the
//! literal ones have been escaped:
//!
//! 1. escape backslashes
//! 2. escape double quotes
//! 3. replace the delimiter with `"`
//! 4. drop `\n`, `\r` and form feeds
//! 5. trim one trailing comma
//! 6. wrap in `[...]` and parse as JSON

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::models::CommitRecord;

pub const DELIMITER: &str = "^@^";

pub const LOG_FORMAT: &str = concat!(
    "{%n^@^hash^@^:^@^%h^@^,",
    "%n^@^author^@^:^@^%an^@^,",
    "%n^@^date^@^:^@^%ad^@^,",
    "%n^@^email^@^:^@^%aE^@^,",
    "%n^@^message^@^:^@^%s^@^,",
    "%n^@^commitDate^@^:^@^%ai^@^,",
    "%n^@^age^@^:^@^%cr^@^},"
);

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed log output: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
        raw: String,
    },
    #[error("unparseable commit date {date:?}")]
    Date { date: String, raw: String },
}

impl DecodeError {
    /// The transformed text that failed to decode.
    pub fn raw(&self) -> &str {
        match self {
            DecodeError::Json { raw, .. } | DecodeError::Date { raw, .. } => raw,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCommit {
    hash: String,
    author: String,
    date: String,
    email: String,
    message: String,
    commit_date: String,
    age: String,
}

/// Arguments for `git log` printing at most `count` commits after `skip`.
pub fn log_args(count: u32, skip: Option<u32>) -> Vec<String> {
    let mut args = vec![
        "log".to_string(),
        format!("-n{}", count),
        "--branches=*".to_string(),
        // %ad must not follow log.date or log.showSignature from any git config
        "--date=default".to_string(),
        "--no-show-signature".to_string(),
    ];
    if let Some(skip) = skip.filter(|s| *s > 0) {
        args.push(format!("--skip={}", skip));
    }
    args.push(format!("--pretty=format:{}", LOG_FORMAT));
    args
}

/// Rewrite delimited log output into a JSON array literal.
pub fn to_json_array(raw: &[u8]) -> String {
    let mut out = String::from_utf8_lossy(raw)
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace(DELIMITER, "\"")
        .replace(['\n', '\r', '\x0c'], "");

    if out.ends_with(',') {
        out.pop();
    }
    format!("[{}]", out)
}

/// Decode `git log` output produced with [`LOG_FORMAT`], keeping at most
/// `limit` records. Either every record decodes or none is returned.
pub fn decode_log(raw: &[u8], limit: usize) -> Result<Vec<CommitRecord>, DecodeError> {
    let json = to_json_array(raw);
    let parsed: Vec<RawCommit> = match serde_json::from_str(&json) {
        Ok(parsed) => parsed,
        Err(source) => return Err(DecodeError::Json { source, raw: json }),
    };

    let mut commits = Vec::with_capacity(parsed.len().min(limit));
    for commit in parsed.into_iter().take(limit) {
        let Some(date) = parse_git_date(&commit.date) else {
            return Err(DecodeError::Date {
                date: commit.date,
                raw: json,
            });
        };
        commits.push(CommitRecord {
            hash: commit.hash,
            author: commit.author,
            author_email: commit.email,
            message: commit.message,
            date,
            commit_date: commit.commit_date,
            age: commit.age,
        });
    }
    Ok(commits)
}

/// Parse the date formats git prints for `%ad` / `%ai`.
pub fn parse_git_date(value: &str) -> Option<DateTime<Utc>> {
    const FORMATS: &[&str] = &[
        // default: "Tue Oct 6 10:00:00 2026 +0200"
        "%a %b %d %H:%M:%S %Y %z",
        // iso: "2026-10-06 10:00:00 +0200"
        "%Y-%m-%d %H:%M:%S %z",
    ];

    let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
    FORMATS
        .iter()
        .find_map(|format| DateTime::parse_from_str(&normalized, format).ok())
        .or_else(|| DateTime::parse_from_rfc2822(&normalized).ok())
        .or_else(|| DateTime::parse_from_rfc3339(&normalized).ok())
        .map(|date| date.with_timezone(&Utc))
}
