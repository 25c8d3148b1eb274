use chrono::NaiveDateTime;
use std::path::Path;

use crate::models::FileEntry;

/// Extensions served with their own content type even without `raw`.
const BINARY_EXTENSIONS: &[&str] = &[
    "gif", "png", "jpg", "jpeg", "woff", "ttf", "zip", "jar", "gz", "bz2", "xz",
];

/// Parse `tar -tv` output into file entries, skipping directories.
///
/// Lines look like `-rw-r--r-- root/root 1234 2026-10-06 10:00 src/lib.rs`.
/// Anything that does not start with a ten-character permission string is
/// ignored.
pub fn parse_tar_listing(output: &str) -> Vec<FileEntry> {
    output.lines().filter_map(parse_tar_line).collect()
}

fn parse_tar_line(line: &str) -> Option<FileEntry> {
    let (fields, path) = split_fields(line, 5)?;
    let mode = fields[0];
    if !is_mode_string(mode) || mode.starts_with('d') {
        return None;
    }

    let size = fields[2].parse::<u64>().ok()?;
    let date = parse_listing_date(fields[3], fields[4]);
    let name = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
        .to_string();

    Some(FileEntry {
        mode: mode.to_string(),
        name,
        size,
        date,
        path: path.to_string(),
    })
}

fn is_mode_string(value: &str) -> bool {
    value.len() >= 10
        && value
            .chars()
            .take(10)
            .all(|c| matches!(c, 'd' | 'w' | 'r' | 'x' | 's' | '-'))
}

/// Split off `n` whitespace-separated fields and return the remainder, which
/// may itself contain spaces.
fn split_fields(line: &str, n: usize) -> Option<(Vec<&str>, &str)> {
    let mut rest = line;
    let mut fields = Vec::with_capacity(n);
    for _ in 0..n {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace)?;
        fields.push(&rest[..end]);
        rest = &rest[end..];
    }
    let remainder = rest.trim();
    if remainder.is_empty() {
        None
    } else {
        Some((fields, remainder))
    }
}

fn parse_listing_date(date: &str, time: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let stamp = format!("{} {}", date, time);
    ["%Y-%m-%d %H:%M", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(&stamp, format).ok())
        .map(|naive| naive.and_utc())
}

/// Content type for a file served from the object store.
///
/// Paths without any dot are `application/octet-stream`; unknown
/// extensions fall back to `text/plain`.
pub fn guess_content_type(path: &str) -> &'static str {
    // everything after the last dot of the whole path, slashes included
    let lowered = path.to_ascii_lowercase();
    let Some((_, extension)) = lowered.rsplit_once('.') else {
        return "application/octet-stream";
    };
    match extension {
        "js" => "application/javascript; charset=utf8",
        "woff" => "font/woff",
        "ttf" => "font/ttf",
        "gif" => "image/gif",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "html" => "text/html; charset=utf8",
        "css" => "text/css; charset=utf8",
        "json" => "application/json; charset=utf8",
        "zip" => "application/zip",
        "xz" => "application/x-xz",
        "jar" => "application/jar",
        "bz2" => "application/x-bzip2",
        "gz" => "application/x-gzip",
        _ => "text/plain",
    }
}

pub fn is_binary_path(path: &str) -> bool {
    file_extension(path).is_some_and(|ext| BINARY_EXTENSIONS.contains(&ext.as_str()))
}

fn file_extension(path: &str) -> Option<String> {
    Path::new(path)
        .extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}
