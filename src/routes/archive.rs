use axum::{
    body::Body,
    http::header,
    response::{IntoResponse, Response},
};

use crate::error::Result;
use crate::git::archive::ArchiveFormat;
use crate::git::repository::DEFAULT_REFERENCE;

use super::router::{RouteMatch, RouteTable};
use super::{pattern, SharedState, REPO_SEGMENT};

pub fn register(table: &mut RouteTable, prefix: &str) -> std::result::Result<(), regex::Error> {
    let download = pattern(
        prefix,
        &format!(r"(?P<repo>{})\.(?P<ext>[A-Za-z0-9]+)", REPO_SEGMENT),
    )?;
    table.register(download, "archive", download_archive);
    Ok(())
}

async fn download_archive(state: SharedState, matched: RouteMatch) -> Result<Response> {
    let repo = state.open(matched.capture("repo")?)?;
    let format = ArchiveFormat::from_extension(matched.capture("ext")?)?;
    let reference = matched.query("branch").unwrap_or(DEFAULT_REFERENCE);

    let archive = repo.archive(reference, format).await?;
    let filename = format!(
        "{}.{}",
        repo.identity.archive_base_name,
        format.file_extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        Body::from_stream(archive),
    )
        .into_response())
}
