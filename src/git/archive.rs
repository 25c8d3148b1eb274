//! Archive export.
//!
//! `git archive` writes into a uniquely named temporary file instead of
//! straight into the response; piping directly was observed to truncate large
//! archives. The file is streamed to the client and removed when the stream
//! is dropped, whether it finished or the client went away.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    Zip,
    TarGz,
    TarBz2,
    TarXz,
}

impl ArchiveFormat {
    /// Resolve the format from the final extension of a download URL.
    pub fn from_extension(ext: &str) -> Result<Self> {
        match ext {
            "tar" => Ok(ArchiveFormat::Tar),
            "zip" => Ok(ArchiveFormat::Zip),
            "gz" | "tgz" => Ok(ArchiveFormat::TarGz),
            "bz2" => Ok(ArchiveFormat::TarBz2),
            "xz" => Ok(ArchiveFormat::TarXz),
            other => Err(AppError::UnknownFormat(other.to_string())),
        }
    }

    /// Extension used for the download file name.
    pub fn file_extension(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::TarBz2 => "tar.bz2",
            ArchiveFormat::TarXz => "tar.xz",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "application/x-tar",
            ArchiveFormat::Zip => "application/zip",
            ArchiveFormat::TarGz => "application/x-gzip",
            ArchiveFormat::TarBz2 => "application/x-bzip2",
            ArchiveFormat::TarXz => "application/x-xz",
        }
    }

    /// Value for `git archive --format=`; bzip2 and xz are produced from a
    /// plain tar by a post-processing stage.
    pub fn git_format(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::TarGz => "tar.gz",
            ArchiveFormat::Tar | ArchiveFormat::TarBz2 | ArchiveFormat::TarXz => "tar",
        }
    }
}

/// Path of a temporary archive: `<unix-millis>_<repo-id>-<random>.<ext>`.
pub fn temp_archive_path(temp_dir: &Path, repo_id: &str, format: ArchiveFormat) -> PathBuf {
    temp_dir.join(format!(
        "{}_{}-{}.{}",
        chrono::Utc::now().timestamp_millis(),
        repo_id,
        rand::random::<u64>(),
        format.file_extension()
    ))
}

/// Removes the file at `path` when dropped.
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
}

impl TempFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed temporary archive"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove temporary archive"),
        }
    }
}

/// A finished archive being streamed from its temporary file.
pub struct TempArchive {
    stream: ReaderStream<tokio::fs::File>,
    file: TempFile,
}

impl TempArchive {
    pub async fn open(file: TempFile) -> Result<Self> {
        let handle = tokio::fs::File::open(file.path())
            .await
            .map_err(|e| AppError::io(format!("open {}", file.path().display()), e))?;
        Ok(Self {
            stream: ReaderStream::new(handle),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl Stream for TempArchive {
    type Item = io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stream).poll_next(cx)
    }
}
