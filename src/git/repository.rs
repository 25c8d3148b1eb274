use std::path::PathBuf;
use std::time::Duration;

use tracing::instrument;

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::git::archive::{temp_archive_path, ArchiveFormat, TempArchive, TempFile};
use crate::git::command::{validate_argument, CommandRunner, CommandSpec, CommandStream, Sink};
use crate::git::history::{decode_log, log_args};
use crate::git::tree::parse_tar_listing;
use crate::models::{CommitRecord, FileEntry, RepositoryIdentity};

/// Reference used when a request does not name a branch.
pub const DEFAULT_REFERENCE: &str = "HEAD";

/// External binaries and limits shared by every repository.
#[derive(Debug, Clone)]
pub struct GitTools {
    pub git: String,
    pub tar: String,
    pub bzip2: String,
    pub xz: String,
    pub runner: CommandRunner,
    pub archive_timeout: Duration,
    pub temp_dir: PathBuf,
}

impl GitTools {
    pub fn from_config(config: &Config) -> Self {
        Self {
            git: config.git.clone(),
            tar: config.tar.clone(),
            bzip2: config.bzip2.clone(),
            xz: config.xz.clone(),
            runner: CommandRunner::new(config.timeout),
            archive_timeout: config.archive_timeout,
            temp_dir: config.temp_dir.clone(),
        }
    }

    pub fn open(&self, identity: RepositoryIdentity) -> GitRepository<'_> {
        GitRepository {
            identity,
            tools: self,
        }
    }
}

/// One resolved repository; every command runs with its location as cwd.
pub struct GitRepository<'a> {
    pub identity: RepositoryIdentity,
    tools: &'a GitTools,
}

impl GitRepository<'_> {
    fn git(&self) -> CommandSpec {
        CommandSpec::new(&self.tools.git, &self.identity.location)
    }

    #[instrument(skip(self), fields(repo = %self.identity.id))]
    pub async fn log(&self, count: u32, skip: Option<u32>) -> Result<Vec<CommitRecord>> {
        let spec = self.git().args(log_args(count, skip));
        let output = self.tools.runner.run(&spec).await?;
        Ok(decode_log(&output.stdout, count as usize)?)
    }

    pub async fn last_commit(&self) -> Result<Option<CommitRecord>> {
        Ok(self.log(1, None).await?.into_iter().next())
    }

    /// `git diff-tree --patch-with-stat <commit>` as a live stream.
    pub fn diff(&self, commit: &str) -> Result<CommandStream> {
        validate_argument(commit)?;
        let spec = self.git().args(["diff-tree", "--patch-with-stat", commit]);
        Ok(self.tools.runner.stream(&spec)?)
    }

    /// Contents of `path` at `reference`, read from the object store.
    pub fn show_file(&self, reference: &str, path: &str) -> Result<CommandStream> {
        validate_argument(reference)?;
        validate_argument(path)?;
        let spec = self
            .git()
            .args(["show", "--format=raw"])
            .arg(format!("{}:{}", reference, path));
        Ok(self.tools.runner.stream(&spec)?)
    }

    /// Every file at `reference`, found by piping `git archive` through `tar -tv`.
    #[instrument(skip(self), fields(repo = %self.identity.id))]
    pub async fn list_files(&self, reference: &str) -> Result<Vec<FileEntry>> {
        validate_argument(reference)?;
        let stages = [
            self.git().args(["archive", "--format=tar", reference]),
            CommandSpec::new(&self.tools.tar, &self.identity.location).arg("-tv"),
        ];
        let output = self
            .tools
            .runner
            .run_pipeline(&stages, Sink::Capture, self.tools.runner.timeout())
            .await?;
        Ok(parse_tar_listing(&output.stdout_lossy()))
    }

    /// Export `reference` into a temporary file ready to be streamed.
    #[instrument(skip(self), fields(repo = %self.identity.id))]
    pub async fn archive(&self, reference: &str, format: ArchiveFormat) -> Result<TempArchive> {
        validate_argument(reference)?;

        let mut stages = vec![self.git().args([
            "archive".to_string(),
            format!("--format={}", format.git_format()),
            reference.to_string(),
        ])];
        let compressor = match format {
            ArchiveFormat::TarBz2 => Some(&self.tools.bzip2),
            ArchiveFormat::TarXz => Some(&self.tools.xz),
            _ => None,
        };
        if let Some(program) = compressor {
            stages.push(CommandSpec::new(program, &self.identity.location).arg("-c"));
        }

        let temp = TempFile::new(temp_archive_path(
            &self.tools.temp_dir,
            &self.identity.id,
            format,
        ));
        let file = std::fs::File::create(temp.path())
            .map_err(|e| AppError::io(format!("create {}", temp.path().display()), e))?;

        self.tools
            .runner
            .run_pipeline(&stages, Sink::File(file), self.tools.archive_timeout)
            .await?;

        TempArchive::open(temp).await
    }
}
