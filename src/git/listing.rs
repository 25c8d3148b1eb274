//! Repository discovery under the configured root.
//!
//! The walk looks one level deep, except in whitelist mode where it also
//! descends into ancestors of whitelisted paths. Results are sorted before any
//! enrichment starts; enrichment runs a bounded number of repositories at a
//! time and keeps the sorted order.

use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument, warn};

use crate::config::ListingFilter;
use crate::error::{AppError, Result};
use crate::git::identity::RepoResolver;
use crate::git::repository::GitTools;
use crate::models::{RepositoryIdentity, RepositoryListing};

/// Text git writes into `.git/description` on `git init`.
const PLACEHOLDER_DESCRIPTION: &str = "Unnamed repository;";

pub struct RepositoryLister<'a> {
    resolver: &'a RepoResolver,
    tools: &'a GitTools,
    filter: &'a ListingFilter,
    metadata_dir: &'a str,
    concurrency: usize,
}

impl<'a> RepositoryLister<'a> {
    pub fn new(
        resolver: &'a RepoResolver,
        tools: &'a GitTools,
        filter: &'a ListingFilter,
        metadata_dir: &'a str,
        concurrency: usize,
    ) -> Self {
        Self {
            resolver,
            tools,
            filter,
            metadata_dir,
            concurrency: concurrency.max(1),
        }
    }

    /// Every admitted repository, sorted by name, with description and
    /// latest commit filled in where available.
    #[instrument(skip(self), fields(root = %self.resolver.root().display()))]
    pub async fn list(&self) -> Result<Vec<RepositoryListing>> {
        let identities = self.discover().await?;
        debug!(count = identities.len(), "enriching repositories");

        let listings: Vec<RepositoryListing> = stream::iter(identities)
            .map(|identity| self.enrich(identity))
            .buffered(self.concurrency)
            .collect()
            .await;
        Ok(listings)
    }

    /// Walk the root and return admitted repositories sorted by display name.
    pub async fn discover(&self) -> Result<Vec<RepositoryIdentity>> {
        let root = self.resolver.root();
        let mut found = Vec::new();
        let mut pending: Vec<String> = Vec::new();

        self.scan(root, "", &mut found, &mut pending)
            .await
            .map_err(|e| AppError::io(format!("read {}", root.display()), e))?;

        while let Some(relative) = pending.pop() {
            tokio::task::yield_now().await;
            let dir = root.join(&relative);
            if let Err(e) = self.scan(&dir, &relative, &mut found, &mut pending).await {
                warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
            }
        }

        found.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(found)
    }

    async fn scan(
        &self,
        dir: &Path,
        parent: &str,
        found: &mut Vec<RepositoryIdentity>,
        pending: &mut Vec<String>,
    ) -> std::io::Result<()> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut candidates: Vec<(String, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let is_dir = match entry.file_type().await {
                Ok(kind) if kind.is_symlink() => tokio::fs::metadata(entry.path())
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false),
                Ok(kind) => kind.is_dir(),
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "cannot stat entry");
                    false
                }
            };
            if is_dir {
                candidates.push((entry.file_name().to_string_lossy().into_owned(), entry.path()));
            }
        }
        // read_dir order is unspecified; fix it so ties sort deterministically
        candidates.sort();

        for (name, path) in candidates {
            let relative = if parent.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", parent, name)
            };
            let admission = self.filter.admit(&name, &relative);
            if admission.report && is_repository(&path, self.metadata_dir).await {
                found.push(self.resolver.resolve(&path.to_string_lossy()));
            }
            if admission.descend {
                pending.push(relative);
            }
        }
        Ok(())
    }

    async fn enrich(&self, identity: RepositoryIdentity) -> RepositoryListing {
        let repo = self.tools.open(identity);
        let (description, last_commit) = tokio::join!(
            read_description(&repo.identity.location, self.metadata_dir),
            repo.last_commit()
        );

        let last_commit = match last_commit {
            Ok(commit) => commit,
            Err(e) => {
                warn!(repo = %repo.identity.id, error = %e, "last commit unavailable");
                None
            }
        };

        RepositoryListing {
            description,
            last_commit,
            identity: repo.identity,
        }
    }
}

async fn is_repository(path: &Path, metadata_dir: &str) -> bool {
    tokio::fs::metadata(path.join(metadata_dir))
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

/// `<repo>/description`, falling back to the one inside the metadata
/// directory unless git's placeholder was never replaced.
async fn read_description(location: &Path, metadata_dir: &str) -> Option<String> {
    if let Some(text) = read_optional(&location.join("description")).await {
        return Some(text);
    }
    read_optional(&location.join(metadata_dir).join("description"))
        .await
        .filter(|text| !text.starts_with(PLACEHOLDER_DESCRIPTION))
}

async fn read_optional(path: &Path) -> Option<String> {
    match tokio::fs::read_to_string(path).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => None,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read description");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterMode;
    use crate::git::repository::tests::{git_available, init_repo, tools};

    fn fake_repo(root: &Path, relative: &str) {
        std::fs::create_dir_all(root.join(relative).join(".git")).unwrap();
    }

    async fn names(root: &Path, filter: ListingFilter) -> Vec<String> {
        let resolver = RepoResolver::new(root);
        let tools = tools(root);
        RepositoryLister::new(&resolver, &tools, &filter, ".git", 4)
            .discover()
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.display_name)
            .collect()
    }

    #[tokio::test]
    async fn discovers_repositories_one_level_deep_sorted() {
        let root = tempfile::tempdir().unwrap();
        fake_repo(root.path(), "zeta");
        fake_repo(root.path(), "Alpha");
        fake_repo(root.path(), "beta");
        fake_repo(root.path(), "group/nested");
        std::fs::create_dir_all(root.path().join("plain")).unwrap();
        std::fs::write(root.path().join("file.txt"), "x").unwrap();

        assert_eq!(
            names(root.path(), ListingFilter::default()).await,
            ["Alpha", "beta", "zeta"]
        );
    }

    #[tokio::test]
    async fn blacklist_hides_entries() {
        let root = tempfile::tempdir().unwrap();
        fake_repo(root.path(), "public");
        fake_repo(root.path(), "secret");

        let filter = ListingFilter::new(vec!["secret".into()], Vec::new(), None);
        assert_eq!(names(root.path(), filter).await, ["public"]);
    }

    #[tokio::test]
    async fn whitelist_reaches_nested_leaves_only() {
        let root = tempfile::tempdir().unwrap();
        fake_repo(root.path(), "a/b");
        fake_repo(root.path(), "a/c");
        fake_repo(root.path(), "other");
        // `a` itself is a repository but only reachable as an ancestor
        fake_repo(root.path(), "a");

        let filter = ListingFilter::new(Vec::new(), vec!["a/b".into()], None);
        assert_eq!(filter.mode(), FilterMode::Whitelist);
        assert_eq!(names(root.path(), filter).await, ["a/b"]);
    }

    #[tokio::test]
    async fn whitelist_matches_bare_names() {
        let root = tempfile::tempdir().unwrap();
        fake_repo(root.path(), "keep");
        fake_repo(root.path(), "drop");

        let filter = ListingFilter::new(Vec::new(), vec!["keep".into()], None);
        assert_eq!(names(root.path(), filter).await, ["keep"]);
    }

    #[tokio::test]
    async fn unreadable_root_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("missing");
        let resolver = RepoResolver::new(&missing);
        let tools = tools(root.path());
        let filter = ListingFilter::default();
        let lister = RepositoryLister::new(&resolver, &tools, &filter, ".git", 4);

        assert!(matches!(lister.list().await, Err(AppError::Io { .. })));
    }

    #[tokio::test]
    async fn description_prefers_top_level_file() {
        let root = tempfile::tempdir().unwrap();
        let repo = root.path().join("proj");
        std::fs::create_dir_all(repo.join(".git")).unwrap();

        std::fs::write(
            repo.join(".git/description"),
            "Unnamed repository; edit this file 'description' to name the repository.\n",
        )
        .unwrap();
        assert_eq!(read_description(&repo, ".git").await, None);

        std::fs::write(repo.join(".git/description"), "inner\n").unwrap();
        assert_eq!(read_description(&repo, ".git").await.as_deref(), Some("inner\n"));

        std::fs::write(repo.join("description"), "outer\n").unwrap();
        assert_eq!(read_description(&repo, ".git").await.as_deref(), Some("outer\n"));
    }

    #[tokio::test]
    async fn broken_repositories_are_listed_without_commit() {
        let root = tempfile::tempdir().unwrap();
        fake_repo(root.path(), "hollow");
        let resolver = RepoResolver::new(root.path());
        let tools = tools(root.path());
        let filter = ListingFilter::default();

        let listings = RepositoryLister::new(&resolver, &tools, &filter, ".git", 4)
            .list()
            .await
            .unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].identity.id, "hollow");
        assert!(listings[0].last_commit.is_none());
    }

    #[tokio::test]
    async fn listing_is_enriched_and_stable() {
        if !git_available() {
            return;
        }
        let root = tempfile::tempdir().unwrap();
        for name in ["c", "a", "b", "d", "e"] {
            init_repo(&root.path().join(name), &[name]);
        }
        std::fs::write(root.path().join("b/description"), "bee\n").unwrap();
        let resolver = RepoResolver::new(root.path());
        let tools = tools(root.path());
        let filter = ListingFilter::default();
        let lister = RepositoryLister::new(&resolver, &tools, &filter, ".git", 2);

        let first = lister.list().await.unwrap();
        let second = lister.list().await.unwrap();

        let order: Vec<&str> = first.iter().map(|l| l.identity.display_name.as_str()).collect();
        assert_eq!(order, ["a", "b", "c", "d", "e"]);
        assert_eq!(first[1].description.as_deref(), Some("bee\n"));
        for (x, y) in first.iter().zip(&second) {
            let x = x.last_commit.as_ref().unwrap();
            let y = y.last_commit.as_ref().unwrap();
            assert_eq!(x.hash, y.hash);
        }
        assert_eq!(first[0].last_commit.as_ref().unwrap().message, "a");
    }
}
