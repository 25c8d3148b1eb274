//! Mapping between on-disk repository paths and URL-safe identifiers.
//!
//! A repository at `<root>/team/project` has the id `team+project` and the
//! archive base name `team-project`. Ids and relative directories are mutually
//! invertible as long as no path segment contains `+`.

use std::path::{Component, Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::RepositoryIdentity;

/// Character substituted for `/` in repository ids.
pub const ID_SEPARATOR: char = '+';

/// Character substituted for `/` in archive file names.
pub const ARCHIVE_SEPARATOR: char = '-';

#[derive(Debug, Clone)]
pub struct RepoResolver {
    root: PathBuf,
    root_prefix: String,
}

impl RepoResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let mut root_prefix = root.to_string_lossy().trim_end_matches('/').to_string();
        root_prefix.push('/');
        Self { root, root_prefix }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve either a filesystem path under the root or a repository id.
    ///
    /// No existence check happens here; see [`RepoResolver::locate`].
    pub fn resolve(&self, path_or_id: &str) -> RepositoryIdentity {
        match path_or_id.find(&self.root_prefix) {
            Some(pos) => self.from_path(path_or_id, &path_or_id[pos + self.root_prefix.len()..]),
            None => self.from_id(path_or_id),
        }
    }

    fn from_path(&self, location: &str, relative_dir: &str) -> RepositoryIdentity {
        let relative_dir = relative_dir.trim_end_matches('/').to_string();
        RepositoryIdentity {
            location: PathBuf::from(location),
            id: relative_dir.replace('/', &ID_SEPARATOR.to_string()),
            archive_base_name: relative_dir.replace('/', &ARCHIVE_SEPARATOR.to_string()),
            display_name: relative_dir.clone(),
            relative_dir,
        }
    }

    fn from_id(&self, id: &str) -> RepositoryIdentity {
        let relative_dir = id.replace(ID_SEPARATOR, "/");
        RepositoryIdentity {
            location: self.root.join(&relative_dir),
            id: id.to_string(),
            archive_base_name: relative_dir.replace('/', &ARCHIVE_SEPARATOR.to_string()),
            display_name: relative_dir.clone(),
            relative_dir,
        }
    }

    /// True if the identity names a directory strictly below the root.
    pub fn is_contained(&self, identity: &RepositoryIdentity) -> bool {
        let relative = Path::new(&identity.relative_dir);
        !identity.relative_dir.is_empty()
            && !identity.relative_dir.contains("//")
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)))
    }

    /// Resolve an id coming from a request and require that the repository
    /// directory exists inside the root.
    ///
    /// Request input is only ever read as an id, never as a filesystem path.
    pub fn locate(&self, id: &str) -> Result<RepositoryIdentity> {
        let identity = self.from_id(id);
        if id.contains('/')
            || !self.is_contained(&identity)
            || !identity.location.starts_with(&self.root)
            || !identity.location.is_dir()
        {
            return Err(AppError::RepoNotFound(identity.display_name));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> RepoResolver {
        RepoResolver::new("/srv/git")
    }

    #[test]
    fn resolves_path_under_root() {
        let identity = resolver().resolve("/srv/git/team/project");
        assert_eq!(identity.location, PathBuf::from("/srv/git/team/project"));
        assert_eq!(identity.relative_dir, "team/project");
        assert_eq!(identity.display_name, "team/project");
        assert_eq!(identity.id, "team+project");
        assert_eq!(identity.archive_base_name, "team-project");
    }

    #[test]
    fn resolves_id() {
        let identity = resolver().resolve("team+project");
        assert_eq!(identity.location, PathBuf::from("/srv/git/team/project"));
        assert_eq!(identity.relative_dir, "team/project");
        assert_eq!(identity.archive_base_name, "team-project");
    }

    #[test]
    fn root_with_trailing_slash() {
        let identity = RepoResolver::new("/srv/git/").resolve("/srv/git/solo");
        assert_eq!(identity.id, "solo");
    }

    #[test]
    fn id_and_path_round_trip() {
        let resolver = resolver();
        for id in ["solo", "team+project", "a+b+c", "with-dash", "dots.in.name"] {
            let identity = resolver.resolve(id);
            let location = identity.location.to_string_lossy().to_string();
            assert_eq!(resolver.resolve(&location).id, id);
            assert_eq!(resolver.resolve(&location), identity);
        }
    }

    #[test]
    fn traversal_is_not_contained() {
        let resolver = resolver();
        assert!(!resolver.is_contained(&resolver.resolve("..+etc")));
        assert!(!resolver.is_contained(&resolver.resolve("a+..+..+etc")));
        assert!(!resolver.is_contained(&resolver.resolve("a++b")));
        assert!(!resolver.is_contained(&resolver.resolve(".")));
        assert!(resolver.is_contained(&resolver.resolve("a+b")));
    }

    #[test]
    fn locate_requires_existing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("team/project")).unwrap();
        let resolver = RepoResolver::new(tmp.path());

        let identity = resolver.locate("team+project").unwrap();
        assert_eq!(identity.relative_dir, "team/project");

        match resolver.locate("team+missing") {
            Err(AppError::RepoNotFound(name)) => assert_eq!(name, "team/missing"),
            other => panic!("expected RepoNotFound, got {other:?}"),
        }
        assert!(matches!(
            resolver.locate("..+.."),
            Err(AppError::RepoNotFound(_))
        ));
    }

    #[test]
    fn locate_never_reads_a_path() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("repos");
        std::fs::create_dir_all(root.join("inside")).unwrap();
        let outside = tmp.path().join("evil").join(root.strip_prefix("/").unwrap()).join("x");
        std::fs::create_dir_all(&outside).unwrap();
        let resolver = RepoResolver::new(&root);

        let request = outside.to_string_lossy().to_string();
        assert!(request.contains(&resolver.root_prefix));
        assert!(matches!(
            resolver.locate(&request),
            Err(AppError::RepoNotFound(_))
        ));

        let inside = root.join("inside").to_string_lossy().to_string();
        assert!(matches!(
            resolver.locate(&inside),
            Err(AppError::RepoNotFound(_))
        ));
        assert!(resolver.locate("inside").is_ok());
    }
}
