//! Data transfer objects for API responses.
//!
//! These structs are serialized to JSON for the browser client.
//! - `commit`: CommitRecord decoded from `git log`
//! - `repository`: RepositoryIdentity, RepositoryListing
//! - `files`: FileEntry from the recursive file listing

pub mod commit;
pub mod files;
pub mod repository;

pub use commit::*;
pub use files::*;
pub use repository::*;
