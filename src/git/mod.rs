//! Everything that talks to the external `git` binary.
//!
//! - `identity`: repository path <-> id mapping
//! - `command`: subprocess execution (buffered, streamed, piped)
//! - `history`: `git log` decoding
//! - `tree`: `tar -tv` listing parser and content types
//! - `archive`: archive formats and temporary archive files
//! - `repository`: per-repository operations
//! - `listing`: repository discovery and enrichment

pub mod archive;
pub mod command;
pub mod history;
pub mod identity;
pub mod listing;
pub mod repository;
pub mod tree;

pub use identity::RepoResolver;
pub use listing::RepositoryLister;
pub use repository::{GitRepository, GitTools};
