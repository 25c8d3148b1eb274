//! Startup configuration.
//!
//! The command line is parsed once into `Cli` and converted into an immutable
//! `Config` that every component receives through `Arc<AppState>`. Nothing
//! mutates configuration after startup.

use clap::{Parser, ValueEnum};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Git Web Navigator - read-only HTTP view over a tree of git repositories
#[derive(Parser, Debug)]
#[command(name = "git-web-nav")]
#[command(about = "Serve a directory of git repositories over HTTP", long_about = None)]
pub struct Cli {
    /// Directory containing the repositories to serve
    #[arg(short, long, value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Port to run the server on
    #[arg(short, long, default_value = "9999")]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// URL prefix for the JSON API
    #[arg(long, default_value = "/api")]
    pub api_prefix: String,

    /// git binary
    #[arg(long, default_value = "git")]
    pub git: String,

    /// tar binary used for recursive file listings
    #[arg(long, default_value = "tar")]
    pub tar: String,

    /// bzip2 binary used for .bz2 archives
    #[arg(long, default_value = "bzip2")]
    pub bzip2: String,

    /// xz binary used for .xz archives
    #[arg(long, default_value = "xz")]
    pub xz: String,

    /// Timeout for log, diff, file and listing commands, in milliseconds
    #[arg(long, default_value = "1400")]
    pub timeout_ms: u64,

    /// Timeout for archive export, in milliseconds
    #[arg(long, default_value = "24000")]
    pub archive_timeout_ms: u64,

    /// Default number of log entries per page
    #[arg(long, default_value = "50")]
    pub page_size: u32,

    /// Directory for temporary archive files
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,

    /// Maximum number of repositories enriched at once while listing
    #[arg(long, default_value = "8")]
    pub listing_concurrency: usize,

    /// Directories to hide (bare name or root-relative path)
    #[arg(long, value_delimiter = ',')]
    pub blacklist: Vec<String>,

    /// Only show these directories (bare name or root-relative path)
    #[arg(long, value_delimiter = ',')]
    pub whitelist: Vec<String>,

    /// Filter mode; detected from which list is non-empty when omitted
    #[arg(long, value_enum)]
    pub filter_mode: Option<FilterMode>,

    /// Serve the bundled index page at /
    #[arg(long)]
    pub serve_index: bool,

    /// Exit at startup if the root directory does not exist
    #[arg(long)]
    pub fail_fast: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FilterMode {
    Blacklist,
    Whitelist,
}

/// Blacklist/whitelist restricting which directories are exposed.
///
/// In whitelist mode `ancestors` holds every parent directory of every
/// whitelisted path, so the directory walk can reach nested entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingFilter {
    mode: FilterMode,
    entries: HashSet<String>,
    ancestors: HashSet<String>,
}

/// What the directory walk should do with one candidate directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub report: bool,
    pub descend: bool,
}

impl ListingFilter {
    pub fn new(
        blacklist: Vec<String>,
        whitelist: Vec<String>,
        mode: Option<FilterMode>,
    ) -> Self {
        let mode = mode.unwrap_or(if !blacklist.is_empty() || whitelist.is_empty() {
            FilterMode::Blacklist
        } else {
            FilterMode::Whitelist
        });

        let list = match mode {
            FilterMode::Blacklist => blacklist,
            FilterMode::Whitelist => whitelist,
        };
        let entries: HashSet<String> = list
            .iter()
            .map(|e| e.trim().trim_matches('/').to_string())
            .filter(|e| !e.is_empty())
            .collect();

        let mut ancestors = HashSet::new();
        if mode == FilterMode::Whitelist {
            for entry in &entries {
                let mut prefix = String::new();
                let segments: Vec<&str> = entry.split('/').collect();
                for segment in &segments[..segments.len() - 1] {
                    if !prefix.is_empty() {
                        prefix.push('/');
                    }
                    prefix.push_str(segment);
                    ancestors.insert(prefix.clone());
                }
            }
        }

        Self {
            mode,
            entries,
            ancestors,
        }
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    /// Decide whether a directory is reported and/or walked into.
    ///
    /// `name` is the bare directory name, `relative` its root-relative path.
    pub fn admit(&self, name: &str, relative: &str) -> Admission {
        let listed = self.entries.contains(name) || self.entries.contains(relative);
        match self.mode {
            FilterMode::Blacklist => Admission {
                report: !listed,
                descend: false,
            },
            FilterMode::Whitelist => Admission {
                report: listed,
                descend: self.ancestors.contains(relative),
            },
        }
    }

    /// True if a walk from the root would reach and report `relative`.
    pub fn exposes(&self, relative: &str) -> bool {
        let mut walked = String::new();
        let mut segments = relative.split('/').peekable();
        while let Some(name) = segments.next() {
            if !walked.is_empty() {
                walked.push('/');
            }
            walked.push_str(name);
            let admission = self.admit(name, &walked);
            if segments.peek().is_none() {
                return admission.report;
            }
            if !admission.descend {
                return false;
            }
        }
        false
    }
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self::new(Vec::new(), Vec::new(), None)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    pub api_prefix: String,
    pub git: String,
    pub tar: String,
    pub bzip2: String,
    pub xz: String,
    pub timeout: Duration,
    pub archive_timeout: Duration,
    pub page_size: u32,
    pub metadata_dir: String,
    pub temp_dir: PathBuf,
    pub listing_concurrency: usize,
    pub filter: ListingFilter,
    pub serve_index: bool,
    pub fail_fast: bool,
}

impl Config {
    /// Configuration with defaults for everything but the repository root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host: "127.0.0.1".to_string(),
            port: 9999,
            api_prefix: "/api".to_string(),
            git: "git".to_string(),
            tar: "tar".to_string(),
            bzip2: "bzip2".to_string(),
            xz: "xz".to_string(),
            timeout: Duration::from_millis(1400),
            archive_timeout: Duration::from_millis(24000),
            page_size: 50,
            metadata_dir: ".git".to_string(),
            temp_dir: std::env::temp_dir(),
            listing_concurrency: 8,
            filter: ListingFilter::default(),
            serve_index: false,
            fail_fast: false,
        }
    }

    /// Check invariants that must hold before the server starts.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.fail_fast && !self.root.is_dir() {
            anyhow::bail!("repository root {} is not a directory", self.root.display());
        }
        if !self.api_prefix.is_empty() && !self.api_prefix.starts_with('/') {
            anyhow::bail!("api prefix must start with '/': {}", self.api_prefix);
        }
        Ok(())
    }
}

impl From<Cli> for Config {
    fn from(cli: Cli) -> Self {
        let root = cli.root.unwrap_or_else(default_root);
        let root = std::fs::canonicalize(&root).unwrap_or(root);

        Self {
            root,
            host: cli.host,
            port: cli.port,
            api_prefix: cli.api_prefix.trim_end_matches('/').to_string(),
            git: cli.git,
            tar: cli.tar,
            bzip2: cli.bzip2,
            xz: cli.xz,
            timeout: Duration::from_millis(cli.timeout_ms),
            archive_timeout: Duration::from_millis(cli.archive_timeout_ms),
            page_size: cli.page_size,
            metadata_dir: ".git".to_string(),
            temp_dir: cli.temp_dir.unwrap_or_else(std::env::temp_dir),
            listing_concurrency: cli.listing_concurrency.max(1),
            filter: ListingFilter::new(cli.blacklist, cli.whitelist, cli.filter_mode),
            serve_index: cli.serve_index,
            fail_fast: cli.fail_fast,
        }
    }
}

/// `/repos` inside a container, otherwise the working directory.
fn default_root() -> PathBuf {
    if Path::new("/.dockerenv").exists() {
        PathBuf::from("/repos")
    } else {
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }
}
