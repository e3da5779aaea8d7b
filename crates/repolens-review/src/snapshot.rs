//! Snapshot construction: which files of a repository get read for a review.

use std::future::Future;
use std::time::Duration;

use repolens_core::{FileRef, RepolensError, RepositoryKey, Result, Review, ReviewConfig};

use crate::fetcher::{RepoMetadata, RepositoryFetcher};
use crate::llm::truncate_at_char_boundary;

/// Directories that never contain first-party source.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "vendor",
    "third_party",
    "dist",
    "build",
    "target",
    "__pycache__",
    ".venv",
    "venv",
    ".tox",
    ".idea",
    ".vscode",
];

/// Extensions of files that are binary or generated.
const SKIPPED_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "gz", "tgz", "tar",
    "bz2", "xz", "7z", "jar", "war", "class", "exe", "dll", "so", "dylib", "a", "o", "obj", "bin",
    "wasm", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4", "mov", "avi", "wav", "ogg", "pyc",
    "db", "sqlite", "min.js", "map",
];

/// Dependency manifest file names.
const MANIFESTS: &[&str] = &[
    "package.json",
    "requirements.txt",
    "requirements-dev.txt",
    "pyproject.toml",
    "Pipfile",
    "setup.py",
    "setup.cfg",
    "Cargo.toml",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "build.gradle.kts",
    "Gemfile",
    "composer.json",
    "mix.exs",
    "pubspec.yaml",
];

/// Returns `true` if `path` names a dependency manifest.
///
/// # Examples
///
/// ```
/// use repolens_review::snapshot::is_manifest;
///
/// assert!(is_manifest("backend/requirements.txt"));
/// assert!(is_manifest("Cargo.toml"));
/// assert!(!is_manifest("src/package.py"));
/// ```
pub fn is_manifest(path: &str) -> bool {
    MANIFESTS.contains(&file_name(path))
}

/// Returns `true` if `path` names a file that usually holds credentials.
///
/// # Examples
///
/// ```
/// use repolens_review::snapshot::is_secret_bearing;
///
/// assert!(is_secret_bearing(".env"));
/// assert!(is_secret_bearing("deploy/.env.production"));
/// assert!(is_secret_bearing("keys/server.pem"));
/// assert!(is_secret_bearing("home/.ssh/id_rsa"));
/// assert!(!is_secret_bearing(".env.example"));
/// assert!(!is_secret_bearing("home/.ssh/id_rsa.pub"));
/// ```
pub fn is_secret_bearing(path: &str) -> bool {
    let name = file_name(path).to_lowercase();
    if name == ".env" {
        return true;
    }
    if let Some(suffix) = name.strip_prefix(".env.") {
        return !matches!(suffix, "example" | "sample" | "template" | "dist" | "defaults");
    }
    if matches!(name.as_str(), "id_rsa" | "id_dsa" | "id_ecdsa" | "id_ed25519") {
        return true;
    }
    [".pem", ".key", ".p12", ".pfx", ".keystore"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn is_skipped_by_default(path: &str) -> bool {
    let mut segments = path.split('/');
    let name = segments.next_back().unwrap_or(path);
    if segments.any(|dir| SKIPPED_DIRS.contains(&dir)) {
        return true;
    }
    let lower = name.to_lowercase();
    SKIPPED_EXTENSIONS
        .iter()
        .any(|ext| lower.strip_suffix(ext).is_some_and(|stem| stem.ends_with('.')))
}

/// Limits applied while building a snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotOptions {
    /// Maximum number of files read.
    pub max_files: usize,
    /// Files with more bytes than this are skipped after reading.
    pub max_file_bytes: usize,
    /// Extra exclusions.
    pub skip_patterns: Vec<glob::Pattern>,
    /// Retries for transient fetch failures.
    pub retries: u32,
}

impl SnapshotOptions {
    /// Build options from the `[review]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Config`] if a skip pattern is not a valid glob.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::ReviewConfig;
    /// use repolens_review::snapshot::SnapshotOptions;
    ///
    /// let config = ReviewConfig {
    ///     skip_patterns: vec!["docs/**".into()],
    ///     ..ReviewConfig::default()
    /// };
    /// let options = SnapshotOptions::from_config(&config).unwrap();
    /// assert!(options.is_skipped("docs/index.md"));
    /// assert!(options.is_skipped("node_modules/left-pad/index.js"));
    /// assert!(!options.is_skipped("src/app.py"));
    /// ```
    pub fn from_config(config: &ReviewConfig) -> Result<Self> {
        let skip_patterns = config
            .skip_patterns
            .iter()
            .map(|p| {
                glob::Pattern::new(p)
                    .map_err(|e| RepolensError::Config(format!("invalid skip pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            max_files: config.max_files,
            max_file_bytes: config.max_file_bytes,
            skip_patterns,
            retries: config.fetch_retries,
        })
    }

    /// Returns `true` if `path` is excluded from snapshots.
    pub fn is_skipped(&self, path: &str) -> bool {
        is_skipped_by_default(path) || self.skip_patterns.iter().any(|p| p.matches(path))
    }
}

/// Files fetched for one review, plus the listing they were chosen from.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Repository the files came from.
    pub repo: RepositoryKey,
    /// Repository metadata, when freshly fetched.
    pub metadata: Option<RepoMetadata>,
    /// Files read, manifests first, each with content and hash.
    pub files: Vec<FileRef>,
    /// Every path considered after exclusions.
    pub listing: Vec<String>,
}

impl Snapshot {
    /// Rebuild a snapshot from the files stored on a completed review.
    pub fn from_review(review: &Review) -> Self {
        Self {
            repo: review.repo.clone(),
            metadata: None,
            files: review.files.clone(),
            listing: review.files.iter().map(|f| f.path.clone()).collect(),
        }
    }

    /// Files that are dependency manifests.
    pub fn manifests(&self) -> impl Iterator<Item = &FileRef> {
        self.files.iter().filter(|f| is_manifest(&f.path))
    }

    /// Listed paths that look like committed credentials.
    pub fn secret_bearing_paths(&self) -> impl Iterator<Item = &str> {
        self.listing
            .iter()
            .map(String::as_str)
            .filter(|p| is_secret_bearing(p))
    }

    /// Render selected files as backend context, stopping at `max_bytes`.
    ///
    /// Contents of secret-bearing files are withheld.
    pub fn render_context(&self, max_bytes: usize, include: impl Fn(&FileRef) -> bool) -> String {
        let mut out = format!("Repository: {}\n", self.repo);
        if let Some(meta) = &self.metadata {
            if let Some(desc) = &meta.description {
                out.push_str(&format!("Description: {desc}\n"));
            }
            if let Some(lang) = &meta.language {
                out.push_str(&format!("Primary language: {lang}\n"));
            }
            out.push_str(&format!("Default branch: {}\n", meta.default_branch));
        }
        out.push_str(&format!("Files in repository: {}\n\n", self.listing.len()));

        let mut omitted = 0usize;
        for file in self.files.iter().filter(|f| include(f)) {
            let body = if is_secret_bearing(&file.path) {
                "[contents withheld: file may contain credentials]"
            } else {
                file.content.as_deref().unwrap_or_default()
            };
            let section = format!("### {}\n```\n{body}\n```\n\n", file.path);
            if out.len() + section.len() > max_bytes {
                omitted += 1;
                continue;
            }
            out.push_str(&section);
        }
        if omitted > 0 {
            out.push_str(&format!("({omitted} more files omitted for length)\n"));
        }
        truncate_at_char_boundary(&out, max_bytes.max(1)).to_string()
    }
}

/// Ordering key: manifests, then READMEs, then shallow paths, then by path.
fn priority(path: &str) -> (u8, usize, String) {
    let rank = if is_manifest(path) {
        0
    } else if file_name(path).to_lowercase().starts_with("readme") {
        1
    } else {
        2
    };
    (rank, path.matches('/').count(), path.to_string())
}

/// Run `op`, retrying transient failures up to `retries` times with linear backoff.
pub async fn retry_transient<T, F, Fut>(retries: u32, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_transient() && attempt < retries => {
                attempt += 1;
                tracing::debug!(what, attempt, error = %e, "retrying after transient failure");
                tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
            }
            other => return other,
        }
    }
}

/// Fetch metadata, list files, and read the highest-priority ones.
///
/// # Errors
///
/// Metadata and listing failures are returned as-is. Individual files that
/// disappear or cannot be decoded are skipped; rate-limit and transport
/// failures while reading abort the snapshot.
pub async fn build_snapshot(
    fetcher: &dyn RepositoryFetcher,
    key: &RepositoryKey,
    options: &SnapshotOptions,
) -> Result<Snapshot> {
    let metadata = retry_transient(options.retries, "metadata", || fetcher.metadata(key)).await?;
    let listed = retry_transient(options.retries, "list files", || fetcher.list_files(key)).await?;

    let mut listing: Vec<String> = listed
        .into_iter()
        .map(|f| f.path)
        .filter(|p| !p.is_empty() && !options.is_skipped(p))
        .collect();
    listing.sort_by_cached_key(|p| priority(p));

    let mut files = Vec::new();
    for path in &listing {
        if files.len() >= options.max_files {
            break;
        }
        let read = retry_transient(options.retries, path, || fetcher.read_file(key, path)).await;
        match read {
            Ok(content) if content.len() > options.max_file_bytes => {
                tracing::debug!(%path, bytes = content.len(), "skipping oversized file");
            }
            Ok(content) => files.push(FileRef::with_content(path, content)),
            Err(e @ (RepolensError::RateLimit(_) | RepolensError::Transport(_))) => return Err(e),
            Err(e) => tracing::warn!(%path, error = %e, "skipping unreadable file"),
        }
    }

    tracing::info!(
        repo = %key,
        listed = listing.len(),
        read = files.len(),
        "snapshot built"
    );
    Ok(Snapshot {
        repo: key.clone(),
        metadata: Some(metadata),
        files,
        listing,
    })
}
