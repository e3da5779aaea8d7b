//! Collaborator interfaces consumed by the coordinator and derivation engine.

use async_trait::async_trait;
use repolens_core::{FileRef, RepositoryKey, Result};
use serde::{Deserialize, Serialize};

/// Repository-level metadata returned by a [`RepositoryFetcher`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoMetadata {
    /// Repository description, if set.
    pub description: Option<String>,
    /// Branch that file listings and reads are taken from.
    pub default_branch: String,
    /// Primary language reported by the host.
    pub language: Option<String>,
    /// Whether the repository is private.
    pub private: bool,
}

/// Read access to a hosted repository.
///
/// Implementations surface upstream throttling as
/// [`RepolensError::RateLimit`](repolens_core::RepolensError::RateLimit) and
/// transient network failures as
/// [`RepolensError::Transport`](repolens_core::RepolensError::Transport); only
/// the latter are retried by callers.
#[async_trait]
pub trait RepositoryFetcher: Send + Sync {
    /// Normalize a repository URL into its key.
    fn resolve(&self, url: &str) -> Result<RepositoryKey> {
        RepositoryKey::parse(url)
    }

    /// Repository metadata.
    async fn metadata(&self, key: &RepositoryKey) -> Result<RepoMetadata>;

    /// Every file in the repository's default branch (paths only).
    async fn list_files(&self, key: &RepositoryKey) -> Result<Vec<FileRef>>;

    /// Content of one file in the default branch.
    async fn read_file(&self, key: &RepositoryKey, path: &str) -> Result<String>;
}

/// Text-producing analysis backend (an LLM).
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Answer `prompt` (instructions) about `context` (material to analyse).
    ///
    /// Fails with
    /// [`RepolensError::BackendUnavailable`](repolens_core::RepolensError::BackendUnavailable)
    /// when the backend cannot be reached or returns an unusable response.
    async fn complete(&self, prompt: &str, context: &str) -> Result<String>;
}
