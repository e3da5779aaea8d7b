use async_trait::async_trait;
use repolens_core::{FileRef, GitHubConfig, RepolensError, RepositoryKey};
use serde::Deserialize;

use crate::fetcher::{RepoMetadata, RepositoryFetcher};

const USER_AGENT: &str = concat!("repolens/", env!("CARGO_PKG_VERSION"));

/// GitHub REST client implementing [`RepositoryFetcher`].
///
/// Metadata goes through `octocrab`; the recursive tree listing and raw file
/// reads use plain `reqwest` requests against the same API root.
///
/// # Examples
///
/// ```no_run
/// use repolens_core::GitHubConfig;
/// use repolens_review::github::GitHubClient;
///
/// # #[tokio::main]
/// # async fn main() {
/// let client = GitHubClient::new(&GitHubConfig::default()).unwrap();
/// # }
/// ```
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RepoResponse {
    description: Option<String>,
    default_branch: Option<String>,
    language: Option<String>,
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl GitHubClient {
    /// Create a client from configuration.
    ///
    /// A missing token is allowed; requests are then made anonymously.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Config`] if the API URL is invalid or the
    /// client cannot be built.
    pub fn new(config: &GitHubConfig) -> Result<Self, RepolensError> {
        let api_url = config.api_url.trim_end_matches('/').to_string();

        let mut builder = octocrab::Octocrab::builder()
            .base_uri(api_url.as_str())
            .map_err(|e| RepolensError::Config(format!("invalid GitHub API URL '{api_url}': {e}")))?;
        match &config.token {
            Some(token) => builder = builder.personal_token(token.clone()),
            None => tracing::warn!(
                "no GitHub token configured, unauthenticated requests are heavily rate limited"
            ),
        }
        let octocrab = builder
            .build()
            .map_err(|e| RepolensError::Config(format!("failed to create GitHub client: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| RepolensError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            octocrab,
            http,
            api_url,
            token: config.token.clone(),
        })
    }

    fn endpoint(&self, key: &RepositoryKey, tail: &[&str]) -> Result<reqwest::Url, RepolensError> {
        let mut url = reqwest::Url::parse(&self.api_url)
            .map_err(|e| RepolensError::Config(format!("invalid GitHub API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| RepolensError::Config("GitHub API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["repos", key.owner(), key.name()])
            .extend(tail);
        Ok(url)
    }

    async fn get(
        &self,
        url: reqwest::Url,
        accept: &str,
        resource: Resource,
        what: &str,
    ) -> Result<reqwest::Response, RepolensError> {
        let mut request = self.http.get(url).header("Accept", accept);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }
        let response = request.send().await.map_err(transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        Err(classify_status(
            status.as_u16(),
            remaining.as_deref(),
            &body,
            resource,
            what,
        ))
    }
}

#[async_trait]
impl RepositoryFetcher for GitHubClient {
    async fn metadata(&self, key: &RepositoryKey) -> Result<RepoMetadata, RepolensError> {
        let route = format!("/repos/{}/{}", key.owner(), key.name());
        let repo: RepoResponse = self
            .octocrab
            .get(route, None::<&()>)
            .await
            .map_err(|e| octocrab_error(e, &key.to_string()))?;

        Ok(RepoMetadata {
            description: repo.description,
            default_branch: repo.default_branch.unwrap_or_else(|| "main".into()),
            language: repo.language,
            private: repo.private,
        })
    }

    async fn list_files(&self, key: &RepositoryKey) -> Result<Vec<FileRef>, RepolensError> {
        let mut url = self.endpoint(key, &["git", "trees", "HEAD"])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let response = self
            .get(
                url,
                "application/vnd.github+json",
                Resource::Repository,
                &key.to_string(),
            )
            .await?;
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| RepolensError::Fetch(format!("malformed tree listing for {key}: {e}")))?;
        if tree.truncated {
            tracing::warn!(repo = %key, "tree listing truncated by GitHub");
        }

        Ok(tree
            .tree
            .into_iter()
            .filter(|entry| entry.kind == "blob")
            .map(|entry| FileRef::new(entry.path))
            .collect())
    }

    async fn read_file(&self, key: &RepositoryKey, path: &str) -> Result<String, RepolensError> {
        let normalized = repolens_core::normalize_path(path);
        let mut tail = vec!["contents"];
        tail.extend(normalized.split('/'));
        let url = self.endpoint(key, &tail)?;

        let response = self
            .get(
                url,
                "application/vnd.github.raw+json",
                Resource::File,
                &format!("{key}:{normalized}"),
            )
            .await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| RepolensError::Fetch(format!("{normalized} is not valid UTF-8")))
    }
}

/// What a request was asking for; decides how a 404 is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    /// The repository itself or its tree.
    Repository,
    /// A single file inside the repository.
    File,
}

/// Map an unsuccessful GitHub response onto an error variant.
///
/// 404 becomes [`RepolensError::NotFound`] for files and a
/// [`RepolensError::Fetch`] for repositories (private and missing
/// repositories are indistinguishable anonymously). 403/429 with an
/// exhausted quota or a rate-limit message become [`RepolensError::RateLimit`].
/// 5xx responses are treated as transient.
///
/// # Examples
///
/// ```
/// use repolens_core::RepolensError;
/// use repolens_review::github::{classify_status, Resource};
///
/// let err = classify_status(403, Some("0"), "", Resource::Repository, "octocat/demo");
/// assert!(matches!(err, RepolensError::RateLimit(_)));
///
/// let err = classify_status(404, None, "Not Found", Resource::Repository, "octocat/missing");
/// assert!(err.to_string().contains("not found or private"));
/// ```
pub fn classify_status(
    status: u16,
    rate_remaining: Option<&str>,
    body: &str,
    resource: Resource,
    what: &str,
) -> RepolensError {
    let exhausted = rate_remaining.is_some_and(|r| r.trim() == "0");
    let mentions_limit = body.to_lowercase().contains("rate limit");

    match status {
        404 if resource == Resource::File => RepolensError::NotFound(format!("file {what}")),
        404 => RepolensError::Fetch(format!("repository {what} not found or private")),
        403 | 429 if exhausted || mentions_limit || status == 429 => RepolensError::RateLimit(
            format!("GitHub refused the request for {what} (HTTP {status})"),
        ),
        401 => RepolensError::Fetch(format!("GitHub rejected the credentials for {what}")),
        500..=599 => RepolensError::Transport(format!("GitHub returned HTTP {status} for {what}")),
        _ => {
            let detail = body.chars().take(200).collect::<String>();
            RepolensError::Fetch(format!("GitHub returned HTTP {status} for {what}: {detail}"))
        }
    }
}

fn transport_error(e: reqwest::Error) -> RepolensError {
    RepolensError::Transport(e.to_string())
}

fn octocrab_error(e: octocrab::Error, what: &str) -> RepolensError {
    match e {
        octocrab::Error::GitHub { source, .. } => classify_status(
            source.status_code.as_u16(),
            None,
            &source.message,
            Resource::Repository,
            what,
        ),
        octocrab::Error::Hyper { .. } | octocrab::Error::Service { .. } => {
            RepolensError::Transport(e.to_string())
        }
        other => RepolensError::Fetch(format!("failed to fetch {what}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_repository_is_fetch_error() {
        let err = classify_status(404, None, "Not Found", Resource::Repository, "octocat/missing");
        assert!(matches!(err, RepolensError::Fetch(_)));
        assert!(err.to_string().contains("octocat/missing"));
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = classify_status(404, None, "Not Found", Resource::File, "octocat/demo:src/gone.rs");
        assert!(matches!(err, RepolensError::NotFound(_)));
    }

    #[test]
    fn exhausted_quota_is_rate_limit() {
        let err = classify_status(403, Some("0"), "", Resource::Repository, "octocat/demo");
        assert!(matches!(err, RepolensError::RateLimit(_)));
        assert!(err.to_string().contains("rate limit"));
    }

    #[test]
    fn rate_limit_message_is_rate_limit() {
        let err = classify_status(
            403,
            None,
            "API rate limit exceeded for 1.2.3.4",
            Resource::Repository,
            "octocat/demo",
        );
        assert!(matches!(err, RepolensError::RateLimit(_)));
        let err = classify_status(429, None, "", Resource::File, "octocat/demo:a.rs");
        assert!(matches!(err, RepolensError::RateLimit(_)));
    }

    #[test]
    fn plain_forbidden_is_fetch_error() {
        let err = classify_status(
            403,
            Some("4999"),
            "Resource not accessible",
            Resource::Repository,
            "octocat/demo",
        );
        assert!(matches!(err, RepolensError::Fetch(_)));
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_status(502, None, "Bad Gateway", Resource::Repository, "octocat/demo");
        assert!(err.is_transient());
    }

    #[test]
    fn tree_response_keeps_blobs() {
        let json = r#"{
            "sha": "abc",
            "tree": [
                {"path": "src", "type": "tree"},
                {"path": "src/main.rs", "type": "blob", "size": 12},
                {"path": "vendored", "type": "commit"}
            ],
            "truncated": false
        }"#;
        let tree: TreeResponse = serde_json::from_str(json).unwrap();
        let blobs: Vec<&str> = tree
            .tree
            .iter()
            .filter(|e| e.kind == "blob")
            .map(|e| e.path.as_str())
            .collect();
        assert_eq!(blobs, vec!["src/main.rs"]);
    }

    #[test]
    fn repo_response_tolerates_missing_fields() {
        let repo: RepoResponse = serde_json::from_str(r#"{"name": "demo"}"#).unwrap();
        assert!(repo.default_branch.is_none());
        assert!(!repo.private);
    }
}
