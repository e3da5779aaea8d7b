use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RepolensError;
use crate::types::Category;

/// Top-level configuration loaded from `.repolens.toml`.
///
/// Supports layered resolution: CLI flags > local config > env vars > defaults.
///
/// # Examples
///
/// ```
/// use repolens_core::RepolensConfig;
///
/// let config = RepolensConfig::default();
/// assert_eq!(config.review.max_files, 40);
/// assert_eq!(config.github.api_url, "https://api.github.com");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepolensConfig {
    /// Analysis backend settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Repository fetcher settings.
    #[serde(default)]
    pub github: GitHubConfig,
    /// Review orchestration settings.
    #[serde(default)]
    pub review: ReviewConfig,
}

impl RepolensConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Io`] if the file cannot be read, or
    /// [`RepolensError::Toml`] if the content is not valid TOML.
    pub fn from_file(path: &Path) -> Result<Self, RepolensError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::RepolensConfig;
    ///
    /// let toml = r#"
    /// [review]
    /// max_files = 10
    /// "#;
    /// let config = RepolensConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.review.max_files, 10);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, RepolensError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Fill credentials and endpoints from the process environment.
    ///
    /// Values already present in the file win over the environment.
    pub fn with_env(self) -> Self {
        self.with_env_from(|name| std::env::var(name).ok())
    }

    /// Same as [`with_env`](Self::with_env) with an explicit variable lookup.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::RepolensConfig;
    ///
    /// let config = RepolensConfig::default().with_env_from(|name| match name {
    ///     "GH_TOKEN" => Some("ghp_test".to_string()),
    ///     _ => None,
    /// });
    /// assert_eq!(config.github.token.as_deref(), Some("ghp_test"));
    /// ```
    pub fn with_env_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if self.github.token.is_none() {
            self.github.token = non_empty("GITHUB_TOKEN").or_else(|| non_empty("GH_TOKEN"));
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = non_empty(self.llm.api_key_env_var());
        }
        if self.llm.base_url.is_none() {
            self.llm.base_url = non_empty("REPOLENS_LLM_BASE_URL");
        }
        self
    }
}

/// Analysis backend (LLM provider) configuration.
///
/// # Examples
///
/// ```
/// use repolens_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.model, "gpt-4o");
/// assert_eq!(config.api_key_env_var(), "OPENAI_API_KEY");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name (e.g. `"openai"`, `"anthropic"`, `"ollama"`).
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key for the provider.
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Maximum input tokens to send per request.
    pub max_input_tokens: Option<usize>,
}

impl LlmConfig {
    /// Environment variable holding the API key for the configured provider.
    pub fn api_key_env_var(&self) -> &'static str {
        match self.provider.as_str() {
            "anthropic" => "ANTHROPIC_API_KEY",
            "gemini" => "GEMINI_API_KEY",
            _ => "OPENAI_API_KEY",
        }
    }

    /// Full chat-completions endpoint for this configuration.
    ///
    /// A configured `base_url` wins and gets `/v1/chat/completions` appended.
    /// Otherwise the provider's OpenAI-compatible endpoint is used; `None`
    /// for providers without a known public endpoint.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::LlmConfig;
    ///
    /// let config = LlmConfig {
    ///     provider: "anthropic".into(),
    ///     ..LlmConfig::default()
    /// };
    /// assert_eq!(
    ///     config.chat_completions_url().as_deref(),
    ///     Some("https://api.anthropic.com/v1/chat/completions")
    /// );
    /// ```
    pub fn chat_completions_url(&self) -> Option<String> {
        if let Some(base) = &self.base_url {
            return Some(format!("{}/v1/chat/completions", base.trim_end_matches('/')));
        }
        let url = match self.provider.as_str() {
            "openai" => "https://api.openai.com/v1/chat/completions",
            "anthropic" => "https://api.anthropic.com/v1/chat/completions",
            "gemini" => "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            _ => return None,
        };
        Some(url.to_string())
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_model() -> String {
    "gpt-4o".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: None,
            max_input_tokens: None,
        }
    }
}

/// GitHub fetcher configuration.
///
/// A missing token is not fatal; unauthenticated requests get a much lower
/// rate limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Personal access token.
    pub token: Option<String>,
    /// REST API root (default: `https://api.github.com`).
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    "https://api.github.com".into()
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
        }
    }
}

/// Review orchestration configuration.
///
/// # Examples
///
/// ```
/// use repolens_core::{Category, ReviewConfig};
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.default_focus, vec![Category::General]);
/// assert_eq!(config.fetch_retries, 2);
/// assert_eq!(config.pending_timeout().as_secs(), 900);
/// assert!(config.cache_artifacts);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Analyzers run when a review names no focus areas (default: general).
    #[serde(default = "default_focus")]
    pub default_focus: Vec<Category>,
    /// Maximum number of files read into a snapshot (default: 40).
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Files larger than this are listed but not read (default: 64000).
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    /// Upper bound on snapshot text sent to the backend per call (default: 120000).
    #[serde(default = "default_max_context_bytes")]
    pub max_context_bytes: usize,
    /// Additional glob patterns excluded from snapshots.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Retries for transient fetch failures (default: 2).
    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
    /// Pending reviews older than this are failed by the watchdog (default: 900).
    #[serde(default = "default_pending_timeout_secs")]
    pub pending_timeout_secs: u64,
    /// Watchdog tick interval (default: 30).
    #[serde(default = "default_watchdog_interval_secs")]
    pub watchdog_interval_secs: u64,
    /// Cache derived artifacts per review (default: true).
    #[serde(default = "default_cache_artifacts")]
    pub cache_artifacts: bool,
}

impl ReviewConfig {
    /// [`pending_timeout_secs`](Self::pending_timeout_secs) as a `Duration`.
    pub fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }

    /// [`watchdog_interval_secs`](Self::watchdog_interval_secs) as a `Duration`, at least one second.
    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs.max(1))
    }
}

fn default_focus() -> Vec<Category> {
    vec![Category::General]
}

fn default_max_files() -> usize {
    40
}

fn default_max_file_bytes() -> usize {
    64_000
}

fn default_max_context_bytes() -> usize {
    120_000
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_pending_timeout_secs() -> u64 {
    900
}

fn default_watchdog_interval_secs() -> u64 {
    30
}

fn default_cache_artifacts() -> bool {
    true
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            default_focus: default_focus(),
            max_files: default_max_files(),
            max_file_bytes: default_max_file_bytes(),
            max_context_bytes: default_max_context_bytes(),
            skip_patterns: Vec::new(),
            fetch_retries: default_fetch_retries(),
            pending_timeout_secs: default_pending_timeout_secs(),
            watchdog_interval_secs: default_watchdog_interval_secs(),
            cache_artifacts: default_cache_artifacts(),
        }
    }
}
