use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::RepolensError;

/// Normalized `owner/name` identifier for a GitHub repository.
///
/// Every URL form that refers to the same repository normalizes to the same
/// key: protocol, `www.`, `.git` suffix, trailing slashes, extra path
/// segments and letter case are all ignored.
///
/// # Examples
///
/// ```
/// use repolens_core::RepositoryKey;
///
/// let a = RepositoryKey::parse("https://github.com/Octocat/Demo.git/").unwrap();
/// let b = RepositoryKey::parse("git@github.com:octocat/demo.git").unwrap();
/// let c = RepositoryKey::parse("octocat/demo").unwrap();
/// assert_eq!(a, b);
/// assert_eq!(b, c);
/// assert_eq!(a.to_string(), "octocat/demo");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RepositoryKey {
    owner: String,
    name: String,
}

impl RepositoryKey {
    /// Parse and normalize a repository URL or `owner/name` shorthand.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Validation`] if the input is empty, points at
    /// a host other than github.com, or lacks an owner or name segment.
    pub fn parse(input: &str) -> Result<Self, RepolensError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(RepolensError::Validation(
                "repository URL must not be empty".into(),
            ));
        }

        let without_suffix = trimmed
            .split(['?', '#'])
            .next()
            .unwrap_or_default();

        let (has_scheme, mut rest) = match without_suffix.split_once("://") {
            Some((_, r)) => (true, r),
            None => (false, without_suffix),
        };

        // scp-like `git@github.com:owner/name` and `ssh://git@github.com/...`
        if let Some((user, r)) = rest.split_once('@') {
            if !user.contains('/') {
                rest = r;
            }
        }

        let lower = rest.to_ascii_lowercase();
        let path = if let Some(host_len) = ["www.github.com", "github.com"]
            .iter()
            .find(|host| {
                lower.starts_with(**host)
                    && matches!(
                        lower.as_bytes().get(host.len()).copied(),
                        None | Some(b'/') | Some(b':')
                    )
            })
            .map(|host| host.len())
        {
            &rest[host_len..]
        } else {
            let first = rest.split('/').next().unwrap_or_default();
            if has_scheme || first.contains('.') || first.contains(':') {
                return Err(RepolensError::Validation(format!(
                    "only github.com repositories are supported, got '{input}'"
                )));
            }
            rest
        };

        // with a scheme `:digits` is a port; scp-like `host:path` has none
        let path = match path.strip_prefix(':') {
            Some(after) if has_scheme => {
                let (port, tail) = after.split_once('/').unwrap_or((after, ""));
                if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(RepolensError::Validation(format!(
                        "invalid port in repository URL '{input}'"
                    )));
                }
                tail
            }
            Some(after) => after,
            None => path,
        };

        let mut segments = path
            .split('/')
            .filter(|s| !s.is_empty());
        let (Some(owner), Some(name)) = (segments.next(), segments.next()) else {
            return Err(RepolensError::Validation(format!(
                "invalid repository '{input}', expected owner/name or a GitHub URL"
            )));
        };
        let name = name.strip_suffix(".git").unwrap_or(name);

        Self::new(owner, name).map_err(|_| {
            RepolensError::Validation(format!(
                "invalid repository '{input}', expected owner/name or a GitHub URL"
            ))
        })
    }

    /// Build a key from already separated owner and name.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Validation`] if either part contains
    /// characters GitHub does not allow.
    pub fn new(owner: &str, name: &str) -> Result<Self, RepolensError> {
        let owner_ok = !owner.is_empty()
            && owner
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let name_ok = !name.is_empty()
            && name != "."
            && name != ".."
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !owner_ok || !name_ok {
            return Err(RepolensError::Validation(format!(
                "invalid repository name '{owner}/{name}'"
            )));
        }
        Ok(Self {
            owner: owner.to_ascii_lowercase(),
            name: name.to_ascii_lowercase(),
        })
    }

    /// Repository owner (user or organization), lower-cased.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Repository name, lower-cased.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for RepositoryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

impl FromStr for RepositoryKey {
    type Err = RepolensError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<RepositoryKey> for String {
    fn from(key: RepositoryKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for RepositoryKey {
    type Error = RepolensError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// A file within a repository, optionally paired with its fetched content.
///
/// Paths are relative and forward-slash separated. Content is never
/// serialized; the SHA-256 hash is.
///
/// # Examples
///
/// ```
/// use repolens_core::FileRef;
///
/// let file = FileRef::with_content("./src\\main.rs", "fn main() {}".into());
/// assert_eq!(file.path, "src/main.rs");
/// assert!(file.sha256.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRef {
    /// Relative, forward-slash separated path.
    pub path: String,
    /// Fetched file content, if any.
    #[serde(skip_serializing, default)]
    pub content: Option<String>,
    /// Hex SHA-256 of `content`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub sha256: Option<String>,
}

impl FileRef {
    /// A path-only reference.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: normalize_path(path.as_ref()),
            content: None,
            sha256: None,
        }
    }

    /// A reference carrying fetched content and its hash.
    pub fn with_content(path: impl AsRef<str>, content: String) -> Self {
        let sha256 = format!("{:x}", Sha256::digest(content.as_bytes()));
        Self {
            path: normalize_path(path.as_ref()),
            content: Some(content),
            sha256: Some(sha256),
        }
    }

    /// Returns `true` if `path` names this file once normalized.
    pub fn matches(&self, path: &str) -> bool {
        self.path == normalize_path(path)
    }
}

/// Normalize a repository path: forward slashes, no leading `./` or `/`.
///
/// # Examples
///
/// ```
/// use repolens_core::normalize_path;
///
/// assert_eq!(normalize_path("./src/app.py"), "src/app.py");
/// assert_eq!(normalize_path("/src\\lib.rs"), "src/lib.rs");
/// ```
pub fn normalize_path(path: &str) -> String {
    let unified = path.trim().replace('\\', "/");
    let mut rest = unified.as_str();
    loop {
        if let Some(r) = rest.strip_prefix("./") {
            rest = r;
        } else if let Some(r) = rest.strip_prefix('/') {
            rest = r;
        } else {
            break;
        }
    }
    rest.to_string()
}

/// Severity of a finding, from `info` (lowest) to `critical` (highest).
///
/// Ordering follows severity, so `Severity::Critical > Severity::Info`.
///
/// # Examples
///
/// ```
/// use repolens_core::Severity;
///
/// let s: Severity = serde_json::from_str("\"high\"").unwrap();
/// assert_eq!(s, Severity::High);
/// assert!(Severity::Critical > Severity::Medium);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational observation.
    Info,
    /// Minor issue.
    Low,
    /// Worth fixing soon.
    Medium,
    /// Likely defect or exploitable weakness.
    High,
    /// Must be fixed before anything else.
    Critical,
}

impl Severity {
    /// All severities, most severe first.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Returns `true` if `self` is at least as severe as `threshold`.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::Severity;
    ///
    /// assert!(Severity::High.meets_threshold(Severity::Medium));
    /// assert!(!Severity::Low.meets_threshold(Severity::Medium));
    /// ```
    pub fn meets_threshold(self, threshold: Severity) -> bool {
        self >= threshold
    }

    /// Capitalized label for human-readable output.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "Info",
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
            Severity::Critical => "Critical",
        }
    }

    /// Emoji marker for markdown output.
    pub fn emoji(self) -> &'static str {
        match self {
            Severity::Critical => "\u{1f6a8}",
            Severity::High => "\u{1f41b}",
            Severity::Medium => "\u{26a0}\u{fe0f}",
            Severity::Low => "\u{1f4a1}",
            Severity::Info => "\u{2139}\u{fe0f}",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" | "informational" => Ok(Severity::Info),
            "low" | "minor" => Ok(Severity::Low),
            "medium" | "moderate" | "warning" => Ok(Severity::Medium),
            "high" | "major" | "bug" => Ok(Severity::High),
            "critical" | "blocker" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// Analysis category of a finding; also the vocabulary of focus areas.
///
/// Focus-area strings map onto categories through a fixed alias table
/// (see [`Category::from_str`]); there is no fuzzy matching.
///
/// # Examples
///
/// ```
/// use repolens_core::Category;
///
/// assert_eq!("deps".parse::<Category>().unwrap(), Category::Dependency);
/// assert_eq!("Best-Practices".parse::<Category>().unwrap(), Category::BestPractice);
/// assert!("style".parse::<Category>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    /// Readability, maintainability, structure.
    Quality,
    /// Vulnerabilities and unsafe handling of secrets or input.
    Security,
    /// Algorithmic and resource efficiency.
    Performance,
    /// Third-party dependency health.
    Dependency,
    /// Conformance to language or framework conventions.
    BestPractice,
    /// Whole-repository review.
    General,
}

impl Category {
    /// Every category, in canonical order.
    pub const ALL: [Category; 6] = [
        Category::Quality,
        Category::Security,
        Category::Performance,
        Category::Dependency,
        Category::BestPractice,
        Category::General,
    ];

    /// Parse a list of focus-area strings.
    ///
    /// `"all"` and an empty list both yield an empty set, meaning "use the
    /// default analyzers". Duplicates are removed, first occurrence wins.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Validation`] naming the first unknown area.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::Category;
    ///
    /// let areas = Category::parse_focus_areas(&["security", "vulns", "perf"]).unwrap();
    /// assert_eq!(areas, vec![Category::Security, Category::Performance]);
    /// assert!(Category::parse_focus_areas(&["all"]).unwrap().is_empty());
    /// ```
    pub fn parse_focus_areas<S: AsRef<str>>(areas: &[S]) -> Result<Vec<Category>, RepolensError> {
        let mut parsed = Vec::new();
        for area in areas {
            let area = area.as_ref().trim();
            if area.is_empty() || area.eq_ignore_ascii_case("all") {
                continue;
            }
            let category: Category = area.parse().map_err(|_| {
                let known: Vec<String> = Category::ALL.iter().map(|c| c.to_string()).collect();
                RepolensError::Validation(format!(
                    "unknown focus area '{area}', expected one of: {}",
                    known.join(", ")
                ))
            })?;
            if !parsed.contains(&category) {
                parsed.push(category);
            }
        }
        Ok(parsed)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Quality => write!(f, "quality"),
            Category::Security => write!(f, "security"),
            Category::Performance => write!(f, "performance"),
            Category::Dependency => write!(f, "dependency"),
            Category::BestPractice => write!(f, "best-practice"),
            Category::General => write!(f, "general"),
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "quality" | "code-quality" | "code_quality" | "maintainability" => {
                Ok(Category::Quality)
            }
            "security" | "vulnerabilities" | "vulns" => Ok(Category::Security),
            "performance" | "perf" => Ok(Category::Performance),
            "dependency" | "dependencies" | "deps" => Ok(Category::Dependency),
            "best-practice" | "best-practices" | "best_practice" | "best_practices"
            | "practices" => Ok(Category::BestPractice),
            "general" | "review" => Ok(Category::General),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use repolens_core::OutputFormat;
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_key_normalizes_url_variants() {
        let variants = [
            "octocat/demo",
            "Octocat/Demo",
            "octocat/demo.git",
            "https://github.com/octocat/demo",
            "https://github.com/octocat/demo/",
            "https://github.com/octocat/demo.git",
            "http://www.github.com/octocat/demo",
            "github.com/octocat/demo",
            "git@github.com:octocat/demo.git",
            "ssh://git@github.com/octocat/demo.git",
            "https://github.com/octocat/demo/tree/main/src",
            "https://github.com/octocat/demo?tab=readme",
        ];
        let expected = RepositoryKey::new("octocat", "demo").unwrap();
        for v in variants {
            assert_eq!(RepositoryKey::parse(v).unwrap(), expected, "input: {v}");
        }
    }

    #[test]
    fn repository_key_drops_port_after_host() {
        let expected = RepositoryKey::new("octocat", "demo").unwrap();
        for v in [
            "ssh://git@github.com:22/octocat/demo",
            "ssh://git@github.com:22/octocat/demo.git",
            "https://github.com:443/octocat/demo",
        ] {
            assert_eq!(RepositoryKey::parse(v).unwrap(), expected, "input: {v}");
        }
        // scp-like paths have no port, so a numeric owner survives
        let numeric = RepositoryKey::parse("git@github.com:1234/demo").unwrap();
        assert_eq!(numeric.owner(), "1234");
        assert!(RepositoryKey::parse("ssh://git@github.com:abc/octocat/demo").is_err());
    }

    #[test]
    fn repository_key_rejects_invalid_input() {
        assert!(RepositoryKey::parse("").is_err());
        assert!(RepositoryKey::parse("   ").is_err());
        assert!(RepositoryKey::parse("octocat").is_err());
        assert!(RepositoryKey::parse("https://github.com/octocat").is_err());
        assert!(RepositoryKey::parse("https://gitlab.com/octocat/demo").is_err());
        assert!(RepositoryKey::parse("gitlab.com/octocat/demo").is_err());
        assert!(RepositoryKey::parse("octo cat/demo").is_err());
        assert!(RepositoryKey::parse("octocat/..").is_err());
    }

    #[test]
    fn repository_key_serializes_as_string() {
        let key = RepositoryKey::parse("octocat/demo").unwrap();
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"octocat/demo\"");
        let back: RepositoryKey = serde_json::from_str("\"https://github.com/Octocat/demo\"").unwrap();
        assert_eq!(back, key);
        assert_eq!(key.owner(), "octocat");
        assert_eq!(key.name(), "demo");
    }

    #[test]
    fn file_ref_hashes_content_and_hides_it_in_json() {
        let file = FileRef::with_content("src/app.py", "print('hi')\n".into());
        assert_eq!(file.sha256.as_deref().map(str::len), Some(64));
        let json = serde_json::to_value(&file).unwrap();
        assert_eq!(json["path"], "src/app.py");
        assert!(json.get("content").is_none());
        assert!(json.get("sha256").is_some());
    }

    #[test]
    fn file_ref_matches_normalized_paths() {
        let file = FileRef::new("src/app.py");
        assert!(file.matches("./src/app.py"));
        assert!(file.matches("/src/app.py"));
        assert!(!file.matches("src/app.rs"));
    }

    #[test]
    fn severity_orders_from_info_to_critical() {
        let mut all = vec![Severity::Low, Severity::Critical, Severity::Info, Severity::High];
        all.sort();
        assert_eq!(
            all,
            vec![Severity::Info, Severity::Low, Severity::High, Severity::Critical]
        );
        assert_eq!(Severity::DESCENDING[0], Severity::Critical);
    }

    #[test]
    fn severity_from_str_accepts_aliases() {
        assert_eq!("Critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("warning".parse::<Severity>().unwrap(), Severity::Medium);
        assert_eq!("bug".parse::<Severity>().unwrap(), Severity::High);
        assert!("catastrophic".parse::<Severity>().is_err());
    }

    #[test]
    fn category_roundtrips_display_and_parse() {
        for c in Category::ALL {
            assert_eq!(c.to_string().parse::<Category>().unwrap(), c);
        }
        let json = serde_json::to_string(&Category::BestPractice).unwrap();
        assert_eq!(json, "\"best-practice\"");
    }

    #[test]
    fn parse_focus_areas_rejects_unknown() {
        let err = Category::parse_focus_areas(&["security", "style"]).unwrap_err();
        assert!(err.to_string().contains("style"));
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!(
            "markdown".parse::<OutputFormat>().unwrap(),
            OutputFormat::Markdown
        );
        assert!("xml".parse::<OutputFormat>().is_err());
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }
}
