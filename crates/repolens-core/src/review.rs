use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{normalize_path, Category, FileRef, RepositoryKey, Severity};

/// Where a finding applies: a file and an optional line range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    /// The file the finding refers to (path only).
    pub file: FileRef,
    /// First line of the range, 1-based.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub start_line: Option<u32>,
    /// Last line of the range, inclusive.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub end_line: Option<u32>,
}

/// One observation produced by an analyzer.
///
/// Findings are built once (builder methods consume `self`) and are never
/// mutated after they become part of a [`Review`].
///
/// # Examples
///
/// ```
/// use repolens_core::{Category, Finding, Severity};
///
/// let finding = Finding::new(Category::Security, Severity::High, "SQL built by string concatenation")
///     .at("src/db.py", Some(42))
///     .with_remediation("Use parameterized queries");
/// assert_eq!(finding.path(), Some("src/db.py"));
/// assert!(!finding.is_general());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Finding {
    /// Analysis category that produced the finding.
    pub category: Category,
    /// How serious the finding is.
    pub severity: Severity,
    /// File and line range, absent for repository-wide findings.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub location: Option<Location>,
    /// Explanation of the issue.
    pub message: String,
    /// Optional fix guidance.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub remediation: Option<String>,
}

impl Finding {
    /// A repository-wide finding with no location.
    pub fn new(category: Category, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            location: None,
            message: message.into(),
            remediation: None,
        }
    }

    /// Attach a file location with an optional single line.
    pub fn at(self, path: &str, line: Option<u32>) -> Self {
        self.at_lines(path, line, line)
    }

    /// Attach a file location with an optional line range.
    pub fn at_lines(mut self, path: &str, start_line: Option<u32>, end_line: Option<u32>) -> Self {
        let end_line = match (start_line, end_line) {
            (Some(s), Some(e)) if e < s => Some(s),
            (_, e) => e,
        };
        self.location = Some(Location {
            file: FileRef::new(path),
            start_line,
            end_line,
        });
        self
    }

    /// Attach remediation text.
    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        let text = remediation.into();
        if !text.trim().is_empty() {
            self.remediation = Some(text);
        }
        self
    }

    /// Path of the file this finding is located in, if any.
    pub fn path(&self) -> Option<&str> {
        self.location.as_ref().map(|l| l.file.path.as_str())
    }

    /// Returns `true` for repository-wide findings (no location).
    pub fn is_general(&self) -> bool {
        self.location.is_none()
    }

    /// Returns `true` if the finding is located in `path`.
    pub fn is_in(&self, path: &str) -> bool {
        self.path() == Some(normalize_path(path).as_str())
    }

    /// `path:line` style reference, or `(repository)` for general findings.
    pub fn location_label(&self) -> String {
        match &self.location {
            None => "(repository)".to_string(),
            Some(loc) => match (loc.start_line, loc.end_line) {
                (Some(s), Some(e)) if e > s => format!("{}:{s}-{e}", loc.file.path),
                (Some(s), _) => format!("{}:{s}", loc.file.path),
                _ => loc.file.path.clone(),
            },
        }
    }
}

/// Sort findings by non-increasing severity, preserving insertion order
/// among findings of equal severity.
///
/// # Examples
///
/// ```
/// use repolens_core::{sort_findings, Category, Finding, Severity};
///
/// let mut findings = vec![
///     Finding::new(Category::General, Severity::Low, "first low"),
///     Finding::new(Category::General, Severity::Critical, "critical"),
///     Finding::new(Category::General, Severity::Low, "second low"),
/// ];
/// sort_findings(&mut findings);
/// assert_eq!(findings[0].message, "critical");
/// assert_eq!(findings[1].message, "first low");
/// assert_eq!(findings[2].message, "second low");
/// ```
pub fn sort_findings(findings: &mut [Finding]) {
    // sort_by_key is stable
    findings.sort_by_key(|f| Reverse(f.severity));
}

/// Identifier of a review, unique and monotonically increasing per repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewId(pub u64);

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a review. `Complete` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    /// Analysis in progress.
    Pending,
    /// Analysis finished; findings and summary are final.
    Complete,
    /// Analysis aborted; see the failure reason.
    Failed,
}

impl ReviewStatus {
    /// Returns `true` for `Complete` and `Failed`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReviewStatus::Pending)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewStatus::Pending => write!(f, "pending"),
            ReviewStatus::Complete => write!(f, "complete"),
            ReviewStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One analysis pass over a repository; the unit of stored state.
///
/// # Examples
///
/// ```
/// use repolens_core::{RepositoryKey, Review, ReviewId, ReviewStatus};
///
/// let key = RepositoryKey::parse("octocat/demo").unwrap();
/// let review = Review::pending(ReviewId(1), key, vec![]);
/// assert_eq!(review.status, ReviewStatus::Pending);
/// assert!(review.findings.is_empty());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// Review identifier within the repository's history.
    pub id: ReviewId,
    /// Repository the review belongs to.
    pub repo: RepositoryKey,
    /// Lifecycle status.
    pub status: ReviewStatus,
    /// Requested focus areas; empty means the default analyzer set.
    pub focus_areas: Vec<Category>,
    /// When the review was requested.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// Overall summary, set on completion.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub summary: Option<String>,
    /// Why the review failed, set on failure.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_reason: Option<String>,
    /// Findings ordered by non-increasing severity.
    #[serde(default)]
    pub findings: Vec<Finding>,
    /// Files fetched for this review.
    #[serde(default)]
    pub files: Vec<FileRef>,
}

impl Review {
    /// A fresh pending review stamped with the current time.
    pub fn pending(id: ReviewId, repo: RepositoryKey, focus_areas: Vec<Category>) -> Self {
        let now = Utc::now();
        Self {
            id,
            repo,
            status: ReviewStatus::Pending,
            focus_areas,
            created_at: now,
            updated_at: now,
            summary: None,
            failure_reason: None,
            findings: Vec::new(),
            files: Vec::new(),
        }
    }

    /// The snapshot file at `path`, if it was fetched for this review.
    pub fn file(&self, path: &str) -> Option<&FileRef> {
        self.files.iter().find(|f| f.matches(path))
    }

    /// Findings located in `path`.
    pub fn findings_for<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| f.is_in(path))
    }

    /// Whether any finding is at least as severe as `threshold`.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::{Category, Finding, RepositoryKey, Review, ReviewId, Severity};
    ///
    /// let key = RepositoryKey::parse("octocat/demo").unwrap();
    /// let mut review = Review::pending(ReviewId(1), key, vec![]);
    /// review.findings.push(Finding::new(Category::Security, Severity::Medium, "weak hash"));
    /// assert!(review.meets_threshold(Severity::Low));
    /// assert!(!review.meets_threshold(Severity::High));
    /// ```
    pub fn meets_threshold(&self, threshold: Severity) -> bool {
        self.findings.iter().any(|f| f.severity >= threshold)
    }

    /// Number of findings per severity, most severe first, zero counts omitted.
    pub fn severity_counts(&self) -> Vec<(Severity, usize)> {
        let mut counts: BTreeMap<Reverse<Severity>, usize> = BTreeMap::new();
        for f in &self.findings {
            *counts.entry(Reverse(f.severity)).or_default() += 1;
        }
        counts.into_iter().map(|(Reverse(s), n)| (s, n)).collect()
    }

    /// Render the review as markdown.
    ///
    /// # Examples
    ///
    /// ```
    /// use repolens_core::{RepositoryKey, Review, ReviewId};
    ///
    /// let review = Review::pending(ReviewId(3), RepositoryKey::parse("octocat/demo").unwrap(), vec![]);
    /// let md = review.to_markdown();
    /// assert!(md.contains("# Review #3 of octocat/demo"));
    /// ```
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("# Review #{} of {}\n\n", self.id, self.repo));
        out.push_str(&format!(
            "**Status:** {} | **Files:** {} | **Findings:** {} | **Updated:** {}\n\n",
            self.status,
            self.files.len(),
            self.findings.len(),
            self.updated_at.to_rfc3339(),
        ));
        if let Some(reason) = &self.failure_reason {
            out.push_str(&format!("> **Failed:** {reason}\n\n"));
        }
        if let Some(summary) = &self.summary {
            out.push_str(&format!("{summary}\n\n"));
        }

        if self.findings.is_empty() {
            if self.status == ReviewStatus::Complete {
                out.push_str("No issues found.\n");
            }
        } else {
            for f in &self.findings {
                out.push_str(&format!(
                    "## {} {} — `{}` ({})\n\n",
                    f.severity.emoji(),
                    f.severity.label(),
                    f.location_label(),
                    f.category,
                ));
                out.push_str(&format!("{}\n\n", f.message));
                if let Some(r) = &f.remediation {
                    out.push_str(&format!("> **Remediation:** {r}\n\n"));
                }
            }
        }
        out
    }
}

impl fmt::Display for Review {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Review #{} of {}", self.id, self.repo)?;
        writeln!(f, "==============")?;
        writeln!(
            f,
            "Status: {} | Files: {} | Findings: {}\n",
            self.status,
            self.files.len(),
            self.findings.len(),
        )?;
        if let Some(reason) = &self.failure_reason {
            writeln!(f, "Failed: {reason}\n")?;
        }
        if let Some(summary) = &self.summary {
            writeln!(f, "{summary}\n")?;
        }

        if self.findings.is_empty() {
            if self.status == ReviewStatus::Complete {
                writeln!(f, "No issues found.")?;
            }
        } else {
            for finding in &self.findings {
                writeln!(
                    f,
                    "[{}] {} ({})",
                    finding.severity.label().to_uppercase(),
                    finding.location_label(),
                    finding.category,
                )?;
                writeln!(f, "  {}", finding.message)?;
                if let Some(r) = &finding.remediation {
                    writeln!(f, "  Remediation: {r}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Kind of secondary output derived from a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    /// Improvement suggestions.
    Suggestions,
    /// Pull-request description.
    PullRequestDescription,
    /// Implementation prompt for a coding agent.
    ImplementationPrompt,
    /// Rewritten file content.
    ImprovedCode,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Suggestions => write!(f, "suggestions"),
            ArtifactKind::PullRequestDescription => write!(f, "pull-request-description"),
            ArtifactKind::ImplementationPrompt => write!(f, "implementation-prompt"),
            ArtifactKind::ImprovedCode => write!(f, "improved-code"),
        }
    }
}

/// Output computed from exactly one review, tagged with that review's id.
///
/// # Examples
///
/// ```
/// use repolens_core::{ArtifactKind, DerivedArtifact, RepositoryKey, Review, ReviewId};
///
/// let key = RepositoryKey::parse("octocat/demo").unwrap();
/// let first = Review::pending(ReviewId(1), key.clone(), vec![]);
/// let artifact = DerivedArtifact::new(&first, ArtifactKind::ImplementationPrompt, "do things".to_string());
///
/// let second = Review::pending(ReviewId(2), key, vec![]);
/// assert!(artifact.is_stale_against(&second));
/// assert!(!artifact.is_stale_against(&first));
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DerivedArtifact<T> {
    /// Repository of the source review.
    pub repo: RepositoryKey,
    /// Source review id.
    pub review_id: ReviewId,
    /// What was derived.
    pub kind: ArtifactKind,
    /// When it was derived.
    pub generated_at: DateTime<Utc>,
    /// The artifact itself.
    pub body: T,
}

impl<T> DerivedArtifact<T> {
    /// Wrap `body` as derived from `review`.
    pub fn new(review: &Review, kind: ArtifactKind, body: T) -> Self {
        Self {
            repo: review.repo.clone(),
            review_id: review.id,
            kind,
            generated_at: Utc::now(),
            body,
        }
    }

    /// Returns `true` if `review` is a newer review of the same repository.
    pub fn is_stale_against(&self, review: &Review) -> bool {
        review.repo == self.repo && review.id > self.review_id
    }
}
