//! Secondary artifacts computed from a completed review.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use repolens_core::{
    normalize_path, ArtifactKind, DerivedArtifact, Finding, RepolensError, RepositoryKey, Result,
    Review, ReviewId, ReviewStatus, Severity,
};
use serde::Serialize;

use crate::fetcher::AnalysisBackend;
use crate::snapshot::is_secret_bearing;
use crate::prompt::{
    build_pr_context, improved_code_prompt, parse_suggestions_response, render_findings,
    strip_code_fences, PR_DESCRIPTION_PROMPT, SUGGESTIONS_PROMPT,
};

/// Where a suggestion's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionSource {
    /// Phrased by the analysis backend.
    Backend,
    /// The finding's own remediation text.
    Remediation,
}

/// One improvement suggestion for one finding.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    pub finding: Finding,
    pub suggestion: String,
    pub source: SuggestionSource,
}

/// Candidate replacement content for one snapshot file. Never applied.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImprovedFile {
    pub path: String,
    /// Hash of the content the rewrite was based on.
    pub original_sha256: Option<String>,
    pub findings_addressed: usize,
    pub content: String,
}

#[derive(Debug, Clone)]
enum CachedBody {
    Suggestions(Vec<Suggestion>),
    Text(String),
    File(ImprovedFile),
}

type CacheKey = (RepositoryKey, ReviewId, ArtifactKind, String);

/// Cache argument for a file the review has no findings or content for.
const GENERAL_ONLY: &str = "*";

/// Produces suggestions, PR descriptions, implementation prompts and
/// rewritten files from a completed [`Review`].
///
/// Never mutates the review. Artifacts are tagged with the review id they
/// were derived from and, when caching is enabled, memoized per
/// (repository, review, kind, argument).
pub struct DerivationEngine {
    backend: Arc<dyn AnalysisBackend>,
    cache: Option<Mutex<HashMap<CacheKey, (DateTime<Utc>, CachedBody)>>>,
}

impl DerivationEngine {
    /// Create an engine; `cache` enables per-review memoization.
    pub fn new(backend: Arc<dyn AnalysisBackend>, cache: bool) -> Self {
        Self {
            backend,
            cache: cache.then(|| Mutex::new(HashMap::new())),
        }
    }

    /// One suggestion per finding located in `file` plus every
    /// repository-wide finding; all findings when `file` is `None`.
    ///
    /// # Errors
    ///
    /// [`RepolensError::State`] if the review is not complete,
    /// [`RepolensError::NotFound`] if no finding applies,
    /// [`RepolensError::BackendUnavailable`] if the backend fails.
    pub async fn suggest_improvements(
        &self,
        review: &Review,
        file: Option<&str>,
    ) -> Result<DerivedArtifact<Vec<Suggestion>>> {
        require_complete(review)?;
        let file = file.map(normalize_path);
        let file = file.as_deref();
        // Paths the review knows nothing about select only general findings,
        // so they all share the repository-wide entry.
        let arg = match file {
            Some(path)
                if review.file(path).is_some() || review.findings_for(path).next().is_some() =>
            {
                path.to_string()
            }
            Some(_) => GENERAL_ONLY.to_string(),
            None => String::new(),
        };
        let cache_key = (review.repo.clone(), review.id, ArtifactKind::Suggestions, arg);
        if let Some((at, CachedBody::Suggestions(body))) = self.cached(&cache_key) {
            return Ok(artifact(&cache_key, at, body));
        }

        let selected: Vec<&Finding> = match file {
            Some(path) => review
                .findings
                .iter()
                .filter(|f| f.is_in(path) || f.is_general())
                .collect(),
            None => review.findings.iter().collect(),
        };
        if selected.is_empty() {
            return Err(RepolensError::NotFound(match file {
                Some(path) => format!(
                    "no findings for {path} or the repository in review {} of {}",
                    review.id,
                    review.repo
                ),
                None => format!("review {} of {} has no findings", review.id, review.repo),
            }));
        }

        let context = format!(
            "Repository: {}\n\nFindings:\n{}",
            review.repo,
            render_findings(selected.iter().copied())
        );
        let response = self.backend.complete(SUGGESTIONS_PROMPT, &context).await?;
        let mut phrased = parse_suggestions_response(&response);

        let suggestions: Vec<Suggestion> = selected
            .into_iter()
            .enumerate()
            .map(|(i, finding)| match phrased.remove(&(i + 1)) {
                Some(text) => Suggestion {
                    finding: finding.clone(),
                    suggestion: text,
                    source: SuggestionSource::Backend,
                },
                None => Suggestion {
                    finding: finding.clone(),
                    suggestion: finding
                        .remediation
                        .clone()
                        .unwrap_or_else(|| format!("Address: {}", finding.message)),
                    source: SuggestionSource::Remediation,
                },
            })
            .collect();

        Ok(self.store(cache_key, CachedBody::Suggestions(suggestions.clone()), suggestions))
    }

    /// Markdown pull-request description synthesized from the review.
    ///
    /// # Errors
    ///
    /// [`RepolensError::State`] if the review is not complete,
    /// [`RepolensError::BackendUnavailable`] if the backend fails.
    pub async fn generate_pr_description(&self, review: &Review) -> Result<DerivedArtifact<String>> {
        require_complete(review)?;
        let cache_key = (
            review.repo.clone(),
            review.id,
            ArtifactKind::PullRequestDescription,
            String::new(),
        );
        if let Some((at, CachedBody::Text(body))) = self.cached(&cache_key) {
            return Ok(artifact(&cache_key, at, body));
        }

        let response = self
            .backend
            .complete(PR_DESCRIPTION_PROMPT, &build_pr_context(review))
            .await?;
        let body = strip_code_fences(&response).to_string();
        if body.is_empty() {
            return Err(RepolensError::BackendUnavailable(
                "backend returned an empty pull-request description".into(),
            ));
        }
        Ok(self.store(cache_key, CachedBody::Text(body.clone()), body))
    }

    /// Tool-agnostic implementation instructions, most severe first.
    ///
    /// Rendering is deterministic and makes no backend call.
    ///
    /// # Errors
    ///
    /// [`RepolensError::State`] if the review is not complete.
    pub fn generate_prompt(&self, review: &Review) -> Result<DerivedArtifact<String>> {
        require_complete(review)?;
        Ok(DerivedArtifact::new(
            review,
            ArtifactKind::ImplementationPrompt,
            render_implementation_prompt(review),
        ))
    }

    /// Ask the backend to rewrite `path` so it addresses its findings.
    ///
    /// # Errors
    ///
    /// [`RepolensError::State`] if the review is not complete,
    /// [`RepolensError::Validation`] if `path` holds credentials,
    /// [`RepolensError::NotFound`] if `path` was not part of the review's
    /// snapshot, [`RepolensError::BackendUnavailable`] if the backend fails.
    pub async fn generate_improved_code(
        &self,
        review: &Review,
        path: &str,
    ) -> Result<DerivedArtifact<ImprovedFile>> {
        require_complete(review)?;
        let normalized = normalize_path(path);
        if is_secret_bearing(&normalized) {
            return Err(RepolensError::Validation(format!(
                "{normalized} may contain credentials and is never sent for rewriting"
            )));
        }
        let file = review.file(&normalized).ok_or_else(|| {
            RepolensError::NotFound(format!(
                "{normalized} was not part of review {} of {}",
                review.id, review.repo
            ))
        })?;
        let content = file.content.as_deref().ok_or_else(|| {
            RepolensError::NotFound(format!("content of {normalized} was not retained"))
        })?;

        let cache_key = (
            review.repo.clone(),
            review.id,
            ArtifactKind::ImprovedCode,
            normalized.clone(),
        );
        if let Some((at, CachedBody::File(body))) = self.cached(&cache_key) {
            return Ok(artifact(&cache_key, at, body));
        }

        let findings: Vec<&Finding> = review.findings_for(&normalized).collect();
        let mut context = String::new();
        if findings.is_empty() {
            context.push_str("No findings target this file; improve clarity and robustness only.\n");
        } else {
            context.push_str(&format!("Findings for `{normalized}`:\n"));
            context.push_str(&render_findings(findings.iter().copied()));
        }
        context.push_str(&format!("\nCurrent content of `{normalized}`:\n```\n{content}\n```\n"));
        let findings_addressed = findings.len();

        let response = self
            .backend
            .complete(&improved_code_prompt(&normalized), &context)
            .await?;
        let rewritten = strip_code_fences(&response).to_string();
        if rewritten.is_empty() {
            return Err(RepolensError::BackendUnavailable(format!(
                "backend returned no content for {normalized}"
            )));
        }

        let body = ImprovedFile {
            path: normalized,
            original_sha256: file.sha256.clone(),
            findings_addressed,
            content: rewritten,
        };
        Ok(self.store(cache_key, CachedBody::File(body.clone()), body))
    }

    fn cached(&self, key: &CacheKey) -> Option<(DateTime<Utc>, CachedBody)> {
        let hit = self.cache.as_ref()?.lock().get(key).cloned();
        if hit.is_some() {
            tracing::debug!(repo = %key.0, review_id = %key.1, kind = %key.2, "artifact cache hit");
        }
        hit
    }

    fn store<T>(&self, key: CacheKey, cached: CachedBody, body: T) -> DerivedArtifact<T> {
        let generated_at = Utc::now();
        let out = artifact(&key, generated_at, body);
        if let Some(cache) = &self.cache {
            let mut cache = cache.lock();
            // Artifacts of a superseded review are never served again.
            let before = cache.len();
            cache.retain(|k, _| k.0 != key.0 || k.1 >= key.1);
            if cache.len() < before {
                tracing::debug!(
                    repo = %key.0,
                    review_id = %key.1,
                    evicted = before - cache.len(),
                    "dropped artifacts of older reviews"
                );
            }
            if cache.keys().any(|k| k.0 == key.0 && k.1 > key.1) {
                return out;
            }
            cache.insert(key, (generated_at, cached));
        }
        out
    }

    #[cfg(test)]
    fn cache_len(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.lock().len())
    }
}

fn artifact<T>(key: &CacheKey, generated_at: DateTime<Utc>, body: T) -> DerivedArtifact<T> {
    DerivedArtifact {
        repo: key.0.clone(),
        review_id: key.1,
        kind: key.2,
        generated_at,
        body,
    }
}

fn require_complete(review: &Review) -> Result<()> {
    match review.status {
        ReviewStatus::Complete => Ok(()),
        status => Err(RepolensError::State(format!(
            "review {} of {} is {status}; derivations need a complete review",
            review.id, review.repo
        ))),
    }
}

fn render_implementation_prompt(review: &Review) -> String {
    let mut out = format!(
        "# Implementation plan for {} (review #{})\n\n",
        review.repo, review.id
    );
    if let Some(summary) = &review.summary {
        out.push_str(&format!("{summary}\n\n"));
    }
    if review.findings.is_empty() {
        out.push_str("The review found no issues. No changes are required.\n");
        return out;
    }

    out.push_str(
        "Work through the items below in order. Make the smallest change that resolves \
each item, keep existing behaviour otherwise, and add or update tests where relevant.\n",
    );
    let mut n = 0;
    for severity in Severity::DESCENDING {
        let group: Vec<&Finding> = review
            .findings
            .iter()
            .filter(|f| f.severity == severity)
            .collect();
        if group.is_empty() {
            continue;
        }
        out.push_str(&format!("\n## {} priority\n\n", severity.label()));
        for f in group {
            n += 1;
            out.push_str(&format!(
                "{n}. `{}` ({}): {}\n",
                f.location_label(),
                f.category,
                f.message
            ));
            if let Some(r) = &f.remediation {
                out.push_str(&format!("   - Fix: {r}\n"));
            }
        }
    }
    out.push_str("\nWhen every item is addressed, run the test suite and request a new review.\n");
    out
}
