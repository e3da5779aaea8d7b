use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use repolens_core::{
    sort_findings, Category, Finding, RepositoryKey, Result, Review, ReviewConfig, ReviewId,
    Severity,
};
use serde::Serialize;

use crate::analyzer::Analyzer;
use crate::fetcher::{AnalysisBackend, RepositoryFetcher};
use crate::prompt::ParsedAnalysis;
use crate::snapshot::{build_snapshot, Snapshot, SnapshotOptions};
use crate::store::ReviewStore;

/// Result of a single-category analysis that was not stored as a review.
///
/// # Examples
///
/// ```
/// use repolens_core::{Category, RepositoryKey};
/// use repolens_review::coordinator::AnalysisReport;
///
/// let report = AnalysisReport {
///     repo_key: RepositoryKey::parse("octocat/demo").unwrap(),
///     category: Category::Security,
///     framework: None,
///     source_review_id: None,
///     summary: None,
///     findings: vec![],
///     generated_at: chrono::Utc::now(),
/// };
/// assert!(report.findings.is_empty());
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    /// Repository analysed.
    pub repo_key: RepositoryKey,
    /// Category of every finding in the report.
    pub category: Category,
    /// Framework the best-practice comparison targeted, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    /// Review whose snapshot was analysed; `None` for a fresh fetch.
    pub source_review_id: Option<ReviewId>,
    /// Analyzer summary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Findings, most severe first.
    pub findings: Vec<Finding>,
    /// When the analysis ran.
    pub generated_at: DateTime<Utc>,
}

impl fmt::Display for AnalysisReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} analysis of {}", self.category, self.repo_key)?;
        if let Some(summary) = &self.summary {
            writeln!(f, "{summary}")?;
        }
        for finding in &self.findings {
            writeln!(
                f,
                "[{}] {} {}",
                finding.severity.label().to_uppercase(),
                finding.location_label(),
                finding.message
            )?;
        }
        Ok(())
    }
}

/// Runs analyzers over fetched snapshots and records the outcome in the store.
///
/// Cheap to clone; every clone shares the same store and collaborators.
#[derive(Clone)]
pub struct Coordinator {
    store: ReviewStore,
    fetcher: Arc<dyn RepositoryFetcher>,
    backend: Arc<dyn AnalysisBackend>,
    config: ReviewConfig,
    options: SnapshotOptions,
}

/// Fails the pending review if the owning future is dropped before finishing.
struct PendingGuard<'a> {
    store: &'a ReviewStore,
    key: &'a RepositoryKey,
    id: ReviewId,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!(repo = %self.key, review_id = %self.id, "review cancelled while pending");
            let _ = self.store.fail(
                self.key,
                self.id,
                "review was cancelled before it completed".into(),
            );
        }
    }
}

impl Coordinator {
    /// Create a coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`RepolensError::Config`](repolens_core::RepolensError::Config) if a configured skip pattern is invalid.
    pub fn new(
        store: ReviewStore,
        fetcher: Arc<dyn RepositoryFetcher>,
        backend: Arc<dyn AnalysisBackend>,
        config: ReviewConfig,
    ) -> Result<Self> {
        let options = SnapshotOptions::from_config(&config)?;
        Ok(Self {
            store,
            fetcher,
            backend,
            config,
            options,
        })
    }

    /// The store reviews are recorded in.
    pub fn store(&self) -> &ReviewStore {
        &self.store
    }

    /// The repository fetcher, also used to normalize repository URLs.
    pub fn fetcher(&self) -> &Arc<dyn RepositoryFetcher> {
        &self.fetcher
    }

    /// Run a full review of `key` and return the terminal review record.
    ///
    /// # Errors
    ///
    /// [`RepolensError::Conflict`](repolens_core::RepolensError::Conflict) if a review of `key`
    /// is already pending.
    /// Fetch failures (including rate limits) mark the review failed and are
    /// returned. Analyzer failures only add an informational finding, even
    /// when no analyzer succeeds.
    pub async fn run_review(
        &self,
        key: &RepositoryKey,
        focus_areas: Vec<Category>,
    ) -> Result<Arc<Review>> {
        let analyzers = Analyzer::select(&focus_areas, &self.config.default_focus);
        let id = self.store.put_pending(key, focus_areas)?;
        tracing::info!(repo = %key, review_id = %id, analyzers = analyzers.len(), "review started");

        let mut guard = PendingGuard {
            store: &self.store,
            key,
            id,
            armed: true,
        };
        let outcome = self.execute(key, id, &analyzers).await;
        guard.disarm();

        match outcome {
            Ok((findings, summary)) => {
                let review = self.store.complete(key, id, findings, summary)?;
                tracing::info!(
                    repo = %key,
                    review_id = %id,
                    findings = review.findings.len(),
                    "review complete"
                );
                Ok(review)
            }
            Err(e) => {
                tracing::warn!(repo = %key, review_id = %id, error = %e, "review failed");
                if let Err(store_err) = self.store.fail(key, id, e.to_string()) {
                    tracing::warn!(repo = %key, review_id = %id, error = %store_err, "could not record failure");
                }
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        key: &RepositoryKey,
        id: ReviewId,
        analyzers: &[Analyzer],
    ) -> Result<(Vec<Finding>, String)> {
        let snapshot = build_snapshot(self.fetcher.as_ref(), key, &self.options).await?;
        self.store.record_snapshot(key, id, snapshot.files.clone())?;

        let results = self.run_analyzers(&snapshot, analyzers).await;

        let mut findings = Vec::new();
        let mut sections = Vec::new();
        let mut failed = 0;
        for (analyzer, result) in analyzers.iter().zip(results) {
            match result {
                Ok(parsed) => {
                    if let Some(summary) = parsed.summary {
                        sections.push(format!("{analyzer}: {summary}"));
                    }
                    findings.extend(parsed.findings);
                }
                Err(e) => {
                    tracing::warn!(repo = %key, %analyzer, error = %e, "analyzer failed");
                    failed += 1;
                    findings.push(Finding::new(
                        Category::General,
                        Severity::Info,
                        format!("The {analyzer} analysis could not be completed: {e}"),
                    ));
                }
            }
        }

        sort_findings(&mut findings);
        let mut summary = compose_summary(&snapshot, analyzers, &findings, &sections);
        if failed > 0 && failed == analyzers.len() {
            tracing::warn!(repo = %key, review_id = %id, "no analyzer completed");
            summary.push_str("\n\nNo analysis completed; request a new review once the backend is reachable.");
        }
        Ok((findings, summary))
    }

    async fn run_analyzers(
        &self,
        snapshot: &Snapshot,
        analyzers: &[Analyzer],
    ) -> Vec<Result<ParsedAnalysis>> {
        let backend = self.backend.as_ref();
        let max_bytes = self.config.max_context_bytes;
        join_all(
            analyzers
                .iter()
                .map(|a| a.analyze(snapshot, backend, max_bytes)),
        )
        .await
    }

    /// Run one analyzer without creating a review.
    ///
    /// Uses the snapshot of the latest completed review of `key` when there
    /// is one, otherwise fetches a fresh snapshot that is discarded afterwards.
    ///
    /// # Errors
    ///
    /// Fetch failures and backend failures are returned as-is.
    pub async fn run_single_analysis(
        &self,
        key: &RepositoryKey,
        category: Category,
        framework: Option<&str>,
    ) -> Result<AnalysisReport> {
        let analyzer = Analyzer::for_category(category, framework);
        let (snapshot, source_review_id) = match self.store.latest_completed(key) {
            Some(review) => (Snapshot::from_review(&review), Some(review.id)),
            None => {
                tracing::debug!(repo = %key, %category, "no completed review, fetching snapshot");
                (
                    build_snapshot(self.fetcher.as_ref(), key, &self.options).await?,
                    None,
                )
            }
        };

        let mut parsed = analyzer
            .analyze(&snapshot, self.backend.as_ref(), self.config.max_context_bytes)
            .await?;
        sort_findings(&mut parsed.findings);

        Ok(AnalysisReport {
            repo_key: key.clone(),
            category,
            framework: framework.map(str::to_string),
            source_review_id,
            summary: parsed.summary,
            findings: parsed.findings,
            generated_at: Utc::now(),
        })
    }
}

fn compose_summary(
    snapshot: &Snapshot,
    analyzers: &[Analyzer],
    findings: &[Finding],
    sections: &[String],
) -> String {
    let names: Vec<String> = analyzers.iter().map(ToString::to_string).collect();
    let mut counts: Vec<String> = Vec::new();
    for severity in Severity::DESCENDING {
        let n = findings.iter().filter(|f| f.severity == severity).count();
        if n > 0 {
            counts.push(format!("{n} {severity}"));
        }
    }

    let mut summary = format!(
        "Reviewed {} of {} files with the {} analysis. {} finding(s)",
        snapshot.files.len(),
        snapshot.listing.len(),
        names.join(", "),
        findings.len(),
    );
    if counts.is_empty() {
        summary.push('.');
    } else {
        summary.push_str(&format!(" ({}).", counts.join(", ")));
    }
    for section in sections {
        summary.push_str("\n\n");
        summary.push_str(section);
    }
    summary
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
