//! Tool implementations for the repolens MCP server.
//!
//! Thirteen tools are exposed. `review_repository` and the `persist`-ed
//! category analyses create reviews; every other tool reads the store or
//! derives an artifact from a stored review. Each returns JSON via
//! `CallToolResult`; domain failures become tool-level errors shaped as
//! `{"error": {"kind", "message"}}`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use repolens_core::{
    Category, RepolensError, RepositoryKey, Review, ReviewId, ReviewStatus, Severity,
};
use repolens_review::coordinator::{AnalysisReport, Coordinator};
use repolens_review::derive::DerivationEngine;
use repolens_review::store::{RepoSummary, ReviewStore};
use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    schemars, tool, tool_router, ErrorData as McpError,
};
use serde::{Deserialize, Serialize};

/// MCP server exposing repolens review tools.
///
/// Cheap to clone; clones share the coordinator, store and derivation cache.
#[derive(Clone)]
pub struct RepolensServer {
    coordinator: Coordinator,
    engine: Arc<DerivationEngine>,
    pub(crate) tool_router: ToolRouter<Self>,
}

// --- Parameter structs ---

/// Parameters for the `review_repository` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReviewRepositoryParams {
    /// GitHub repository URL or `owner/name`.
    pub repo_url: String,
    /// Focus areas: quality, security, performance, dependency,
    /// best-practice, general, or "all" (default).
    pub focus_areas: Option<Vec<String>>,
}

/// Parameters for the `list_reviewed_repos` tool.
#[derive(Debug, Default, Deserialize, schemars::JsonSchema)]
pub struct ListReviewedReposParams {}

/// Parameters for the `get_review_details` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct GetReviewDetailsParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
    /// Review id; the latest review when omitted.
    pub review_id: Option<u64>,
}

/// Parameters for the `suggest_improvements` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SuggestImprovementsParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
    /// Limit suggestions to this file plus repository-wide findings.
    pub file_path: Option<String>,
}

/// Parameters shared by the single-category analysis tools.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CategoryAnalysisParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
    /// Store the result as a new review (default false).
    pub persist: Option<bool>,
}

/// Parameters for the `compare_with_best_practices` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BestPracticesParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
    /// Framework to compare against, e.g. "django" or "react".
    pub framework: Option<String>,
}

/// Parameters for the `generate_pull_request_description` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PrDescriptionParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
    /// Completed review to describe.
    pub review_id: u64,
}

/// Parameters for the `generate_cascade_prompt` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct CascadePromptParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
}

/// Parameters for the `generate_improved_code` tool.
#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ImprovedCodeParams {
    /// Repository key (`owner/name`) or URL.
    pub repo_key: String,
    /// Path of a file that was part of the latest completed review.
    pub file_path: String,
}

// --- Response structs ---

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SeverityCount {
    severity: Severity,
    count: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewResponse {
    review_id: ReviewId,
    repo_key: RepositoryKey,
    status: ReviewStatus,
    focus_areas: Vec<Category>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    files_reviewed: usize,
    finding_count: usize,
    severity_counts: Vec<SeverityCount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
}

impl From<&Review> for ReviewResponse {
    fn from(review: &Review) -> Self {
        Self {
            review_id: review.id,
            repo_key: review.repo.clone(),
            status: review.status,
            focus_areas: review.focus_areas.clone(),
            created_at: review.created_at,
            updated_at: review.updated_at,
            files_reviewed: review.files.len(),
            finding_count: review.findings.len(),
            severity_counts: review
                .severity_counts()
                .into_iter()
                .map(|(severity, count)| SeverityCount { severity, count })
                .collect(),
            summary: review.summary.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReviewedReposResponse {
    repositories: Vec<RepoSummary>,
    total: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CategoryAnalysisResponse {
    #[serde(flatten)]
    report: AnalysisReport,
    persisted: bool,
}

type ToolOutcome<T> = Result<T, RepolensError>;

fn mcp_err(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

/// Structured tool failure for a domain error.
///
/// # Examples
///
/// ```
/// use repolens_core::RepolensError;
/// use repolens_mcp::tools::tool_failure;
///
/// let result = tool_failure(&RepolensError::Conflict("octocat/demo".into()));
/// assert_eq!(result.is_error, Some(true));
/// ```
pub fn tool_failure(err: &RepolensError) -> CallToolResult {
    let body = serde_json::json!({
        "error": {
            "kind": err.kind(),
            "message": err.to_string(),
        }
    });
    CallToolResult::error(vec![Content::text(body.to_string())])
}

fn respond<T: Serialize>(outcome: ToolOutcome<T>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(body) => {
            let json = serde_json::to_string_pretty(&body).map_err(|e| mcp_err(e.to_string()))?;
            Ok(CallToolResult::success(vec![Content::text(json)]))
        }
        Err(e) => {
            tracing::debug!(kind = %e.kind(), error = %e, "tool call failed");
            Ok(tool_failure(&e))
        }
    }
}

impl RepolensServer {
    /// The review store backing the tools.
    pub fn store(&self) -> &ReviewStore {
        self.coordinator.store()
    }

    fn repo_key(&self, raw: &str) -> ToolOutcome<RepositoryKey> {
        self.coordinator.fetcher().resolve(raw)
    }

    fn latest_completed(&self, key: &RepositoryKey) -> ToolOutcome<Arc<Review>> {
        self.store().latest_completed(key).ok_or_else(|| {
            RepolensError::NotFound(format!(
                "no completed review for {key}; run review_repository first"
            ))
        })
    }

    fn review_details(&self, params: &GetReviewDetailsParams) -> ToolOutcome<Review> {
        let key = self.repo_key(&params.repo_key)?;
        let review = match params.review_id {
            Some(id) => self.store().get(&key, ReviewId(id))?,
            None => self
                .store()
                .get_latest(&key)
                .ok_or_else(|| RepolensError::NotFound(format!("no reviews for {key}")))?,
        };
        Ok(Review::clone(&review))
    }

    async fn category_analysis(
        &self,
        params: CategoryAnalysisParams,
        category: Category,
    ) -> ToolOutcome<CategoryAnalysisResponse> {
        let key = self.repo_key(&params.repo_key)?;
        if !params.persist.unwrap_or(false) {
            let report = self
                .coordinator
                .run_single_analysis(&key, category, None)
                .await?;
            return Ok(CategoryAnalysisResponse {
                report,
                persisted: false,
            });
        }

        let review = self.coordinator.run_review(&key, vec![category]).await?;
        Ok(CategoryAnalysisResponse {
            report: AnalysisReport {
                repo_key: key,
                category,
                framework: None,
                source_review_id: Some(review.id),
                summary: review.summary.clone(),
                findings: review.findings.clone(),
                generated_at: review.updated_at,
            },
            persisted: true,
        })
    }
}

#[tool_router]
impl RepolensServer {
    /// Create a new server over a coordinator and derivation engine.
    pub fn new(coordinator: Coordinator, engine: Arc<DerivationEngine>) -> Self {
        Self {
            coordinator,
            engine,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "review_repository",
        description = "Fetch a GitHub repository and run a full review over it. Creates a new stored review; fails with kind \"conflict\" while another review of the same repository is pending. Use the returned reviewId with the other tools."
    )]
    pub async fn review_repository(
        &self,
        Parameters(params): Parameters<ReviewRepositoryParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            async {
                let key = self.repo_key(&params.repo_url)?;
                let focus = Category::parse_focus_areas(
                    params.focus_areas.as_deref().unwrap_or_default(),
                )?;
                let review = self.coordinator.run_review(&key, focus).await?;
                Ok::<_, RepolensError>(ReviewResponse::from(review.as_ref()))
            }
            .await,
        )
    }

    #[tool(
        name = "list_reviewed_repos",
        description = "List every repository with at least one stored review, most recently reviewed first."
    )]
    pub fn list_reviewed_repos(
        &self,
        Parameters(_params): Parameters<ListReviewedReposParams>,
    ) -> Result<CallToolResult, McpError> {
        let repositories = self.store().list_keys();
        respond(Ok(ReviewedReposResponse {
            total: repositories.len(),
            repositories,
        }))
    }

    #[tool(
        name = "get_review_details",
        description = "Return a stored review with its summary, findings and reviewed files. Returns the latest review unless reviewId is given."
    )]
    pub fn get_review_details(
        &self,
        Parameters(params): Parameters<GetReviewDetailsParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.review_details(&params))
    }

    #[tool(
        name = "suggest_improvements",
        description = "Turn the findings of the latest completed review into concrete suggestions, one per finding. With filePath, only findings in that file plus repository-wide findings are used."
    )]
    pub async fn suggest_improvements(
        &self,
        Parameters(params): Parameters<SuggestImprovementsParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            async {
                let key = self.repo_key(&params.repo_key)?;
                let review = self.latest_completed(&key)?;
                self.engine
                    .suggest_improvements(&review, params.file_path.as_deref())
                    .await
            }
            .await,
        )
    }

    #[tool(
        name = "analyze_dependencies",
        description = "Analyze dependency manifests for outdated, vulnerable or risky packages. Reuses the latest completed review's files when available; set persist to store the result as a new review."
    )]
    pub async fn analyze_dependencies(
        &self,
        Parameters(params): Parameters<CategoryAnalysisParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.category_analysis(params, Category::Dependency).await)
    }

    #[tool(
        name = "scan_security_vulnerabilities",
        description = "Scan for security vulnerabilities such as injection, unsafe deserialization and committed secrets. Reuses the latest completed review's files when available; set persist to store the result as a new review."
    )]
    pub async fn scan_security_vulnerabilities(
        &self,
        Parameters(params): Parameters<CategoryAnalysisParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.category_analysis(params, Category::Security).await)
    }

    #[tool(
        name = "analyze_code_quality",
        description = "Assess readability, structure, duplication and error handling. Reuses the latest completed review's files when available; set persist to store the result as a new review."
    )]
    pub async fn analyze_code_quality(
        &self,
        Parameters(params): Parameters<CategoryAnalysisParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.category_analysis(params, Category::Quality).await)
    }

    #[tool(
        name = "analyze_performance",
        description = "Look for algorithmic hot spots, needless allocation and blocking I/O. Reuses the latest completed review's files when available; set persist to store the result as a new review."
    )]
    pub async fn analyze_performance(
        &self,
        Parameters(params): Parameters<CategoryAnalysisParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(self.category_analysis(params, Category::Performance).await)
    }

    #[tool(
        name = "compare_with_best_practices",
        description = "Compare the repository against general or framework-specific conventions. The result is not stored."
    )]
    pub async fn compare_with_best_practices(
        &self,
        Parameters(params): Parameters<BestPracticesParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            async {
                let key = self.repo_key(&params.repo_key)?;
                let framework = params
                    .framework
                    .as_deref()
                    .map(str::trim)
                    .filter(|f| !f.is_empty());
                self.coordinator
                    .run_single_analysis(&key, Category::BestPractice, framework)
                    .await
            }
            .await,
        )
    }

    #[tool(
        name = "generate_pull_request_description",
        description = "Write a markdown pull-request description (summary, rationale, risk notes) for the changes a completed review calls for."
    )]
    pub async fn generate_pull_request_description(
        &self,
        Parameters(params): Parameters<PrDescriptionParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            async {
                let key = self.repo_key(&params.repo_key)?;
                let review = self.store().get(&key, ReviewId(params.review_id))?;
                self.engine.generate_pr_description(&review).await
            }
            .await,
        )
    }

    #[tool(
        name = "generate_cascade_prompt",
        description = "Render the latest completed review as step-by-step implementation instructions, most severe findings first, for any coding agent."
    )]
    pub fn generate_cascade_prompt(
        &self,
        Parameters(params): Parameters<CascadePromptParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            self.repo_key(&params.repo_key)
                .and_then(|key| self.latest_completed(&key))
                .and_then(|review| self.engine.generate_prompt(&review)),
        )
    }

    #[tool(
        name = "generate_improved_code",
        description = "Propose a rewrite of one file from the latest completed review that addresses its findings. The content is returned, never applied."
    )]
    pub async fn generate_improved_code(
        &self,
        Parameters(params): Parameters<ImprovedCodeParams>,
    ) -> Result<CallToolResult, McpError> {
        respond(
            async {
                let key = self.repo_key(&params.repo_key)?;
                let review = self.latest_completed(&key)?;
                self.engine
                    .generate_improved_code(&review, &params.file_path)
                    .await
            }
            .await,
        )
    }
}
