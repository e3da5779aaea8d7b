//! MCP server setup and lifecycle.
//!
//! Provides [`run_server`] which wires the GitHub fetcher, the LLM backend,
//! the review store and the stale-review watchdog together, then serves the
//! repolens tools on stdio until the client disconnects.

use std::sync::Arc;

use repolens_core::{RepolensConfig, RepolensError};
use repolens_review::coordinator::Coordinator;
use repolens_review::derive::DerivationEngine;
use repolens_review::github::GitHubClient;
use repolens_review::llm::LlmClient;
use repolens_review::store::ReviewStore;
use repolens_review::watchdog::spawn_watchdog;
use rmcp::{model::*, tool_handler, transport::stdio, ServerHandler, ServiceExt};

use crate::tools::RepolensServer;

const SERVER_INSTRUCTIONS: &str = "\
Repolens reviews GitHub repositories once and derives everything else from the stored review.\n\
Start with review_repository, then use the derivation tools on the result:\n\
- review_repository: Run a full review (optionally limited to focus areas)\n\
- list_reviewed_repos: List repositories with stored reviews\n\
- get_review_details: Fetch a stored review (latest unless review_id is given)\n\
- suggest_improvements: One suggestion per finding, optionally for a single file\n\
- analyze_dependencies: Dependency-only analysis\n\
- scan_security_vulnerabilities: Security-only analysis\n\
- analyze_code_quality: Code-quality-only analysis\n\
- analyze_performance: Performance-only analysis\n\
- compare_with_best_practices: Compare against general or framework conventions\n\
- generate_pull_request_description: Markdown PR description for a review\n\
- generate_cascade_prompt: Tool-agnostic implementation instructions\n\
- generate_improved_code: Candidate rewrite of one reviewed file\n\
Failures are returned as {\"error\": {\"kind\", \"message\"}}.";

#[tool_handler]
impl ServerHandler for RepolensServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "repolens".to_string(),
                title: Some("Repolens Repository Review".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: Some(
                    "Review GitHub repositories once and derive suggestions, prompts and PR text"
                        .to_string(),
                ),
                icons: None,
                website_url: None,
            },
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        }
    }
}

/// Build the tool server from configuration.
///
/// The returned server owns a fresh, empty [`ReviewStore`].
///
/// # Errors
///
/// Returns [`RepolensError::Config`] for invalid skip patterns and
/// [`RepolensError::BackendUnavailable`] or [`RepolensError::Fetch`] if an
/// HTTP client cannot be built.
pub fn build_server(config: &RepolensConfig) -> Result<RepolensServer, RepolensError> {
    let fetcher = Arc::new(GitHubClient::new(&config.github)?);
    let backend = Arc::new(LlmClient::new(&config.llm)?);
    let coordinator = Coordinator::new(
        ReviewStore::new(),
        fetcher,
        backend.clone(),
        config.review.clone(),
    )?;
    let engine = DerivationEngine::new(backend, config.review.cache_artifacts);
    Ok(RepolensServer::new(coordinator, Arc::new(engine)))
}

/// Start the MCP server on stdio transport.
///
/// This is called by the `repolens mcp` CLI subcommand. It blocks until
/// the client closes stdin; the watchdog stops with it.
///
/// # Errors
///
/// Returns [`RepolensError`] if the server fails to initialize or encounters
/// a transport error.
///
/// # Examples
///
/// ```no_run
/// use repolens_core::RepolensConfig;
///
/// # async fn example() -> Result<(), repolens_core::RepolensError> {
/// repolens_mcp::server::run_server(RepolensConfig::default()).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server(config: RepolensConfig) -> Result<(), RepolensError> {
    let server = build_server(&config)?;
    let watchdog = spawn_watchdog(
        server.store().clone(),
        config.review.watchdog_interval(),
        config.review.pending_timeout(),
    );
    tracing::info!(
        model = %config.llm.model,
        pending_timeout_secs = config.review.pending_timeout_secs,
        "repolens MCP server starting"
    );

    let outcome = async {
        let service = server
            .serve(stdio())
            .await
            .map_err(|e| RepolensError::Config(format!("MCP server failed to start: {e}")))?;

        service
            .waiting()
            .await
            .map_err(|e| RepolensError::Config(format!("MCP server error: {e}")))?;
        Ok(())
    }
    .await;

    watchdog.abort();
    tracing::info!("repolens MCP server stopped");
    outcome
}
