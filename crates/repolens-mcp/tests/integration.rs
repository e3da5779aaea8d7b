use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use repolens_core::{FileRef, RepolensError, RepositoryKey, Result, ReviewConfig};
use repolens_mcp::tools::{
    BestPracticesParams, CascadePromptParams, CategoryAnalysisParams, GetReviewDetailsParams,
    ImprovedCodeParams, ListReviewedReposParams, PrDescriptionParams, RepolensServer,
    ReviewRepositoryParams, SuggestImprovementsParams,
};
use repolens_review::coordinator::Coordinator;
use repolens_review::derive::DerivationEngine;
use repolens_review::fetcher::{AnalysisBackend, RepoMetadata, RepositoryFetcher};
use repolens_review::store::ReviewStore;
use rmcp::{handler::server::wrapper::Parameters, model::*, ServerHandler};
use tokio::sync::Notify;

struct DemoFetcher {
    files: BTreeMap<String, String>,
}

impl DemoFetcher {
    fn new() -> Self {
        let files = [
            ("README.md", "# demo"),
            ("requirements.txt", "flask==0.12"),
            ("src/app.py", "import os\nprint(os.environ['HOME'])\n"),
            ("src/util.py", "def add(a, b):\n    return a + b\n"),
        ];
        Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
        }
    }

    fn known(&self, key: &RepositoryKey) -> Result<()> {
        if key.owner() == "octocat" {
            Ok(())
        } else {
            Err(RepolensError::Fetch(format!(
                "repository {key} not found or private"
            )))
        }
    }
}

#[async_trait]
impl RepositoryFetcher for DemoFetcher {
    async fn metadata(&self, key: &RepositoryKey) -> Result<RepoMetadata> {
        self.known(key)?;
        Ok(RepoMetadata {
            description: Some("demo".into()),
            default_branch: "main".into(),
            language: Some("Python".into()),
            private: false,
        })
    }

    async fn list_files(&self, key: &RepositoryKey) -> Result<Vec<FileRef>> {
        self.known(key)?;
        Ok(self.files.keys().map(FileRef::new).collect())
    }

    async fn read_file(&self, _key: &RepositoryKey, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RepolensError::NotFound(path.to_string()))
    }
}

/// Answers each prompt family with a canned response.
struct CannedBackend {
    findings: &'static str,
    gate: Option<(Arc<Notify>, Arc<Notify>)>,
}

const UTIL_FINDING: &str = r#"{
  "summary": "Small utility module.",
  "findings": [
    {"file": "src/util.py", "line": 1, "severity": "low", "message": "Missing type hints",
     "remediation": "Annotate parameters and return type"}
  ]
}"#;

const NO_FINDINGS: &str = r#"{"summary": "Nothing to report.", "findings": []}"#;

impl CannedBackend {
    fn new(findings: &'static str) -> Self {
        Self {
            findings,
            gate: None,
        }
    }

    fn gated() -> (Self, Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let backend = Self {
            findings: NO_FINDINGS,
            gate: Some((entered.clone(), release.clone())),
        };
        (backend, entered, release)
    }
}

#[async_trait]
impl AnalysisBackend for CannedBackend {
    async fn complete(&self, prompt: &str, _context: &str) -> Result<String> {
        if let Some((entered, release)) = &self.gate {
            entered.notify_one();
            release.notified().await;
        }
        if prompt.contains("pull-request description") {
            return Ok("## Summary\nAdd type hints.\n## Changes\n- util".into());
        }
        if prompt.contains("\"suggestions\"") {
            return Ok(r#"{"suggestions": [{"index": 1, "suggestion": "Add `-> int`."}]}"#.into());
        }
        if prompt.contains("rewriting the file") {
            return Ok("```python\ndef add(a: int, b: int) -> int:\n    return a + b\n```".into());
        }
        Ok(self.findings.to_string())
    }
}

fn server_with(backend: CannedBackend) -> RepolensServer {
    let backend: Arc<dyn AnalysisBackend> = Arc::new(backend);
    let coordinator = Coordinator::new(
        ReviewStore::new(),
        Arc::new(DemoFetcher::new()),
        backend.clone(),
        ReviewConfig::default(),
    )
    .unwrap();
    RepolensServer::new(coordinator, Arc::new(DerivationEngine::new(backend, true)))
}

fn test_server() -> RepolensServer {
    server_with(CannedBackend::new(UTIL_FINDING))
}

fn extract_text(result: &CallToolResult) -> &str {
    match &result.content[0].raw {
        RawContent::Text(t) => &t.text,
        _ => panic!("expected text content"),
    }
}

fn json_of(result: &CallToolResult) -> serde_json::Value {
    serde_json::from_str(extract_text(result)).unwrap()
}

fn assert_error_kind(result: &CallToolResult, kind: &str) {
    assert_eq!(result.is_error, Some(true), "expected failure: {}", extract_text(result));
    assert_eq!(json_of(result)["error"]["kind"], kind);
}

async fn review(server: &RepolensServer, repo: &str) -> CallToolResult {
    server
        .review_repository(Parameters(ReviewRepositoryParams {
            repo_url: repo.to_string(),
            focus_areas: None,
        }))
        .await
        .unwrap()
}

#[test]
fn server_info_is_correct() {
    let server = test_server();
    let info = server.get_info();

    assert_eq!(info.server_info.name, "repolens");
    assert_eq!(info.server_info.version, env!("CARGO_PKG_VERSION"));
    let instructions = info.instructions.unwrap();
    for tool in [
        "review_repository",
        "list_reviewed_repos",
        "get_review_details",
        "suggest_improvements",
        "analyze_dependencies",
        "scan_security_vulnerabilities",
        "analyze_code_quality",
        "analyze_performance",
        "compare_with_best_practices",
        "generate_pull_request_description",
        "generate_cascade_prompt",
        "generate_improved_code",
    ] {
        assert!(instructions.contains(tool), "missing {tool}");
    }
}

#[tokio::test]
async fn review_then_get_details() {
    let server = test_server();
    let result = review(&server, "https://github.com/octocat/demo").await;
    let summary = json_of(&result);
    assert_eq!(summary["status"], "complete");
    assert_eq!(summary["repoKey"], "octocat/demo");
    assert_eq!(summary["findingCount"], 1);

    let details = server
        .get_review_details(Parameters(GetReviewDetailsParams {
            repo_key: "octocat/demo".into(),
            review_id: None,
        }))
        .unwrap();
    let details = json_of(&details);
    assert_eq!(details["id"], summary["reviewId"]);
    assert_eq!(details["findings"][0]["severity"], "low");
    assert!(details["files"].as_array().unwrap().len() >= 3);
}

#[tokio::test]
async fn get_details_of_unknown_review_is_not_found() {
    let server = test_server();
    review(&server, "octocat/demo").await;
    let result = server
        .get_review_details(Parameters(GetReviewDetailsParams {
            repo_key: "octocat/demo".into(),
            review_id: Some(99),
        }))
        .unwrap();
    assert_error_kind(&result, "not_found");
}

#[tokio::test]
async fn concurrent_review_of_same_repo_conflicts() {
    let (backend, entered, release) = CannedBackend::gated();
    let server = server_with(backend);

    let first = {
        let server = server.clone();
        tokio::spawn(async move { review(&server, "octocat/demo").await })
    };
    entered.notified().await;

    let second = review(&server, "octocat/demo").await;
    assert_error_kind(&second, "conflict");

    release.notify_one();
    let first = first.await.unwrap();
    assert_ne!(first.is_error, Some(true));
    assert_eq!(json_of(&first)["status"], "complete");
}

#[tokio::test]
async fn missing_repository_is_a_fetch_failure() {
    let server = test_server();
    let result = review(&server, "someone/private").await;
    assert_error_kind(&result, "fetch");
    assert!(json_of(&result)["error"]["message"]
        .as_str()
        .unwrap()
        .contains("not found or private"));
}

#[tokio::test]
async fn unknown_focus_area_is_a_validation_failure() {
    let server = test_server();
    let result = server
        .review_repository(Parameters(ReviewRepositoryParams {
            repo_url: "octocat/demo".into(),
            focus_areas: Some(vec!["style".into()]),
        }))
        .await
        .unwrap();
    assert_error_kind(&result, "validation");
    assert!(server.store().get_latest(&"octocat/demo".parse().unwrap()).is_none());
}

#[tokio::test]
async fn suggest_for_file_without_findings_is_not_found() {
    let server = test_server();
    review(&server, "octocat/demo").await;

    let result = server
        .suggest_improvements(Parameters(SuggestImprovementsParams {
            repo_key: "octocat/demo".into(),
            file_path: Some("src/app.py".into()),
        }))
        .await
        .unwrap();
    assert_error_kind(&result, "not_found");

    let result = server
        .suggest_improvements(Parameters(SuggestImprovementsParams {
            repo_key: "octocat/demo".into(),
            file_path: Some("src/util.py".into()),
        }))
        .await
        .unwrap();
    let artifact = json_of(&result);
    assert_eq!(artifact["kind"], "suggestions");
    assert_eq!(artifact["body"][0]["suggestion"], "Add `-> int`.");
}

#[tokio::test]
async fn derivations_before_any_review_are_not_found() {
    let server = test_server();
    let result = server
        .generate_cascade_prompt(Parameters(CascadePromptParams {
            repo_key: "octocat/demo".into(),
        }))
        .unwrap();
    assert_error_kind(&result, "not_found");
}

#[tokio::test]
async fn improved_code_outside_snapshot_is_not_found() {
    let server = test_server();
    review(&server, "octocat/demo").await;

    let result = server
        .generate_improved_code(Parameters(ImprovedCodeParams {
            repo_key: "octocat/demo".into(),
            file_path: "src/missing.py".into(),
        }))
        .await
        .unwrap();
    assert_error_kind(&result, "not_found");

    let result = server
        .generate_improved_code(Parameters(ImprovedCodeParams {
            repo_key: "octocat/demo".into(),
            file_path: "src/util.py".into(),
        }))
        .await
        .unwrap();
    let artifact = json_of(&result);
    assert_eq!(artifact["body"]["path"], "src/util.py");
    assert_eq!(artifact["body"]["findingsAddressed"], 1);
    assert!(artifact["body"]["content"]
        .as_str()
        .unwrap()
        .starts_with("def add(a: int"));
}

#[tokio::test]
async fn pr_description_and_cascade_prompt_derive_from_review() {
    let server = test_server();
    let id = json_of(&review(&server, "octocat/demo").await)["reviewId"]
        .as_u64()
        .unwrap();

    let pr = server
        .generate_pull_request_description(Parameters(PrDescriptionParams {
            repo_key: "octocat/demo".into(),
            review_id: id,
        }))
        .await
        .unwrap();
    let pr = json_of(&pr);
    assert_eq!(pr["reviewId"], id);
    assert!(pr["body"].as_str().unwrap().starts_with("## Summary"));

    let prompt = server
        .generate_cascade_prompt(Parameters(CascadePromptParams {
            repo_key: "https://github.com/octocat/demo".into(),
        }))
        .unwrap();
    let prompt = json_of(&prompt);
    assert!(prompt["body"].as_str().unwrap().contains("Missing type hints"));
}

#[tokio::test]
async fn category_analysis_persists_only_when_asked() {
    let server = test_server();
    let key: RepositoryKey = "octocat/demo".parse().unwrap();

    let result = server
        .analyze_code_quality(Parameters(CategoryAnalysisParams {
            repo_key: "octocat/demo".into(),
            persist: None,
        }))
        .await
        .unwrap();
    let report = json_of(&result);
    assert_eq!(report["category"], "quality");
    assert_eq!(report["persisted"], false);
    assert!(server.store().get_latest(&key).is_none());

    let result = server
        .scan_security_vulnerabilities(Parameters(CategoryAnalysisParams {
            repo_key: "octocat/demo".into(),
            persist: Some(true),
        }))
        .await
        .unwrap();
    let report = json_of(&result);
    assert_eq!(report["persisted"], true);
    let stored = server.store().get_latest(&key).unwrap();
    assert_eq!(report["sourceReviewId"], stored.id.0);
}

#[tokio::test]
async fn best_practices_reports_framework() {
    let server = test_server();
    let result = server
        .compare_with_best_practices(Parameters(BestPracticesParams {
            repo_key: "octocat/demo".into(),
            framework: Some("flask".into()),
        }))
        .await
        .unwrap();
    let report = json_of(&result);
    assert_eq!(report["category"], "best-practice");
    assert_eq!(report["framework"], "flask");
}

#[tokio::test]
async fn list_reviewed_repos_lists_each_key_once() {
    let server = test_server();
    review(&server, "octocat/demo").await;
    review(&server, "octocat/demo").await;
    review(&server, "octocat/other").await;

    let result = server
        .list_reviewed_repos(Parameters(ListReviewedReposParams::default()))
        .unwrap();
    let listing = json_of(&result);
    assert_eq!(listing["total"], 2);
    let demo = listing["repositories"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["repoKey"] == "octocat/demo")
        .unwrap();
    assert_eq!(demo["reviewCount"], 2);
    assert_eq!(demo["latestReviewId"], 2);
}
