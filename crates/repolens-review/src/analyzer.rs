//! The fixed set of analyzers a review can run.

use std::fmt;

use repolens_core::{Category, Finding, Result, Severity};

use crate::fetcher::AnalysisBackend;
use crate::prompt::{analysis_system_prompt, parse_analysis_response, ParsedAnalysis};
use crate::snapshot::{is_manifest, Snapshot};

/// One category of analysis over a snapshot.
///
/// # Examples
///
/// ```
/// use repolens_core::Category;
/// use repolens_review::analyzer::Analyzer;
///
/// let selected = Analyzer::select(&[], &[Category::General]);
/// assert_eq!(selected, vec![Analyzer::General]);
///
/// let selected = Analyzer::select(&[Category::Security, Category::Quality], &[Category::General]);
/// assert_eq!(selected, vec![Analyzer::Security, Analyzer::Quality]);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Analyzer {
    Quality,
    Security,
    Performance,
    Dependency,
    BestPractice { framework: Option<String> },
    General,
}

impl Analyzer {
    /// The analyzer for `category`; `framework` only affects best-practice.
    pub fn for_category(category: Category, framework: Option<&str>) -> Self {
        match category {
            Category::Quality => Analyzer::Quality,
            Category::Security => Analyzer::Security,
            Category::Performance => Analyzer::Performance,
            Category::Dependency => Analyzer::Dependency,
            Category::BestPractice => Analyzer::BestPractice {
                framework: framework.map(str::to_string),
            },
            Category::General => Analyzer::General,
        }
    }

    /// Analyzers for the requested focus areas, or for `defaults` when none
    /// were requested. Order follows the request; duplicates are dropped.
    pub fn select(focus_areas: &[Category], defaults: &[Category]) -> Vec<Analyzer> {
        let source = if focus_areas.is_empty() {
            defaults
        } else {
            focus_areas
        };
        let mut selected: Vec<Analyzer> = Vec::new();
        for &category in source {
            let analyzer = Analyzer::for_category(category, None);
            if !selected.contains(&analyzer) {
                selected.push(analyzer);
            }
        }
        if selected.is_empty() {
            selected.push(Analyzer::General);
        }
        selected
    }

    /// Category of the findings this analyzer produces.
    pub fn category(&self) -> Category {
        match self {
            Analyzer::Quality => Category::Quality,
            Analyzer::Security => Category::Security,
            Analyzer::Performance => Category::Performance,
            Analyzer::Dependency => Category::Dependency,
            Analyzer::BestPractice { .. } => Category::BestPractice,
            Analyzer::General => Category::General,
        }
    }

    /// Run the analysis.
    ///
    /// # Errors
    ///
    /// Propagates backend failures; callers decide whether that fails the
    /// whole review.
    pub async fn analyze(
        &self,
        snapshot: &Snapshot,
        backend: &dyn AnalysisBackend,
        max_context_bytes: usize,
    ) -> Result<ParsedAnalysis> {
        let category = self.category();

        if snapshot.files.is_empty() {
            return Ok(ParsedAnalysis {
                summary: Some("No readable files were found in the repository.".into()),
                findings: vec![Finding::new(
                    category,
                    Severity::Info,
                    "The repository snapshot contains no readable source files",
                )],
            });
        }

        let context = match self {
            Analyzer::Dependency => {
                if snapshot.manifests().next().is_none() {
                    return Ok(ParsedAnalysis {
                        summary: Some("No dependency manifest was found.".into()),
                        findings: vec![Finding::new(
                            Category::Dependency,
                            Severity::Info,
                            "No dependency manifest (package.json, requirements.txt, Cargo.toml, ...) found",
                        )
                        .with_remediation(
                            "Declare dependencies in a manifest with pinned versions so they can be audited",
                        )],
                    });
                }
                snapshot.render_context(max_context_bytes, |f| is_manifest(&f.path))
            }
            _ => snapshot.render_context(max_context_bytes, |_| true),
        };

        let framework = match self {
            Analyzer::BestPractice { framework } => framework.as_deref(),
            _ => None,
        };
        let prompt = analysis_system_prompt(category, framework);

        tracing::debug!(%category, bytes = context.len(), "running analyzer");
        let response = backend.complete(&prompt, &context).await?;
        let mut parsed = parse_analysis_response(&response, category);

        if let Analyzer::Security = self {
            let mut flagged = committed_secret_findings(snapshot);
            flagged.retain(|f| !parsed.findings.iter().any(|p| p.path() == f.path()));
            flagged.append(&mut parsed.findings);
            parsed.findings = flagged;
        }
        Ok(parsed)
    }
}

impl fmt::Display for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Analyzer::BestPractice {
                framework: Some(fw),
            } => write!(f, "best-practice ({fw})"),
            other => write!(f, "{}", other.category()),
        }
    }
}

fn committed_secret_findings(snapshot: &Snapshot) -> Vec<Finding> {
    snapshot
        .secret_bearing_paths()
        .map(|path| {
            Finding::new(
                Category::Security,
                Severity::High,
                "File that typically holds credentials or private keys is committed to the repository",
            )
            .at(path, None)
            .with_remediation(
                "Remove the file from version control, rotate any secrets it contained, and add it to .gitignore",
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use repolens_core::{FileRef, RepolensError, RepositoryKey};

    use super::*;

    struct RecordingBackend {
        response: String,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl RecordingBackend {
        fn new(response: &str) -> Self {
            Self {
                response: response.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl AnalysisBackend for RecordingBackend {
        async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((prompt.to_string(), context.to_string()));
            Ok(self.response.clone())
        }
    }

    struct DownBackend;

    #[async_trait]
    impl AnalysisBackend for DownBackend {
        async fn complete(&self, _prompt: &str, _context: &str) -> Result<String> {
            Err(RepolensError::BackendUnavailable("connection refused".into()))
        }
    }

    fn snapshot(files: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            repo: RepositoryKey::parse("octocat/demo").unwrap(),
            metadata: None,
            files: files
                .iter()
                .map(|(p, c)| FileRef::with_content(p, c.to_string()))
                .collect(),
            listing: files.iter().map(|(p, _)| p.to_string()).collect(),
        }
    }

    #[test]
    fn select_dedupes_and_falls_back() {
        let selected = Analyzer::select(&[Category::Quality, Category::Quality], &[]);
        assert_eq!(selected, vec![Analyzer::Quality]);
        assert_eq!(Analyzer::select(&[], &[]), vec![Analyzer::General]);
    }

    #[test]
    fn display_includes_framework() {
        let a = Analyzer::for_category(Category::BestPractice, Some("django"));
        assert_eq!(a.to_string(), "best-practice (django)");
        assert_eq!(Analyzer::Security.to_string(), "security");
    }

    #[tokio::test]
    async fn dependency_without_manifest_skips_backend() {
        let backend = RecordingBackend::new("{}");
        let snap = snapshot(&[("src/app.py", "print(1)")]);
        let out = Analyzer::Dependency.analyze(&snap, &backend, 10_000).await.unwrap();
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].severity, Severity::Info);
        assert!(out.findings[0].is_general());
        assert!(backend.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dependency_sends_only_manifests() {
        let backend = RecordingBackend::new(r#"{"summary":"pinned","findings":[]}"#);
        let snap = snapshot(&[("requirements.txt", "flask==0.12"), ("src/app.py", "SECRET_CODE")]);
        let out = Analyzer::Dependency.analyze(&snap, &backend, 10_000).await.unwrap();
        assert_eq!(out.summary.as_deref(), Some("pinned"));
        let calls = backend.calls.lock().unwrap();
        assert!(calls[0].1.contains("flask==0.12"));
        assert!(!calls[0].1.contains("SECRET_CODE"));
    }

    #[tokio::test]
    async fn security_flags_committed_secrets() {
        let backend = RecordingBackend::new(
            r#"{"findings":[{"file":"app.py","line":2,"severity":"critical","message":"eval"}]}"#,
        );
        let snap = snapshot(&[(".env", "TOKEN=abc"), ("app.py", "eval(input())")]);
        let out = Analyzer::Security.analyze(&snap, &backend, 10_000).await.unwrap();
        assert_eq!(out.findings.len(), 2);
        assert_eq!(out.findings[0].path(), Some(".env"));
        assert_eq!(out.findings[0].severity, Severity::High);
        assert_eq!(out.findings[1].severity, Severity::Critical);
    }

    #[tokio::test]
    async fn best_practice_prompt_names_framework() {
        let backend = RecordingBackend::new(r#"{"findings":[]}"#);
        let snap = snapshot(&[("manage.py", "import django")]);
        Analyzer::for_category(Category::BestPractice, Some("django"))
            .analyze(&snap, &backend, 10_000)
            .await
            .unwrap();
        assert!(backend.calls.lock().unwrap()[0].0.contains("django"));
    }

    #[tokio::test]
    async fn empty_snapshot_reports_info() {
        let out = Analyzer::General
            .analyze(&snapshot(&[]), &DownBackend, 10_000)
            .await
            .unwrap();
        assert_eq!(out.findings[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn backend_failure_propagates() {
        let snap = snapshot(&[("app.py", "x")]);
        let err = Analyzer::Quality.analyze(&snap, &DownBackend, 10_000).await.unwrap_err();
        assert!(matches!(err, RepolensError::BackendUnavailable(_)));
    }
}
