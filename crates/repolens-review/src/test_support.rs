//! In-process doubles for the collaborator traits.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use repolens_core::{FileRef, RepolensError, RepositoryKey, Result};
use tokio::sync::Notify;

use crate::fetcher::{AnalysisBackend, RepoMetadata, RepositoryFetcher};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    RateLimit,
    Missing,
}

/// Serves a fixed file map; can be switched into a failing mode.
pub struct StubFetcher {
    files: BTreeMap<String, String>,
    failure: Mutex<Option<FetchFailure>>,
    pub metadata_calls: AtomicUsize,
}

impl StubFetcher {
    pub fn new(files: &[(&str, &str)]) -> Self {
        Self {
            files: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.to_string()))
                .collect(),
            failure: Mutex::new(None),
            metadata_calls: AtomicUsize::new(0),
        }
    }

    pub fn demo() -> Self {
        Self::new(&[
            ("README.md", "# demo"),
            ("requirements.txt", "flask==0.12"),
            ("src/app.py", "import os\nprint(os.environ['HOME'])\n"),
            ("src/util.py", "def add(a, b):\n    return a + b\n"),
        ])
    }

    pub fn fail_with(&self, failure: Option<FetchFailure>) {
        *self.failure.lock() = failure;
    }

    fn check(&self, key: &RepositoryKey) -> Result<()> {
        match *self.failure.lock() {
            Some(FetchFailure::RateLimit) => Err(RepolensError::RateLimit(
                "GitHub API quota exhausted".into(),
            )),
            Some(FetchFailure::Missing) => Err(RepolensError::Fetch(format!(
                "repository {key} not found or private"
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RepositoryFetcher for StubFetcher {
    async fn metadata(&self, key: &RepositoryKey) -> Result<RepoMetadata> {
        self.metadata_calls.fetch_add(1, Ordering::SeqCst);
        self.check(key)?;
        Ok(RepoMetadata {
            description: Some("demo repository".into()),
            default_branch: "main".into(),
            language: Some("Python".into()),
            private: false,
        })
    }

    async fn list_files(&self, key: &RepositoryKey) -> Result<Vec<FileRef>> {
        self.check(key)?;
        Ok(self.files.keys().map(FileRef::new).collect())
    }

    async fn read_file(&self, key: &RepositoryKey, path: &str) -> Result<String> {
        self.check(key)?;
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RepolensError::NotFound(path.to_string()))
    }
}

/// Answers by matching a marker in the system prompt; records every call.
pub struct ScriptedBackend {
    rules: Vec<(String, std::result::Result<String, String>)>,
    fallback: String,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    pub fn new(fallback: &str) -> Self {
        Self {
            rules: Vec::new(),
            fallback: fallback.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Respond with `response` when the prompt contains `marker`.
    pub fn on(mut self, marker: &str, response: &str) -> Self {
        self.rules
            .push((marker.to_string(), Ok(response.to_string())));
        self
    }

    /// Fail when the prompt contains `marker`.
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.rules.push((
            marker.to_string(),
            Err("model overloaded".to_string()),
        ));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl AnalysisBackend for ScriptedBackend {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String> {
        self.calls
            .lock()
            .push((prompt.to_string(), context.to_string()));
        for (marker, response) in &self.rules {
            if prompt.contains(marker.as_str()) {
                return match response {
                    Ok(text) => Ok(text.clone()),
                    Err(reason) => Err(RepolensError::BackendUnavailable(reason.clone())),
                };
            }
        }
        Ok(self.fallback.clone())
    }
}

/// Blocks every call until released, so a review stays pending.
pub struct GatedBackend {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
    response: String,
}

impl GatedBackend {
    pub fn new(response: &str) -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
            response: response.to_string(),
        }
    }
}

#[async_trait]
impl AnalysisBackend for GatedBackend {
    async fn complete(&self, _prompt: &str, _context: &str) -> Result<String> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(self.response.clone())
    }
}

pub fn key() -> RepositoryKey {
    RepositoryKey::parse("octocat/demo").unwrap()
}
