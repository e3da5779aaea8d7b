use std::collections::HashMap;

use repolens_core::{Category, Finding, Review, Severity};
use serde::Deserialize;

const FINDINGS_FORMAT: &str = "\
Respond with a JSON object:
{
  \"summary\": \"One paragraph overall assessment\",
  \"findings\": [
    {
      \"file\": \"path/to/file.py\" | null,
      \"line\": 42 | null,
      \"end_line\": 48 | null,
      \"severity\": \"info\" | \"low\" | \"medium\" | \"high\" | \"critical\",
      \"message\": \"Clear explanation of the issue\",
      \"remediation\": \"How to fix it\"
    }
  ]
}

Use null for file when a finding applies to the whole repository.
If you find no issues, return: { \"summary\": \"...\", \"findings\": [] }";

const BASE_RULES: &str = "\
You are Repolens, an expert reviewer of whole GitHub repositories.

Rules:
- Only report issues you can point to in the files provided
- Reference file paths exactly as given and line numbers where possible
- Do not speculate about code you cannot see
- Prefer a few concrete findings over many vague ones";

/// Build the system prompt for one analysis category.
///
/// `framework` is only used by [`Category::BestPractice`].
///
/// # Examples
///
/// ```
/// use repolens_core::Category;
/// use repolens_review::prompt::analysis_system_prompt;
///
/// let prompt = analysis_system_prompt(Category::BestPractice, Some("django"));
/// assert!(prompt.contains("django"));
/// assert!(prompt.contains("\"findings\""));
/// ```
pub fn analysis_system_prompt(category: Category, framework: Option<&str>) -> String {
    let focus = match category {
        Category::Quality => "\
Focus on code quality: readability, duplication, overly long or complex functions, \
dead code, error handling, naming that hides intent, and missing tests."
            .to_string(),
        Category::Security => "\
Focus on security: injection (SQL, command, path), unsafe deserialization, hardcoded \
credentials or tokens, weak cryptography, missing input validation, insecure defaults, \
and unsafe handling of secrets."
            .to_string(),
        Category::Performance => "\
Focus on performance: algorithmic complexity, repeated work in loops, N+1 queries, \
blocking I/O on hot paths, unbounded memory growth, and missing caching."
            .to_string(),
        Category::Dependency => "\
Focus on dependencies: outdated or unpinned versions, packages with known \
vulnerabilities, abandoned packages, duplicate or unnecessary dependencies, and \
license concerns. The dependency manifests are included in full."
            .to_string(),
        Category::BestPractice => match framework.map(str::trim).filter(|f| !f.is_empty()) {
            Some(fw) => format!(
                "Focus on conformance with the conventions and best practices of {fw}: \
project layout, idiomatic APIs, configuration, testing, and common pitfalls of {fw}."
            ),
            None => "\
Focus on conformance with the conventions of the repository's primary language and \
framework: project layout, idiomatic APIs, configuration, testing, and documentation."
                .to_string(),
        },
        Category::General => "\
Give a general review covering correctness, security, maintainability and \
performance. Report the most important issues first."
            .to_string(),
    };
    format!("{BASE_RULES}\n\n{focus}\n\n{FINDINGS_FORMAT}")
}

/// Findings and summary parsed from one analyzer response.
#[derive(Debug, Clone, Default)]
pub struct ParsedAnalysis {
    /// Overall assessment, if the backend gave one.
    pub summary: Option<String>,
    /// Valid findings, in response order.
    pub findings: Vec<Finding>,
}

#[derive(Deserialize)]
struct AnalysisResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    findings: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct RawFinding {
    #[serde(default, alias = "path")]
    file: Option<String>,
    #[serde(default, alias = "start_line")]
    line: Option<serde_json::Value>,
    #[serde(default)]
    end_line: Option<serde_json::Value>,
    severity: String,
    message: String,
    #[serde(default, alias = "suggestion")]
    remediation: Option<String>,
}

/// Parse an analyzer response into findings of `category`.
///
/// Handles markdown code fences around JSON. Entries with an unknown
/// severity or no message are skipped. A response that is not JSON at all
/// becomes the summary with no findings rather than an error.
///
/// # Examples
///
/// ```
/// use repolens_core::{Category, Severity};
/// use repolens_review::prompt::parse_analysis_response;
///
/// let json = r#"{"summary":"ok","findings":[
///     {"file":"app.py","line":3,"severity":"high","message":"eval on user input"}
/// ]}"#;
/// let parsed = parse_analysis_response(json, Category::Security);
/// assert_eq!(parsed.summary.as_deref(), Some("ok"));
/// assert_eq!(parsed.findings[0].severity, Severity::High);
/// ```
pub fn parse_analysis_response(response: &str, category: Category) -> ParsedAnalysis {
    let cleaned = strip_code_fences(response);

    let parsed: AnalysisResponse = match serde_json::from_str(cleaned) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(%category, error = %e, "analysis response is not valid JSON");
            let text = cleaned.trim();
            return ParsedAnalysis {
                summary: (!text.is_empty()).then(|| text.chars().take(2000).collect()),
                findings: Vec::new(),
            };
        }
    };

    let mut findings = Vec::new();
    for value in parsed.findings {
        let Ok(raw) = serde_json::from_value::<RawFinding>(value) else {
            continue;
        };
        let Ok(severity) = raw.severity.parse::<Severity>() else {
            continue;
        };
        if raw.message.trim().is_empty() {
            continue;
        }

        let mut finding = Finding::new(category, severity, raw.message.trim());
        if let Some(file) = raw.file.as_deref().map(str::trim).filter(|f| !f.is_empty()) {
            finding = finding.at_lines(file, line_number(&raw.line), line_number(&raw.end_line));
        }
        if let Some(remediation) = raw.remediation {
            finding = finding.with_remediation(remediation);
        }
        findings.push(finding);
    }

    ParsedAnalysis {
        summary: parsed
            .summary
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        findings,
    }
}

fn line_number(value: &Option<serde_json::Value>) -> Option<u32> {
    let n = match value {
        Some(serde_json::Value::Number(n)) => n.as_u64()?,
        Some(serde_json::Value::String(s)) => s.trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(n).ok().filter(|&l| l > 0)
}

/// System prompt asking the backend to phrase one suggestion per finding.
pub const SUGGESTIONS_PROMPT: &str = "\
You are Repolens, helping a developer act on a code review.
For each numbered finding below, write one concrete, actionable improvement \
suggestion (two or three sentences, code snippets allowed).

Respond with a JSON object:
{ \"suggestions\": [ { \"index\": 1, \"suggestion\": \"...\" } ] }

Use the finding numbers as given. Skip a finding only if you have nothing to add.";

/// System prompt for pull-request descriptions.
pub const PR_DESCRIPTION_PROMPT: &str = "\
You are Repolens, writing a pull-request description for changes that address a \
code review of a repository.

Write GitHub-flavoured markdown with exactly these sections:
## Summary
## Changes
## Rationale
## Risks and testing notes

Base every statement on the review findings provided. Do not invent files.";

/// System prompt for rewriting one file.
///
/// # Examples
///
/// ```
/// use repolens_review::prompt::improved_code_prompt;
///
/// assert!(improved_code_prompt("src/app.py").contains("src/app.py"));
/// ```
pub fn improved_code_prompt(path: &str) -> String {
    format!(
        "You are Repolens, rewriting the file `{path}` to resolve the review findings listed \
after it.\n\nRules:\n\
- Return ONLY the complete new content of `{path}`, no explanations\n\
- Preserve behaviour that the findings do not mention\n\
- Keep the existing style, imports and public interface where possible"
    )
}

/// Render findings as a numbered list, numbers starting at 1.
///
/// # Examples
///
/// ```
/// use repolens_core::{Category, Finding, Severity};
/// use repolens_review::prompt::render_findings;
///
/// let findings = vec![Finding::new(Category::General, Severity::Low, "no README")];
/// let text = render_findings(findings.iter());
/// assert!(text.starts_with("1. [low] (repository) no README"));
/// ```
pub fn render_findings<'a>(findings: impl Iterator<Item = &'a Finding>) -> String {
    let mut out = String::new();
    for (i, f) in findings.enumerate() {
        out.push_str(&format!(
            "{}. [{}] {} {}\n",
            i + 1,
            f.severity,
            f.location_label(),
            f.message
        ));
        if let Some(r) = &f.remediation {
            out.push_str(&format!("   Remediation: {r}\n"));
        }
    }
    out
}

/// Context for a pull-request description: summary plus findings.
pub fn build_pr_context(review: &Review) -> String {
    let mut ctx = format!("Repository: {}\nReview: #{}\n\n", review.repo, review.id);
    if let Some(summary) = &review.summary {
        ctx.push_str(&format!("Review summary:\n{summary}\n\n"));
    }
    if review.findings.is_empty() {
        ctx.push_str("The review reported no findings.\n");
    } else {
        ctx.push_str("Findings addressed:\n");
        ctx.push_str(&render_findings(review.findings.iter()));
    }
    ctx
}

#[derive(Deserialize)]
struct SuggestionsResponse {
    #[serde(default)]
    suggestions: Vec<SuggestionEntry>,
}

#[derive(Deserialize)]
struct SuggestionEntry {
    index: usize,
    suggestion: String,
}

/// Parse the suggestions response into a map from 1-based finding number to text.
///
/// Malformed responses yield an empty map.
pub fn parse_suggestions_response(response: &str) -> HashMap<usize, String> {
    let cleaned = strip_code_fences(response);
    match serde_json::from_str::<SuggestionsResponse>(cleaned) {
        Ok(parsed) => parsed
            .suggestions
            .into_iter()
            .filter(|s| s.index > 0 && !s.suggestion.trim().is_empty())
            .map(|s| (s.index, s.suggestion.trim().to_string()))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "suggestions response is not valid JSON");
            HashMap::new()
        }
    }
}

/// Remove a surrounding markdown code fence, with or without a language tag.
///
/// # Examples
///
/// ```
/// use repolens_review::prompt::strip_code_fences;
///
/// assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
/// assert_eq!(strip_code_fences("```python\nx = 1\n```"), "x = 1");
/// assert_eq!(strip_code_fences("plain"), "plain");
/// ```
pub fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the language tag line, if any
    match inner.split_once('\n') {
        Some((tag, body)) if !tag.trim().contains(' ') => body.trim(),
        _ => inner.trim(),
    }
}
