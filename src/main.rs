use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use miette::{IntoDiagnostic, Result};
use repolens_core::{Category, OutputFormat, RepolensConfig, Severity};
use repolens_review::coordinator::Coordinator;
use repolens_review::fetcher::RepositoryFetcher;
use repolens_review::github::GitHubClient;
use repolens_review::llm::LlmClient;
use repolens_review::store::ReviewStore;
use tracing_subscriber::EnvFilter;

const CONFIG_FILE: &str = ".repolens.toml";

#[derive(Parser)]
#[command(
    name = "repolens",
    version,
    about = "Review GitHub repositories once, derive everything from the stored result",
    long_about = "Repolens fetches a GitHub repository, runs focused LLM analyzers over it and\n\
                   stores the review. Suggestions, prompts, PR descriptions and rewrites are then\n\
                   derived from that review instead of re-analyzing the repository.\n\n\
                   Examples:\n  \
                     repolens mcp                                Serve the tools to an MCP client\n  \
                     repolens review octocat/hello-world         One-shot review\n  \
                     repolens review https://github.com/o/r --focus security,deps\n  \
                     repolens init                               Create a .repolens.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .repolens.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summary (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable verbose (debug) logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server on stdio
    #[command(long_about = "Start the MCP server on stdio.\n\n\
        Exposes review_repository and the derivation tools to an MCP client.\n\
        Reviews live in memory until the client disconnects. Logs go to stderr.")]
    Mcp,
    /// Review a GitHub repository and print the result
    #[command(long_about = "Review a GitHub repository and print the result.\n\n\
        Fetches the repository through the GitHub API, runs the analyzers for the\n\
        requested focus areas and prints the finished review.\n\n\
        Examples:\n  repolens review octocat/hello-world\n  repolens review octocat/hello-world --focus security --fail-on high")]
    Review {
        /// Repository URL or owner/name
        repo_url: String,

        /// Focus areas (comma-separated): quality, security, performance,
        /// dependency, best-practice, general, all
        #[arg(long, value_delimiter = ',')]
        focus: Vec<String>,

        /// Exit with code 1 if any finding is at least this severe
        #[arg(long)]
        fail_on: Option<Severity>,
    },
    /// Create a default .repolens.toml configuration file
    #[command(long_about = "Create a default .repolens.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .repolens.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# Repolens Configuration

[llm]
# provider = "openai"            # openai | anthropic | gemini; any other provider needs base_url
# model = "gpt-4o"
# api_key = "..."                # or OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
# base_url = "http://localhost:11434"  # appended with /v1/chat/completions
# max_input_tokens = 32000

[github]
# token = "..."                  # or GITHUB_TOKEN / GH_TOKEN; unauthenticated works at a lower rate limit
# api_url = "https://api.github.com"

[review]
# default_focus = ["general"]
# max_files = 40
# max_file_bytes = 64000
# max_context_bytes = 120000
# skip_patterns = ["*.lock", "*.min.js", "vendor/**"]
# fetch_retries = 2
# pending_timeout_secs = 900
# watchdog_interval_secs = 30
# cache_artifacts = true
"#;

fn print_welcome() {
    let version = env!("CARGO_PKG_VERSION");
    println!("repolens v{version}: review a repository once, derive everything else\n");

    println!("Quick start:");
    println!("  repolens init                      Create a .repolens.toml config file");
    println!("  repolens review octocat/demo       Review a repository from the terminal");
    println!("  repolens mcp                       Serve the review tools over MCP\n");

    println!("Run 'repolens <command> --help' for details.");
}

fn init_tracing(command: Option<&Command>, verbose: bool) {
    let default = match (verbose, command) {
        (true, _) => "debug",
        (false, Some(Command::Mcp)) => "info",
        (false, _) => "warn",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // stdout carries the MCP transport and command output
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<RepolensConfig> {
    let default_path = Path::new(CONFIG_FILE);
    let config = match path {
        Some(path) => {
            tracing::debug!(path = %path.display(), "loading configuration");
            RepolensConfig::from_file(path)?
        }
        None if default_path.exists() => {
            tracing::debug!(path = CONFIG_FILE, "loading configuration");
            RepolensConfig::from_file(default_path)?
        }
        None => {
            tracing::debug!("no {CONFIG_FILE} found, using defaults");
            RepolensConfig::default()
        }
    };
    Ok(config.with_env())
}

fn start_spinner(message: String) -> Option<ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    Some(pb)
}

async fn run_review(
    config: &RepolensConfig,
    format: OutputFormat,
    repo_url: &str,
    focus: &[String],
    fail_on: Option<Severity>,
) -> Result<()> {
    let focus = Category::parse_focus_areas(focus)?;
    let fetcher = GitHubClient::new(&config.github)?;
    let key = fetcher.resolve(repo_url)?;

    if config.llm.api_key.is_none() && config.llm.base_url.is_none() {
        let var = config.llm.api_key_env_var();
        miette::bail!(miette::miette!(
            help = "Set {var} or add api_key under [llm] in your .repolens.toml",
            "No API key configured for LLM provider '{}'",
            config.llm.provider
        ));
    }
    let backend = LlmClient::new(&config.llm)?;
    let coordinator = Coordinator::new(
        ReviewStore::new(),
        Arc::new(fetcher),
        Arc::new(backend),
        config.review.clone(),
    )?;

    tracing::info!(
        repo = %key,
        provider = %config.llm.provider,
        model = %config.llm.model,
        "starting review"
    );
    let spinner = start_spinner(format!("Reviewing {key}..."));
    let review = coordinator
        .run_review(&key, focus)
        .await
        .inspect_err(|e| {
            if let Some(pb) = &spinner {
                pb.finish_with_message("Failed");
            }
            tracing::warn!(repo = %key, error = %e, "review did not complete");
        })?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    tracing::info!(
        repo = %key,
        review_id = %review.id,
        findings = review.findings.len(),
        "review finished"
    );

    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(review.as_ref()).into_diagnostic()?
            );
        }
        OutputFormat::Markdown => print!("{}", review.to_markdown()),
        OutputFormat::Text => print!("{review}"),
    }

    if let Some(threshold) = fail_on {
        if review.meets_threshold(threshold) {
            tracing::warn!(repo = %key, %threshold, "findings at or above the --fail-on severity");
            std::process::exit(1);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.command.as_ref(), cli.verbose);

    match cli.command {
        None => print_welcome(),
        Some(Command::Mcp) => {
            let config = load_config(cli.config.as_deref())?;
            repolens_mcp::server::run_server(config).await?;
        }
        Some(Command::Review {
            ref repo_url,
            ref focus,
            fail_on,
        }) => {
            let config = load_config(cli.config.as_deref())?;
            run_review(&config, cli.format, repo_url, focus, fail_on).await?;
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "repolens", &mut std::io::stdout());
        }
    }

    Ok(())
}
