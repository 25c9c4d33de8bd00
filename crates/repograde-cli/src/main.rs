//! repograde - clone a batch of GitHub repositories and grade each one.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use repograde_agent::{AgentExecutor, PermissionMode};
use repograde_core::BatchResult;
use repograde_orchestrator::{
    channel, AgentGrader, BatchOrchestrator, GitCloner, GithubClient, OrchestratorConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod progress;
mod url_list;

/// Clone GitHub repositories and grade them in parallel with a coding agent.
#[derive(Parser, Debug)]
#[command(name = "repograde", version, about, long_about = None)]
struct Args {
    /// Repository URLs to grade
    urls: Vec<String>,

    /// CSV file with repository URLs in any column
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Grading prompt
    #[arg(short, long, conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// File containing the grading prompt
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Directory under which batch directories are created
    #[arg(long, env = "REPOGRADE_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Number of clones in flight at once
    #[arg(long, default_value_t = 1)]
    clone_concurrency: usize,

    /// Maximum number of repositories graded at once (default: all)
    #[arg(long)]
    grading_concurrency: Option<usize>,

    /// Clone time bound in seconds
    #[arg(long, default_value_t = 300)]
    clone_timeout: u64,

    /// Grading time bound per repository in seconds
    #[arg(long, default_value_t = 600)]
    grading_timeout: u64,

    /// Path to the agent CLI
    #[arg(long, default_value = "claude")]
    agent_path: String,

    /// Model passed to the agent
    #[arg(long)]
    model: Option<String>,

    /// Agent permission mode (default, acceptEdits, plan, bypassPermissions)
    #[arg(long, default_value = "plan")]
    permission_mode: PermissionMode,

    /// Maximum agent turns per repository
    #[arg(long)]
    max_turns: Option<u32>,

    /// Text appended to the agent's system prompt
    #[arg(long)]
    system_prompt: Option<String>,

    /// Tool the agent may use without asking (repeatable)
    #[arg(long = "allowed-tool")]
    allowed_tools: Vec<String>,

    /// Write the batch result as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// File each repository's feedback as a GitHub issue
    #[arg(long)]
    create_issues: bool,

    /// Title of the feedback issues
    #[arg(long, default_value = "Automated grading feedback")]
    issue_title: String,

    /// GitHub token used to create issues
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Show agent activity and debug logs
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let default_directive = if args.verbose {
        "repograde=debug"
    } else {
        "repograde=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .with_writer(std::io::stderr)
        .init();

    let urls = collect_urls(&args)?;
    if urls.is_empty() {
        return Err("no repository URLs given (pass URLs or --csv)".into());
    }
    let prompt = load_prompt(&args)?;

    let github = if args.create_issues {
        if args.github_token.is_none() {
            return Err("--create-issues needs a token (--github-token or GITHUB_TOKEN)".into());
        }
        Some(GithubClient::new(args.github_token.clone())?)
    } else {
        None
    };

    let config = build_config(&args);
    let cloner = Arc::new(GitCloner::new().with_timeout(config.clone_timeout));
    let backend = Arc::new(AgentGrader::new(build_executor(&args)));
    let batch = Arc::new(BatchOrchestrator::new(urls, config, cloner, backend));

    info!(batch_id = %batch.batch_id(), repos = batch.urls().len(), "Starting batch");

    let aborter = batch.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, aborting batch");
            aborter.abort();
        }
    });

    let (tx, rx) = channel();
    let printer = tokio::spawn(progress::print_events(rx, args.verbose));

    batch.clone_repositories(Some(&tx)).await;
    let result = batch.run_parallel_grading(&prompt, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    if let Err(e) = batch.cleanup().await {
        warn!(dir = %batch.batch_dir().display(), error = %e, "Failed to remove batch directory");
    }

    if let Some(github) = &github {
        if !batch.is_aborted() {
            file_issues(github, &args.issue_title, &result).await;
        }
    }

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&result)?;
        tokio::fs::write(path, json).await?;
        info!(path = %path.display(), "Wrote batch result");
    }

    println!("{}", progress::format_summary(&result));
    Ok(())
}

fn collect_urls(args: &Args) -> Result<Vec<String>, url_list::UrlListError> {
    let mut urls = args.urls.clone();
    if let Some(path) = &args.csv {
        let loaded = url_list::load_urls_from_csv(path)?;
        info!(path = %path.display(), count = loaded.len(), "Loaded URLs from CSV");
        urls.extend(loaded);
    }
    Ok(url_list::dedup(urls))
}

fn load_prompt(args: &Args) -> Result<String, Box<dyn std::error::Error>> {
    match (&args.prompt, &args.prompt_file) {
        (Some(prompt), _) => Ok(prompt.clone()),
        (None, Some(path)) => Ok(std::fs::read_to_string(path)?),
        (None, None) => Err("a grading prompt is required (--prompt or --prompt-file)".into()),
    }
}

fn build_config(args: &Args) -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default()
        .with_clone_concurrency(args.clone_concurrency)
        .with_grading_concurrency(args.grading_concurrency)
        .with_clone_timeout(Duration::from_secs(args.clone_timeout))
        .with_grading_timeout(Duration::from_secs(args.grading_timeout));
    if let Some(work_dir) = &args.work_dir {
        config = config.with_work_root(work_dir);
    }
    config
}

fn build_executor(args: &Args) -> AgentExecutor {
    let mut executor =
        AgentExecutor::new(&args.agent_path).with_permission_mode(args.permission_mode);
    if let Some(model) = &args.model {
        executor = executor.with_model(model);
    }
    if let Some(turns) = args.max_turns {
        executor = executor.with_max_turns(turns);
    }
    if let Some(system) = &args.system_prompt {
        executor = executor.with_system_prompt(system);
    }
    for tool in &args.allowed_tools {
        executor = executor.with_allowed_tool(tool);
    }
    executor
}

async fn file_issues(github: &GithubClient, title: &str, result: &BatchResult) {
    match github.rate_limit().await {
        Ok(quota) => info!(
            remaining = ?quota.remaining,
            limit = ?quota.limit,
            reset_at = ?quota.reset_at(),
            "GitHub API quota"
        ),
        Err(e) => warn!(error = %e, "Could not read GitHub API quota"),
    }

    for outcome in result.results.iter().filter(|o| o.success) {
        let Some(feedback) = outcome.feedback.as_deref() else {
            continue;
        };
        match github.create_issue(&outcome.repo_info, title, feedback).await {
            Ok(issue) => println!("Filed {} for {}", issue.html_url, outcome.repo_info.key()),
            Err(e) => error!(repo = %outcome.repo_info.key(), error = %e, "Failed to create issue"),
        }
    }
}
