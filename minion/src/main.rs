//! `minion`: one-shot coding agent. Task in, branch and PR out.
//!
//! Resolves the repository, loads its config, and hands the task to the
//! orchestrator. Progress goes to stderr, the run summary to stdout.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use minion::core::text::truncate_chars;
use minion::core::types::{Action, Message};
use minion::exit_codes;
use minion::io::config::{MinionConfig, REPO_CONFIG_PATH, discover_config, write_config};
use minion::io::git::{Git, find_repo_root};
use minion::io::lint::Lint;
use minion::llm::{CompletionModel, CompletionRequest, FallbackClient};
use minion::orchestrator::{Orchestrator, RunObserver, RunRequest, RunState};

#[derive(Parser, Debug)]
#[command(
    name = "minion",
    version,
    about = "One-shot coding agent: task in, branch and pull request out"
)]
struct Cli {
    /// Log debug output for minion to stderr (`RUST_LOG` takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct RepoArg {
    /// Repository path; any directory inside the work tree works.
    #[arg(short, long, default_value = ".")]
    repo: PathBuf,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the agent on a task, then commit, push, and optionally open a PR.
    Run {
        /// What the agent should do.
        task: String,
        #[command(flatten)]
        repo: RepoArg,
        /// Comma-separated URLs handed to the agent as context.
        #[arg(short, long, value_delimiter = ',')]
        links: Vec<String>,
        /// Ticket identifier handed to the agent as context.
        #[arg(short, long)]
        ticket: Option<String>,
        /// Open a pull request once the branch is pushed.
        #[arg(short = 'p', long)]
        create_pr: bool,
        /// GitHub token for the hosted API; defaults to config, then `GITHUB_TOKEN`.
        #[arg(long)]
        github_token: Option<String>,
    },
    /// Run the configured linters over paths (default: staged, else tracked files).
    Lint {
        paths: Vec<String>,
        #[command(flatten)]
        repo: RepoArg,
    },
    /// Stream a single completion through the provider chain.
    Ask {
        prompt: String,
        #[command(flatten)]
        repo: RepoArg,
        /// Optional system prompt.
        #[arg(long)]
        system: Option<String>,
    },
    /// Write a default `.minions/config.toml` into the repository.
    Init {
        #[command(flatten)]
        repo: RepoArg,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    minion::logging::init(cli.verbose);
    match run(cli.command) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run(command: Command) -> Result<i32> {
    match command {
        Command::Run {
            task,
            repo,
            links,
            ticket,
            create_pr,
            github_token,
        } => {
            let mut request = RunRequest::new(task).with_links(clean_links(links));
            if let Some(ticket) = ticket.filter(|t| !t.trim().is_empty()) {
                request = request.with_ticket(ticket);
            }
            if create_pr {
                request = request.with_pull_request(github_token);
            }
            cmd_run(&repo.repo, &request)
        }
        Command::Lint { paths, repo } => cmd_lint(&repo.repo, &paths),
        Command::Ask {
            prompt,
            repo,
            system,
        } => cmd_ask(&repo.repo, &prompt, system.as_deref()),
        Command::Init { repo, force } => cmd_init(&repo.repo, force),
    }
}

fn clean_links(links: Vec<String>) -> Vec<String> {
    links
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}

fn resolve_repo(path: &Path) -> Result<(PathBuf, MinionConfig)> {
    let root = find_repo_root(path).context("run from inside a git repository or pass --repo")?;
    let config = discover_config(&root)?;
    Ok((root, config))
}

fn cmd_run(repo: &Path, request: &RunRequest) -> Result<i32> {
    let (root, config) = resolve_repo(repo)?;
    eprintln!("minion: {}", request.task);
    eprintln!("repo:   {}", root.display());

    let model = FallbackClient::from_config(&config.llm);
    let orchestrator = Orchestrator::new(config, &root, model);
    let state = orchestrator.run(request, &ConsoleObserver)?;

    print_summary(&state);
    Ok(if state.done {
        exit_codes::OK
    } else {
        exit_codes::INCOMPLETE
    })
}

fn print_summary(state: &RunState) {
    println!("done:     {}", state.done);
    println!("turns:    {}", state.turns);
    println!("actions:  {}", state.actions.len());
    println!(
        "branch:   {}",
        state.branch_name.as_deref().unwrap_or("(none)")
    );
    println!("pr:       {}", state.pr_url.as_deref().unwrap_or("(none)"));
    if state.ci_round > 0 {
        println!("ci_round: {} (lint issues remained at push)", state.ci_round);
    }
}

fn cmd_lint(repo: &Path, paths: &[String]) -> Result<i32> {
    let (root, config) = resolve_repo(repo)?;
    let lint = Lint::new(Git::new(&root, &config.git), &config.lint);
    let paths = (!paths.is_empty()).then_some(paths);
    let result = lint.run_relevant_linters(paths);
    println!("{}", result.output);
    Ok(if result.ok {
        exit_codes::OK
    } else {
        exit_codes::ERROR
    })
}

fn cmd_ask(repo: &Path, prompt: &str, system: Option<&str>) -> Result<i32> {
    let config = match find_repo_root(repo) {
        Ok(root) => discover_config(&root)?,
        Err(_) => discover_config(repo)?,
    };
    let client = FallbackClient::from_config(&config.llm);
    let messages = [Message::user(prompt)];
    let mut request = CompletionRequest::new(&messages);
    request.max_tokens = config.agent.max_tokens;
    request.temperature = config.agent.temperature;
    if let Some(system) = system {
        request = request.with_system(system);
    }

    let mut stdout = std::io::stdout().lock();
    for chunk in client.stream(&request)? {
        stdout.write_all(chunk?.as_bytes()).context("write stdout")?;
        stdout.flush().context("flush stdout")?;
    }
    writeln!(stdout).context("write stdout")?;
    Ok(exit_codes::OK)
}

fn cmd_init(repo: &Path, force: bool) -> Result<i32> {
    let root = find_repo_root(repo).unwrap_or_else(|_| repo.to_path_buf());
    let path = root.join(REPO_CONFIG_PATH);
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(&path, &MinionConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

/// Prints progress to stderr as the run advances.
struct ConsoleObserver;

impl RunObserver for ConsoleObserver {
    fn on_phase(&self, phase: &str) {
        eprintln!("[{phase}]");
    }

    fn on_step(&self, description: &str) {
        eprintln!("  {description}");
    }

    fn on_action(&self, action: &Action) {
        let first_line = action.result.lines().next().unwrap_or_default();
        eprintln!("  -> {}: {}", action.tool, truncate_chars(first_line, 100));
    }
}
