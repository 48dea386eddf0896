//! HostKit - Entry Point
//!
//! Deploys, rolls back and throttles projects hosted on this machine.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context};
use colored::Colorize;
use serde::Serialize;
use tracing::error;

use hostkit::deploy::git::GitRef;
use hostkit::deploy::release::summarize;
use hostkit::deploy::{Collaborators, DeployOptions, DeployOrchestrator, GitSource, RollbackOptions};
use hostkit::errors::DeployError;
use hostkit::ledger::{NewProject, RuntimeKind, Store};
use hostkit::logs::{init_logging, LogOptions};
use hostkit::storage::layout::HostLayout;
use hostkit::storage::settings::Settings;
use hostkit::utils::version_info;
use hostkit_api::{DeployReport, RollbackReport, ValidationReport};

const USAGE: &str = "\
usage: hostkit <command> [--key=value ...]

commands:
  deploy      --project=<name> --source=<dir> [--build] [--no-install] [--no-restart]
              [--inject-secrets] [--override-ratelimit] [--actor=<who>]
  deploy-git  --project=<name> [--repo=<url>] [--branch=<b> | --tag=<t> | --commit=<sha>]
              (accepts the deploy flags too)
  rollback    --project=<name> [--release=<name>] [--no-restart]
  releases    --project=<name>
  history     --project=<name> [--limit=<n>]
  project     add --project=<name> --runtime=<node|python|static> --port=<n>
              [--database=<db>] [--repo=<url>] [--branch=<b>]
  ratelimit   show|set --project=<name> [--max=<n>] [--window=<min>]
              [--cooldown=<min>] [--failures=<n>]
  autopause   show|set|clear|evaluate --project=<name> [--enabled=<bool>]
              [--threshold=<n>] [--window=<min>]

global flags: --json --version";

struct Cli {
    positional: Vec<String>,
    args: HashMap<String, String>,
}

impl Cli {
    fn parse() -> Self {
        let mut positional = Vec::new();
        let mut args = HashMap::new();

        for arg in env::args().skip(1) {
            if let Some((key, value)) = arg.split_once('=') {
                // Handle --key=value format
                let clean_key = key.trim_start_matches('-');
                args.insert(clean_key.to_string(), value.to_string());
            } else if arg.starts_with("--") {
                // Handle standalone flags like --build
                let clean_key = arg.trim_start_matches('-');
                args.insert(clean_key.to_string(), "true".to_string());
            } else {
                positional.push(arg);
            }
        }

        Self { positional, args }
    }

    fn command(&self) -> Option<&str> {
        self.positional.first().map(String::as_str)
    }

    fn action(&self) -> Option<&str> {
        self.positional.get(1).map(String::as_str)
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some("true" | "1" | "yes"))
    }

    fn require(&self, key: &str) -> anyhow::Result<&str> {
        self.get(key).ok_or_else(|| anyhow!("missing --{key}=<value>"))
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|v| v.parse::<T>().map_err(|e| anyhow!("invalid --{key}={v}: {e}")))
            .transpose()
    }

    fn json(&self) -> bool {
        self.flag("json")
    }

    fn deploy_options(&self) -> DeployOptions {
        let defaults = DeployOptions::default();
        DeployOptions {
            actor: self.get("actor").map(str::to_string).unwrap_or(defaults.actor),
            build: self.flag("build"),
            install: !self.flag("no-install"),
            restart: !self.flag("no-restart"),
            inject_secrets: self.flag("inject-secrets"),
            override_ratelimit: self.flag("override-ratelimit"),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Print version and exit
    if cli.flag("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{version}"),
            Err(e) => eprintln!("{e}"),
        }
        return ExitCode::SUCCESS;
    }

    let Some(command) = cli.command() else {
        eprintln!("{USAGE}");
        return ExitCode::from(2);
    };

    match run(command, &cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{command} failed: {e:#}");
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}

async fn run(command: &str, cli: &Cli) -> anyhow::Result<ExitCode> {
    let layout = HostLayout::from_env();
    layout.setup().await.context("preparing the host layout")?;

    // Retrieve the settings file
    let settings = Settings::load(&layout.settings_file())
        .await
        .context("reading settings")?;

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        json_format: settings.log_json,
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let store = Store::open(layout.ledger_file().path())
        .await
        .context("opening the ledger")?;
    let collaborators = Collaborators::system(&store, &layout, &settings);
    let orchestrator = DeployOrchestrator::new(store.clone(), layout, settings, collaborators);

    match command {
        "deploy" => {
            let project = cli.require("project")?;
            let source = cli.require("source")?;
            let result = orchestrator
                .deploy(project, Path::new(source), &cli.deploy_options())
                .await;
            Ok(finish_deploy(cli, result))
        }
        "deploy-git" => {
            let project = cli.require("project")?;
            let git_ref = match (cli.get("branch"), cli.get("tag"), cli.get("commit")) {
                (Some(b), None, None) => Some(GitRef::Branch(b.to_string())),
                (None, Some(t), None) => Some(GitRef::Tag(t.to_string())),
                (None, None, Some(c)) => Some(GitRef::Commit(c.to_string())),
                (None, None, None) => None,
                _ => bail!("pass at most one of --branch, --tag and --commit"),
            };
            let source = GitSource {
                repo_url: cli.get("repo").map(str::to_string),
                git_ref,
            };
            let result = orchestrator
                .deploy_from_git(project, &source, &cli.deploy_options())
                .await;
            Ok(finish_deploy(cli, result))
        }
        "rollback" => {
            let project = cli.require("project")?;
            let opts = RollbackOptions {
                release: cli.get("release").map(str::to_string),
                restart: !cli.flag("no-restart"),
            };
            let result = orchestrator.rollback(project, &opts).await;
            Ok(finish_rollback(cli, result))
        }
        "releases" => {
            let project = cli.require("project")?;
            let releases = orchestrator.releases().list_releases(project).await?;
            let summaries: Vec<_> = releases.iter().map(summarize).collect();
            if cli.json() {
                print_json(&summaries)?;
            } else if summaries.is_empty() {
                println!("{project} has no releases");
            } else {
                for s in &summaries {
                    let marker = if s.is_current { "*".green().bold() } else { " ".normal() };
                    let commit = s.git_commit.as_deref().map(short_commit).unwrap_or("-");
                    println!(
                        "{marker} {}  {:<10}  {}  {:>6} files  {}  {}",
                        s.name.bold(),
                        s.state,
                        s.deployed_at.format("%Y-%m-%d %H:%M:%S"),
                        s.files_synced,
                        commit,
                        s.deployed_by
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        "history" => {
            let project = cli.require("project")?;
            let limit = cli.parsed::<u32>("limit")?.unwrap_or(20);
            let attempts = orchestrator.rate_limiter().history(project, limit).await?;
            if cli.json() {
                print_json(&attempts)?;
            } else {
                for a in &attempts {
                    let outcome = if a.success { "ok".green() } else { "failed".red() };
                    let via = if a.override_used { " (override)" } else { "" };
                    println!(
                        "{}  {:<6}  {:<5}  {:>6} ms  {}{via}  {}",
                        a.deployed_at.format("%Y-%m-%d %H:%M:%S"),
                        outcome,
                        a.source_type,
                        a.duration_ms,
                        a.deployed_by,
                        a.error_message.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        "project" => project_command(cli, &store).await,
        "ratelimit" => ratelimit_command(cli, &orchestrator).await,
        "autopause" => autopause_command(cli, &orchestrator).await,
        other => {
            eprintln!("unknown command: {other}\n\n{USAGE}");
            Ok(ExitCode::from(2))
        }
    }
}

async fn project_command(cli: &Cli, store: &Store) -> anyhow::Result<ExitCode> {
    match cli.action() {
        Some("add") => {
            let name = cli.require("project")?;
            let runtime: RuntimeKind = cli
                .require("runtime")?
                .parse()
                .map_err(|e| anyhow!("invalid --runtime: {e}"))?;
            let port = cli.parsed::<u16>("port")?.ok_or_else(|| anyhow!("missing --port=<n>"))?;

            let mut new = NewProject::new(name, runtime, port);
            new.database_name = cli.get("database").map(str::to_string);
            new.git_repo = cli.get("repo").map(str::to_string);
            new.git_branch = cli.get("branch").map(str::to_string);

            let project = store.insert_project(&new).await?;
            println!("{} {} ({}, port {})", "added".green(), project.name.bold(), project.runtime, project.port);
            Ok(ExitCode::SUCCESS)
        }
        Some("show") => {
            let name = cli.require("project")?;
            let project = store
                .get_project(name)
                .await?
                .ok_or_else(|| anyhow!("project {name} does not exist"))?;
            println!("{}", project.name.bold());
            println!("  runtime      {}", project.runtime);
            println!("  port         {}", project.port);
            println!("  database     {}", project.database_name.as_deref().unwrap_or("-"));
            println!("  git          {} {}", project.git_repo.as_deref().unwrap_or("-"), project.git_branch.as_deref().unwrap_or(""));
            println!("  entry point  {}", project.entry_point.as_deref().unwrap_or("(default)"));
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!("usage: hostkit project add|show --project=<name>"),
    }
}

async fn ratelimit_command(cli: &Cli, orchestrator: &DeployOrchestrator) -> anyhow::Result<ExitCode> {
    let project = cli.require("project")?;
    let limiter = orchestrator.rate_limiter();

    match cli.action() {
        Some("show") => {
            let config = limiter.get_config(project).await?;
            let status = limiter.status(project).await?;
            if cli.json() {
                print_json(&status)?;
                return Ok(ExitCode::SUCCESS);
            }
            println!("{}", project.bold());
            println!(
                "  deploys      {}/{} in {} min ({} remaining)",
                status.deploys_in_window, status.max_deploys, status.window_minutes, status.remaining
            );
            println!(
                "  failures     {} consecutive (limit {}, cooldown {} min)",
                status.consecutive_failures, config.consecutive_failure_limit, config.failure_cooldown_minutes
            );
            if let Some(until) = status.cooldown_until {
                println!("  {}     until {}", "cooldown".yellow(), until.to_rfc3339());
            }
            Ok(ExitCode::SUCCESS)
        }
        Some("set") => {
            let mut config = limiter.get_config(project).await?;
            if let Some(v) = cli.parsed("max")? {
                config.max_deploys = v;
            }
            if let Some(v) = cli.parsed("window")? {
                config.window_minutes = v;
            }
            if let Some(v) = cli.parsed("cooldown")? {
                config.failure_cooldown_minutes = v;
            }
            if let Some(v) = cli.parsed("failures")? {
                config.consecutive_failure_limit = v;
            }
            limiter.set_config(&config).await?;
            println!(
                "{} {}: {} deploys / {} min, cooldown {} min after {} failures",
                "updated".green(),
                project.bold(),
                config.max_deploys,
                config.window_minutes,
                config.failure_cooldown_minutes,
                config.consecutive_failure_limit
            );
            Ok(ExitCode::SUCCESS)
        }
        _ => bail!("usage: hostkit ratelimit show|set --project=<name>"),
    }
}

async fn autopause_command(cli: &Cli, orchestrator: &DeployOrchestrator) -> anyhow::Result<ExitCode> {
    let project = cli.require("project")?;
    let controller = orchestrator.auto_pause();

    match cli.action() {
        Some("show") => {
            let config = controller.get_config(project).await?;
            let state = if config.paused { "paused".red().bold() } else { "active".green() };
            println!("{}  {state}", project.bold());
            println!(
                "  enabled      {} (threshold {} failures in {} min)",
                config.enabled, config.failure_threshold, config.window_minutes
            );
            if let Some(reason) = &config.paused_reason {
                let at = config.paused_at.map(|t| t.to_rfc3339()).unwrap_or_default();
                println!("  reason       {reason} {at}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Some("set") => {
            let mut config = controller.get_config(project).await?;
            if let Some(v) = cli.parsed("enabled")? {
                config.enabled = v;
            }
            if let Some(v) = cli.parsed("threshold")? {
                config.failure_threshold = v;
            }
            if let Some(v) = cli.parsed("window")? {
                config.window_minutes = v;
            }
            controller.set_config(&config).await?;
            println!("{} auto-pause for {}", "updated".green(), project.bold());
            Ok(ExitCode::SUCCESS)
        }
        Some("clear") => {
            if controller.clear(project).await? {
                println!("{} deploys of {}", "resumed".green(), project.bold());
            } else {
                println!("{project} was not paused");
            }
            Ok(ExitCode::SUCCESS)
        }
        Some("evaluate") => {
            if controller.evaluate(project).await? {
                println!("{} is {}", project.bold(), "paused".red().bold());
                Ok(ExitCode::FAILURE)
            } else {
                println!("{} is {}", project.bold(), "active".green());
                Ok(ExitCode::SUCCESS)
            }
        }
        _ => bail!("usage: hostkit autopause show|set|clear|evaluate --project=<name>"),
    }
}

fn finish_deploy(cli: &Cli, result: Result<DeployReport, DeployError>) -> ExitCode {
    match result {
        Ok(report) => {
            let passed = report.validation_passed();
            if cli.json() {
                if let Err(e) = print_json(&report) {
                    eprintln!("{e}");
                }
            } else {
                print_deploy(&report);
            }
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => fail(cli, &e),
    }
}

fn finish_rollback(cli: &Cli, result: Result<RollbackReport, DeployError>) -> ExitCode {
    match result {
        Ok(report) => {
            let passed = report.validation.as_ref().map(|v| v.passed).unwrap_or(true);
            if cli.json() {
                if let Err(e) = print_json(&report) {
                    eprintln!("{e}");
                }
            } else {
                println!(
                    "{} {} to {} (was {})",
                    "rolled back".green().bold(),
                    report.project.bold(),
                    report.release,
                    report.previous_release.as_deref().unwrap_or("-")
                );
                if let Some(checkpoint) = &report.checkpoint_id {
                    println!("  database checkpoint {checkpoint} is available to restore");
                }
                if report.env_snapshot.is_some() {
                    println!("  an env snapshot was stored with this release");
                }
                if let Some(validation) = &report.validation {
                    print_validation(validation);
                }
            }
            if passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => fail(cli, &e),
    }
}

fn print_deploy(report: &DeployReport) {
    println!(
        "{} {} → {} ({} files, {} build, {} ms)",
        "deployed".green().bold(),
        report.project.bold(),
        report.release,
        report.files_synced,
        report.build_type,
        report.duration_ms
    );
    if let Some(git) = &report.git {
        let commit = git.commit.as_deref().map(short_commit).unwrap_or("?");
        let reference = git.tag.as_deref().or(git.branch.as_deref()).unwrap_or("detached");
        println!("  git          {} @ {reference} ({commit})", git.repo);
    }
    for step in &report.build_steps {
        println!("  build        {step}");
    }
    if let Some(checkpoint) = &report.checkpoint_id {
        println!("  checkpoint   {checkpoint}");
    }
    if report.dependencies_installed {
        println!("  dependencies installed");
    }
    if report.secrets_injected > 0 {
        println!("  secrets      {} injected", report.secrets_injected);
    }
    if report.releases_pruned > 0 {
        println!("  pruned       {} old releases", report.releases_pruned);
    }
    if report.override_used {
        println!("  {}", "rate limit overridden".yellow());
    }
    for warning in &report.warnings {
        println!("  {} {warning}", "warning:".yellow());
    }
    if let Some(validation) = &report.validation {
        print_validation(validation);
    }
}

fn print_validation(validation: &ValidationReport) {
    if validation.passed {
        println!("  service      {} ({} ms)", validation.status.green(), validation.elapsed_ms);
        if let Some(warning) = &validation.warning {
            println!("  {} {warning}", "warning:".yellow());
        }
    } else {
        println!("  service      {}", validation.status.red().bold());
        if let Some(message) = &validation.message {
            println!("  {message}");
        }
        if let Some(hint) = &validation.hint {
            println!("  {} {hint}", "hint:".cyan());
        }
    }
}

fn fail(cli: &Cli, err: &DeployError) -> ExitCode {
    if cli.json() {
        if let Err(e) = print_json(&err.to_report()) {
            eprintln!("{e}");
        }
    } else {
        eprintln!("{} {}", format!("{}:", err.code()).red().bold(), err.message);
        if let Some(suggestion) = &err.suggestion {
            eprintln!("  {} {suggestion}", "suggestion:".cyan());
        }
    }
    ExitCode::FAILURE
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn short_commit(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}
