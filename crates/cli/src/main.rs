//! Lingosync command-line management tool.
//!
//! Provides subcommands for running a synchronization cycle, inspecting
//! sync status, reviewing conflicts, queueing translator edits, viewing the
//! audit log, and generating / validating configuration files.

mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use dialoguer::{Input, Select};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lingosync_core::config::{AppConfig, RepositoryConfig};
use lingosync_core::credentials::ConfigCredentials;
use lingosync_core::db::Database;
use lingosync_core::models::{
    ConflictRecord, ConflictStatus, PendingEdit, ResolutionChoice, UnitState,
};
use lingosync_core::stats::TranslationStats;
use lingosync_core::{FormatRegistry, MergeCoordinator, SyncOutcome, SyncTrigger};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Lingosync command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "lingosync",
    version,
    about = "Manage and inspect Lingosync translation synchronization"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/lingosync/config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one synchronization cycle now.
    Sync {
        /// Repository id.
        repository: String,

        /// Name recorded as the actor of the cycle.
        #[arg(long, default_value = "cli")]
        actor: String,
    },

    /// Show sync points, pending work and statistics per repository.
    Status {
        /// Restrict to one repository.
        #[arg(short, long)]
        repository: Option<String>,
    },

    /// Review units that need a human decision.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Queue or inspect translator edits.
    Edits {
        #[command(subcommand)]
        action: EditsAction,
    },

    /// Generate a default configuration file.
    Init {
        /// Output path for the generated config file.
        #[arg(short, long, default_value = "./lingosync.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file.
    Validate,

    /// Show recent audit log entries.
    Audit {
        /// Maximum number of entries to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// List conflicts.
    List {
        /// Restrict to one repository.
        #[arg(short, long)]
        repository: Option<String>,

        /// Filter by status: open, resolved.
        #[arg(short, long, default_value = "open")]
        status: String,
    },
    /// Show details of a specific conflict.
    Show {
        /// Conflict ID.
        id: String,
    },
    /// Resolve a conflict. Prompts for a choice when none is given.
    Resolve {
        /// Conflict ID.
        id: String,

        #[command(flatten)]
        choice: ChoiceArgs,

        /// Reviewer recorded on the resolution.
        #[arg(long, default_value = "cli")]
        by: String,
    },
}

#[derive(Args, Debug)]
#[group(multiple = false)]
struct ChoiceArgs {
    /// Keep the translator's edit.
    #[arg(long)]
    keep_local: bool,

    /// Keep the upstream translation.
    #[arg(long)]
    keep_remote: bool,

    /// Replace both with this text.
    #[arg(long, value_name = "TEXT")]
    custom: Option<String>,
}

#[derive(Subcommand, Debug)]
enum EditsAction {
    /// Queue a translator edit for the next cycle.
    Add {
        repository: String,
        /// Tracked file path inside the repository.
        file: String,
        /// Unit key.
        key: String,
        /// New translation.
        target: String,

        /// empty, fuzzy, translated, approved or read_only.
        #[arg(long, default_value = "translated")]
        state: String,

        #[arg(long, default_value = "cli")]
        author: String,
    },
    /// List pending edits of a repository.
    List { repository: String },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Init { output } => cmd_init(&output),
        Commands::Validate => cmd_validate(&cli.config),
        command => {
            // Everything else needs a valid config and the database
            let config = load_config(&cli.config)?;
            let coordinator = open_coordinator(config)?;

            match command {
                Commands::Sync { repository, actor } => {
                    cmd_sync(&coordinator, &repository, actor).await
                }
                Commands::Status { repository } => cmd_status(&coordinator, repository.as_deref()),
                Commands::Conflicts { action } => cmd_conflicts(&coordinator, action),
                Commands::Edits { action } => cmd_edits(&coordinator, action),
                Commands::Audit { limit } => cmd_audit(coordinator.db(), limit),
                Commands::Init { .. } | Commands::Validate => Ok(()),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load_and_resolve(path, &FormatRegistry::default())
        .context("failed to load configuration file")
}

fn open_coordinator(config: AppConfig) -> Result<MergeCoordinator> {
    std::fs::create_dir_all(&config.daemon.data_dir)
        .context("failed to create data directory")?;
    let db = Database::new(config.daemon.database_path()).context("failed to open database")?;
    db.initialize().context("failed to initialize database")?;
    let credentials = Arc::new(ConfigCredentials::from_config(&config));
    Ok(MergeCoordinator::new(
        config,
        Arc::new(db),
        FormatRegistry::default(),
        credentials,
    ))
}

/// Repositories selected by an optional `--repository` filter.
fn selected<'a>(config: &'a AppConfig, filter: Option<&str>) -> Result<Vec<&'a RepositoryConfig>> {
    match filter {
        Some(id) => {
            let repo = config
                .repository(id)
                .ok_or_else(|| anyhow::anyhow!("unknown repository '{}'", id))?;
            Ok(vec![repo])
        }
        None => Ok(config.repositories.iter().collect()),
    }
}

fn parse_state(value: &str) -> Result<UnitState> {
    match value {
        "empty" | "fuzzy" | "translated" | "approved" | "read_only" => {
            Ok(UnitState::from_str_val(value))
        }
        other => anyhow::bail!(
            "invalid state '{}': use empty, fuzzy, translated, approved or read_only",
            other
        ),
    }
}

fn short_id(id: &str) -> &str {
    &id[..8.min(id.len())]
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path) -> Result<()> {
    let default_config = r#"# Lingosync Configuration

[daemon]
poll_interval_secs = 300
log_level = "info"
data_dir = "/var/lib/lingosync"
# log_file = "/var/log/lingosync/daemon.log"

[sync]
max_fetch_attempts = 3
backoff_base_ms = 500
max_push_retries = 1
lock_max_hold_secs = 900
network_timeout_secs = 120
commit_policy = "partial"

[commit]
author_name = "Lingosync"
author_email = "noreply@lingosync.local"

[[repositories]]
id = "website"
vcs = "git"
url = "https://git.example.com/website.git"
branch = "main"
username = "lingosync-bot"
password_env = "WEBSITE_TOKEN"

[[repositories.files]]
path = "locale/es.json"
format = "json"
"#;

    if output.exists() {
        anyhow::bail!(
            "file already exists: {}. Use a different path or remove the existing file.",
            output.display()
        );
    }

    std::fs::write(output, default_config).context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit the repositories and tracked files");
    println!("  2. Set the referenced environment variables (WEBSITE_TOKEN, ...)");
    println!(
        "  3. Validate with: lingosync validate --config {}",
        output.display()
    );
    println!(
        "  4. Start the daemon: lingosync-daemon --config {}",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  {}", style::success("TOML structure is valid"));

    // Missing variables only warn
    if let Err(e) = config.resolve_env_vars() {
        println!("  {}", style::warn(&e.to_string()));
    }
    println!("  {}", style::success("Environment variable references processed"));

    if let Err(e) = config.validate(&FormatRegistry::default()) {
        println!("  {}", style::error(&format!("Validation error: {}", e)));
        anyhow::bail!("configuration validation failed");
    }
    println!("  {}", style::success("All required fields are valid"));

    println!();
    println!("{}", style::header("Configuration summary:"));
    println!("  Poll interval : {}s", config.daemon.poll_interval_secs);
    println!("  Data directory: {}", config.daemon.data_dir.display());
    println!("  Commit policy : {:?}", config.sync.commit_policy);
    for repo in &config.repositories {
        let secret = match (&repo.password_env, &repo.password) {
            (None, _) => "none",
            (Some(_), Some(_)) => "set",
            (Some(_), None) => "NOT SET",
        };
        println!();
        println!("  Repository    : {} ({})", repo.id, repo.vcs);
        println!("    URL         : {}", repo.url);
        println!("    Branch      : {}", repo.branch);
        println!("    Password    : {}", secret);
        for file in &repo.files {
            println!("    File        : {} [{}]", file.path, file.format);
        }
    }
    println!();
    println!("{}", style::success("Configuration is valid."));

    Ok(())
}

async fn cmd_sync(coordinator: &MergeCoordinator, repository: &str, actor: String) -> Result<()> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(format!("Synchronizing {}...", repository));
    spinner.enable_steady_tick(Duration::from_millis(100));

    let outcome = coordinator
        .synchronize(repository, SyncTrigger::Manual { actor }, cancel)
        .await;
    spinner.finish_and_clear();

    match outcome {
        SyncOutcome::Done(report) => {
            let summary = if report.committed {
                format!("Pushed {} ({} unit(s) applied)", report.revision.short(), report.local_applied())
            } else {
                format!("Up to date at {}", report.revision.short())
            };
            println!("{}", style::success(&summary));
            println!("  Upstream commits : {}", report.upstream_commits);
            println!("  Upstream changes : {}", report.upstream_changes());
            println!("  Push attempts    : {}", report.push_attempts);
            if report.conflicts() > 0 {
                println!(
                    "  {}",
                    style::warn(&format!(
                        "{} unit(s) need review: lingosync conflicts list -r {}",
                        report.conflicts(),
                        repository
                    ))
                );
            }
            Ok(())
        }
        SyncOutcome::Busy => {
            println!(
                "{}",
                style::warn(&format!("{} is busy, try again later", repository))
            );
            Ok(())
        }
        SyncOutcome::Failed(e) => {
            anyhow::bail!("sync failed ({}): {}", e.kind(), e)
        }
    }
}

fn cmd_status(coordinator: &MergeCoordinator, filter: Option<&str>) -> Result<()> {
    let db = coordinator.db();
    for repo in selected(coordinator.config(), filter)? {
        println!("{}", style::header(&format!("{} ({})", repo.id, repo.url)));

        let points = db
            .list_sync_points(&repo.id)
            .context("failed to read sync points")?;
        let pending = db
            .count_pending_edits(&repo.id)
            .context("failed to count pending edits")?;
        let conflicts = db
            .count_open_conflicts(&repo.id)
            .context("failed to count conflicts")?;
        let last = db
            .last_sync_cycle(&repo.id)
            .context("failed to read cycle history")?;

        println!("  Pending edits  : {}", pending);
        println!("  Open conflicts : {}", conflicts);
        match last {
            Some(cycle) => println!(
                "  Last cycle     : {} at {} ({}){}",
                style::outcome(&cycle.outcome),
                cycle.completed_at,
                cycle.trigger,
                cycle
                    .details
                    .map(|d| format!(" {}", style::dim(&d)))
                    .unwrap_or_default()
            ),
            None => println!("  Last cycle     : {}", style::dim("never")),
        }

        let stats = db
            .list_file_stats(&repo.id)
            .context("failed to read file statistics")?;

        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec![
            "File",
            "Sync point",
            "Units",
            "Translated",
            "Words",
            "Approved",
            "Fuzzy",
        ]);
        for file in &repo.files {
            let point = points
                .iter()
                .find(|(path, _)| *path == file.path)
                .map(|(_, rev)| rev.short().to_string())
                .unwrap_or_else(|| "-".into());
            match stats.iter().find(|(path, _)| *path == file.path) {
                Some((_, s)) => table.add_row(vec![
                    Cell::new(&file.path),
                    Cell::new(point),
                    Cell::new(s.all.units),
                    Cell::new(style::percent(s.translated_percent())),
                    Cell::new(style::percent(s.translated_words_percent())),
                    Cell::new(style::percent(s.approved_percent())),
                    Cell::new(style::percent(s.fuzzy_percent())),
                ]),
                None => table.add_row(vec![
                    Cell::new(&file.path),
                    Cell::new(point),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                    Cell::new("-"),
                ]),
            };
        }
        let tracked: Vec<&TranslationStats> = stats
            .iter()
            .filter(|(path, _)| repo.files.iter().any(|f| f.path == *path))
            .map(|(_, s)| s)
            .collect();
        if repo.files.len() > 1 && !tracked.is_empty() {
            let total = TranslationStats::aggregate(tracked);
            table.add_row(vec![
                Cell::new(style::header("Total")),
                Cell::new(""),
                Cell::new(total.all.units),
                Cell::new(style::percent(total.translated_percent())),
                Cell::new(style::percent(total.translated_words_percent())),
                Cell::new(style::percent(total.approved_percent())),
                Cell::new(style::percent(total.fuzzy_percent())),
            ]);
        }
        println!("{table}");
        println!();
    }
    Ok(())
}

fn cmd_conflicts(coordinator: &MergeCoordinator, action: ConflictsAction) -> Result<()> {
    let db = coordinator.db();
    match action {
        ConflictsAction::List { repository, status } => {
            let status = match status.as_str() {
                "open" => Some(ConflictStatus::Open),
                "resolved" => Some(ConflictStatus::Resolved),
                "all" => None,
                other => anyhow::bail!("invalid status '{}': use open, resolved or all", other),
            };

            let mut conflicts: Vec<ConflictRecord> = Vec::new();
            for repo in selected(coordinator.config(), repository.as_deref())? {
                conflicts.extend(
                    db.list_conflicts(&repo.id, status)
                        .context("failed to list conflicts")?,
                );
            }

            if conflicts.is_empty() {
                println!("{}", style::success("No conflicts found."));
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["ID", "Repository", "File", "Key", "Kind", "Status", "Created"]);
            for c in &conflicts {
                let status_cell = match c.status {
                    ConflictStatus::Open => Cell::new("open").fg(Color::Yellow),
                    ConflictStatus::Resolved => Cell::new("resolved").fg(Color::Green),
                };
                table.add_row(vec![
                    Cell::new(short_id(&c.id)),
                    Cell::new(&c.repository_id),
                    Cell::new(&c.file_path),
                    Cell::new(&c.unit_key),
                    Cell::new(c.resolution.as_str()),
                    status_cell,
                    Cell::new(c.created_at.format("%Y-%m-%d %H:%M")),
                ]);
            }
            println!("{table}");
            println!("{}", style::dim(&format!("{} conflict(s) shown", conflicts.len())));
            Ok(())
        }

        ConflictsAction::Show { id } => {
            let conflict = find_conflict(db, &id)?;
            print_conflict(&conflict);
            Ok(())
        }

        ConflictsAction::Resolve { id, choice, by } => {
            let conflict = find_conflict(db, &id)?;
            let choice = match choice {
                ChoiceArgs { keep_local: true, .. } => ResolutionChoice::KeepLocal,
                ChoiceArgs { keep_remote: true, .. } => ResolutionChoice::KeepRemote,
                ChoiceArgs { custom: Some(text), .. } => ResolutionChoice::Custom(text),
                _ => {
                    print_conflict(&conflict);
                    prompt_choice(&conflict)?
                }
            };

            let resolved = coordinator
                .resolve_conflict(&conflict.id, choice, &by)
                .context("failed to resolve conflict")?;
            println!(
                "{}",
                style::success(&format!(
                    "Conflict {} resolved ({})",
                    short_id(&resolved.id),
                    resolved.choice.as_deref().unwrap_or("-")
                ))
            );
            Ok(())
        }
    }
}

/// Look a conflict up by full id or unique prefix.
fn find_conflict(db: &Database, id: &str) -> Result<ConflictRecord> {
    if let Some(record) = db.get_conflict(id).context("database error")? {
        return Ok(record);
    }
    let mut matches = db
        .find_conflicts_by_prefix(id)
        .context("database error")?;
    match matches.len() {
        0 => anyhow::bail!("conflict '{}' not found", id),
        1 => Ok(matches.remove(0)),
        n => anyhow::bail!("conflict id '{}' is ambiguous ({} matches)", id, n),
    }
}

fn print_conflict(conflict: &ConflictRecord) {
    println!("{}", style::header(&format!("Conflict {}", conflict.id)));
    println!("  Repository : {}", conflict.repository_id);
    println!("  File       : {}", conflict.file_path);
    println!("  Key        : {}", conflict.unit_key);
    println!("  Kind       : {}", conflict.resolution.as_str());
    println!("  Status     : {}", conflict.status.as_str());
    println!("  Created at : {}", conflict.created_at.to_rfc3339());
    if let Some(ref resolved_at) = conflict.resolved_at {
        println!("  Resolved at: {}", resolved_at.to_rfc3339());
        println!(
            "  Resolved by: {} ({})",
            conflict.resolved_by.as_deref().unwrap_or("-"),
            conflict.choice.as_deref().unwrap_or("-")
        );
    }
    println!();
    println!(
        "  Base     : {}",
        conflict.base_target.as_deref().unwrap_or("(new unit)")
    );
    println!("  Local    : {} [{}]", conflict.local_target, conflict.local_state);
    match &conflict.remote {
        Some(remote) => {
            println!("  Upstream : {} [{}]", remote.target, remote.state);
            println!("  Source   : {}", remote.source);
        }
        None => println!("  Upstream : {}", style::dim("(unit removed)")),
    }
    println!();
    println!("{}", conflict.render_diff());
}

fn prompt_choice(conflict: &ConflictRecord) -> Result<ResolutionChoice> {
    // A removed unit can only be dropped.
    if conflict.remote.is_none() {
        let items = ["Drop the translator edit"];
        Select::new()
            .with_prompt("Upstream removed this unit")
            .items(&items)
            .default(0)
            .interact()?;
        return Ok(ResolutionChoice::KeepRemote);
    }

    let items = [
        "Keep the translator edit",
        "Keep the upstream translation",
        "Enter new text",
    ];
    let selection = Select::new()
        .with_prompt("Resolution")
        .items(&items)
        .default(0)
        .interact()?;
    let choice = match selection {
        0 => ResolutionChoice::KeepLocal,
        1 => ResolutionChoice::KeepRemote,
        _ => {
            let text: String = Input::new()
                .with_prompt("Translation")
                .with_initial_text(conflict.local_target.clone())
                .interact_text()?;
            ResolutionChoice::Custom(text)
        }
    };
    Ok(choice)
}

fn cmd_edits(coordinator: &MergeCoordinator, action: EditsAction) -> Result<()> {
    match action {
        EditsAction::Add {
            repository,
            file,
            key,
            target,
            state,
            author,
        } => {
            let edit = PendingEdit::new(repository, file, key, target, parse_state(&state)?, author);
            coordinator
                .submit_edit(&edit)
                .context("failed to queue edit")?;
            println!(
                "{}",
                style::success(&format!(
                    "Queued edit of '{}' in {} for the next cycle",
                    edit.unit_key, edit.file_path
                ))
            );
            Ok(())
        }
        EditsAction::List { repository } => {
            if coordinator.config().repository(&repository).is_none() {
                anyhow::bail!("unknown repository '{}'", repository);
            }
            let edits = coordinator
                .db()
                .list_pending_edits(&repository)
                .context("failed to list pending edits")?;
            if edits.is_empty() {
                println!("{}", style::dim("No pending edits."));
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["File", "Key", "Translation", "State", "Author", "Queued"]);
            for edit in &edits {
                table.add_row(vec![
                    Cell::new(&edit.file_path),
                    Cell::new(&edit.unit_key),
                    Cell::new(&edit.target),
                    Cell::new(edit.state),
                    Cell::new(&edit.author),
                    Cell::new(edit.created_at.format("%Y-%m-%d %H:%M")),
                ]);
            }
            println!("{table}");
            Ok(())
        }
    }
}

fn cmd_audit(db: &Database, limit: u32) -> Result<()> {
    let entries = db.list_audit_log(limit).context("failed to read audit log")?;

    if entries.is_empty() {
        println!("{}", style::dim("No audit log entries."));
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Action", "Repository", "Result", "Details"]);
    for entry in &entries {
        let result = if entry.success {
            Cell::new("ok").fg(Color::Green)
        } else {
            Cell::new("FAIL").fg(Color::Red)
        };
        table.add_row(vec![
            Cell::new(&entry.created_at),
            Cell::new(&entry.action),
            Cell::new(entry.repository_id.as_deref().unwrap_or("-")),
            result,
            Cell::new(entry.details.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
    println!("{}", style::dim(&format!("{} entries shown", entries.len())));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_state() {
        assert_eq!(parse_state("fuzzy").unwrap(), UnitState::Fuzzy);
        assert_eq!(parse_state("read_only").unwrap(), UnitState::ReadOnly);
        assert!(parse_state("done").is_err());
    }

    #[test]
    fn test_choice_flags_are_exclusive() {
        let parsed = Cli::try_parse_from([
            "lingosync",
            "conflicts",
            "resolve",
            "abc",
            "--keep-local",
            "--keep-remote",
        ]);
        assert!(parsed.is_err());

        let parsed = Cli::try_parse_from([
            "lingosync",
            "conflicts",
            "resolve",
            "abc",
            "--custom",
            "Hola",
        ])
        .unwrap();
        match parsed.command {
            Commands::Conflicts {
                action: ConflictsAction::Resolve { choice, by, .. },
            } => {
                assert_eq!(choice.custom.as_deref(), Some("Hola"));
                assert_eq!(by, "cli");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_init_then_validate() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lingosync.toml");
        cmd_init(&path).unwrap();
        assert!(cmd_init(&path).is_err(), "init must not overwrite");
        cmd_validate(&path).unwrap();
    }

    #[test]
    fn test_selected_rejects_unknown_repository() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lingosync.toml");
        cmd_init(&path).unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(selected(&config, None).unwrap().len(), 1);
        assert!(selected(&config, Some("website")).is_ok());
        assert!(selected(&config, Some("mobile")).is_err());
    }
}
