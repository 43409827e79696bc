//! Agenda sync CLI
//!
//! Command-line interface for spreadsheet sync of a clinic agenda.

use std::sync::Arc;

use chrono::Datelike;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use agenda_sync::backend::{BackendConfig, HttpBackend, SyncBackend};
use agenda_sync::error::Result;
use agenda_sync::sync::{ActionPreview, AnalyzeOutcome, Decisions, SyncOrchestrator, SyncSession};
use agenda_sync::types::*;

#[derive(Parser)]
#[command(name = "agenda-sync")]
#[command(about = "Spreadsheet sync for clinic agendas")]
#[command(version)]
struct Cli {
    /// Agenda API base URL
    #[arg(long, env = "AGENDA_API_URL", default_value = "http://localhost:8001/api")]
    api_url: String,

    /// Bearer token
    #[arg(long, env = "AGENDA_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "AGENDA_API_TIMEOUT_SECS", default_value = "120")]
    timeout_secs: u64,

    /// Clinic identifier (e.g. pta_centro, villa_ginestre)
    #[arg(short, long, env = "AGENDA_AMBULATORIO")]
    ambulatorio: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the conflicts the backend finds in the spreadsheet
    Analyze {
        /// Year to import (defaults to the current one)
        #[arg(short, long)]
        year: Option<i32>,
    },
    /// Resolve conflicts and import the spreadsheet
    Sync {
        #[arg(short, long)]
        year: Option<i32>,
        /// JSON file with toggles and overrides to apply on top of the defaults
        #[arg(short, long)]
        decisions: Option<String>,
        /// Print the payload instead of submitting it
        #[arg(long)]
        dry_run: bool,
    },
    /// Show the snapshot taken before the last sync
    Backup,
    /// Undo the last sync
    Rollback,
    /// Manage decisions remembered from earlier syncs
    Choices {
        #[command(subcommand)]
        command: ChoicesCommand,
    },
}

#[derive(Subcommand)]
enum ChoicesCommand {
    /// List remembered decisions
    List,
    /// Forget one decision so the name is asked again
    Restore { id: String },
    /// Forget every decision
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout carries command output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let config = BackendConfig {
        base_url: cli.api_url,
        token: cli.token,
        timeout_secs: cli.timeout_secs,
    };
    let backend = Arc::new(HttpBackend::new(config)?);
    let current_year = chrono::Local::now().year();

    match cli.command {
        Commands::Analyze { year } => {
            let year = year.unwrap_or(current_year);
            let response = backend.analyze(&cli.ambulatorio, year).await?;
            if !response.has_conflicts || response.conflicts.is_empty() {
                println!("No conflicts for {} {}", cli.ambulatorio, year);
                return Ok(());
            }
            let mut session = SyncSession::new();
            let ticket = session.begin_analyze()?;
            session.apply_analysis(ticket, response)?;
            print_conflicts(&session);
        }

        Commands::Sync {
            year,
            decisions,
            dry_run,
        } => {
            let year = year.unwrap_or(current_year);
            let decisions = match decisions {
                Some(path) => load_decisions(&path)?,
                None => Decisions::default(),
            };

            if dry_run {
                let response = backend.analyze(&cli.ambulatorio, year).await?;
                let mut session = SyncSession::new();
                let ticket = session.begin_analyze()?;
                session.apply_analysis(ticket, response)?;
                if !session.conflicts().is_empty() {
                    decisions.apply(&mut session)?;
                    print_conflicts(&session);
                }
                if !decisions.create.is_empty() {
                    eprintln!(
                        "Skipping {} patient creation(s) in dry run",
                        decisions.create.len()
                    );
                }
                let resolution = session.resolve();
                for warning in &resolution.warnings {
                    eprintln!("warning: {:?}", warning);
                }
                let request = SyncRequest {
                    ambulatorio: cli.ambulatorio.clone(),
                    year,
                    conflict_actions: resolution.actions,
                };
                println!("{}", serde_json::to_string_pretty(&request)?);
                return Ok(());
            }

            let orchestrator = SyncOrchestrator::new(backend, cli.ambulatorio.clone(), year);
            let outcome = match orchestrator.analyze().await? {
                AnalyzeOutcome::Synced(outcome) => outcome,
                AnalyzeOutcome::Conflicts(count) => {
                    println!("{} conflict(s) found", count);
                    orchestrator.update(|session| decisions.apply(session))?;
                    for create in &decisions.create {
                        let patient = orchestrator
                            .create_patient_and_attach(&create.conflict, &create.name, &create.draft)
                            .await?;
                        println!("Created patient #{} {}", patient.id, patient.display_name());
                    }
                    orchestrator.with_session(print_conflicts);
                    orchestrator.confirm().await?
                }
            };
            println!(
                "Sync completed: {} new patient(s), {} new appointment(s)",
                outcome.created_patients, outcome.created_appointments
            );
        }

        Commands::Backup => {
            let info = backend.backup_info(&cli.ambulatorio).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::Rollback => {
            let orchestrator = SyncOrchestrator::new(backend, cli.ambulatorio.clone(), current_year);
            let result = orchestrator.rollback().await?;
            println!(
                "Restored {} patient(s) and {} appointment(s)",
                result.restored_patients, result.restored_appointments
            );
        }

        Commands::Choices { command } => match command {
            ChoicesCommand::List => {
                let choices = backend.list_choices(&cli.ambulatorio).await?;
                for choice in choices {
                    println!(
                        "{} {} [{}]{}",
                        choice.id,
                        choice.name,
                        choice.action.as_deref().unwrap_or("-"),
                        choice
                            .replace_with
                            .map(|r| format!(" -> {}", r))
                            .unwrap_or_default()
                    );
                    let by = choice
                        .created_by
                        .map(|who| format!(" by {}", who))
                        .unwrap_or_default();
                    if let Some(at) = choice.created_at {
                        println!("    saved {}{}", at, by);
                    }
                    if !choice.dates.is_empty() {
                        println!("    dates: {}", choice.dates.join(", "));
                    }
                }
            }
            ChoicesCommand::Restore { id } => {
                backend.delete_choice(&id).await?;
                println!("Choice {} removed", id);
            }
            ChoicesCommand::Clear => {
                let result = backend.clear_choices(&cli.ambulatorio).await?;
                println!("Deleted {} choice(s)", result.deleted_choices);
            }
        },
    }

    Ok(())
}

fn load_decisions(path: &str) -> Result<Decisions> {
    let path = shellexpand::tilde(path).to_string();
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn print_conflicts(session: &SyncSession) {
    for (idx, conflict) in session.conflicts().iter().enumerate() {
        println!("Conflict #{} [{}]: {}", idx + 1, conflict.id, conflict.reason);
        for option in &conflict.options {
            let flag = if session.choices().is_selected(&conflict.id, &option.name) {
                "[x]"
            } else {
                "[ ]"
            };
            let status = match session.preview(&conflict.id, &option.name) {
                Some(ActionPreview::ReplaceWith(target)) => format!(" -> {}", target),
                Some(ActionPreview::AutoAssociate(target)) => format!(" -> {} (auto)", target),
                Some(ActionPreview::CreateNew) => " (create new)".to_string(),
                Some(ActionPreview::Ignored) => " (ignored)".to_string(),
                Some(ActionPreview::None) | None => String::new(),
            };
            let existing = if option.exists_in_db { " *" } else { "" };
            println!(
                "  {} {}{} ({:.0}%, {} appt){}",
                flag, option.name, existing, option.similarity, option.occurrences, status
            );
        }
    }
}
