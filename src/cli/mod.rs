//! Command-line interface

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;

use crate::client::Parley;
use crate::error::Result;
use crate::search::SearchFilters;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Conversation intelligence pipeline for call and meeting recordings")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the scheduler until interrupted
    Start,

    /// Run one daily processing pass and exit
    RunOnce,

    /// Process an explicit date range
    Backfill {
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: NaiveDate,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: NaiveDate,
        /// Resume an existing batch by id
        #[arg(long)]
        resume: Option<String>,
    },

    /// Reset and reprocess failed recordings
    RetryFailed,

    /// Show processing state and queue depths
    Status,

    /// Run the analytical cascade over pending meetings
    Analyze {
        /// Maximum meetings per layer
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },

    /// Generate embeddings for transcripts missing them
    Embed {
        /// Maximum transcripts to embed
        #[arg(long, default_value_t = 100)]
        limit: i64,
    },

    /// Semantic search over indexed transcripts
    Search {
        /// Query text
        query: String,
        #[arg(long)]
        employee: Option<String>,
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        sentiment: Option<String>,
        #[arg(long)]
        date_from: Option<NaiveDate>,
        #[arg(long)]
        date_to: Option<NaiveDate>,
        #[arg(long)]
        min_quality: Option<f64>,
        #[arg(long, default_value_t = 10)]
        limit: i64,
    },

    /// Manage notetaker employee API keys
    #[command(subcommand)]
    Employee(EmployeeCommands),

    /// Inspect or reset terminally failed recordings
    #[command(subcommand)]
    Failed(FailedCommands),

    /// Show the processing history for one recording
    History {
        recording_id: String,
    },

    /// Verify the secure-deletion audit log's hash chain
    VerifyAudit,

    /// Delete inactive processing states older than N days
    CleanupStates {
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
}

#[derive(Subcommand)]
pub enum FailedCommands {
    /// List recordings past their retry budget
    List {
        #[arg(long, default_value_t = 50)]
        limit: i64,
    },
    /// Clear a failed item so the recording becomes eligible again
    Reset {
        recording_id: String,
    },
}

#[derive(Subcommand)]
pub enum EmployeeCommands {
    /// Add an employee or rotate their key
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        team: Option<String>,
        #[arg(long, default_value_t = false)]
        admin: bool,
    },
    /// List active employees
    List,
    /// Deactivate an employee's key
    Deactivate {
        #[arg(long)]
        email: String,
    },
}

pub async fn run(cli: Cli, parley: Parley) -> Result<()> {
    match cli.command {
        Commands::Start => {
            parley.scheduler().start().await?;
            println!("{} scheduler running, press Ctrl-C to stop", style("✓").green());

            tokio::signal::ctrl_c()
                .await
                .map_err(|e| crate::error::Error::Other(format!("Signal handler failed: {e}")))?;

            println!("Stopping...");
            parley.scheduler().stop().await?;
        }

        Commands::RunOnce => {
            let stats = parley.scheduler().run_daily_processing().await?;
            println!(
                "Processed {} recordings ({} succeeded, {} failed)",
                stats.total_recordings, stats.succeeded, stats.failed
            );
            for error in &stats.errors {
                println!("  {} {}", style("error:").red(), error);
            }
        }

        Commands::Backfill { start, end, resume } => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(
                ProgressStyle::with_template("{spinner} {msg}")
                    .expect("valid progress template"),
            );
            bar.set_message("starting batch...");

            let bar_for_progress = bar.clone();
            let progress: crate::scheduler::batch::ProgressCallback =
                Arc::new(move |p: crate::scheduler::batch::BatchProgress| {
                    bar_for_progress.set_message(format!(
                        "{}: {} processed, {} succeeded, {} failed",
                        p.current_date, p.processed, p.succeeded, p.failed
                    ));
                    bar_for_progress.tick();
                });

            let result = parley
                .batch_processor()
                .process_date_range(start, end, resume.as_deref(), Some(progress))
                .await?;
            bar.finish_and_clear();

            println!(
                "Batch {}: {} processed, {} succeeded, {} failed{}",
                result.batch_id,
                result.total_processed,
                result.total_succeeded,
                result.total_failed,
                if result.completed { "" } else { " (incomplete)" }
            );
            for error in &result.errors {
                println!("  {} {}", style("error:").red(), error);
            }
        }

        Commands::RetryFailed => {
            let result = parley
                .batch_processor()
                .process_failed_recordings(parley.config().max_retries)
                .await?;
            println!(
                "Reprocessed {} recordings ({} succeeded, {} failed)",
                result.total_processed, result.total_succeeded, result.total_failed
            );
        }

        Commands::Status => {
            let status = parley.scheduler().status().await?;
            let summary = parley.state().processing_summary().await?;

            println!("{}", style("Scheduler").bold());
            println!("  running: {}", status.is_running);
            println!("  daily at: {}", status.daily_schedule_time);
            println!(
                "  last successful run: {}",
                status.last_successful_run.as_deref().unwrap_or("never")
            );

            println!("{}", style("Recordings").bold());
            println!("  total: {}", summary.total_recordings);
            println!("  completed: {}", summary.completed);
            println!(
                "  pending: download={} transcription={} upload={}",
                summary.pending_download, summary.pending_transcription, summary.pending_upload
            );
            println!(
                "  failed: download={} transcription={} upload={}",
                summary.failed_download, summary.failed_transcription, summary.failed_upload
            );
            println!("  active batches: {}", summary.active_batches);
        }

        Commands::Analyze { limit } => {
            let stats = parley.cascade().run_all(limit).await?;
            println!(
                "Cascade: {} meetings, {} layers completed ({} defaulted, {} failed)",
                stats.meetings_processed,
                stats.layers_completed,
                stats.layers_defaulted,
                stats.layers_failed
            );
        }

        Commands::Embed { limit } => {
            let stats = parley.embeddings().process_all(limit).await?;
            println!(
                "Embeddings: {} processed, {} failed, {} skipped",
                stats.processed, stats.failed, stats.skipped
            );
        }

        Commands::Search {
            query,
            employee,
            customer,
            sentiment,
            date_from,
            date_to,
            min_quality,
            limit,
        } => {
            let filters = SearchFilters {
                employee,
                customer,
                sentiment,
                date_from,
                date_to,
                min_quality,
            };

            let hits = parley.search().search(&query, &filters, limit).await?;
            if hits.is_empty() {
                println!("No matches");
            }
            for hit in hits {
                println!(
                    "{:.3}  {}  {}  {}",
                    hit.similarity,
                    hit.recording_id,
                    hit.call_date.map(|d| d.to_string()).unwrap_or_default(),
                    hit.summary.as_deref().unwrap_or("")
                );
            }
        }

        Commands::Employee(command) => match command {
            EmployeeCommands::Add {
                name,
                email,
                api_key,
                team,
                admin,
            } => {
                let id = parley
                    .key_store()
                    .add_employee(&name, &email, &api_key, team.as_deref(), admin)
                    .await?;
                println!("{} employee {email} (id={id})", style("✓").green());
            }
            EmployeeCommands::List => {
                for employee in parley.key_store().active_employees().await? {
                    println!(
                        "{}  {}  team={}  last_sync={}",
                        employee.employee_name,
                        employee.employee_email,
                        employee.team.as_deref().unwrap_or("-"),
                        employee
                            .last_sync_at
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| "never".into())
                    );
                }
            }
            EmployeeCommands::Deactivate { email } => {
                if parley.key_store().deactivate(&email).await? {
                    println!("{} deactivated {email}", style("✓").green());
                } else {
                    println!("No active employee {email}");
                }
            }
        },

        Commands::Failed(command) => match command {
            FailedCommands::List { limit } => {
                let items = parley.state().recordings().failed_items(limit).await?;
                if items.is_empty() {
                    println!("No failed items");
                }
                for item in items {
                    println!(
                        "{}  attempts={}  {}",
                        item.recording_id, item.attempt_count, item.failure_reason
                    );
                }
            }
            FailedCommands::Reset { recording_id } => {
                if parley
                    .state()
                    .recordings()
                    .clear_failed_item(&recording_id)
                    .await?
                {
                    println!("{} {recording_id} eligible again", style("✓").green());
                } else {
                    println!("{recording_id} is not a failed item");
                }
            }
        },

        Commands::History { recording_id } => {
            for entry in parley.state().recordings().history_for(&recording_id).await? {
                println!(
                    "{}  {}  {}  {}",
                    entry.created_at.to_rfc3339(),
                    entry.action,
                    entry.status,
                    entry.error_message.as_deref().unwrap_or("")
                );
            }
        }

        Commands::VerifyAudit => {
            let path = parley.config().data_dir.join("audit.log");
            if crate::storage::secure::verify_audit_chain(&path).await? {
                println!("{} audit chain intact", style("✓").green());
            } else {
                println!("{} audit chain BROKEN", style("✗").red());
            }
        }

        Commands::CleanupStates { days } => {
            let removed = parley.state().cleanup_old_states(days).await?;
            println!("Removed {removed} old states");
        }
    }

    Ok(())
}
