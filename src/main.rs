//! mailsort - Postmaster mailbox sorter
//!
//! Main entry point for the mailsort CLI.

use clap::{Parser, Subcommand};
use mailsort::config::{validate_config, SorterConfig};
use mailsort::database::{MailingListDatabase, SqliteMailingListDatabase};
use mailsort::mail::EmailAddress;
use mailsort::runner::{self, RunOptions, RunSummary};
use mailsort::stats::{AddressStatsRepository, SqliteStatsStore};
use mailsort::MailSortError;
use std::path::PathBuf;
use std::process;

/// mailsort - Sort a postmaster mailbox and account for bounces
#[derive(Parser, Debug)]
#[command(name = "mailsort")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: ~/.config/mailsort/config.yaml)
    #[arg(short, long, env = "MAILSORT_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a default configuration file
    Init,

    /// Sort all configured mailboxes
    Run {
        /// Classify, parse and count, but leave the mailbox untouched
        #[arg(long)]
        readonly: bool,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,

        /// Print Prometheus metrics after the run
        #[arg(long)]
        metrics: bool,
    },

    /// Check the configuration file
    Validate,

    /// Show bounce statistics for an address
    Address {
        /// Email address
        email: String,
    },

    /// Manage mailings
    #[command(subcommand)]
    Mailing(MailingCommands),
}

#[derive(Subcommand, Debug)]
enum MailingCommands {
    /// Register a mailing so bounces with its List-Id are counted
    Add {
        /// List-Id the mailing is sent with (e.g. "weekly.example.com")
        list_id: String,

        /// Human-readable name
        #[arg(short, long)]
        name: Option<String>,
    },

    /// List registered mailings
    List,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> mailsort::Result<()> {
    if let Commands::Init = cli.command {
        return handle_init_command(&cli.config);
    }

    let config = load_config(&cli.config)?;

    let level = match cli.verbose {
        0 => config.log_level.as_deref(),
        1 => Some("info"),
        _ => Some("debug"),
    };
    if let Err(e) = mailsort::logging::init(level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Init => {}
        Commands::Run {
            readonly,
            json,
            metrics,
        } => {
            let summary = runner::run(
                &config,
                RunOptions {
                    readonly,
                    ..Default::default()
                },
            )?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_summary(&summary);
            }
            if metrics {
                print!("{}", mailsort::metrics::gather_metrics()?);
            }
        }
        Commands::Validate => match validate_config(&config) {
            Ok(()) => println!("✓ Configuration is valid"),
            Err(errors) => {
                for error in &errors {
                    eprintln!("  - {}", error);
                }
                return Err(MailSortError::Config(format!(
                    "{} validation error(s)",
                    errors.len()
                )));
            }
        },
        Commands::Address { email } => handle_address_command(&config, &email)?,
        Commands::Mailing(cmd) => handle_mailing_command(&config, &cmd)?,
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> mailsort::Result<SorterConfig> {
    match path {
        Some(path) => SorterConfig::load(path),
        None => match SorterConfig::load_default() {
            Ok(config) => Ok(config),
            Err(MailSortError::Config(msg)) if msg.contains("Config file not found") => {
                Err(MailSortError::Config(
                    "No configuration found. Run 'mailsort init' first to create one.".to_string(),
                ))
            }
            Err(e) => Err(e),
        },
    }
}

fn database_path(config: &SorterConfig) -> mailsort::Result<&PathBuf> {
    config.database.path.as_ref().ok_or_else(|| {
        MailSortError::Config("database.path must be set for this command".to_string())
    })
}

fn handle_init_command(config_path: &Option<PathBuf>) -> mailsort::Result<()> {
    let config_file = config_path
        .clone()
        .unwrap_or_else(SorterConfig::default_path);

    if config_file.exists() {
        println!("Configuration already exists at {}", config_file.display());
        return Ok(());
    }

    SorterConfig::new().save(&config_file)?;

    println!("✓ Created configuration at {}", config_file.display());
    println!();
    println!("Next steps:");
    println!("  1. Point maildir.path at the postmaster Maildir");
    println!("  2. Set database.path to keep bounce statistics");
    println!("  3. Try a dry run:");
    println!("     mailsort run --readonly");

    Ok(())
}

fn handle_address_command(config: &SorterConfig, email: &str) -> mailsort::Result<()> {
    let path = database_path(config)?;
    let email = EmailAddress::new(email)
        .map_err(|e| MailSortError::Other(format!("{}: {}", email, e)))?;

    let store = SqliteStatsStore::open(path)?;
    let database = SqliteMailingListDatabase::open(path)?;

    match store.get_by_email(&email)? {
        Some(stats) => {
            println!("{}", stats.email);
            println!("  Last status:          {}", stats.last_status);
            println!("  Last status date:     {}", stats.last_status_date.format("%Y-%m-%d %H:%M:%S UTC"));
            println!("  Temporary failures:   {}", stats.temporary_failure_count);
            println!("  Spam:                 {}", if stats.spam { "yes" } else { "no" });
            if !stats.diagnostic_code.is_empty() {
                println!("  Diagnostic:           {}", stats.diagnostic_code);
            }
        }
        None => println!("{}: no bounces recorded", email),
    }

    if let Some(disabled) = database.disabled(&email)? {
        println!("  Disabled:             {} ({})", disabled.disabled_at, disabled.full_status);
    }
    if database.is_unsubscribed(&email)? {
        println!("  Unsubscribed:         yes");
    }

    Ok(())
}

fn handle_mailing_command(config: &SorterConfig, cmd: &MailingCommands) -> mailsort::Result<()> {
    let store = SqliteStatsStore::open(database_path(config)?)?;

    match cmd {
        MailingCommands::Add { list_id, name } => {
            let list_id = mailsort::parser::normalize_list_id(list_id)
                .ok_or_else(|| MailSortError::Other("List-Id cannot be empty".to_string()))?;
            let mailing = store.register_mailing(&list_id, name.as_deref())?;
            println!("✓ Registered mailing {} ({})", mailing.id, mailing.list_id);
        }
        MailingCommands::List => {
            let mailings = store.mailings()?;
            if mailings.is_empty() {
                println!("No mailings registered");
            }
            for mailing in mailings {
                println!(
                    "{:>5}  {:<40} {:>6} undelivered  {}",
                    mailing.id,
                    mailing.list_id,
                    mailing.undelivered_count,
                    mailing.name.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    if summary.readonly {
        println!("Read-only run: no messages were changed");
        println!();
    }

    for report in &summary.mailboxes {
        println!(
            "{}: {} fetched, {} processed, {} unprocessed, {} failed",
            report.mailbox, report.fetched, report.processed, report.unprocessed, report.failed
        );
    }

    println!();
    println!("By type:");
    for message_type in mailsort::mail::MessageType::ALL {
        let stats = summary.stats.type_stats(message_type);
        println!(
            "  {:<14} {:>5}  ({} processed, {} unprocessed, {} failed)",
            message_type.as_str(),
            stats.total,
            stats.processed,
            stats.unprocessed,
            stats.failed
        );
    }

    if !summary.stats.by_action().is_empty() {
        println!();
        println!("By action:");
        for (action, count) in summary.stats.by_action() {
            println!("  {:<20} {:>5}", action, count);
        }
    }
}
