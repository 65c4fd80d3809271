//! `authvault` operator CLI.
//!
//! ```bash
//! authvault register Steve hunter2
//! authvault passwd Steve correct-horse
//! authvault show Steve
//! authvault purge 90
//! authvault migrate --legacy /srv/old/auths.db
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use authvault::auth::identity::resolver_from_config;
use authvault::context::now_millis;
use authvault::{AuthContext, Config, LegacyMigrator, MigrationOutcome, RegisterOutcome};

#[derive(Parser, Debug)]
#[command(name = "authvault", version, about = "Manage stored player credentials")]
struct Cli {
    /// Path to the TOML config file (defaults apply when omitted).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account.
    Register { name: String, password: String },

    /// Replace an account's password.
    Passwd { name: String, password: String },

    /// Delete an account.
    Unregister { name: String },

    /// Print the stored record for a player.
    Show { name: String },

    /// Delete accounts that have not logged in for the given number of days.
    Purge { days: u64 },

    /// Convert the name-keyed legacy file into the current flat file.
    Migrate {
        /// Legacy file (defaults to `migration.legacy_file`).
        #[arg(long)]
        legacy: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(message) => {
            println!("{message}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<String> {
    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Migrate { legacy } => migrate(&config, legacy),
        Commands::Register { name, password } => with_context(&config, |ctx| {
            match ctx.register(&name, &password) {
                RegisterOutcome::Registered { identity } => format!("Registered {name} ({identity})"),
                RegisterOutcome::AlreadyRegistered => format!("{name} is already registered"),
                RegisterOutcome::Unresolved(e) => format!("Cannot register {name}: {e}"),
                RegisterOutcome::StoreFailed => format!("Failed to register {name}, see log"),
            }
        }),
        Commands::Passwd { name, password } => with_context(&config, |ctx| {
            if ctx.change_password(&name, &password) {
                format!("Password changed for {name}")
            } else {
                format!("{name} is not registered")
            }
        }),
        Commands::Unregister { name } => with_context(&config, |ctx| {
            if ctx.unregister(&name) {
                format!("Unregistered {name}")
            } else {
                format!("{name} is not registered")
            }
        }),
        Commands::Show { name } => with_context(&config, |ctx| match ctx.lookup(&name) {
            Some(record) => format!(
                "{} name={} ip={} last_login={}",
                record.identity,
                record.display_name,
                record.last_ip,
                format_millis(record.last_login)
            ),
            None => format!("{name} is not registered"),
        }),
        Commands::Purge { days } => with_context(&config, |ctx| {
            let removed = ctx.purge_inactive_days(days, now_millis());
            format!("Purged {removed} accounts inactive for {days} days")
        }),
    }
}

/// Open the configured store, run one command against it, close it.
fn with_context(config: &Config, f: impl FnOnce(&AuthContext) -> String) -> Result<String> {
    let ctx = AuthContext::from_config(config)?;
    let message = f(&ctx);
    ctx.shutdown();
    Ok(message)
}

fn migrate(config: &Config, legacy: Option<PathBuf>) -> Result<String> {
    let legacy = legacy.unwrap_or_else(|| config.legacy_file());
    let target = config.auth_file();
    let resolver =
        resolver_from_config(&config.resolver).context("Failed to set up identity resolver")?;
    let migrator = LegacyMigrator::new(resolver, config.storage.default_ip.clone());

    let outcome = migrator
        .migrate(&legacy, &target)
        .with_context(|| format!("Migration of {} aborted", legacy.display()))?;
    Ok(match outcome {
        MigrationOutcome::NothingToDo => {
            format!("{} not found. No conversion performed.", legacy.display())
        }
        MigrationOutcome::Completed(report) if report.needs_log_review() => {
            format!("{}. Check the log for skipped records.", report.summary())
        }
        MigrationOutcome::Completed(report) => report.summary(),
    })
}

fn format_millis(millis: i64) -> String {
    if millis == 0 {
        return "never".into();
    }
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| millis.to_string())
}
