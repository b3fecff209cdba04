//! `classroom-authz`: inspect authorization decisions from the command line.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;

use classroom_auth::TokenPolicy;
use classroom_cli as cli;
use classroom_observability::{LogConfig, LogFormat};

#[derive(Parser)]
#[command(name = "classroom-authz")]
#[command(about = "Inspect classroom role and permission decisions")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, global = true, env = "CLASSROOM_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Explain whether a user record passes an access query
    Check {
        /// User record (JSON)
        #[arg(value_name = "RECORD")]
        record: PathBuf,

        /// Required role (admin, instructor, ta, student)
        #[arg(long)]
        role: Option<String>,

        /// Required permission, e.g. quiz.create
        #[arg(long)]
        permission: Option<String>,

        /// Also evaluate the query scoped to this class
        #[arg(long = "class")]
        class_id: Option<String>,
    },
    /// Show canonical memberships and data issues of a user record
    Normalize {
        /// User record (JSON)
        #[arg(value_name = "RECORD")]
        record: PathBuf,
    },
    /// Print the role and permission catalog
    Catalog,
    /// Start and stop an impersonation against an in-memory directory
    Impersonate {
        /// User directory (JSON array of records)
        #[arg(long)]
        directory: PathBuf,

        /// Signed-in administrator
        #[arg(long = "as")]
        admin: String,

        /// User to impersonate
        #[arg(value_name = "TARGET")]
        target: String,
    },
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn print(report: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    classroom_observability::init_with(&LogConfig::default().with_format(args.log_format));

    match args.command {
        Commands::Check {
            record,
            role,
            permission,
            class_id,
        } => {
            let record = cli::parse_record(&read(&record)?)?;
            let query = cli::build_query(role.as_deref(), permission.as_deref())?;
            let report = cli::check(&record, &query, class_id.as_deref())?;
            tracing::info!(subject = %record.id, granted = report.explanation.granted, "access checked");
            print(&report)
        }
        Commands::Normalize { record } => {
            let record = cli::parse_record(&read(&record)?)?;
            print(&cli::normalize(&record)?)
        }
        Commands::Catalog => print(&cli::catalog()),
        Commands::Impersonate {
            directory,
            admin,
            target,
        } => {
            let users = cli::parse_directory(&read(&directory)?)?;
            let report = cli::rehearse_impersonation(users, TokenPolicy::from_env(), &admin, &target).await?;
            print(&report)
        }
    }
}
