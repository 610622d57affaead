//! Sideload CLI
//!
//! Inspection tool for request parameters: shows how a query string parses
//! into per-branch instructions and how filter values normalize.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use sideload_kernel::config::Config;
use sideload_kernel::params::parse_query_string;
use sideload_kernel::query::{Branches, Query};
use sideload_kernel::value::normalize;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect sideload request parameters")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a query string into per-branch instructions.
    Parse {
        /// Raw query string, e.g. `filter[id]=1,2&include=books`
        query: String,
        /// Root resource type
        #[arg(long, default_value = "records")]
        root_type: String,
        /// Sideload branch as `name=resource_type` (repeatable)
        #[arg(long = "branch", value_parser = parse_branch)]
        branches: Vec<(String, String)>,
    },
    /// Normalize a raw filter value.
    Normalize {
        /// Raw value as it appears in the query string
        value: String,
    },
    /// Print the configuration loaded from the environment.
    Config,
}

fn parse_branch(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, resource_type)) if !name.is_empty() && !resource_type.is_empty() => {
            Ok((name.to_string(), resource_type.to_string()))
        }
        _ => Err(format!("expected name=resource_type, got '{raw}'")),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    debug!(?cli, "parsed arguments");

    let output = match cli.command {
        Command::Parse {
            query,
            root_type,
            branches,
        } => {
            let branches = branches
                .into_iter()
                .fold(Branches::new(&root_type), |acc, (name, resource_type)| {
                    acc.with_branch(name, resource_type)
                });
            let params = parse_query_string(&query);
            info!(root_type = %root_type, "parsing query string");
            serde_json::to_value(Query::parse(&params, &branches))?
        }
        Command::Normalize { value } => normalize(&Value::String(value))
            .context("failed to normalize filter value")?
            .to_json(),
        Command::Config => {
            let config = Config::from_env().context("failed to load configuration")?;
            serde_json::to_value(config)?
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
