//! AgentDNS resolver CLI
//!
//! Command-line interface for registering, resolving and discovering agents.

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agentdns_resolver::{
    Agent, Error, Organization, Registration, Resolver, ResolverConfig, Result, SearchFilter,
};

#[derive(Parser)]
#[command(name = "agentdns")]
#[command(author, version, about = "AgentDNS resolver", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "agentdns.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "agentdns.toml")]
        output: String,
    },

    /// Register or update an organization
    RegisterOrg {
        /// Organization address, e.g. agentdns://acme
        address: String,

        /// Display name
        #[arg(long)]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Fail if the organization already exists
        #[arg(long)]
        create: bool,
    },

    /// Register or update agents from a JSON file (one agent or an array)
    RegisterAgent {
        file: PathBuf,

        /// Fail if an agent already exists
        #[arg(long)]
        create: bool,
    },

    /// Resolve an agent address
    Resolve { address: String },

    /// Resolve an organization address
    ResolveOrg { address: String },

    /// List the agents of an organization
    List { organization: String },

    /// List all organizations
    Orgs,

    /// Rank agents for a natural-language query
    Discover {
        query: String,

        #[arg(short, long, default_value = "5", allow_negative_numbers = true)]
        limit: i64,

        /// Only agents of this organization
        #[arg(long)]
        org: Option<String>,

        /// Only agents whose token cost is at most this
        #[arg(long)]
        max_cost: Option<f64>,
    },

    /// List agents carrying any of the given capability tags
    Capabilities {
        #[arg(required = true)]
        tags: Vec<String>,
    },

    /// Rebuild vectors from stored records (one agent, or all)
    Reindex { address: Option<String> },

    /// Delete an agent and its vectors
    DeleteAgent { address: String },

    /// Delete an organization without agents
    DeleteOrg { address: String },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn load_config(path: &str) -> Result<ResolverConfig> {
    if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        ResolverConfig::load(path)
    } else {
        info!("Using default configuration");
        Ok(ResolverConfig::default())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn registration_json(reg: &Registration<Agent>) -> serde_json::Value {
    json!({
        "record": reg.record,
        "index_warning": reg.index_warning.as_ref().map(|e| e.to_string()),
    })
}

fn parse_limit(limit: i64) -> Result<usize> {
    usize::try_from(limit)
        .ok()
        .filter(|limit| *limit > 0)
        .ok_or_else(|| Error::InvalidQuery(format!("limit must be positive, got {}", limit)))
}

fn read_agents(file: &Path) -> Result<Vec<Agent>> {
    let content = std::fs::read_to_string(file)?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    if value.is_array() {
        Ok(serde_json::from_value(value)?)
    } else {
        Ok(vec![serde_json::from_value(value)?])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Commands::Init { output } = &cli.command {
        info!("Writing default configuration to: {}", output);
        ResolverConfig::default().save(output)?;
        info!("Configuration saved successfully");
        return Ok(());
    }

    let config = load_config(&cli.config)?;
    let resolver = Resolver::from_config(&config).await?;

    match cli.command {
        Commands::Init { .. } => {}

        Commands::RegisterOrg {
            address,
            name,
            description,
            create,
        } => {
            let address = resolver.parser().parse_organization(&address)?;
            let org = Organization::new(name, address, description);
            let stored = if create {
                resolver.create_organization(org).await?
            } else {
                resolver.register_organization(org).await?
            };
            print_json(&stored)?;
        }

        Commands::RegisterAgent { file, create } => {
            let mut results = Vec::new();
            for agent in read_agents(&file)? {
                let reg = if create {
                    resolver.create_agent(agent).await?
                } else {
                    resolver.register_agent(agent).await?
                };
                if let Some(warning) = &reg.index_warning {
                    warn!("{}", warning);
                }
                results.push(registration_json(&reg));
            }
            print_json(&results)?;
        }

        Commands::Resolve { address } => {
            print_json(&resolver.resolve_agent(&address).await?)?;
        }

        Commands::ResolveOrg { address } => {
            print_json(&resolver.resolve_organization(&address).await?)?;
        }

        Commands::List { organization } => {
            print_json(&resolver.list_agents(&organization).await?)?;
        }

        Commands::Orgs => {
            print_json(&resolver.list_organizations().await?)?;
        }

        Commands::Discover {
            query,
            limit,
            org,
            max_cost,
        } => {
            let filter = SearchFilter {
                organization: org
                    .map(|org| resolver.parser().parse_organization(&org))
                    .transpose()?,
                max_token_cost: max_cost,
            };
            let limit = parse_limit(limit)?;
            print_json(&resolver.discover_filtered(&query, limit, &filter).await?)?;
        }

        Commands::Capabilities { tags } => {
            print_json(&resolver.find_by_capabilities(&tags).await?)?;
        }

        Commands::Reindex { address: Some(address) } => {
            print_json(&resolver.reindex_agent(&address).await?)?;
        }

        Commands::Reindex { address: None } => {
            let report = resolver.reindex_all().await?;
            let failures: Vec<_> = report
                .failures
                .iter()
                .map(|(address, err)| json!({ "address": address, "error": err.to_string() }))
                .collect();
            print_json(&json!({ "reindexed": report.reindexed, "failures": failures }))?;
            if !report.failures.is_empty() {
                return Err(Error::IndexWriteFailed {
                    address: "*".to_string(),
                    reason: format!("{} agent(s) not reindexed", report.failures.len()),
                });
            }
        }

        Commands::DeleteAgent { address } => {
            let reg = resolver.delete_agent(&address).await?;
            print_json(&registration_json(&reg))?;
        }

        Commands::DeleteOrg { address } => {
            print_json(&resolver.delete_organization(&address).await?)?;
        }
    }

    Ok(())
}
