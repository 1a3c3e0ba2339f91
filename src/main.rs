use std::path::PathBuf;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod commands;
mod config;
mod engagement;
mod error;
mod listing;
mod models;
mod pipeline;
mod renewal;
mod report;
mod validation;

use api::{ApiClient, Resource};
use commands::{App, ListArgs};
use config::{Config, LogFormat};
use models::{ClaimStatus, RecordId};

#[derive(Parser)]
#[command(name = "brokerage-crm")]
#[command(about = "Client engagement and pipeline tooling for an insurance brokerage CRM", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults to $CRM_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Relationship health and engagement trend for one customer
    Metrics {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        json: bool,
    },
    /// Write a markdown engagement report for one customer
    Report {
        #[arg(long)]
        customer: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// Policies coming up for renewal
    Renewals {
        #[arg(long)]
        customer: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Opportunity totals by pipeline stage
    Pipeline {
        #[arg(long)]
        customer: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Brokerage-wide summary, retried on transient failures
    Dashboard,
    /// List records of a resource as JSON lines
    List {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        search: Option<String>,
        /// Extra query filter, repeatable (e.g. --filter stage=Nova)
        #[arg(long = "filter", value_parser = parse_filter)]
        filters: Vec<(String, String)>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long)]
        limit: Option<u32>,
        /// Follow pagination to the last page
        #[arg(long)]
        all: bool,
    },
    /// Create a record from a JSON payload (validated before sending)
    Create {
        #[arg(value_enum)]
        resource: Resource,
        #[arg(long)]
        json: String,
    },
    /// Update a record: the JSON patch is merged over the stored record and validated
    Update {
        #[arg(value_enum)]
        resource: Resource,
        id: String,
        #[arg(long)]
        json: String,
    },
    /// Delete a record
    Delete {
        #[arg(value_enum)]
        resource: Resource,
        id: String,
    },
    /// Move a claim along its status lifecycle
    ClaimStatus {
        #[arg(long)]
        claim: String,
        #[arg(long, value_enum)]
        to: ClaimStatus,
    },
    /// Import activities from a CSV file
    ImportActivities {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Attach a document to a customer or policy
    UploadDocument {
        #[arg(long)]
        customer: String,
        #[arg(long)]
        policy: Option<String>,
        #[arg(long, default_value = "outros")]
        kind: String,
        #[arg(long)]
        file: PathBuf,
    },
    /// Look up an address by CEP
    Cep { code: String },
    /// WhatsApp gateway operations
    #[command(subcommand)]
    Whatsapp(WhatsappCommands),
}

#[derive(Subcommand)]
enum WhatsappCommands {
    /// Send a message
    Send {
        #[arg(long)]
        phone: String,
        #[arg(long)]
        message: String,
    },
    /// Show the gateway configuration, or replace it with a JSON document
    Config {
        #[arg(long)]
        set: Option<String>,
    },
}

fn parse_filter(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "brokerage_crm=info".into());

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(config.logging.format);
    tracing::debug!(base_url = %config.api.base_url, "configuration loaded");

    let client = ApiClient::new(&config.api).context("failed to build HTTP client")?;
    let app = App { client, config };
    let today = Local::now().date_naive();

    match cli.command {
        Commands::Metrics { customer, json } => {
            commands::metrics(&app, &RecordId(customer), json, today).await?;
        }
        Commands::Report { customer, out } => {
            commands::report(&app, &RecordId(customer), &out, today).await?;
        }
        Commands::Renewals { customer, limit } => {
            let customer = customer.map(RecordId);
            commands::renewals(&app, customer.as_ref(), limit, today).await?;
        }
        Commands::Pipeline { customer, json } => {
            let customer = customer.map(RecordId);
            commands::pipeline(&app, customer.as_ref(), json).await?;
        }
        Commands::Dashboard => {
            commands::dashboard(&app, today).await?;
        }
        Commands::List {
            resource,
            search,
            filters,
            page,
            limit,
            all,
        } => {
            let args = ListArgs {
                search,
                filters,
                page,
                limit,
                all,
            };
            commands::list(&app, resource, args).await?;
        }
        Commands::Create { resource, json } => {
            commands::create(&app, resource, &json).await?;
        }
        Commands::Update { resource, id, json } => {
            commands::update(&app, resource, &RecordId(id), &json).await?;
        }
        Commands::Delete { resource, id } => {
            commands::delete(&app, resource, &RecordId(id)).await?;
        }
        Commands::ClaimStatus { claim, to } => {
            commands::claim_status(&app, &RecordId(claim), to).await?;
        }
        Commands::ImportActivities { csv } => {
            let inserted = commands::import_activities(&app, &csv).await?;
            println!("Inserted {inserted} activities from {}.", csv.display());
        }
        Commands::UploadDocument {
            customer,
            policy,
            kind,
            file,
        } => {
            commands::upload_document(&app, RecordId(customer), policy.map(RecordId), kind, &file)
                .await?;
        }
        Commands::Cep { code } => {
            commands::cep(&app, &code).await?;
        }
        Commands::Whatsapp(WhatsappCommands::Send { phone, message }) => {
            commands::whatsapp_send(&app, phone, message).await?;
        }
        Commands::Whatsapp(WhatsappCommands::Config { set }) => {
            commands::whatsapp_config(&app, set.as_deref()).await?;
        }
    }

    Ok(())
}
