use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use wa_campaign_backpressure::{LocalBackpressureLimiter, RateLimits};
use wa_campaign_core::{
    BackendConfig, CampaignRequest, CampaignService, CampaignStats, ColumnMapping,
    DispatchSettings, Dispatcher, FileMapping, HttpBackend, RecipientInput, RowError,
    StaticSession, UserPreferences,
};

mod table;

const ACCESS_TOKEN_ENV: &str = "CAMPAIGN_ACCESS_TOKEN";
const COUNTRY_CODE_ENV: &str = "CAMPAIGN_COUNTRY_CODE";
const FROM_NUMBER_ENV: &str = "CAMPAIGN_FROM_NUMBER";

#[derive(Parser, Debug)]
#[command(author, version, about = "WhatsApp campaign CLI")]
struct Cli {
    /// Emit JSON output
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List approved templates
    Templates,
    /// Compose and dispatch a campaign
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Template to send
    #[arg(long)]
    template: String,
    /// Campaign name; defaults to "Campaign <template>"
    #[arg(long, default_value = "")]
    name: String,
    /// `;`-delimited values for single and bulk modes
    #[arg(long, default_value = "")]
    values: String,
    /// Sending number; overrides CAMPAIGN_FROM_NUMBER
    #[arg(long)]
    from: Option<String>,
    /// Country code for numbers without `+`; overrides CAMPAIGN_COUNTRY_CODE
    #[arg(long)]
    country_code: Option<String>,
    /// Single 10-digit subscriber number
    #[arg(long, conflicts_with_all = ["bulk", "csv"])]
    to: Option<String>,
    /// File with one number per line
    #[arg(long, conflicts_with = "csv")]
    bulk: Option<PathBuf>,
    /// CSV upload whose first line names the columns
    #[arg(long, requires = "phone_column")]
    csv: Option<PathBuf>,
    /// CSV column holding the phone number
    #[arg(long)]
    phone_column: Option<String>,
    /// Variable to column mapping, e.g. `--map 1=name`
    #[arg(long = "map", value_parser = table::parse_mapping)]
    mappings: Vec<ColumnMapping>,
    /// Validate and compose without sending
    #[arg(long)]
    dry_run: bool,
}

#[derive(Serialize)]
struct SendReport {
    campaign_id: String,
    name: String,
    template: String,
    stats: CampaignStats,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<RowError>,
}

#[derive(Serialize)]
struct DryRunReport {
    template: String,
    recipients: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    skipped: Vec<RowError>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    wa_campaign_telemetry::install("wa-campaign")?;
    let cli = Cli::parse();

    let cfg = BackendConfig::from_env();
    tracing::debug!(
        api_base = %cfg.api_base,
        phone_number_id = %cfg.phone_number_id,
        "loaded backend config"
    );
    let backend = Arc::new(HttpBackend::new(&cfg).context("build backend client")?);
    let session = Arc::new(StaticSession::new(
        std::env::var(ACCESS_TOKEN_ENV).unwrap_or_default(),
    ));
    let limiter = Arc::new(LocalBackpressureLimiter::new(Arc::new(RateLimits::from_env())));
    let dispatcher = Arc::new(Dispatcher::new(
        backend.clone(),
        session.clone(),
        limiter,
        DispatchSettings::from(&cfg),
    ));
    let service = CampaignService::new(backend, dispatcher, session, cfg.phone_number_id.clone());

    match cli.command {
        Commands::Templates => {
            let templates = service.templates().await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&templates)?);
            } else if templates.is_empty() {
                println!("No approved templates");
            } else {
                for summary in templates.values() {
                    println!(
                        "{:<32} {:<8} {:<16} variables={}",
                        summary.name,
                        summary.language,
                        summary.category.as_deref().unwrap_or("-"),
                        summary.variables_count
                    );
                }
            }
        }
        Commands::Send(args) => {
            let prefs = preferences(&args)?;
            let dry_run = args.dry_run;
            let request = CampaignRequest {
                name: args.name.clone(),
                template_name: args.template.clone(),
                recipients: recipient_input(&args)?,
                values: args.values.clone(),
            };

            let prepared = service.prepare(request, &prefs).await?;
            if dry_run {
                let report = DryRunReport {
                    template: prepared.template.name.clone(),
                    recipients: prepared.recipients(),
                    skipped: prepared.skipped.clone(),
                };
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }

            let campaign = service.run(prepared).await?;
            let report = SendReport {
                campaign_id: campaign.id.to_string(),
                name: campaign.name.clone(),
                template: campaign.template_name.clone(),
                stats: campaign.stats(),
                skipped: campaign.skipped.clone(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn preferences(args: &SendArgs) -> Result<UserPreferences> {
    let country_code = args
        .country_code
        .clone()
        .or_else(|| std::env::var(COUNTRY_CODE_ENV).ok());
    let prefs = match country_code {
        Some(code) => UserPreferences::new(&code)?,
        None => UserPreferences::default(),
    };
    let from_number = args
        .from
        .clone()
        .or_else(|| std::env::var(FROM_NUMBER_ENV).ok())
        .unwrap_or_default();
    Ok(prefs.with_from_number(from_number))
}

fn recipient_input(args: &SendArgs) -> Result<RecipientInput> {
    if let Some(number) = &args.to {
        return Ok(RecipientInput::Single {
            country_code: args.country_code.clone(),
            number: number.clone(),
        });
    }
    if let Some(path) = &args.bulk {
        return Ok(RecipientInput::Multiple {
            text: table::load_bulk(path)?,
        });
    }
    if let Some(path) = &args.csv {
        let phone_column = args
            .phone_column
            .clone()
            .context("--phone-column is required with --csv")?;
        return Ok(RecipientInput::File {
            table: table::load_csv(path)?,
            mapping: FileMapping {
                phone_column,
                variables: args.mappings.clone(),
            },
        });
    }
    bail!("one of --to, --bulk or --csv is required")
}
