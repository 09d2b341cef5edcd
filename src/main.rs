use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use metricloom::config::Config;

#[derive(Parser)]
#[command(
    name = "metricloom",
    about = "Event-to-metric aggregation pipeline with windowed rollups and anomaly detection",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + aggregation pipeline)
    Serve {
        /// Config file (TOML); defaults apply when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Bind address override
        #[arg(long)]
        bind: Option<String>,

        /// Database path override
        #[arg(long)]
        db: Option<String>,
    },

    /// Submit one event to a running daemon
    Submit {
        /// Daemon base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,

        /// Event identifier, e.g. CONNECTION_OPENED
        #[arg(long)]
        identifier: String,

        /// Subject object id
        #[arg(long)]
        object_id: String,

        /// Subject object type
        #[arg(long)]
        object_type: String,

        /// Criteria tag as KIND=value (repeatable)
        #[arg(long = "criterion")]
        criteria: Vec<String>,

        /// Numeric payload value (for PERIODIC_SUMMARY events)
        #[arg(long)]
        value: Option<f64>,
    },

    /// List recent dead-letter records
    DeadLetters {
        /// Database path
        #[arg(long, default_value = "data/metricloom.db")]
        db: String,

        /// Maximum records to show
        #[arg(long, default_value = "50")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind, db } => {
            let mut cfg = Config::load(config.as_deref())?;
            if let Some(bind) = bind {
                cfg.bind = bind;
            }
            if let Some(db) = db {
                cfg.db_path = db;
            }
            init_tracing(&cfg.log.level, cfg.log.json);

            tracing::info!(bind = %cfg.bind, "Starting metricloom daemon");
            metricloom::serve(cfg).await?;
        }
        Commands::Submit {
            url,
            identifier,
            object_id,
            object_type,
            criteria,
            value,
        } => {
            init_tracing("info", false);

            let mut criteria_map = serde_json::Map::new();
            for pair in criteria {
                let Some((kind, value)) = pair.split_once('=') else {
                    anyhow::bail!("invalid criterion '{}', expected KIND=value", pair);
                };
                criteria_map.insert(kind.to_string(), serde_json::Value::String(value.to_string()));
            }

            let mut body = serde_json::json!({
                "identifier": identifier,
                "subject": { "object_id": object_id, "object_type": object_type },
                "criteria": criteria_map,
            });
            if let Some(v) = value {
                body["payload"] = serde_json::json!({ "value": v });
            }

            let resp = reqwest::Client::new()
                .post(format!("{}/api/v1/events", url.trim_end_matches('/')))
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if status.is_success() {
                println!("Accepted: {}", text);
            } else {
                anyhow::bail!("daemon returned {}: {}", status, text);
            }
        }
        Commands::DeadLetters { db, limit } => {
            init_tracing("warn", false);

            let pool = metricloom::storage::open_pool(&db)?;
            let records = metricloom::storage::dead_letter::list_recent(&pool, limit)?;
            if records.is_empty() {
                println!("No dead letters.");
            } else {
                println!(
                    "{:<40} | {:<5} | {:<25} | {:<10} | Reason",
                    "Identity", "Gran", "Window start", "Value"
                );
                println!("{:-<40}-|-{:-<5}-|-{:-<25}-|-{:-<10}-|-{:-<30}", "", "", "", "", "");
                for r in records {
                    println!(
                        "{:<40} | {:<5} | {:<25} | {:<10.2} | {}",
                        r.identity,
                        r.granularity,
                        r.window_start.to_rfc3339(),
                        r.value,
                        r.reason
                    );
                }
            }
        }
    }

    Ok(())
}

fn init_tracing(level: &str, json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string()));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
