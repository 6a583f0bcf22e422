use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use reqwest::Client;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "gavel", about = "gavel — auction-site inbox service", version)]
struct Cli {
    /// Gavel server URL (default: http://localhost:8080 or $GAVEL_SERVER)
    #[arg(long, env = "GAVEL_SERVER", default_value = "http://localhost:8080")]
    server: String,

    /// Admin bearer token ($GAVEL_TOKEN)
    #[arg(long, env = "GAVEL_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum CollectionArg {
    Contact,
    Offers,
}

impl CollectionArg {
    fn path(self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Offers => "offers",
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gavel HTTP server
    Serve {
        /// Port to listen on (default: $GAVEL_PORT or 8080)
        #[arg(long, env = "GAVEL_PORT", default_value = "8080")]
        port: u16,
        /// Host to bind (default: $GAVEL_HOST or 0.0.0.0)
        #[arg(long, env = "GAVEL_HOST", default_value = "0.0.0.0")]
        host: String,
    },
    /// List the contact inbox (newest first)
    Contacts,
    /// List item-sale offers (oldest first)
    Offers,
    /// Post an administrative response to a record
    Respond {
        /// Which collection the record lives in
        #[arg(value_enum)]
        collection: CollectionArg,
        /// Record identifier
        id: String,
        /// Response text
        message: String,
    },
    /// Connectivity / CORS diagnostic against the server's health endpoint
    Probe {
        /// Origin header to present, to inspect the CORS response
        #[arg(long)]
        origin: Option<String>,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GAVEL_LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { port, host } => cmd_serve(host, port).await,

        Commands::Contacts => {
            let token = require_token(&cli.token)?;
            cmd_contacts(&cli.server, &token).await
        }

        Commands::Offers => {
            let token = require_token(&cli.token)?;
            cmd_offers(&cli.server, &token).await
        }

        Commands::Respond {
            collection,
            id,
            message,
        } => {
            let token = require_token(&cli.token)?;
            cmd_respond(&cli.server, &token, collection, &id, &message).await
        }

        Commands::Probe { origin } => cmd_probe(&cli.server, origin.as_deref()).await,
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16) -> Result<()> {
    let cfg = gavel_server::ServerConfig {
        host,
        port,
        ..Default::default()
    };
    gavel_server::run(cfg).await
}

#[derive(serde::Deserialize)]
struct RecordItem {
    id: String,
    created_at: i64,
    fields: Value,
    responded: bool,
    response: Option<String>,
}

async fn cmd_contacts(server: &str, token: &str) -> Result<()> {
    let records = fetch_records(server, token, "contact", "messages").await?;
    if records.is_empty() {
        println!("(inbox is empty)");
        return Ok(());
    }
    for r in &records {
        let status = if r.responded { "answered" } else { "open" };
        println!(
            "  {} [{}] @{} {} <{}>: {}",
            r.id,
            status,
            r.created_at,
            r.fields["name"].as_str().unwrap_or(""),
            r.fields["email"].as_str().unwrap_or(""),
            r.fields["message"].as_str().unwrap_or(""),
        );
        if let Some(ref response) = r.response {
            println!("      ↳ {response}");
        }
    }
    Ok(())
}

async fn cmd_offers(server: &str, token: &str) -> Result<()> {
    let records = fetch_records(server, token, "offers", "offers").await?;
    if records.is_empty() {
        println!("(no offers)");
        return Ok(());
    }
    for r in &records {
        let status = if r.responded { "answered" } else { "open" };
        println!(
            "  {} [{}] @{} {} — {} <{}>",
            r.id,
            status,
            r.created_at,
            r.fields["item_title"].as_str().unwrap_or(""),
            r.fields["name"].as_str().unwrap_or(""),
            r.fields["email"].as_str().unwrap_or(""),
        );
    }
    Ok(())
}

async fn cmd_respond(
    server: &str,
    token: &str,
    collection: CollectionArg,
    id: &str,
    message: &str,
) -> Result<()> {
    let client = Client::new();
    let resp = client
        .post(format!(
            "{}/{}/{}/response",
            server.trim_end_matches('/'),
            collection.path(),
            id
        ))
        .bearer_auth(token)
        .json(&serde_json::json!({"response": message}))
        .send()
        .await
        .context("HTTP request failed")?;

    if resp.status().is_success() {
        println!("✓ responded to {id}");
    } else {
        let status = resp.status();
        let json: Value = resp.json().await.unwrap_or_default();
        anyhow::bail!(
            "server returned {status}: {}",
            json["error"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_probe(server: &str, origin: Option<&str>) -> Result<()> {
    let client = Client::new();
    let mut req = client.get(format!("{}/health", server.trim_end_matches('/')));
    if let Some(o) = origin {
        req = req.header("Origin", o);
    }
    let resp = req.send().await.context("server unreachable")?;

    println!("status: {}", resp.status());
    match resp.headers().get("access-control-allow-origin") {
        Some(v) => println!("access-control-allow-origin: {}", v.to_str().unwrap_or("?")),
        None => println!("access-control-allow-origin: (not set)"),
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: &Option<String>) -> Result<String> {
    token
        .clone()
        .context("--token / GAVEL_TOKEN is required for this command")
}

async fn fetch_records(
    server: &str,
    token: &str,
    path: &str,
    list_key: &str,
) -> Result<Vec<RecordItem>> {
    let client = Client::new();
    let resp = client
        .get(format!("{}/{}", server.trim_end_matches('/'), path))
        .bearer_auth(token)
        .send()
        .await
        .context("HTTP request failed")?;

    if !resp.status().is_success() {
        let status = resp.status();
        anyhow::bail!("server returned {status}");
    }

    let json: Value = resp.json().await?;
    let records: Vec<RecordItem> =
        serde_json::from_value(json[list_key].clone()).context("parse record list")?;
    Ok(records)
}
