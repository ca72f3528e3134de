use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the storefront security gateway", long_about = None)]
struct Cli {
    /// Admin API base URL
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin bearer key
    #[arg(short, long, default_value = "")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway status
    Status,
    /// List tracked rate-limit windows
    Limits {
        /// Only show the busiest N keys
        #[arg(short, long)]
        top: Option<usize>,
    },
    /// Show the resolved policy of every route class
    Policies,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let path = match &cli.command {
        Commands::Status => "/admin/status",
        Commands::Limits { .. } => "/admin/rate-limits",
        Commands::Policies => "/admin/policies",
    };

    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;

    let Some(mut json) = read_response(res).await? else {
        return Ok(());
    };

    if let Commands::Limits { top: Some(n) } = cli.command {
        if let Some(entries) = json.get_mut("entries").and_then(Value::as_array_mut) {
            entries.truncate(n);
        }
    }

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn read_response(
    res: reqwest::Response,
) -> Result<Option<Value>, Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(None);
    }

    Ok(Some(res.json().await?))
}
