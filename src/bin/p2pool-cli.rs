use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "p2pool-cli")]
#[command(about = "Query a running p2pool-node over its HTTP API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:9980")]
    url: String,

    /// Must match the node's `api.agent` setting.
    #[arg(short, long, default_value = "SIA-Agent")]
    agent: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Node version
    Version,
    /// Pool fee
    Fee,
    /// Chain height and tip
    Consensus,
    /// Connected peers
    Gateway,
    /// Transaction pool size
    Tpool,
}

impl Commands {
    fn path(&self) -> &'static str {
        match self {
            Commands::Version => "/version",
            Commands::Fee => "/fee",
            Commands::Consensus => "/consensus",
            Commands::Gateway => "/gateway",
            Commands::Tpool => "/tpool",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_str(&cli.agent)?);

    let res = client
        .get(format!("{}{}", cli.url.trim_end_matches('/'), cli.command.path()))
        .headers(headers)
        .send()
        .await?;

    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: node API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("{}", text);
        }
        std::process::exit(1);
    }

    let body: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
