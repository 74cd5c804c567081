use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "bridge-cli")]
#[command(about = "Query the pubsub-bridge admin API", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check bridge status
    Status,
    /// List audit log entries
    Logs {
        /// Maximum number of entries
        #[arg(short, long)]
        limit: Option<usize>,

        /// Look up a single request id
        #[arg(short, long)]
        request_id: Option<String>,
    },
    /// View request statistics
    Stats {
        /// Reporting window: hour, day, week, month, all
        #[arg(short, long, default_value = "hour")]
        period: String,

        /// Number of channels in the breakdown
        #[arg(short, long)]
        window_size: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let request = match cli.command {
        Commands::Status => client.get(format!("{}/api/status", cli.url)),
        Commands::Logs { limit, request_id } => {
            let mut request = client.get(format!("{}/api/logs", cli.url));
            if let Some(limit) = limit {
                request = request.query(&[("limit", limit.to_string())]);
            }
            if let Some(request_id) = request_id {
                request = request.query(&[("request_id", request_id)]);
            }
            request
        }
        Commands::Stats {
            period,
            window_size,
        } => {
            let mut request = client
                .get(format!("{}/api/stats", cli.url))
                .query(&[("period", period)]);
            if let Some(window) = window_size {
                request = request.query(&[("window_size", window.to_string())]);
            }
            request
        }
    };

    print_response(request.send().await?).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
