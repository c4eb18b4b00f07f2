//! Thin HTTP client for the workflow runtime's control plane.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

#[derive(Parser, Debug)]
#[command(version, about = "Client for the workflow runtime HTTP control plane")]
struct Cli {
    /// Base URL of the running server, e.g. http://127.0.0.1:8080
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Submit a run from a JSON file (see the POST /runs request body).
    Submit {
        /// Path to a JSON file holding the submission body.
        file: String,
    },
    /// Fetch the current status snapshot for a run.
    Status {
        run_id: String,
    },
    /// Request abort of a running run.
    Abort {
        run_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let response = match cli.command {
        CliCommand::Submit { file } => {
            let body = std::fs::read_to_string(&file)
                .with_context(|| format!("reading submission file {file}"))?;
            let payload: Value =
                serde_json::from_str(&body).with_context(|| format!("parsing {file} as JSON"))?;
            client
                .post(format!("{}/api/v1/runs", cli.server))
                .json(&payload)
                .send()
                .await?
        }
        CliCommand::Status { run_id } => {
            client
                .get(format!("{}/api/v1/runs/{run_id}", cli.server))
                .send()
                .await?
        }
        CliCommand::Abort { run_id } => {
            client
                .post(format!("{}/api/v1/runs/{run_id}/abort", cli.server))
                .send()
                .await?
        }
    };

    let status = response.status();
    let body: Value = response.json().await.unwrap_or(Value::Null);
    println!("{}", serde_json::to_string_pretty(&body)?);

    if !status.is_success() {
        bail!("server returned {status}");
    }
    Ok(())
}
