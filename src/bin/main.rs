use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use netdispatch::{parse_header_line, Client, ClientConfig, EnvelopeParser, FormPart, Outcome};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netdispatch")]
#[command(about = "Issue JSON requests and print the parsed outcome")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct CommonArgs {
    /// URL to request
    #[arg(value_name = "URL")]
    url: String,

    /// Request headers (format: "Name: Value")
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Parameters (format: key=value)
    #[arg(short = 'q', long = "param")]
    params: Vec<String>,

    /// Timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Parse responses as {code, msg, data} envelopes
    #[arg(long)]
    envelope: bool,

    /// Print the outcome as compact JSON
    #[arg(long)]
    compact: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a GET request
    Get {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Issue a POST request
    Post {
        #[command(flatten)]
        common: CommonArgs,

        /// JSON object sent as the raw request body
        #[arg(short, long)]
        body: Option<String>,
    },
    /// Upload files as multipart form data
    Upload {
        #[command(flatten)]
        common: CommonArgs,

        /// File parts (format: field=path)
        #[arg(short, long = "file", required = true)]
        files: Vec<String>,
    },
}

fn split_pair(raw: &str) -> anyhow::Result<(&str, &str)> {
    raw.split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{}'", raw))
}

/// Parameter values that parse as JSON keep their type, anything else is a string
fn parameter_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn client_for(common: &CommonArgs) -> anyhow::Result<Client> {
    let client = Client::new()?;
    let mut config = ClientConfig::new();
    if common.envelope {
        config = config.parser(EnvelopeParser::new());
    }
    if let Some(seconds) = common.timeout {
        config = config.timeout(Duration::from_secs(seconds));
    }
    for line in &common.headers {
        let (name, value) = parse_header_line(line)?;
        config = config.header(name.as_str(), value.to_str()?)?;
    }
    client.configure(config);
    Ok(client)
}

fn report(outcome: Outcome, compact: bool) -> anyhow::Result<()> {
    match outcome {
        Ok(data) => {
            let text = if compact {
                serde_json::to_string(&data)?
            } else {
                serde_json::to_string_pretty(&data)?
            };
            println!("{}", "success".green().bold());
            println!("{}", text);
            Ok(())
        }
        Err(error) => {
            eprintln!("{} {}", "failure".red().bold(), format!("(code {})", error.code()).as_str().yellow());
            eprintln!("{}", error.description());
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Get { common } => {
            let client = client_for(&common)?;
            let mut request = client.get(common.url.as_str());
            for raw in &common.params {
                let (key, value) = split_pair(raw)?;
                request = request.parameter(key, parameter_value(value));
            }
            report(request.send().outcome().await, common.compact)
        }
        Commands::Post { common, body } => {
            let client = client_for(&common)?;
            let mut request = client.post(common.url.as_str());
            for raw in &common.params {
                let (key, value) = split_pair(raw)?;
                request = request.parameter(key, parameter_value(value));
            }
            if let Some(body) = body {
                let body: Value = serde_json::from_str(&body).context("--body is not valid JSON")?;
                request = request.body(&body)?;
            }
            report(request.send().outcome().await, common.compact)
        }
        Commands::Upload { common, files } => {
            let client = client_for(&common)?;
            let mut parts = Vec::with_capacity(files.len());
            for raw in &files {
                let (name, path) = split_pair(raw)?;
                let part = FormPart::from_file(name, PathBuf::from(path))
                    .with_context(|| format!("cannot read {}", path))?;
                parts.push(part);
            }

            let mut upload = client.upload(common.url.as_str(), parts);
            for raw in &common.params {
                let (key, value) = split_pair(raw)?;
                upload = upload.field(key, value);
            }

            let handle = upload.send().progress(|progress| {
                eprintln!(
                    "{} {}/{} bytes",
                    "uploading".cyan(),
                    progress.completed,
                    progress.total
                );
            });
            report(handle.outcome().await, common.compact)
        }
    }
}
