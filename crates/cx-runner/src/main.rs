//! # cx-runner
//!
//! Command-line front end for the CEX.IO clients.
//!
//! Loads a JSON configuration file, runs one command against the REST or
//! WebSocket API, prints the JSON result to stdout, and disconnects.
//!
//! # Usage
//!
//! ```bash
//! cx-runner config.json rest ticker --params '{"pairs":["BTC-USD"]}'
//! cx-runner config.json call get_my_account_status_v3
//! cx-runner config.json public order_book --data '{"pair":"BTC-USD"}'
//! cx-runner config.json watch tradeUpdate --private
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cx_api::{CexWsClient, ClientMode, RestClient, SessionEvent, SessionEventReceiver};
use serde_json::Value;
use tracing::{error, info, warn};

/// CEX.IO spot API runner.
#[derive(Parser)]
#[command(name = "cx-runner", about = "CEX.IO spot API runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output. Overrides the config file.
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit console logs as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Unauthenticated REST request.
    Rest {
        action: String,
        /// Request parameters (JSON object).
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_enum, default_value_t = HttpMethod::Get)]
        method: HttpMethod,
    },
    /// Authenticated WebSocket request.
    Call {
        action: String,
        /// Request payload (JSON).
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Public WebSocket request.
    Public {
        action: String,
        /// Request payload (JSON).
        #[arg(long, default_value = "{}")]
        data: String,
    },
    /// Print pushed events until Ctrl+C.
    Watch {
        #[arg(required = true)]
        events: Vec<String>,
        /// Use the authenticated endpoint.
        #[arg(long)]
        private: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum HttpMethod {
    Get,
    Post,
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration (it may carry logging settings)
    let config = cx_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level())
        .unwrap_or_else(|| "info".to_string());
    let log_dir = cli.log_dir.clone().or_else(|| config.log_path());
    cx_core::logging::init_logging(&log_level, log_dir.as_deref(), &config.module_name(), cli.json_logs);
    info!("cx-runner starting: config={}, log_level={log_level}", cli.config.display());

    // 3. Run the command
    let conn = config.connection;
    match cli.command {
        Command::Rest { action, params, method } => {
            let client = RestClient::from_config(&conn)?;
            let params = parse_json("--params", &params)?;
            let reply = client.request(&action, &params, &[], method.into()).await?;
            print_json(&reply)?;
        }
        Command::Call { action, data } => {
            let (client, events) = CexWsClient::private(conn)?;
            let data = parse_json("--data", &data)?;
            run_call(&client, events, &action, data).await?;
        }
        Command::Public { action, data } => {
            let (client, events) = CexWsClient::public(conn)?;
            let data = parse_json("--data", &data)?;
            run_call(&client, events, &action, data).await?;
        }
        Command::Watch { events, private } => {
            let (client, session_events) = if private {
                CexWsClient::private(conn)?
            } else {
                CexWsClient::public(conn)?
            };
            run_watch(&client, session_events, &events).await?;
        }
    }

    info!("cx-runner finished");
    Ok(())
}

/// Connect, issue one correlated request, print the reply, disconnect.
async fn run_call(client: &CexWsClient, events: SessionEventReceiver, action: &str, data: Value) -> Result<()> {
    let monitor = tokio::spawn(log_events(events));

    client.connect().await.context("connect failed")?;
    let result = match client.mode() {
        ClientMode::Private => client.call(action, data).await,
        ClientMode::Public => client.call_public(action, data).await,
    };
    client.disconnect().await;
    monitor.abort();

    let reply = result.with_context(|| format!("{action} failed"))?;
    print_json(&reply)
}

/// Subscribe to `names`, print each push as it arrives, stop on Ctrl+C or
/// when the connection drops.
async fn run_watch(client: &CexWsClient, mut events: SessionEventReceiver, names: &[String]) -> Result<()> {
    for name in names {
        client.subscribe(name, |frame| {
            if let Ok(line) = serde_json::to_string(frame) {
                println!("{line}");
            }
        })?;
    }

    client.connect().await.context("connect failed")?;
    info!("watching {} event(s); press Ctrl+C to stop", names.len());

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(SessionEvent::Disconnected { reason, .. }) => {
                    warn!("connection lost: {reason}");
                    break;
                }
                Some(other) => info!("session event: {other:?}"),
                None => break,
            },
        }
    }

    client.disconnect().await;
    Ok(())
}

async fn log_events(mut events: SessionEventReceiver) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Error { message } => error!("session error: {message}"),
            SessionEvent::Disconnected { reason, rejected } => {
                info!("disconnected: {reason} ({rejected} request(s) rejected)")
            }
            other => info!("session event: {other:?}"),
        }
    }
}

fn parse_json(flag: &str, raw: &str) -> Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("{flag} is not valid JSON: {raw}"))
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
