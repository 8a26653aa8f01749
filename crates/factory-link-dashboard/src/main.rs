//! `factory-link`: command-line front end for the dashboard core.
//!
//! Run against the mock:
//!   cargo run -p factory-link-mock
//!   cargo run -p factory-link-dashboard -- --token dev-token watch --topics getPower
//!   cargo run -p factory-link-dashboard -- --token dev-token submit RESET_FUSE '{"circuitId":1}'

use anyhow::Context;
use clap::{Parser, Subcommand};
use factory_link_client::{CommandClient, TelemetryClient};
use factory_link_core::{
    Clock, CommandSnapshot, CommandType, SystemClock, TelemetryEvent, Topic,
};
use factory_link_dashboard::{CommandDesk, Config, Dashboard};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factory-link", about = "Telemetry and control for the factory mod")]
struct Cli {
    /// TOML config file.
    #[arg(long, env = "FACTORY_LINK_CONFIG")]
    config: Option<PathBuf>,
    #[arg(long, env = "FACTORY_LINK_TELEMETRY_URL")]
    telemetry_url: Option<String>,
    #[arg(long, env = "FACTORY_LINK_CONTROL_URL")]
    control_url: Option<String>,
    /// Bearer token for the control endpoint.
    #[arg(long, env = "FACTORY_LINK_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream telemetry (and command status when a token is set).
    Watch {
        #[arg(long, num_args = 1..)]
        topics: Vec<Topic>,
    },
    /// One pull of a topic, printed as JSON.
    Fetch { topic: Topic },
    /// Print the capability descriptor.
    Capabilities,
    /// Submit a command and wait for it to finish.
    Submit {
        command_type: CommandType,
        /// JSON payload, e.g. '{"circuitId":1}'.
        payload: String,
        /// Idempotency key; generated when omitted.
        #[arg(long)]
        key: Option<String>,
        /// Seconds to wait for a terminal status.
        #[arg(long, default_value_t = 30)]
        wait: u64,
    },
    /// One status read.
    Status { command_id: String },
}

enum Update {
    Telemetry(TelemetryEvent),
    Command(CommandSnapshot),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("factory_link=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Watch { topics } => watch(&config, topics).await,
        Command::Fetch { topic } => {
            let client = TelemetryClient::new(config.telemetry_config())?;
            let event = client.fetch(topic).await?;
            println!("{}", serde_json::to_string_pretty(&event)?);
            Ok(())
        }
        Command::Capabilities => {
            let client = CommandClient::new(control(&config)?)?;
            let caps = client.capabilities().await?;
            println!("{}", serde_json::to_string_pretty(&caps)?);
            Ok(())
        }
        Command::Submit {
            command_type,
            payload,
            key,
            wait,
        } => submit(&config, command_type, &payload, key, Duration::from_secs(wait)).await,
        Command::Status { command_id } => {
            let client = CommandClient::new(control(&config)?)?;
            let snapshot = client.status(&command_id).await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(url) = &cli.telemetry_url {
        config.telemetry.url = url.clone();
    }
    if let Some(url) = &cli.control_url {
        config.control.url = url.clone();
    }
    if let Some(token) = &cli.token {
        config.control.token = Some(token.clone());
    }
    Ok(config)
}

fn control(config: &Config) -> anyhow::Result<factory_link_client::ControlConfig> {
    config
        .control_config()
        .context("no control token; pass --token or set FACTORY_LINK_TOKEN")
}

async fn watch(config: &Config, topics: Vec<Topic>) -> anyhow::Result<()> {
    let topics = match (topics.is_empty(), config.telemetry.topics.is_empty()) {
        (false, _) => topics,
        (true, false) => config.telemetry.topics.clone(),
        (true, true) => Topic::ALL.to_vec(),
    };
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (tx, mut rx) = mpsc::unbounded_channel();

    let telemetry = TelemetryClient::new(config.telemetry_config())?;
    let sink = tx.clone();
    telemetry.on_data(move |event| {
        let _ = sink.send(Update::Telemetry(event.clone()));
    });
    telemetry.subscribe(&topics);
    if let Err(err) = telemetry.connect().await {
        tracing::warn!(error = %err, "telemetry stream unavailable, retrying in the background");
    }

    let mut desk = match config.control_config() {
        Some(control) => {
            let client = CommandClient::new(control)?;
            let sink = tx.clone();
            client.on_event(move |snapshot| {
                let _ = sink.send(Update::Command(snapshot.clone()));
            });
            if let Err(err) = client.connect_stream().await {
                tracing::warn!(error = %err, "command stream unavailable");
            }
            let mut desk = CommandDesk::new(client, clock.clone());
            if let Err(err) = desk.refresh_capabilities().await {
                tracing::warn!(error = %err, "capabilities unavailable; commands disabled");
            }
            Some(desk)
        }
        None => None,
    };
    drop(tx);

    let mut dashboard = Dashboard::new(clock);
    let mut link_check = tokio::time::interval(Duration::from_secs(1));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            Some(update) = rx.recv() => match update {
                Update::Telemetry(event) => {
                    let topic = event.topic();
                    let records = event.len();
                    let kept = dashboard.ingest(event);
                    tracing::info!(%topic, records, kept, "telemetry");
                }
                Update::Command(snapshot) => {
                    let tracked = desk
                        .as_mut()
                        .is_some_and(|desk| desk.apply_event(&snapshot));
                    tracing::info!(
                        command = %snapshot.command_id,
                        status = ?snapshot.status,
                        tracked,
                        "command status"
                    );
                }
            },
            _ = link_check.tick(), if desk.is_some() => {
                if let Some(desk) = desk.as_mut() {
                    match desk.sync_capabilities().await {
                        Ok(true) => tracing::info!("command stream reconnected, capabilities refetched"),
                        Ok(false) => {}
                        Err(err) => tracing::warn!(error = %err, "capabilities refetch failed"),
                    }
                }
            }
            _ = &mut shutdown => break,
        }
    }

    telemetry.disconnect();
    if let Some(desk) = &desk {
        desk.client().disconnect();
    }
    tracing::info!(circuits = ?dashboard.circuits(), "stopped");
    Ok(())
}

async fn submit(
    config: &Config,
    command_type: CommandType,
    payload: &str,
    key: Option<String>,
    wait: Duration,
) -> anyhow::Result<()> {
    let payload: Value = serde_json::from_str(payload).context("payload is not valid JSON")?;
    let client = CommandClient::new(control(config)?)?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on_event(move |snapshot| {
        let _ = tx.send(snapshot.clone());
    });
    if let Err(err) = client.connect_stream().await {
        tracing::warn!(error = %err, "command stream unavailable; will poll once at the deadline");
    }

    let mut desk = CommandDesk::new(client, Arc::new(SystemClock));
    desk.refresh_capabilities().await?;
    let command_id = desk.try_submit(command_type, payload, key).await?;
    tracing::info!(command = %command_id, "submitted");

    let deadline = tokio::time::sleep(wait);
    tokio::pin!(deadline);
    let last = loop {
        tokio::select! {
            Some(event) = rx.recv() => {
                desk.apply_event(&event);
                if event.command_id == command_id && event.status.is_terminal() {
                    break event;
                }
            }
            _ = &mut deadline => break desk.client().status(&command_id).await?,
        }
    };
    desk.client().disconnect();
    println!("{}", serde_json::to_string_pretty(&last)?);
    Ok(())
}
