//! Mock factory mod for local runs.
//!
//! Run:
//!   cargo run -p factory-link-mock -- --telemetry-port 8080 --control-port 8081
//!
//! Then point the CLI at it:
//!   factory-link --token dev-token watch --topics getPower getFactory

use clap::Parser;
use factory_link_core::Topic;
use factory_link_mock::{MockConfig, MockServer, power_body, sample_topics};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "factory-link-mock", about = "Mock telemetry and control endpoints")]
struct Args {
    #[arg(long, default_value_t = 8080)]
    telemetry_port: u16,
    #[arg(long, default_value_t = 8081)]
    control_port: u16,
    #[arg(long, env = "FACTORY_LINK_TOKEN", default_value = "dev-token")]
    token: String,
    /// Milliseconds between scripted status steps.
    #[arg(long, default_value_t = 500)]
    advance_ms: u64,
    /// Milliseconds between pushed power frames.
    #[arg(long, default_value_t = 2000)]
    push_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("factory_link_mock=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = MockConfig::default()
        .with_token(args.token)
        .with_auto_advance(Duration::from_millis(args.advance_ms));
    let server = MockServer::bind(
        config,
        SocketAddr::from(([0, 0, 0, 0], args.telemetry_port)),
        SocketAddr::from(([0, 0, 0, 0], args.control_port)),
    )
    .await?;
    for (topic, body) in sample_topics() {
        server.set_topic(topic, body).await;
    }

    tracing::info!(
        "telemetry on {}, control on {}",
        server.telemetry_url(),
        server.control_url()
    );

    let mut ticker = tokio::time::interval(Duration::from_millis(args.push_ms.max(1)));
    let mut tick: u32 = 0;
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                tick = tick.wrapping_add(1);
                let consumed = 90.0 + f64::from(tick % 20);
                let body = power_body(1, 150.0, consumed);
                server.set_topic(Topic::Power, body.clone()).await;
                server.push(Topic::Power, &body);
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                return Ok(());
            }
        }
    }
}
