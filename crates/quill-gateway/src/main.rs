//! quill-gateway - operator CLI for the Quill gateway client
//!
//! Connects to the local gateway with the same client the desktop app uses,
//! which makes it handy for checking credentials and poking at RPC methods.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use quill_gateway::{
    ClientOptions, ConfigResolver, ConnectionStatus, DisconnectOptions, FileResolver,
    GatewayClient, ResolvedConfig, StaticResolver,
};
use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "quill-gateway")]
#[command(about = "Talk to the local Quill automation gateway")]
#[command(version)]
struct Cli {
    /// Gateway WebSocket URL
    #[arg(long, env = "QUILL_GATEWAY_URL", global = true)]
    url: Option<String>,

    /// Gateway token
    #[arg(long, env = "QUILL_GATEWAY_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// JSON config file with `url` and `token`/`tokens`
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Seconds to wait for the connection
    #[arg(long, default_value_t = 10, global = true)]
    connect_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print status, features and server info
    Status,

    /// Call an RPC method and print its payload
    Call {
        /// Method name
        method: String,

        /// JSON params
        #[arg(long, default_value = "{}")]
        params: String,

        /// Request timeout in milliseconds
        #[arg(long, default_value_t = 30_000)]
        timeout_ms: u64,
    },

    /// Print gateway events as JSON lines until Ctrl-C
    Watch,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("quill_gateway=info".parse()?))
        .init();

    let cli = Cli::parse();
    let connect_timeout = Duration::from_secs(cli.connect_timeout);
    let client = GatewayClient::new(
        resolver(&cli)?,
        ClientOptions::default().with_connect_timeout(connect_timeout),
    );

    client
        .ensure_connected(Some(connect_timeout))
        .await
        .context("failed to connect to gateway")?;

    let result = match cli.command {
        Commands::Status => status(&client),
        Commands::Call {
            method,
            params,
            timeout_ms,
        } => call(&client, &method, &params, Duration::from_millis(timeout_ms)).await,
        Commands::Watch => watch(&client).await,
    };

    client.disconnect(DisconnectOptions::stop());
    result
}

/// Flags and env win over the config file.
fn resolver(cli: &Cli) -> anyhow::Result<Arc<dyn ConfigResolver>> {
    match (&cli.url, &cli.config) {
        (Some(url), _) => {
            quill_gateway::config::validate_url(url)?;
            Ok(Arc::new(StaticResolver::new(ResolvedConfig::new(
                url.clone(),
                cli.token.clone(),
            ))))
        }
        (None, Some(path)) => {
            let file = FileResolver::new(path.clone());
            let token = cli.token.clone();
            Ok(Arc::new(move || {
                file.resolve().map(|mut config| {
                    if token.is_some() {
                        config.token.clone_from(&token);
                    }
                    config
                })
            }))
        }
        (None, None) => {
            anyhow::bail!("no gateway configured; pass --url, set QUILL_GATEWAY_URL or use --config")
        }
    }
}

fn status(client: &GatewayClient) -> anyhow::Result<()> {
    let report = json!({
        "status": client.status(),
        "protocol": client.protocol(),
        "server": client.server_info(),
        "features": client.features(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn call(
    client: &GatewayClient,
    method: &str,
    params: &str,
    timeout: Duration,
) -> anyhow::Result<()> {
    let params: Value = serde_json::from_str(params).context("--params must be valid JSON")?;
    let payload = client.request(method, params, Some(timeout)).await?;
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn watch(client: &GatewayClient) -> anyhow::Result<()> {
    let events = client.on_event(|event| {
        let line = json!({
            "receivedAt": chrono::Utc::now().to_rfc3339(),
            "event": event.event,
            "seq": event.seq,
            "payload": event.payload,
        });
        println!("{line}");
    });
    let statuses = client.on_status(|status: &ConnectionStatus| {
        eprintln!("status: {status}");
    });

    info!("watching gateway events; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    events.unsubscribe();
    statuses.unsubscribe();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_call() {
        let cli = Cli::try_parse_from([
            "quill-gateway",
            "--url",
            "ws://127.0.0.1:18789",
            "call",
            "notes.list",
            "--params",
            r#"{"limit": 5}"#,
            "--timeout-ms",
            "500",
        ])
        .expect("should parse");

        match cli.command {
            Commands::Call {
                method,
                params,
                timeout_ms,
            } => {
                assert_eq!(method, "notes.list");
                assert_eq!(params, r#"{"limit": 5}"#);
                assert_eq!(timeout_ms, 500);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_resolver_from_url_flag() {
        let cli = Cli::try_parse_from([
            "quill-gateway",
            "--url",
            "ws://127.0.0.1:18789",
            "--token",
            "secret",
            "status",
        ])
        .expect("should parse");

        let resolved = resolver(&cli).expect("resolver").resolve().expect("config");
        assert_eq!(resolved.url, "ws://127.0.0.1:18789");
        assert_eq!(resolved.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_resolver_rejects_http_url() {
        let cli = Cli::try_parse_from(["quill-gateway", "--url", "http://x", "status"])
            .expect("should parse");
        assert!(resolver(&cli).is_err());
    }
}
