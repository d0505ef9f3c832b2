use beacon::authz::StaticAuthorization;
use beacon::gateway::WsRequest;
use clap::{Parser, Subcommand};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

#[derive(Parser)]
#[command(name = "beacon")]
#[command(about = "Beacon CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the gateway (webhook ingestion, HTTP + WebSocket broadcast).
    Gateway {
        /// Config file path (default: BEACON_CONFIG_PATH or ~/.beacon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// WebSocket and HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Show whether developer mode is on for a user, and which rule decided it.
    Flags {
        /// Config file path (default: BEACON_CONFIG_PATH or ~/.beacon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// User identity to resolve.
        #[arg(long, short)]
        user: String,
    },

    /// Subscribe to a channel on the running gateway and print every event.
    Watch {
        /// Config file path (default: BEACON_CONFIG_PATH or ~/.beacon/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// User identity to connect as.
        #[arg(long, short)]
        user: String,

        /// Channel to subscribe to (default: broadcast.dashboardChannel).
        #[arg(long)]
        channel: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("beacon {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Flags { config, user }) => {
            if let Err(e) = run_flags(config, &user) {
                log::error!("flags failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Watch {
            config,
            user,
            channel,
        }) => {
            if let Err(e) = run_watch(config, user, channel).await {
                log::error!("watch failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = beacon::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    beacon::gateway::run_gateway(config).await
}

fn run_flags(config_path: Option<std::path::PathBuf>, user: &str) -> anyhow::Result<()> {
    let (config, _) = beacon::config::load_config(config_path)?;
    let authorization = StaticAuthorization::from_config(&config.authorization);
    let debug = beacon::config::resolve_debug_mode(&config);
    let decision = beacon::flags::developer_mode(&authorization, user, debug);
    println!(
        "developer mode for {}: {} ({})",
        user,
        if decision.enabled { "on" } else { "off" },
        decision.rule
    );
    Ok(())
}

/// Wait for the response to request `id`, printing any event frames that arrive first.
async fn await_response<S>(ws: &mut S, id: &str) -> Result<serde_json::Value, String>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws.next().await {
        let msg = msg.map_err(|e| e.to_string())?;
        let Message::Text(text) = msg else { continue };
        let frame: serde_json::Value = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        match frame.get("type").and_then(|v| v.as_str()) {
            Some("res") if frame.get("id").and_then(|v| v.as_str()) == Some(id) => {
                if !frame.get("ok").and_then(|v| v.as_bool()).unwrap_or(false) {
                    let err = frame
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("request failed");
                    return Err(err.to_string());
                }
                return Ok(frame.get("payload").cloned().unwrap_or_default());
            }
            Some("event") => println!("{}", text),
            _ => {}
        }
    }
    Err("connection closed".to_string())
}

async fn run_watch(
    config_path: Option<std::path::PathBuf>,
    user: String,
    channel: Option<String>,
) -> anyhow::Result<()> {
    let (config, _) = beacon::config::load_config(config_path)?;
    let bind = config.gateway.bind.trim();
    let ws_url = format!("ws://{}:{}/ws", bind, config.gateway.port);
    let token = beacon::config::resolve_gateway_token(&config);
    let channel = channel.unwrap_or_else(|| config.broadcast.dashboard_channel.to_string());

    let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url).await?;

    let mut connect_params = serde_json::json!({
        "client": {
            "id": "beacon-cli",
            "version": env!("CARGO_PKG_VERSION"),
            "platform": std::env::consts::OS,
        },
        "user": user,
    });
    if let Some(ref t) = token {
        connect_params["auth"] = serde_json::json!({ "token": t });
    }
    let connect_req = WsRequest::new("1", "connect", connect_params);
    ws.send(Message::Text(serde_json::to_string(&connect_req)?)).await?;
    let hello = await_response(&mut ws, "1")
        .await
        .map_err(|e| anyhow::anyhow!("connect: {}", e))?;
    if let Some(mode) = hello.get("developerMode") {
        eprintln!("connected as {} (developer mode: {})", user, mode);
    }

    let subscribe_req = WsRequest::new("2", "subscribe", serde_json::json!({ "channel": channel }));
    ws.send(Message::Text(serde_json::to_string(&subscribe_req)?)).await?;
    await_response(&mut ws, "2")
        .await
        .map_err(|e| anyhow::anyhow!("subscribe {}: {}", channel, e))?;
    eprintln!("watching {}", channel);

    while let Some(msg) = ws.next().await {
        let Message::Text(text) = msg? else { continue };
        println!("{}", text);
        if text.contains(r#""event":"shutdown""#) {
            break;
        }
    }
    Ok(())
}
