//! Voice Link Command-Line Front End
//!
//! Lists audio devices, places a call, or waits for one.
//!
//! ```text
//! voicelink devices
//! voicelink call <peer-ip> <peer-port> [local-port]
//! voicelink listen [local-port]
//!
//! options: --input N  --output N  --config PATH
//! ```

use anyhow::{anyhow, bail, Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use udp_voice_link::{
    audio::{AudioBackend, CpalBackend},
    config::AppConfig,
    events::LogSink,
    CallRequest, Session,
};

enum Command {
    Devices,
    Call {
        address: String,
        port: u32,
        local_port: Option<u32>,
    },
    Listen {
        local_port: Option<u32>,
    },
}

struct Args {
    command: Command,
    input: Option<usize>,
    output: Option<usize>,
    config: Option<PathBuf>,
}

fn parse_number<T: std::str::FromStr>(value: Option<String>, what: &str) -> Result<T> {
    let value = value.ok_or_else(|| anyhow!("missing {}", what))?;
    value.parse().map_err(|_| anyhow!("invalid {}: {}", what, value))
}

fn parse_args() -> Result<Args> {
    let mut positional = Vec::new();
    let mut input = None;
    let mut output = None;
    let mut config = None;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--input" => input = Some(parse_number(args.next(), "input device")?),
            "--output" => output = Some(parse_number(args.next(), "output device")?),
            "--config" => {
                config = Some(PathBuf::from(args.next().ok_or_else(|| anyhow!("missing config path"))?))
            }
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("devices") => Command::Devices,
        Some("call") => Command::Call {
            address: positional.next().ok_or_else(|| anyhow!("missing peer address"))?,
            port: parse_number(positional.next(), "peer port")?,
            local_port: positional.next().map(|p| parse_number(Some(p), "local port")).transpose()?,
        },
        Some("listen") | None => Command::Listen {
            local_port: positional.next().map(|p| parse_number(Some(p), "local port")).transpose()?,
        },
        Some(other) => bail!("unknown command: {} (expected devices, call or listen)", other),
    };

    Ok(Args {
        command,
        input,
        output,
        config,
    })
}

fn print_devices(backend: &dyn AudioBackend) {
    println!("\n=== Available Audio Devices ===");
    for device in backend.devices() {
        let mut markers = String::new();
        if device.is_default_input {
            markers.push_str(" [DEFAULT INPUT]");
        }
        if device.is_default_output {
            markers.push_str(" [DEFAULT OUTPUT]");
        }
        println!("  {}: {}{}", device.index, device.name, markers);
        println!(
            "    Channels: {} in / {} out",
            device.max_input_channels, device.max_output_channels
        );
    }
    println!();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = parse_args()?;

    let config = match &args.config {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::load_or_default(),
    };

    let backend = Arc::new(CpalBackend::new());

    let request = match args.command {
        Command::Devices => {
            print_devices(backend.as_ref());
            return Ok(());
        }
        Command::Call {
            address,
            port,
            local_port,
        } => {
            let request = CallRequest::call(address, port);
            match local_port {
                Some(local) => request.with_local_port(local),
                None => request,
            }
        }
        Command::Listen { local_port } => match local_port {
            Some(local) => CallRequest::listen().with_local_port(local),
            None => CallRequest::listen(),
        },
    }
    .with_devices(args.input, args.output);

    tracing::info!("Starting voice link");

    let mut session = Session::new(config, backend, Arc::new(LogSink));
    session.start(&request)?;

    tracing::info!("Press Ctrl+C to hang up");

    let mut ticker = tokio::time::interval(Duration::from_millis(250));
    let mut last_stats = std::time::Instant::now();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("Hanging up");
                break;
            }
            _ = ticker.tick() => {
                if let Some((component, reason)) = session.supervise() {
                    bail!("{} failed: {}", component, reason);
                }

                if last_stats.elapsed() >= Duration::from_secs(10) {
                    if let Some(stats) = session.transport_stats() {
                        tracing::info!(
                            "Stats: {} sent, {} received, {} filtered, {} send failures",
                            stats.sent,
                            stats.accepted,
                            stats.filtered,
                            stats.send_failures
                        );
                    }
                    last_stats = std::time::Instant::now();
                }
            }
        }
    }

    session.stop();
    Ok(())
}
