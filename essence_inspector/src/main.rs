use std::io::Write;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use bincode::deserialize;
use clap::Parser;
use color_eyre::Result;
use essence_runtime::{OwnerId, WorldSnapshot};
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{info, trace, warn};

mod app;
mod ticker;
mod ui;

use app::{channel, ClientCommand, FeedEvent, InspectorApp};

#[derive(Clone)]
struct ChannelWriter {
    sender: Sender<String>,
}

impl std::io::Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if let Ok(text) = String::from_utf8(buf.to_vec()) {
            let _ = self.sender.send(text);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Mek Forge essence inspector", long_about = None)]
struct Cli {
    /// Address of the headless store serving snapshot frames.
    #[arg(long, default_value = "127.0.0.1:42000")]
    endpoint: String,
    /// Address for sending control commands to the store.
    #[arg(long, default_value = "127.0.0.1:42001")]
    command_endpoint: String,
    /// Address of the store's structured log stream; "off" disables tailing.
    #[arg(long, default_value = "127.0.0.1:42002")]
    log_endpoint: String,
    /// Owner account this inspector displays and acts as.
    #[arg(long, default_value_t = 1)]
    owner: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let log_writer_tx = log_tx.clone();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .compact()
        .with_writer(move || ChannelWriter {
            sender: log_writer_tx.clone(),
        })
        .init();

    let cli = Cli::parse();
    info!("Connecting to store at {}", cli.endpoint);

    let (sender, receiver) = channel();
    let (command_tx, command_rx) = mpsc::channel::<ClientCommand>();
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let command_endpoint = cli.command_endpoint.clone();
    let _command_handle =
        std::thread::spawn(move || run_command_pump(command_endpoint, command_rx));

    if cli.log_endpoint != "off" {
        tokio::spawn(pump_logs(cli.log_endpoint.clone(), log_tx.clone()));
    }

    let owner = OwnerId(cli.owner);
    let _ui_handle = std::thread::spawn(move || -> color_eyre::Result<()> {
        let app = InspectorApp::new(receiver, command_tx, shutdown_tx, log_rx, owner)?;
        app.run()
    });

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("Inspector requested shutdown");
            break;
        }
        match TcpStream::connect(&cli.endpoint).await {
            Ok(mut stream) => {
                info!("Connected. Streaming snapshots. Press 'q' to exit.");
                let _ = sender.send(FeedEvent::Connected);
                if let Err(err) = pump_snapshots(&mut stream, &sender).await {
                    warn!("Snapshot feed error: {}", err);
                    let _ = sender.send(FeedEvent::Disconnected);
                    info!("Reconnecting in 2 seconds...");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
            Err(err) => {
                warn!("Failed to connect: {}", err);
                let _ = sender.send(FeedEvent::Disconnected);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }

    Ok(())
}

async fn pump_snapshots(
    stream: &mut TcpStream,
    sender: &UnboundedSender<FeedEvent>,
) -> Result<()> {
    let mut len_buf = [0u8; 4];
    loop {
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        let snapshot: WorldSnapshot = deserialize(&payload)?;
        trace!(tick = snapshot.header.tick, "snapshot.frame");
        if sender.send(FeedEvent::Snapshot(snapshot)).is_err() {
            break;
        }
    }
    Ok(())
}

/// Wire shape of one log stream frame. Mirrors the JSON the store emits the
/// same way the command strings below mirror its text protocol.
#[derive(Debug, Deserialize)]
struct LogFrame {
    tick: u64,
    level: String,
    target: String,
    message: String,
    #[serde(default)]
    fields: serde_json::Map<String, serde_json::Value>,
}

async fn pump_logs(endpoint: String, sender: Sender<String>) {
    loop {
        match TcpStream::connect(&endpoint).await {
            Ok(mut stream) => {
                if let Err(err) = read_log_frames(&mut stream, &sender).await {
                    trace!("Log stream ended: {}", err);
                }
            }
            Err(err) => {
                trace!("Log stream unavailable at {}: {}", endpoint, err);
            }
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

async fn read_log_frames(stream: &mut TcpStream, sender: &Sender<String>) -> Result<()> {
    let mut len_buf = [0u8; 4];
    loop {
        stream.read_exact(&mut len_buf).await?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;
        let frame: LogFrame = serde_json::from_slice(&payload)?;
        if sender.send(format_log_frame(&frame)).is_err() {
            break;
        }
    }
    Ok(())
}

fn format_log_frame(frame: &LogFrame) -> String {
    let module = frame.target.rsplit("::").next().unwrap_or(&frame.target);
    let mut line = format!(
        "[{:>4}] {:<5} {} {}",
        frame.tick, frame.level, module, frame.message
    );
    for (key, value) in &frame.fields {
        line.push_str(&format!(" {}={}", key, value));
    }
    line
}

fn run_command_pump(endpoint: String, receiver: Receiver<ClientCommand>) {
    for cmd in receiver {
        match send_command(&endpoint, &cmd) {
            Ok(_) => info!(?cmd, "command.sent"),
            Err(err) => warn!(?cmd, "Failed to send command: {}", err),
        }
    }
}

fn send_command(endpoint: &str, command: &ClientCommand) -> std::io::Result<()> {
    let mut stream = std::net::TcpStream::connect(endpoint)?;
    stream.write_all(command_line(command).as_bytes())?;
    Ok(())
}

fn command_line(command: &ClientCommand) -> String {
    match command {
        ClientCommand::Checkpoint { owner } => format!("checkpoint {}\n", owner),
        ClientCommand::Grant {
            owner,
            kind,
            amount,
        } => format!("grant {} {} {:.6}\n", owner, kind.as_str(), amount),
        ClientCommand::Buff {
            owner,
            name,
            multiplier,
            cap_bonus,
            ttl_ms,
        } => format!(
            "buff {} {} {:.6} {:.6} {}\n",
            owner, name, multiplier, cap_bonus, ttl_ms
        ),
        ClientCommand::AdvanceClock { ms } => format!("clock +{}\n", ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use essence_runtime::EssenceKind;

    #[test]
    fn log_frames_parse_and_format() {
        let payload = br#"{"timestamp_ms":123,"tick":42,"level":"INFO","target":"mek_forge::accrual","message":"checkpoint.sweep_completed","fields":{"players":3}}"#;
        let frame: LogFrame = serde_json::from_slice(payload).unwrap();
        assert_eq!(
            format_log_frame(&frame),
            "[  42] INFO  accrual checkpoint.sweep_completed players=3"
        );
    }

    #[test]
    fn frames_without_fields_still_format() {
        let payload =
            br#"{"timestamp_ms":1,"tick":0,"level":"WARN","target":"mek_forge::server","message":"config.reload_failed=keeping_previous"}"#;
        let frame: LogFrame = serde_json::from_slice(payload).unwrap();
        assert_eq!(
            format_log_frame(&frame),
            "[   0] WARN  server config.reload_failed=keeping_previous"
        );
    }

    #[test]
    fn command_lines_match_the_store_grammar() {
        assert_eq!(
            command_line(&ClientCommand::Checkpoint { owner: 1 }),
            "checkpoint 1\n"
        );
        assert_eq!(
            command_line(&ClientCommand::Grant {
                owner: 1,
                kind: EssenceKind::Stone,
                amount: 1.0,
            }),
            "grant 1 stone 1.000000\n"
        );
        assert_eq!(
            command_line(&ClientCommand::Buff {
                owner: 7,
                name: "inspector-boost".to_string(),
                multiplier: 1.25,
                cap_bonus: 0.0,
                ttl_ms: 86_400_000,
            }),
            "buff 7 inspector-boost 1.250000 0.000000 86400000\n"
        );
        assert_eq!(
            command_line(&ClientCommand::AdvanceClock { ms: 86_400_000 }),
            "clock +86400000\n"
        );
    }
}
