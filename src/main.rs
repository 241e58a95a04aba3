//! Blastzone Host
//!
//! Hosts one LAN session and lets the operator start and stop matches from
//! the console.

use std::net::{IpAddr, SocketAddr};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use blastzone::{
    ArenaMatchFactory, HostConfig, HostSession, SessionField, SessionHandle, SessionObserver,
    WebSocketTransportFactory, WireFormat, VERSION,
};

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to listen on
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: IpAddr,
    /// Port to listen on
    #[arg(short, long, default_value_t = 7777)]
    port: u16,
    /// Tick period in milliseconds
    #[arg(long, default_value_t = 100)]
    tick_ms: u64,
    /// Match length in seconds
    #[arg(long, default_value_t = 180)]
    match_secs: u64,
    /// Maximum connected players
    #[arg(long, default_value_t = 4)]
    max_players: u32,
    /// Send bincode binary frames instead of JSON text
    #[arg(long)]
    binary: bool,
}

impl Args {
    fn into_config(self) -> HostConfig {
        HostConfig {
            bind_addr: SocketAddr::new(self.host, self.port),
            tick_period: Duration::from_millis(self.tick_ms),
            match_duration: Duration::from_secs(self.match_secs),
            max_players: self.max_players,
            wire_format: if self.binary {
                WireFormat::Binary
            } else {
                WireFormat::Json
            },
            ..Default::default()
        }
    }
}

/// One line of operator input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorCommand {
    Start,
    Stop,
    Toggle,
    Status,
    Help,
    Quit,
}

impl FromStr for OperatorCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "toggle" | "t" => Ok(Self::Toggle),
            "status" | "s" => Ok(Self::Status),
            "help" | "?" => Ok(Self::Help),
            "quit" | "q" | "menu" => Ok(Self::Quit),
            other => Err(other.to_string()),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return ExitCode::FAILURE;
    }

    match run(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.into_config();
    config.validate().context("Invalid host configuration")?;

    info!("Blastzone Host v{}", VERSION);
    info!(
        "Tick: {} ms, match: {} ticks, max players: {}, frames: {:?}",
        config.tick_period.as_millis(),
        config.match_duration_ticks(),
        config.max_players,
        config.wire_format
    );

    let transports = WebSocketTransportFactory::from_config(&config);
    let matches = ArenaMatchFactory::new(config.match_duration_ticks());
    let session = HostSession::new(transports, matches, config.tick_period)
        .with_context(|| format!("Failed to host on {}", config.bind_addr))?;

    if let Some(transport) = session.transport() {
        info!("Waiting for players on ws://{}", transport.local_addr());
    }

    let handle = SessionHandle::spawn(session);
    let observer = handle.observer();
    log_field_changes(&observer);
    info!("Commands: start, stop, toggle, status, quit");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => {
                match line.context("Failed to read operator input")? {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match line.parse::<OperatorCommand>() {
                        Ok(OperatorCommand::Quit) => break,
                        Ok(command) => execute(&handle, &observer, command).await,
                        Err(unknown) => warn!("Unknown command '{}' (try: help)", unknown),
                    },
                    None => {
                        info!("Console closed; press Ctrl+C to stop hosting");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C");
                break;
            }
        }
    }

    handle.return_to_menu().await;
    info!("Returned to menu");
    Ok(())
}

async fn execute(handle: &SessionHandle, observer: &SessionObserver, command: OperatorCommand) {
    let result = match command {
        OperatorCommand::Start => handle.start().await.map(|()| "started".to_string()),
        OperatorCommand::Stop => handle.stop().await.map(|()| "stopped".to_string()),
        OperatorCommand::Toggle => handle
            .start_or_stop()
            .await
            .map(|toggle| format!("{:?}", toggle).to_lowercase()),
        OperatorCommand::Status => {
            let snapshot = observer.snapshot();
            info!(
                "running={} connectedPlayers={} errorMessage={:?}",
                snapshot.running, snapshot.connected_players, snapshot.error_message
            );
            return;
        }
        OperatorCommand::Help => {
            info!("start | stop | toggle (t) | status (s) | quit (q)");
            return;
        }
        OperatorCommand::Quit => return,
    };

    match result {
        Ok(done) => info!("Match {}", done),
        Err(e) => warn!("{}", e),
    }
}

/// Stand-in for the view layer: log every observable change.
fn log_field_changes(observer: &Arc<SessionObserver>) {
    for field in SessionField::ALL {
        // Weak, so the observer does not keep itself alive.
        let reader = Arc::downgrade(observer);
        observer.subscribe(field, move || {
            let Some(observer) = reader.upgrade() else {
                return;
            };
            match field {
                SessionField::Running => info!("{} -> {}", field, observer.running()),
                SessionField::ConnectedPlayers => {
                    info!("{} -> {}", field, observer.connected_players())
                }
                SessionField::ErrorMessage => {
                    info!("{} -> {:?}", field, observer.error_message())
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("start".parse(), Ok(OperatorCommand::Start));
        assert_eq!(" Toggle ".parse(), Ok(OperatorCommand::Toggle));
        assert_eq!("q".parse(), Ok(OperatorCommand::Quit));
        assert_eq!(
            "jump".parse::<OperatorCommand>(),
            Err("jump".to_string())
        );
    }

    #[test]
    fn test_args_into_config() {
        let args = Args::parse_from(["blastzone-host", "--port", "9000", "--tick-ms", "50"]);
        let config = args.into_config();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.tick_period, Duration::from_millis(50));
        assert_eq!(config.match_duration_ticks(), 3600);
        assert_eq!(config.wire_format, WireFormat::Json);

        let args = Args::parse_from(["blastzone-host", "--binary"]);
        assert_eq!(args.into_config().wire_format, WireFormat::Binary);
    }
}
