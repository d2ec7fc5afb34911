//! relink CLI
//!
//! Host or join rooms on a relay server from the command line.

mod config;
mod directory;
mod tcp;

use clap::{Parser, Subcommand};
use relink_core::{RoomDirectory, Session, SessionConfig, SessionEvent};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use config::Config;
use directory::{DirectoryReply, HttpRoomList, fetch_rooms, rooms_url};
use tcp::TcpRelayTransport;

/// Session tick period
const TICK: Duration = Duration::from_millis(16);

/// relink - relay sessions for peers behind NAT
#[derive(Parser)]
#[command(name = "relink")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay host (overrides the config file)
    #[arg(long)]
    relay: Option<String>,

    /// Relay port (overrides the config file)
    #[arg(long)]
    port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a room and echo every message back to its sender
    Host {
        /// Room name
        #[arg(long)]
        name: Option<String>,

        /// Room capacity
        #[arg(long)]
        max_players: Option<i32>,

        /// Hide the room from public listings
        #[arg(long)]
        private: bool,
    },

    /// Join a room and send each line of stdin to the host
    Join {
        /// Relay-assigned room id
        #[arg(required = true)]
        room_id: String,
    },

    /// List rooms published by the relay
    Rooms {
        /// Only show rooms of this application
        #[arg(long)]
        app_id: Option<i32>,

        /// Print the list as JSON
        #[arg(long)]
        json: bool,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::InitConfig { force } = cli.command {
        init_logging(cli.verbose, "info");
        return init_config(&config_path, force);
    }

    // Load configuration
    let mut config = Config::load_or_default(&config_path)?;
    if let Some(relay) = cli.relay {
        config.relay.address = relay;
    }
    if let Some(port) = cli.port {
        config.relay.port = port;
    }

    // Validate configuration
    config.validate()?;
    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Host {
            name,
            max_players,
            private,
        } => {
            if let Some(name) = name {
                config.room.name = name;
            }
            if let Some(max_players) = max_players {
                config.room.max_players = max_players;
            }
            if private {
                config.room.is_public = false;
            }
            config.validate()?;
            host(config.session_config()?).await?;
        }
        Commands::Join { room_id } => {
            join(config.session_config()?, room_id).await?;
        }
        Commands::Rooms { app_id, json } => {
            list_rooms(&config, app_id, json).await?;
        }
        Commands::InitConfig { .. } => {}
    }

    Ok(())
}

fn init_logging(verbose: bool, level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(if verbose { "debug" } else { level })
        .init();
}

/// Session plus the channels feeding it
struct Driver {
    session: Session<TcpRelayTransport>,
    replies: mpsc::UnboundedReceiver<DirectoryReply>,
}

impl Driver {
    fn new(config: SessionConfig) -> Self {
        let (source, replies) = HttpRoomList::new();
        let session =
            Session::new(config, TcpRelayTransport::new()).with_room_source(Box::new(source));
        Self { session, replies }
    }

    /// Run one session tick and return the notifications it produced
    fn tick(&mut self, now: Instant) -> Vec<SessionEvent> {
        self.session.early_update(now);

        while let Some(event) = self.session.transport_mut().poll_event() {
            self.session.handle_transport_event(event, now);
        }

        while let Ok(reply) = self.replies.try_recv() {
            match reply {
                DirectoryReply::Rooms(result) => self.session.apply_room_list(result),
                DirectoryReply::BestRelay(result) => {
                    if let Err(e) = self.session.apply_best_relay(result, now) {
                        tracing::warn!("Failed to connect to assigned relay: {}", e);
                    }
                }
            }
        }

        self.session.late_update(now);
        self.session.drain_events().collect()
    }
}

/// Host a room until Ctrl+C
async fn host(config: SessionConfig) -> anyhow::Result<()> {
    tracing::info!(
        "Hosting '{}' via {}:{}",
        config.server_name,
        config.relay_address,
        config.relay_port
    );

    let mut driver = Driver::new(config);
    driver.session.start(Instant::now())?;

    let mut ticker = tokio::time::interval(TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut relay_lost = false;

    'run: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut ctrl_c => break 'run,
        }

        for event in driver.tick(Instant::now()) {
            match event {
                SessionEvent::Authenticated => driver.session.start_server()?,
                SessionEvent::RoomCreated { room_id } => {
                    println!(
                        "Hosting room {} ({})",
                        room_id,
                        driver.session.server_uri().unwrap_or_default()
                    );
                }
                SessionEvent::ServerConnected(connection) => {
                    println!(
                        "Peer {} connected from {}",
                        connection,
                        driver
                            .session
                            .connection_address(connection)
                            .unwrap_or_default()
                    );
                }
                SessionEvent::ServerDataReceived {
                    connection,
                    data,
                    channel,
                } => {
                    println!(
                        "[{}] {}",
                        connection,
                        String::from_utf8_lossy(&data)
                    );
                    if let Err(e) = driver.session.server_send(connection, &data, channel) {
                        tracing::warn!("Echo to {} failed: {}", connection, e);
                    }
                }
                SessionEvent::ServerDisconnected(connection) => {
                    println!("Peer {connection} disconnected");
                }
                SessionEvent::DisconnectedFromRelay => {
                    relay_lost = true;
                    break 'run;
                }
                _ => {}
            }
        }
    }

    println!("\nShutting down...");
    driver.session.stop_server();
    driver.session.shutdown();

    if relay_lost {
        anyhow::bail!("Disconnected from relay");
    }
    Ok(())
}

/// Join a room and relay stdin lines to the host
async fn join(config: SessionConfig, room_id: String) -> anyhow::Result<()> {
    let load_balanced = config.use_load_balancer;
    let mut driver = Driver::new(config);
    driver.session.start(Instant::now())?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut join_requested = false;
    let mut joined = false;
    let mut relay_lost = false;

    'run: loop {
        tokio::select! {
            _ = ticker.tick() => {}
            line = lines.next_line(), if joined => match line? {
                Some(line) => driver.session.client_send(line.as_bytes(), 0)?,
                None => break 'run,
            },
            _ = &mut ctrl_c => break 'run,
        }

        let now = Instant::now();
        for event in driver.tick(now) {
            match event {
                // Load-balanced joins need the room list to find the room's relay.
                SessionEvent::Authenticated if !load_balanced && !join_requested => {
                    join_requested = true;
                    driver.session.connect(&room_id, now)?;
                }
                SessionEvent::RoomListUpdated { .. } if load_balanced && !join_requested => {
                    join_requested = true;
                    driver.session.connect(&room_id, now)?;
                }
                SessionEvent::ClientConnected => {
                    joined = true;
                    println!("Joined room {room_id}, type to send");
                }
                SessionEvent::ClientDataReceived { data, .. } => {
                    println!("< {}", String::from_utf8_lossy(&data));
                }
                SessionEvent::ClientDisconnected => {
                    println!("Left room {room_id}");
                    break 'run;
                }
                SessionEvent::DisconnectedFromRelay => {
                    relay_lost = true;
                    break 'run;
                }
                _ => {}
            }
        }
    }

    driver.session.client_disconnect();
    driver.session.shutdown();

    if relay_lost {
        anyhow::bail!("Disconnected from relay");
    }
    Ok(())
}

/// Print the relay's room list
async fn list_rooms(config: &Config, app_id: Option<i32>, json: bool) -> anyhow::Result<()> {
    let session_config = config.session_config()?;
    let endpoint = RoomDirectory::endpoint(&session_config);
    let client = reqwest::Client::new();

    let mut directory = RoomDirectory::new();
    directory.apply(Ok(fetch_rooms(&client, &rooms_url(&endpoint)).await?));

    let rooms: Vec<_> = match app_id {
        Some(app_id) => directory.for_app(app_id).collect(),
        None => directory.rooms().iter().collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&rooms)?);
        return Ok(());
    }

    if rooms.is_empty() {
        println!("No rooms published on {}:{}", endpoint.address, endpoint.port);
        return Ok(());
    }

    println!("{:<12} {:<32} {:>9}  RELAY", "ID", "NAME", "PLAYERS");
    for room in rooms {
        println!(
            "{:<12} {:<32} {:>4}/{:<4}  {}:{}",
            room.server_id,
            room.server_name,
            room.current_players,
            room.max_players,
            room.relay_info.address,
            room.relay_info.port
        );
    }

    Ok(())
}

/// Write the default configuration
fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    Config::default().save(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
