use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use framelock::{GameServer, JournalWorld, NoContent, ServerConfig, ServerEvent};

const STATS_INTERVAL: Duration = Duration::from_secs(30);
const MAX_IDLE: Duration = Duration::from_millis(5);

#[derive(Parser)]
#[command(name = "framelock-server")]
#[command(about = "Dedicated lockstep game server")]
struct Args {
    #[arg(short, long, help = "JSON server configuration")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(short, long)]
    name: Option<String>,

    #[arg(long)]
    password: Option<String>,

    #[arg(short, long)]
    max_clients: Option<usize>,

    #[arg(short, long)]
    tick_rate: Option<u32>,

    #[arg(long, help = "Register with a master server at host[:port]")]
    master: Option<String>,

    #[arg(long, help = "Do not answer LAN queries")]
    no_lan: bool,

    #[arg(long, default_value_t = 256)]
    map_width: u16,

    #[arg(long, default_value_t = 256)]
    map_height: u16,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ServerConfig::default(),
        };

        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(name) = &self.name {
            config.server_name = name.clone();
        }
        if let Some(password) = &self.password {
            config.game_password = password.clone();
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(tick_rate) = self.tick_rate {
            config.tick_rate = tick_rate;
        }
        if let Some(master) = &self.master {
            config.master = Some(master.clone());
            config.advertise = true;
        }
        if self.no_lan {
            config.lan_discovery = false;
        }
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<ServerConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("cannot read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.server_config()?;
    let world = JournalWorld::new(args.map_width, args.map_height);

    let mut server = GameServer::new(config, world, Box::new(NoContent))?;
    log::info!("Server started on {}", server.local_addr());
    if let Some(addr) = server.discovery_addr() {
        log::info!("Answering discovery queries on {}", addr);
    }

    let running = server.running();
    watch_interrupt(Arc::clone(&running))?;

    let mut last_stats = Instant::now();
    while running.load(Ordering::SeqCst) {
        server.tick_once();

        for event in server.drain_events() {
            log_event(&event);
        }

        if last_stats.elapsed() >= STATS_INTERVAL {
            last_stats = Instant::now();
            let stats = server.stats();
            log::info!(
                "frame {} | {}/{} clients ({} active) | sent {} B, received {} B",
                stats.frame,
                stats.sessions,
                stats.max_clients,
                stats.active,
                stats.network.bytes_sent,
                stats.network.bytes_received
            );
        }

        thread::sleep(server.until_next_tick().min(MAX_IDLE));
    }

    log::info!("Server shutting down");
    server.shutdown_connections();
    Ok(())
}

fn log_event(event: &ServerEvent) {
    match event {
        ServerEvent::ClientConnected { addr } => {
            log::info!("Connection from {}", addr);
        }
        ServerEvent::ClientJoined { index, name } => {
            log::info!("Client #{} joined as '{}'", index, name);
        }
        ServerEvent::ClientActive { index } => {
            log::info!("Client #{} is in sync", index);
        }
        ServerEvent::ClientDisconnected { index, reason } => {
            log::info!("Client #{} {}", index, reason.as_str());
        }
        ServerEvent::ConnectionRefused { addr, reason } => {
            log::warn!("Connection refused to {}: {}", addr, reason);
        }
        ServerEvent::Chat { from, message, .. } => {
            log::info!("[chat] #{}: {}", from, message);
        }
        ServerEvent::Error { message } => {
            log::error!("{}", message);
        }
    }
}

/// Clears `running` on Ctrl-C so the loop can say goodbye to its clients.
fn watch_interrupt(running: Arc<AtomicBool>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    thread::spawn(move || {
        match runtime.block_on(tokio::signal::ctrl_c()) {
            Ok(()) => {
                log::info!("Interrupted");
                running.store(false, Ordering::SeqCst);
            }
            Err(e) => log::warn!("cannot listen for Ctrl-C: {}", e),
        }
    });
    Ok(())
}
