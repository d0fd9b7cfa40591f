use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};

use framelock::net::MASTER_SERVER_PORT;
use framelock::{
    ClientConfig, ClientEvent, ConnectTarget, DEFAULT_PORT, DiscoveryClient, JournalWorld,
    NetworkClient, NoContent, REVISION, SortKey,
};

#[derive(Parser)]
#[command(name = "framelock-client")]
#[command(about = "Headless lockstep client and server browser")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a game and follow it until the connection closes
    Join {
        #[arg(help = "host[:port][#company]")]
        target: String,

        #[arg(short, long, default_value = "Player")]
        name: String,

        #[arg(long, help = "Game password, sent when the server asks")]
        password: Option<String>,

        #[arg(long, help = "Company password, sent when the server asks")]
        company_password: Option<String>,

        #[arg(long, default_value_t = 0, help = "Quit after this many frames (0 runs until closed)")]
        frames: u32,
    },
    /// Ask specific servers for their game info
    Query {
        #[arg(required = true)]
        servers: Vec<String>,

        #[arg(long, help = "Also request company details")]
        details: bool,

        #[arg(long, default_value_t = 2)]
        wait: u64,
    },
    /// Broadcast a search on the local network
    Lan {
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        #[arg(long, value_enum, default_value_t = SortArg::Name)]
        sort: SortArg,

        #[arg(long, default_value_t = 2)]
        wait: u64,
    },
    /// Fetch the server list from a master server and query every entry
    Master {
        #[arg(help = "host[:port]")]
        master: String,

        #[arg(long, value_enum, default_value_t = SortArg::Name)]
        sort: SortArg,

        #[arg(long, default_value_t = 3)]
        wait: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum SortArg {
    Name,
    Clients,
    MapSize,
    Date,
    Years,
    Joinability,
}

impl From<SortArg> for SortKey {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Name => SortKey::Name,
            SortArg::Clients => SortKey::Clients,
            SortArg::MapSize => SortKey::MapSize,
            SortArg::Date => SortKey::Date,
            SortArg::Years => SortKey::Years,
            SortArg::Joinability => SortKey::Joinability,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Join {
            target,
            name,
            password,
            company_password,
            frames,
        } => {
            let target = ConnectTarget::parse(&target)?;
            let mut config = ClientConfig {
                name,
                game_password: password.unwrap_or_default(),
                company_password: company_password.unwrap_or_default(),
                ..ClientConfig::default()
            };
            if let Some(company) = target.company {
                config.playas = company;
            }
            join(&target, config, frames)
        }
        Command::Query {
            servers,
            details,
            wait,
        } => {
            let mut browser = browser()?;
            let mut addrs = Vec::new();
            for server in &servers {
                let addr = resolve(server, DEFAULT_PORT)?;
                browser.query_server(addr);
                if details {
                    browser.request_details(addr);
                }
                addrs.push(addr);
            }
            collect(&mut browser, Duration::from_secs(wait));
            print_servers(&browser, SortKey::Name);
            if details {
                for addr in addrs {
                    print_details(&browser, addr);
                }
            }
            Ok(())
        }
        Command::Lan { port, sort, wait } => {
            let mut browser = browser()?;
            browser.search_lan(port);
            collect(&mut browser, Duration::from_secs(wait));
            print_servers(&browser, sort.into());
            Ok(())
        }
        Command::Master { master, sort, wait } => {
            let mut browser = browser()?;
            browser.query_master(resolve(&master, MASTER_SERVER_PORT)?)?;
            collect(&mut browser, Duration::from_secs(wait));
            print_servers(&browser, sort.into());
            Ok(())
        }
    }
}

fn resolve(input: &str, default_port: u16) -> Result<SocketAddr> {
    let mut target = ConnectTarget::parse(input)?;
    if !input.contains(':') || input.ends_with(']') {
        target.port = default_port;
    }
    target
        .resolve()?
        .with_context(|| format!("cannot resolve {}", target.host))
}

fn join(target: &ConnectTarget, config: ClientConfig, frames: u32) -> Result<()> {
    let addr = target
        .resolve()?
        .with_context(|| format!("cannot resolve {}", target.host))?;
    let mut client = NetworkClient::connect(addr, config, JournalWorld::default())?;

    loop {
        let result = client.update();
        for event in client.drain_events() {
            log_event(&event);
        }
        if let Err(e) = result {
            bail!("connection to {} ended: {}", addr, e);
        }
        if client.status().is_closed() {
            break;
        }
        if frames > 0 && client.frame() >= frames {
            log::info!("Ran {} frames, leaving", client.frame());
            client.quit();
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }

    let stats = client.stats();
    log::info!(
        "Sent {} packets ({} B), received {} packets ({} B)",
        stats.packets_sent,
        stats.bytes_sent,
        stats.packets_received,
        stats.bytes_received
    );
    Ok(())
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::PasswordRequired(kind) => {
            log::warn!("Server wants a {:?} password, pass it on the command line", kind);
        }
        ClientEvent::Joined { index } => log::info!("Joined as client #{}", index),
        ClientEvent::Waiting { ahead } => log::info!("Waiting for the map, {} ahead", ahead),
        ClientEvent::MapProgress { received, total } => {
            log::debug!("Map {}/{} bytes", received, total);
        }
        ClientEvent::MapLoaded { frame } => log::info!("Map loaded at frame {}", frame),
        ClientEvent::Active { frame } => log::info!("In sync at frame {}", frame),
        ClientEvent::ClientInfo {
            index,
            playas,
            name,
        } => log::info!("Client #{} is '{}' (company {})", index, name, playas),
        ClientEvent::ClientJoined { index } => log::info!("Client #{} joined", index),
        ClientEvent::ClientQuit { index, reason } => {
            log::info!("Client #{} left ({})", index, reason);
        }
        ClientEvent::Chat { from, message, .. } => log::info!("[chat] #{}: {}", from, message),
        ClientEvent::CompanyInfo(companies) => {
            for company in companies {
                log::info!("Company {}: {}", company.id, company.name);
            }
        }
        ClientEvent::Desync { frame } => log::error!("Desync at frame {}", frame),
        ClientEvent::ServerFull => log::warn!("Server is full"),
        ClientEvent::Error(code) => log::error!("Server error: {}", code),
        ClientEvent::Shutdown => log::info!("Server is shutting down"),
        ClientEvent::NewGame => log::info!("Server started a new game"),
        ClientEvent::Disconnected(reason) => log::info!("Disconnected: {:?}", reason),
    }
}

fn browser() -> Result<DiscoveryClient> {
    Ok(DiscoveryClient::bind("0.0.0.0:0", REVISION, Box::new(NoContent))?)
}

fn collect(browser: &mut DiscoveryClient, wait: Duration) {
    let start = Instant::now();
    while start.elapsed() < wait {
        browser.poll();
        thread::sleep(Duration::from_millis(10));
    }
}

fn print_servers(browser: &DiscoveryClient, key: SortKey) {
    let servers = browser.servers().sorted(key, false);
    if servers.is_empty() {
        println!("no servers found");
        return;
    }

    for entry in servers {
        if !entry.online {
            println!("{:<22} offline", entry.addr);
            continue;
        }
        let info = &entry.info;
        let flag = match (entry.version_compatible, entry.compatible) {
            (false, _) => "version mismatch",
            (true, false) => "missing content",
            (true, true) if info.use_password => "password",
            _ => "",
        };
        println!(
            "{:<22} {:<32} {:>2}/{:<2} clients {:>2}/{:<2} companies {}x{} {}",
            entry.addr,
            info.server_name,
            info.clients_on,
            info.clients_max,
            info.companies_on,
            info.companies_max,
            info.map_width,
            info.map_height,
            flag
        );
        for content in entry.content.iter().filter(|c| !c.found) {
            println!("    missing {} {}", content.id, content.name);
        }
    }
}

fn print_details(browser: &DiscoveryClient, addr: SocketAddr) {
    let Some(companies) = browser.details(addr) else {
        println!("{}: no company details", addr);
        return;
    };
    println!("{}:", addr);
    for company in companies {
        println!(
            "    {:>2} {:<32} since {} money {} {}",
            company.id,
            company.name,
            company.inaugurated_year,
            company.money,
            if company.has_password { "(locked)" } else { "" }
        );
    }
}
