use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tokio::net::UdpSocket;

use framelock::net::{DEFAULT_TICK_RATE, MASTER_SERVER_PORT, SEND_MTU};
use framelock::{AdvertiseSettings, MasterRegistry, Packet};

#[derive(Parser)]
#[command(name = "framelock-master")]
#[command(about = "Master server: keeps the list of advertised game servers")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = MASTER_SERVER_PORT)]
    port: u16,

    #[arg(
        long,
        help = "Seconds before a silent server is dropped (default: two refresh periods of a default server)"
    )]
    ttl: Option<u64>,

    #[arg(long, default_value_t = 60, help = "Seconds between expiry sweeps")]
    sweep: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let socket = UdpSocket::bind((args.bind.as_str(), args.port)).await?;
    log::info!("Master server listening on {}", socket.local_addr()?);

    let ttl = match args.ttl {
        Some(secs) => Duration::from_secs(secs),
        None => MasterRegistry::ttl_for(&AdvertiseSettings::default(), DEFAULT_TICK_RATE),
    };
    log::info!("Dropping servers silent for {} s", ttl.as_secs());
    let mut registry = MasterRegistry::new(ttl);
    let mut sweep = tokio::time::interval(Duration::from_secs(args.sweep.max(1)));
    let mut buffer = [0u8; SEND_MTU];

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buffer) => {
                let (size, from) = match received {
                    Ok(received) => received,
                    Err(e) => {
                        log::debug!("receive failed: {}", e);
                        continue;
                    }
                };
                let mut packet = match Packet::from_wire(buffer[..size].to_vec()) {
                    Ok(packet) => packet,
                    Err(e) => {
                        log::debug!("dropping datagram from {}: {}", from, e);
                        continue;
                    }
                };

                match registry.handle(&mut packet, from, Instant::now()) {
                    Ok(replies) => {
                        for reply in replies {
                            if let Err(e) = socket.send_to(reply.wire(), from).await {
                                log::warn!("failed to answer {}: {}", from, e);
                            }
                        }
                    }
                    Err(e) => log::debug!("bad packet from {}: {}", from, e),
                }
            }
            _ = sweep.tick() => {
                let dropped = registry.expire(Instant::now());
                if dropped > 0 {
                    log::info!("Dropped {} silent servers, {} listed", dropped, registry.len());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Master server shutting down");
                break;
            }
        }
    }

    Ok(())
}
