use std::net::{SocketAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};

use crate::discovery::AdvertiseSettings;
use crate::net::{DEFAULT_PORT, DEFAULT_TICK_RATE, MASTER_SERVER_PORT, REVISION};
use crate::sync::FrameSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub server_name: String,
    pub player_name: String,
    pub revision: String,
    pub max_clients: usize,
    pub max_companies: u8,
    pub max_spectators: u8,
    pub game_password: String,
    pub tick_rate: u32,
    pub frame: FrameSettings,
    pub map_chunks_per_tick: usize,
    pub lan_discovery: bool,
    pub advertise: bool,
    pub master: Option<String>,
    pub advertise_timing: AdvertiseSettings,
    pub dedicated: bool,
    pub server_lang: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: DEFAULT_PORT,
            server_name: "Unnamed Server".into(),
            player_name: "Server".into(),
            revision: REVISION.into(),
            max_clients: 10,
            max_companies: 8,
            max_spectators: 10,
            game_password: String::new(),
            tick_rate: DEFAULT_TICK_RATE,
            frame: FrameSettings::default(),
            map_chunks_per_tick: 10,
            lan_discovery: true,
            advertise: false,
            master: None,
            advertise_timing: AdvertiseSettings::default(),
            dedicated: true,
            server_lang: 0,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    /// Master address with the default master port filled in.
    pub fn master_addr(&self) -> Option<SocketAddr> {
        let master = self.master.as_deref()?;
        let resolved = if master.contains(':') {
            master.to_socket_addrs()
        } else {
            (master, MASTER_SERVER_PORT).to_socket_addrs()
        };

        match resolved {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                log::warn!("cannot resolve master server {}: {}", master, e);
                None
            }
        }
    }
}
