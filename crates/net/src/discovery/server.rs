use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use super::advertise::{AdvertiseAction, AdvertiseSettings, Advertiser};
use super::content::{ContentId, ContentResolver, MAX_GRF_COUNT};
use super::game_info::GameInfo;
use crate::error::NetworkError;
use crate::net::{
    COMPANY_INFO_VERSION, Dispatch, Dispatcher, MASTER_SERVER_VERSION, MASTER_SERVER_WELCOME,
    NAME_LENGTH, NetworkStats, Packet, PacketError, SEND_MTU, UdpEndpoint, UdpPacketType,
};
use crate::sim::CompanyInfo;

const REPLY_SLACK: usize = 4;

type Handlers = Dispatcher<UdpPacketType, DiscoveryServer, SocketAddr>;

/// Answers LAN and direct queries on the game port and keeps the server
/// registered with the master.
pub struct DiscoveryServer {
    endpoint: UdpEndpoint,
    handlers: Arc<Handlers>,
    info: GameInfo,
    companies: Vec<CompanyInfo>,
    resolver: Box<dyn ContentResolver>,
    advertiser: Advertiser,
    master: Option<SocketAddr>,
    game_port: u16,
}

impl DiscoveryServer {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        game_port: u16,
        resolver: Box<dyn ContentResolver>,
        master: Option<SocketAddr>,
        advertise: AdvertiseSettings,
    ) -> io::Result<Self> {
        let endpoint = UdpEndpoint::bind(addr)?;
        let handlers = Handlers::new()
            .on(UdpPacketType::ClientFindServer, Self::handle_find_server)
            .on(UdpPacketType::ClientDetailInfo, Self::handle_detail_info)
            .on(UdpPacketType::ClientGetNewGrfs, Self::handle_get_newgrfs)
            .on(UdpPacketType::MasterAckRegister, Self::handle_master_ack);

        Ok(Self {
            endpoint,
            handlers: Arc::new(handlers),
            info: GameInfo::default(),
            companies: Vec::new(),
            resolver,
            advertiser: Advertiser::new(advertise, master.is_some()),
            master,
            game_port,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn stats(&self) -> NetworkStats {
        self.endpoint.stats()
    }

    pub fn update(&mut self, info: GameInfo, companies: Vec<CompanyInfo>) {
        self.info = info;
        self.companies = companies;
    }

    pub fn poll(&mut self) {
        let packets = match self.endpoint.receive() {
            Ok(packets) => packets,
            Err(e) => {
                log::warn!("discovery socket error: {}", e);
                return;
            }
        };

        let handlers = Arc::clone(&self.handlers);
        for (mut packet, addr) in packets {
            match handlers.dispatch(self, addr, &mut packet) {
                Ok(Dispatch::Handled) => {}
                Ok(Dispatch::Unhandled(kind)) => {
                    log::debug!("ignoring {:?} from {}", kind, addr);
                }
                Err(e) => log::debug!("bad discovery packet from {}: {}", addr, e),
            }
        }
    }

    pub fn tick(&mut self, frame: u32) {
        if let Some(action) = self.advertiser.poll(frame) {
            self.send_to_master(action);
        }
    }

    pub fn set_advertise(&mut self, enabled: bool) {
        if self.master.is_none() {
            return;
        }
        if let Some(action) = self.advertiser.set_enabled(enabled) {
            self.send_to_master(action);
        }
    }

    fn send_to_master(&mut self, action: AdvertiseAction) {
        let Some(master) = self.master else {
            return;
        };

        let packet = match action {
            AdvertiseAction::Register => register_packet(self.game_port),
            AdvertiseAction::Unregister => unregister_packet(self.game_port),
        };

        match packet {
            Ok(packet) => {
                log::info!("{:?} with master server {}", action, master);
                if let Err(e) = self.endpoint.send_to(&packet, master) {
                    log::warn!("failed to reach master server {}: {}", master, e);
                }
            }
            Err(e) => log::error!("failed to build {:?} packet: {}", action, e),
        }
    }

    fn reply(&mut self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.endpoint.send_to(packet, addr) {
            log::debug!("failed to answer {}: {}", addr, e);
        }
    }

    fn handle_find_server(&mut self, addr: SocketAddr, _packet: &mut Packet) -> Result<(), NetworkError> {
        let mut reply = Packet::new(UdpPacketType::ServerResponse);
        self.info.write(&mut reply)?;
        self.reply(&reply, addr);
        Ok(())
    }

    fn handle_detail_info(&mut self, addr: SocketAddr, _packet: &mut Packet) -> Result<(), NetworkError> {
        let reply = detail_packet(&self.companies)?;
        self.reply(&reply, addr);
        Ok(())
    }

    fn handle_get_newgrfs(&mut self, addr: SocketAddr, packet: &mut Packet) -> Result<(), NetworkError> {
        let count = packet.read_u8()? as usize;
        if count > MAX_GRF_COUNT {
            log::debug!("{} asked for {} content names, ignoring", addr, count);
            return Ok(());
        }

        let mut found = Vec::new();
        for _ in 0..count {
            let id = ContentId::read(packet)?;
            if let Some(name) = self.resolver.find(&id) {
                found.push((id, name));
            }
        }

        if let Some(reply) = newgrfs_packet(&found)? {
            self.reply(&reply, addr);
        }
        Ok(())
    }

    fn handle_master_ack(&mut self, addr: SocketAddr, _packet: &mut Packet) -> Result<(), NetworkError> {
        if self.master != Some(addr) {
            log::debug!("ignoring registration ack from {}", addr);
            return Ok(());
        }

        log::info!("master server {} acknowledged registration", addr);
        if let Some(action) = self.advertiser.on_ack() {
            self.send_to_master(action);
        }
        Ok(())
    }
}

pub fn register_packet(game_port: u16) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(UdpPacketType::ServerRegister);
    packet.write_str(MASTER_SERVER_WELCOME)?;
    packet.write_u8(MASTER_SERVER_VERSION)?;
    packet.write_u16(game_port)?;
    Ok(packet)
}

pub fn unregister_packet(game_port: u16) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(UdpPacketType::ServerUnregister);
    packet.write_u8(MASTER_SERVER_VERSION)?;
    packet.write_u16(game_port)?;
    Ok(packet)
}

/// Company details, cut off before the MTU.
pub fn detail_packet(companies: &[CompanyInfo]) -> Result<Packet, PacketError> {
    let budget = SEND_MTU - REPLY_SLACK;
    let mut size = 3 + 2;
    let fitting = companies
        .iter()
        .take_while(|c| {
            size += c.wire_size();
            size <= budget
        })
        .count();

    let mut packet = Packet::new(UdpPacketType::ServerDetailInfo);
    packet.write_u8(COMPANY_INFO_VERSION)?;
    packet.write_u8(fitting as u8)?;
    for company in &companies[..fitting] {
        company.write(&mut packet)?;
    }
    Ok(packet)
}

/// Resolved content names, stopping before the reply would exceed the MTU.
/// Returns `None` when there is nothing to tell.
pub fn newgrfs_packet(found: &[(ContentId, String)]) -> Result<Option<Packet>, PacketError> {
    if found.is_empty() {
        return Ok(None);
    }

    let budget = SEND_MTU - REPLY_SLACK;
    let mut size = 3 + 1;
    let fitting = found
        .iter()
        .take_while(|(_, name)| {
            size += ContentId::WIRE_SIZE + name.len().min(NAME_LENGTH) + 1;
            size <= budget
        })
        .count();

    let mut packet = Packet::new(UdpPacketType::ServerNewGrfs);
    packet.write_u8(fitting as u8)?;
    for (id, name) in &found[..fitting] {
        id.write(&mut packet)?;
        let mut cut = name.len().min(NAME_LENGTH);
        while !name.is_char_boundary(cut) {
            cut -= 1;
        }
        packet.write_str(&name[..cut])?;
    }
    Ok(Some(packet))
}
