use std::collections::HashMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;

use super::content::{ContentId, ContentResolver, NameCache};
use super::game_info::GameInfo;
use super::server_list::{ContentEntry, ServerList};
use crate::error::NetworkError;
use crate::net::{
    COMPANY_INFO_VERSION, Dispatch, Dispatcher, MASTER_SERVER_VERSION, NAME_LENGTH, Packet,
    PacketError, SEND_MTU, UdpEndpoint, UdpPacketType, version_compatible,
};
use crate::sim::CompanyInfo;

/// Ids per GET_NEWGRFS request, sized so the answer always fits the MTU.
pub const NEWGRF_BATCH: usize = (SEND_MTU - 4) / (ContentId::WIRE_SIZE + NAME_LENGTH);

type Handlers = Dispatcher<UdpPacketType, DiscoveryClient, SocketAddr>;

pub struct DiscoveryClient {
    endpoint: UdpEndpoint,
    handlers: Arc<Handlers>,
    revision: String,
    servers: ServerList,
    names: NameCache,
    resolver: Box<dyn ContentResolver>,
    details: HashMap<SocketAddr, Vec<CompanyInfo>>,
}

impl DiscoveryClient {
    pub fn bind<A: ToSocketAddrs>(
        addr: A,
        revision: impl Into<String>,
        resolver: Box<dyn ContentResolver>,
    ) -> io::Result<Self> {
        let handlers = Handlers::new()
            .on(UdpPacketType::ServerResponse, Self::handle_server_response)
            .on(UdpPacketType::ServerNewGrfs, Self::handle_server_newgrfs)
            .on(UdpPacketType::MasterResponseList, Self::handle_master_list)
            .on(UdpPacketType::ServerDetailInfo, Self::handle_detail_info);

        Ok(Self {
            endpoint: UdpEndpoint::bind(addr)?,
            handlers: Arc::new(handlers),
            revision: revision.into(),
            servers: ServerList::new(),
            names: NameCache::new(),
            resolver,
            details: HashMap::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn servers(&self) -> &ServerList {
        &self.servers
    }

    pub fn names(&self) -> &NameCache {
        &self.names
    }

    pub fn details(&self, addr: SocketAddr) -> Option<&[CompanyInfo]> {
        self.details.get(&addr).map(Vec::as_slice)
    }

    fn send(&mut self, packet: &Packet, addr: SocketAddr) {
        if let Err(e) = self.endpoint.send_to(packet, addr) {
            log::debug!("failed to send {:?} to {}: {}", packet.kind(), addr, e);
        }
    }

    pub fn search_lan(&mut self, port: u16) {
        self.servers.mark_all_offline();
        let broadcast = SocketAddr::from((Ipv4Addr::BROADCAST, port));
        log::info!("searching for servers on {}", broadcast);
        self.send(&Packet::new(UdpPacketType::ClientFindServer), broadcast);
    }

    /// Adds `addr` as an offline entry until it answers.
    pub fn query_server(&mut self, addr: SocketAddr) {
        self.servers.entry(addr);
        self.send(&Packet::new(UdpPacketType::ClientFindServer), addr);
    }

    pub fn request_details(&mut self, addr: SocketAddr) {
        self.send(&Packet::new(UdpPacketType::ClientDetailInfo), addr);
    }

    pub fn query_master(&mut self, master: SocketAddr) -> Result<(), PacketError> {
        let mut packet = Packet::new(UdpPacketType::ClientGetList);
        packet.write_u8(MASTER_SERVER_VERSION)?;
        log::info!("requesting server list from {}", master);
        self.send(&packet, master);
        Ok(())
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

    fn request_names(&mut self, addr: SocketAddr, ids: &[ContentId]) -> Result<(), PacketError> {
        for batch in ids.chunks(NEWGRF_BATCH) {
            let mut packet = Packet::new(UdpPacketType::ClientGetNewGrfs);
            packet.write_u8(batch.len() as u8)?;
            for id in batch {
                id.write(&mut packet)?;
            }
            self.send(&packet, addr);
        }
        Ok(())
    }

    fn handle_server_response(&mut self, addr: SocketAddr, packet: &mut Packet) -> Result<(), NetworkError> {
        let info = GameInfo::read(packet)?;

        let mut content = Vec::with_capacity(info.content.len());
        let mut unknown = Vec::new();
        for &id in &info.content {
            match self.resolver.find(&id) {
                Some(name) => content.push(ContentEntry {
                    id,
                    name,
                    found: true,
                }),
                None => {
                    if self.names.is_unknown(&id) {
                        unknown.push(id);
                    }
                    content.push(ContentEntry {
                        id,
                        name: self.names.get_or_placeholder(id).to_string(),
                        found: false,
                    });
                }
            }
        }

        let version_ok = version_compatible(&self.revision, &info.server_revision);
        log::debug!("{} answered: {} ({})", addr, info.server_name, info.server_revision);

        let entry = self.servers.entry(addr);
        entry.version_compatible = version_ok;
        entry.compatible = version_ok && content.iter().all(|c| c.found);
        entry.content = content;
        entry.info = info;
        entry.online = true;
        entry.last_seen = Some(Instant::now());

        if !unknown.is_empty() {
            self.request_names(addr, &unknown)?;
        }
        Ok(())
    }

    fn handle_server_newgrfs(&mut self, _addr: SocketAddr, packet: &mut Packet) -> Result<(), NetworkError> {
        let count = packet.read_u8()?;
        for _ in 0..count {
            let id = ContentId::read(packet)?;
            let name = packet.read_string(NAME_LENGTH)?;
            if self.names.fill(id, &name) {
                self.servers.rename_content(id, &name);
            }
        }
        Ok(())
    }

    fn handle_master_list(&mut self, addr: SocketAddr, packet: &mut Packet) -> Result<(), NetworkError> {
        let version = packet.read_u8()?;
        if version != MASTER_SERVER_VERSION {
            log::debug!("unsupported server list version {} from {}", version, addr);
            return Ok(());
        }

        let count = packet.read_u16()?;
        log::info!("master server {} listed {} servers", addr, count);
        for _ in 0..count {
            let ip = Ipv4Addr::from(packet.read_u32()?);
            let port = packet.read_u16()?;
            self.query_server(SocketAddr::from((ip, port)));
        }
        Ok(())
    }

    fn handle_detail_info(&mut self, addr: SocketAddr, packet: &mut Packet) -> Result<(), NetworkError> {
        let version = packet.read_u8()?;
        if version != COMPANY_INFO_VERSION {
            log::debug!("unsupported company info version {} from {}", version, addr);
            return Ok(());
        }

        let count = packet.read_u8()?;
        let companies = (0..count)
            .map(|_| CompanyInfo::read(packet))
            .collect::<Result<Vec<_>, _>>()?;
        self.details.insert(addr, companies);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_reply_fits() {
        let worst = 3 + 1 + NEWGRF_BATCH * (ContentId::WIRE_SIZE + NAME_LENGTH + 1);
        assert!(worst <= SEND_MTU);
        assert_eq!(NEWGRF_BATCH, 14);
    }
}
