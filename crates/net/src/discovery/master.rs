use std::collections::BTreeMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use crate::discovery::AdvertiseSettings;
use crate::error::NetworkError;
use crate::net::{
    HEADER_SIZE, MASTER_SERVER_VERSION, MASTER_SERVER_WELCOME, NAME_LENGTH, Packet, PacketError,
    SEND_MTU, UdpPacketType,
};

const LIST_ENTRY_SIZE: usize = 4 + 2;
const LIST_PER_PACKET: usize = (SEND_MTU - HEADER_SIZE - 3) / LIST_ENTRY_SIZE;

/// Refreshes a server may miss before the master forgets it.
const MISSED_REFRESHES: u32 = 2;

/// Rendezvous bookkeeping: which game servers registered and when.
pub struct MasterRegistry {
    servers: BTreeMap<SocketAddrV4, Instant>,
    ttl: Duration,
}

impl MasterRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self {
            servers: BTreeMap::new(),
            ttl,
        }
    }

    /// Time-to-live that keeps servers advertising with `settings` listed
    /// across a lost refresh.
    pub fn ttl_for(settings: &AdvertiseSettings, tick_rate: u32) -> Duration {
        settings.refresh_period(tick_rate) * MISSED_REFRESHES
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn servers(&self) -> impl Iterator<Item = SocketAddrV4> + '_ {
        self.servers.keys().copied()
    }

    /// Handles one datagram and returns the replies for its sender.
    pub fn handle(
        &mut self,
        packet: &mut Packet,
        from: SocketAddr,
        now: Instant,
    ) -> Result<Vec<Packet>, NetworkError> {
        let kind = UdpPacketType::try_from(packet.kind())?;
        match kind {
            UdpPacketType::ServerRegister => {
                let welcome = packet.read_string(NAME_LENGTH)?;
                let version = packet.read_u8()?;
                let port = packet.read_u16()?;
                if welcome != MASTER_SERVER_WELCOME || version != MASTER_SERVER_VERSION {
                    log::debug!("bad registration from {} ({:?} v{})", from, welcome, version);
                    return Ok(Vec::new());
                }

                let SocketAddr::V4(v4) = from else {
                    log::debug!("ignoring IPv6 registration from {}", from);
                    return Ok(Vec::new());
                };
                let game_addr = SocketAddrV4::new(*v4.ip(), port);
                if self.servers.insert(game_addr, now).is_none() {
                    log::info!("registered game server {}", game_addr);
                }
                Ok(vec![Packet::new(UdpPacketType::MasterAckRegister)])
            }
            UdpPacketType::ServerUnregister => {
                let _version = packet.read_u8()?;
                let port = packet.read_u16()?;
                if let SocketAddr::V4(v4) = from {
                    let game_addr = SocketAddrV4::new(*v4.ip(), port);
                    if self.servers.remove(&game_addr).is_some() {
                        log::info!("unregistered game server {}", game_addr);
                    }
                }
                Ok(Vec::new())
            }
            UdpPacketType::ClientGetList => {
                let version = packet.read_u8()?;
                if version != MASTER_SERVER_VERSION {
                    return Ok(Vec::new());
                }
                Ok(self.list_packets()?)
            }
            other => {
                log::debug!("master ignoring {:?} from {}", other, from);
                Ok(Vec::new())
            }
        }
    }

    pub fn list_packets(&self) -> Result<Vec<Packet>, PacketError> {
        let servers: Vec<SocketAddrV4> = self.servers().collect();
        let mut packets = Vec::new();

        for chunk in servers.chunks(LIST_PER_PACKET) {
            packets.push(Self::list_packet(chunk)?);
        }
        if packets.is_empty() {
            packets.push(Self::list_packet(&[])?);
        }
        Ok(packets)
    }

    fn list_packet(servers: &[SocketAddrV4]) -> Result<Packet, PacketError> {
        let mut packet = Packet::new(UdpPacketType::MasterResponseList);
        packet.write_u8(MASTER_SERVER_VERSION)?;
        packet.write_u16(servers.len() as u16)?;
        for server in servers {
            packet.write_u32(u32::from(*server.ip()))?;
            packet.write_u16(server.port())?;
        }
        Ok(packet)
    }

    /// Drops servers that stopped re-registering.
    pub fn expire(&mut self, now: Instant) -> usize {
        let before = self.servers.len();
        let ttl = self.ttl;
        self.servers
            .retain(|_, last_seen| now.saturating_duration_since(*last_seen) <= ttl);
        before - self.servers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;
    use crate::discovery::{register_packet, unregister_packet};
    use crate::net::DEFAULT_TICK_RATE;

    fn wire(packet: Packet) -> Packet {
        Packet::from_wire(packet.into_wire()).unwrap()
    }

    #[test]
    fn test_register_list_unregister() {
        let mut master = MasterRegistry::new(Duration::from_secs(60));
        let now = Instant::now();
        let from = SocketAddr::from(([10, 0, 0, 5], 50000));

        let replies = master
            .handle(&mut wire(register_packet(3979).unwrap()), from, now)
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].kind(), u8::from(UdpPacketType::MasterAckRegister));

        let mut request = Packet::new(UdpPacketType::ClientGetList);
        request.write_u8(MASTER_SERVER_VERSION).unwrap();
        let replies = master.handle(&mut wire(request), from, now).unwrap();
        assert_eq!(replies.len(), 1);
        let mut list = wire(replies.into_iter().next().unwrap());
        assert_eq!(list.read_u8().unwrap(), MASTER_SERVER_VERSION);
        assert_eq!(list.read_u16().unwrap(), 1);
        assert_eq!(Ipv4Addr::from(list.read_u32().unwrap()), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(list.read_u16().unwrap(), 3979);

        master
            .handle(&mut wire(unregister_packet(3979).unwrap()), from, now)
            .unwrap();
        assert!(master.is_empty());
    }

    #[test]
    fn test_wrong_welcome_is_ignored() {
        let mut master = MasterRegistry::new(Duration::from_secs(60));
        let mut packet = Packet::new(UdpPacketType::ServerRegister);
        packet.write_str("SomethingElse").unwrap();
        packet.write_u8(MASTER_SERVER_VERSION).unwrap();
        packet.write_u16(1).unwrap();

        let replies = master
            .handle(&mut wire(packet), SocketAddr::from(([1, 2, 3, 4], 5)), Instant::now())
            .unwrap();
        assert!(replies.is_empty());
        assert!(master.is_empty());
    }

    #[test]
    fn test_large_lists_are_split() {
        let mut master = MasterRegistry::new(Duration::from_secs(60));
        let now = Instant::now();
        for i in 0..(LIST_PER_PACKET as u16 + 10) {
            let from = SocketAddr::from(([10, 0, (i >> 8) as u8, i as u8], 1));
            master
                .handle(&mut wire(register_packet(i).unwrap()), from, now)
                .unwrap();
        }

        let packets = master.list_packets().unwrap();
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| p.size() <= SEND_MTU));
    }

    #[test]
    fn test_default_advertisers_stay_listed() {
        let settings = AdvertiseSettings::default();
        let period = settings.refresh_period(DEFAULT_TICK_RATE);
        let ttl = MasterRegistry::ttl_for(&settings, DEFAULT_TICK_RATE);
        let mut master = MasterRegistry::new(ttl);
        let from = SocketAddr::from(([10, 0, 0, 9], 50000));
        let start = Instant::now();

        master
            .handle(&mut wire(register_packet(3979).unwrap()), from, start)
            .unwrap();
        let refresh = start + period + Duration::from_secs(30);
        assert_eq!(master.expire(refresh), 0);
        master
            .handle(&mut wire(register_packet(3979).unwrap()), from, refresh)
            .unwrap();
        assert_eq!(master.expire(refresh + period + Duration::from_secs(30)), 0);
        assert_eq!(master.len(), 1);

        assert_eq!(master.expire(refresh + master.ttl() + Duration::from_secs(1)), 1);
    }

    #[test]
    fn test_expiry() {
        let mut master = MasterRegistry::new(Duration::from_secs(10));
        let start = Instant::now();
        master
            .handle(
                &mut wire(register_packet(1).unwrap()),
                SocketAddr::from(([10, 0, 0, 1], 9)),
                start,
            )
            .unwrap();

        assert_eq!(master.expire(start + Duration::from_secs(5)), 0);
        assert_eq!(master.expire(start + Duration::from_secs(11)), 1);
    }
}
