use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::packet::{Packet, SEND_MTU};
use super::stats::NetworkStats;

/// Unreliable datagram endpoint used for discovery and advertisement.
pub struct UdpEndpoint {
    socket: UdpSocket,
    local_addr: SocketAddr,
    stats: NetworkStats,
    recv_buffer: [u8; SEND_MTU],
}

impl UdpEndpoint {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        socket.set_broadcast(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self {
            socket,
            local_addr,
            stats: NetworkStats::default(),
            recv_buffer: [0u8; SEND_MTU],
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn send_to(&mut self, packet: &Packet, addr: SocketAddr) -> io::Result<usize> {
        let bytes = self.socket.send_to(packet.wire(), addr)?;
        self.stats.record_sent(bytes);
        Ok(bytes)
    }

    /// Drains the socket. Datagrams that fail to decode are dropped.
    pub fn receive(&mut self) -> io::Result<Vec<(Packet, SocketAddr)>> {
        let mut packets = Vec::new();

        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => match Packet::from_wire(self.recv_buffer[..size].to_vec()) {
                    Ok(packet) => {
                        self.stats.record_received(size);
                        packets.push((packet, addr));
                    }
                    Err(e) => {
                        log::debug!("dropping datagram from {}: {}", addr, e);
                        continue;
                    }
                },
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(packets)
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::{Duration, Instant};

    use super::*;

    #[test]
    fn test_garbage_datagrams_are_skipped() {
        let mut server = UdpEndpoint::bind("127.0.0.1:0").unwrap();
        let mut client = UdpEndpoint::bind("127.0.0.1:0").unwrap();

        client
            .socket
            .send_to(&[0xFF, 0xFF, 0x01], server.local_addr())
            .unwrap();
        let mut valid = Packet::new(0u8);
        valid.write_u8(1).unwrap();
        client.send_to(&valid, server.local_addr()).unwrap();

        let start = Instant::now();
        let mut received = Vec::new();
        while received.is_empty() && start.elapsed() < Duration::from_millis(500) {
            received = server.receive().unwrap();
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(received.len(), 1);
        assert_eq!(received[0].0, valid);
        assert_eq!(received[0].1, client.local_addr());
        assert_eq!(server.stats().packets_received, 1);
    }
}
