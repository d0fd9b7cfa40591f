use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use super::packet::{HEADER_SIZE, Packet, PacketError, SEND_MTU};
use super::stats::NetworkStats;
use crate::error::NetworkError;

const READ_CHUNK: usize = 4096;
/// Bytes taken from one socket per `receive` call, so a flooding peer
/// cannot hold up the others.
const READ_BUDGET: usize = 16 * READ_CHUNK;
const REJECT_WRITE_TIMEOUT_MS: u64 = 100;

/// Reliable, ordered packet stream over a non-blocking TCP socket.
pub struct TcpChannel {
    stream: TcpStream,
    peer_addr: SocketAddr,
    outbound: VecDeque<Vec<u8>>,
    write_offset: usize,
    inbound: Vec<u8>,
    eof: bool,
    stats: NetworkStats,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;

        Ok(Self {
            stream,
            peer_addr,
            outbound: VecDeque::new(),
            write_offset: 0,
            inbound: Vec::with_capacity(READ_CHUNK),
            eof: false,
            stats: NetworkStats::default(),
        })
    }

    pub fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        Self::new(stream)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn stats(&self) -> NetworkStats {
        self.stats
    }

    pub fn send_packet(&mut self, packet: Packet) {
        self.stats.record_sent(packet.size());
        self.outbound.push_back(packet.into_wire());
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Writes queued packets until the socket would block. A partially
    /// written packet stays at the front and resumes where it stopped.
    pub fn flush(&mut self) -> Result<(), NetworkError> {
        while let Some(front) = self.outbound.front() {
            match self.stream.write(&front[self.write_offset..]) {
                Ok(0) => return Err(NetworkError::ConnectionLost),
                Ok(written) => {
                    self.write_offset += written;
                    if self.write_offset == front.len() {
                        self.outbound.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("write to {} failed: {}", self.peer_addr, e);
                    return Err(NetworkError::ConnectionLost);
                }
            }
        }

        Ok(())
    }

    /// Returns the complete packets received so far, reading at most
    /// `READ_BUDGET` new bytes. After the peer closes,
    /// packets already buffered are still returned once and the next call
    /// reports `ConnectionLost`.
    pub fn receive(&mut self) -> Result<Vec<Packet>, NetworkError> {
        if self.eof && self.inbound.is_empty() {
            return Err(NetworkError::ConnectionLost);
        }

        let mut chunk = [0u8; READ_CHUNK];
        let mut budget = READ_BUDGET;
        while !self.eof && budget > 0 {
            match self.stream.read(&mut chunk) {
                Ok(0) => self.eof = true,
                Ok(read) => {
                    self.inbound.extend_from_slice(&chunk[..read]);
                    budget = budget.saturating_sub(read);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("read from {} failed: {}", self.peer_addr, e);
                    return Err(NetworkError::ConnectionLost);
                }
            }
        }

        let mut packets = Vec::new();
        while self.inbound.len() >= 2 {
            let size = u16::from_le_bytes([self.inbound[0], self.inbound[1]]) as usize;
            if !(HEADER_SIZE..=SEND_MTU).contains(&size) {
                return Err(PacketError::InvalidSize(size).into());
            }
            if self.inbound.len() < size {
                break;
            }

            let bytes: Vec<u8> = self.inbound.drain(..size).collect();
            self.stats.record_received(size);
            packets.push(Packet::from_wire(bytes)?);
        }

        if packets.is_empty() && self.eof {
            self.inbound.clear();
            return Err(NetworkError::ConnectionLost);
        }

        Ok(packets)
    }

    pub fn close(&mut self) {
        let _ = self.flush();
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Writes one packet to a connection that never gets a channel, then drops it.
pub fn reject(mut stream: TcpStream, packet: &Packet) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_write_timeout(Some(Duration::from_millis(REJECT_WRITE_TIMEOUT_MS)))?;
    stream.write_all(packet.wire())?;
    stream.shutdown(Shutdown::Both)
}
