mod config;
mod events;
mod handlers;
mod packets;

use std::collections::{BTreeMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

pub use config::{ClientConfig, ConnectTarget, TargetError};
pub use events::{ClientCloseReason, ClientEvent, ClientStatus};

use crate::command::Command;
use crate::error::NetworkError;
use crate::net::{
    ChatAction, ClientIndex, CompanyId, DestType, Dispatch, Dispatcher, ErrorCode, NetworkStats,
    Packet, PacketError, PacketType, TcpChannel,
};
use crate::sim::{CompanyInfo, Simulation};
use crate::sync::Lockstep;

type Handlers<S> = Dispatcher<PacketType, NetworkClient<S>, ()>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteClient {
    pub playas: CompanyId,
    pub name: String,
}

struct MapDownload {
    frame: u32,
    total: usize,
    data: Vec<u8>,
}

/// Lockstep participant: downloads the world, then runs exactly the frames
/// the server releases with the commands the server scheduled.
pub struct NetworkClient<S: Simulation> {
    channel: TcpChannel,
    handlers: Arc<Handlers<S>>,
    config: ClientConfig,
    status: ClientStatus,
    sim: S,
    lockstep: Lockstep,
    index: Option<ClientIndex>,
    playas: CompanyId,
    clients: BTreeMap<ClientIndex, RemoteClient>,
    download: Option<MapDownload>,
    server_settings: Option<(u16, u16)>,
    companies: Vec<CompanyInfo>,
    frame_received: bool,
    last_ack: Option<u32>,
    pending_events: VecDeque<ClientEvent>,
}

impl<S: Simulation> NetworkClient<S> {
    /// Opens the game connection and sends CLIENT_JOIN.
    pub fn connect(addr: SocketAddr, config: ClientConfig, sim: S) -> Result<Self, NetworkError> {
        log::info!("connecting to {} as '{}'", addr, config.name);
        let channel = TcpChannel::connect(addr, config.connect_timeout())?;

        let mut client = Self {
            channel,
            handlers: Arc::new(Self::handlers()),
            status: ClientStatus::Joining,
            sim,
            lockstep: Lockstep::new(0),
            index: None,
            playas: config.playas,
            clients: BTreeMap::new(),
            download: None,
            server_settings: None,
            companies: Vec::new(),
            frame_received: false,
            last_ack: None,
            pending_events: VecDeque::new(),
            config,
        };

        let join = packets::join(
            &client.config.revision,
            &client.config.name,
            client.config.playas,
            client.config.language,
            &client.config.unique_id,
        );
        client.send(join);
        client.flush()?;
        Ok(client)
    }

    pub fn status(&self) -> ClientStatus {
        self.status
    }

    pub fn index(&self) -> Option<ClientIndex> {
        self.index
    }

    pub fn playas(&self) -> CompanyId {
        self.playas
    }

    pub fn frame(&self) -> u32 {
        self.lockstep.frame()
    }

    pub fn frame_max(&self) -> u32 {
        self.lockstep.frame_max()
    }

    /// `(ready_ahead, sync_freq)` as announced with the map.
    pub fn server_settings(&self) -> Option<(u16, u16)> {
        self.server_settings
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn clients(&self) -> &BTreeMap<ClientIndex, RemoteClient> {
        &self.clients
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.channel.peer_addr()
    }

    pub fn stats(&self) -> NetworkStats {
        self.channel.stats()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ClientEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Polls the connection and runs every released frame.
    pub fn update(&mut self) -> Result<u32, NetworkError> {
        self.poll()?;
        self.advance()
    }

    /// Handles everything the server sent so far.
    pub fn poll(&mut self) -> Result<(), NetworkError> {
        if self.status.is_closed() {
            return Ok(());
        }

        let packets = match self.channel.receive() {
            Ok(packets) => packets,
            Err(e) => return Err(self.fail(e)),
        };

        let handlers = Arc::clone(&self.handlers);
        for mut packet in packets {
            let result = match handlers.dispatch(self, (), &mut packet) {
                Ok(Dispatch::Handled) => Ok(()),
                Ok(Dispatch::Unhandled(kind)) => Err(NetworkError::UnexpectedPacket(kind)),
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                return Err(self.fail(e));
            }
            if self.status.is_closed() {
                return Ok(());
            }
        }

        self.flush()
    }

    /// Runs released frames one at a time and acknowledges progress.
    pub fn advance(&mut self) -> Result<u32, NetworkError> {
        if !self.status.runs_frames() {
            return Ok(0);
        }

        let mut ran = 0;
        loop {
            match self.lockstep.advance_one(&mut self.sim) {
                Ok(Some(_)) => ran += 1,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{}", e);
                    return Err(self.fail(e.into()));
                }
            }
        }

        self.acknowledge();
        self.flush()?;
        Ok(ran)
    }

    fn acknowledge(&mut self) {
        if !self.frame_received {
            return;
        }

        // Caught up means the server may be holding frames back until it
        // hears from us.
        let frame = self.lockstep.frame();
        let due = match self.last_ack {
            None => true,
            Some(last) => {
                frame >= last.saturating_add(self.config.ack_interval.max(1))
                    || (frame > last && frame == self.lockstep.frame_max())
            }
        };
        if !due {
            return;
        }

        self.send(packets::ack(frame));
        self.last_ack = Some(frame);

        if self.status == ClientStatus::PreActive {
            log::info!("caught up at frame {}", frame);
            self.status = ClientStatus::Active;
            self.pending_events.push_back(ClientEvent::Active { frame });
        }
    }

    /// Sends a command for the server to schedule. Only an active client
    /// may issue commands, and only for its own company.
    pub fn send_command(&mut self, command: &Command) -> Result<(), NetworkError> {
        if self.status != ClientStatus::Active {
            return Err(NetworkError::NotAuthorized(PacketType::ClientCommand));
        }
        let command = command.normalized()?;
        self.send(packets::command(&command));
        self.flush()
    }

    /// Answers the pending password request.
    pub fn send_password(&mut self, password: &str) -> Result<(), NetworkError> {
        let ClientStatus::Authorizing(kind) = self.status else {
            return Err(NetworkError::UnexpectedPacket(PacketType::ClientPassword));
        };
        self.send(packets::password(kind, password));
        self.flush()
    }

    pub fn send_chat(
        &mut self,
        dest_type: DestType,
        dest: u16,
        message: &str,
    ) -> Result<(), NetworkError> {
        self.require_joined(PacketType::ClientChat)?;
        let action = match dest_type {
            DestType::Broadcast => ChatAction::Chat,
            DestType::Company => ChatAction::ChatCompany,
            DestType::Client => ChatAction::ChatClient,
        };
        self.send(packets::chat(action, dest_type, dest, message));
        self.flush()
    }

    pub fn set_name(&mut self, name: &str) -> Result<(), NetworkError> {
        self.require_joined(PacketType::ClientSetName)?;
        self.config.name = name.to_string();
        self.send(packets::set_name(name));
        self.flush()
    }

    pub fn set_company_password(&mut self, password: &str) -> Result<(), NetworkError> {
        self.require_joined(PacketType::ClientSetPassword)?;
        self.config.company_password = password.to_string();
        self.send(packets::set_password(password));
        self.flush()
    }

    /// Asks for the company list; the answer arrives as
    /// `ClientEvent::CompanyInfo`.
    pub fn request_company_info(&mut self) -> Result<(), NetworkError> {
        self.companies.clear();
        self.send(Ok(Packet::new(PacketType::ClientCompanyInfo)));
        self.flush()
    }

    pub fn quit(&mut self) {
        if self.status.is_closed() {
            return;
        }
        log::info!("leaving the game");
        self.send(packets::quit("leaving"));
        self.close(ClientCloseReason::Quit);
    }

    fn require_joined(&self, kind: PacketType) -> Result<(), NetworkError> {
        if self.index.is_some() && !self.status.is_closed() {
            Ok(())
        } else {
            Err(NetworkError::NotAuthorized(kind))
        }
    }

    /// Queues `packet`. A packet the client cannot build ends the
    /// connection.
    fn send(&mut self, packet: Result<Packet, PacketError>) {
        match packet {
            Ok(packet) => self.channel.send_packet(packet),
            Err(e) => {
                log::error!("failed to build packet: {}", e);
                debug_assert!(false, "client packets fit the MTU: {}", e);
                self.close(ClientCloseReason::Error(ErrorCode::General));
            }
        }
    }

    fn flush(&mut self) -> Result<(), NetworkError> {
        if self.status.is_closed() {
            return Ok(());
        }
        match self.channel.flush() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Ends the connection because of `err`, telling the server why when
    /// the failure is ours.
    fn fail(&mut self, err: NetworkError) -> NetworkError {
        match &err {
            NetworkError::ConnectionLost | NetworkError::Io(_) => {
                log::warn!("connection to {} lost", self.server_addr());
                self.close(ClientCloseReason::ConnectionLost);
            }
            NetworkError::ServerFull => {
                log::info!("server {} is full", self.server_addr());
                self.close(ClientCloseReason::ServerFull);
            }
            NetworkError::Rejected(code) => {
                log::warn!("server closed the connection: {}", code);
                self.close(ClientCloseReason::Error(*code));
            }
            NetworkError::Desync { frame } => {
                log::warn!("desync at frame {}, leaving", frame);
                self.send(packets::error(ErrorCode::Desync));
                self.pending_events
                    .push_back(ClientEvent::Desync { frame: *frame });
                self.close(ClientCloseReason::Error(ErrorCode::Desync));
            }
            other => {
                let code = other.error_code();
                log::warn!("dropping connection: {}", other);
                self.send(packets::error(code));
                self.close(ClientCloseReason::Error(code));
            }
        }
        err
    }

    fn close(&mut self, reason: ClientCloseReason) {
        if self.status.is_closed() {
            return;
        }
        self.status = ClientStatus::Closed(reason);
        self.channel.close();
        self.pending_events
            .push_back(ClientEvent::Disconnected(reason));
    }
}
