mod config;
mod events;
mod handlers;
mod packets;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

pub use config::ServerConfig;
pub use events::ServerEvent;

use crate::command::{Command, CommandQueue};
use crate::discovery::{ContentResolver, DiscoveryServer, GameInfo};
use crate::error::{ConfigError, NetworkError};
use crate::net::{
    ChatAction, ClientIndex, CompanyId, DestType, Dispatch, Dispatcher, ErrorCode, MAX_COMPANIES,
    NetworkStats, Packet, PacketError, PacketType, SPECTATOR, TcpChannel, reject,
};
use crate::session::{
    DisconnectReason, MapCursor, SessionEvent, SessionId, SessionRegistry, SessionState,
};
use crate::sim::{CompanyInfo, Simulation};
use crate::sync::{FixedTimestep, FrameSettings, Lockstep};

use packets::MAP_CHUNK_SIZE;

type Handlers<S> = Dispatcher<PacketType, GameServer<S>, SessionId>;

const DISCOVERY_REFRESH_FRAMES: u32 = 30;

/// Authoritative lockstep server: owns the simulation, assigns every command
/// its execution frame and releases frames to the clients.
pub struct GameServer<S: Simulation> {
    listener: TcpListener,
    local_addr: SocketAddr,
    discovery: Option<DiscoveryServer>,
    sessions: SessionRegistry,
    handlers: Arc<Handlers<S>>,
    config: ServerConfig,
    sim: S,
    lockstep: Lockstep,
    local_commands: CommandQueue,
    company_passwords: HashMap<CompanyId, String>,
    timestep: FixedTimestep,
    last_tick_time: Instant,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl<S: Simulation> GameServer<S> {
    pub fn new(
        config: ServerConfig,
        sim: S,
        resolver: Box<dyn ContentResolver>,
    ) -> Result<Self, NetworkError> {
        config.frame.validate()?;

        let listener = TcpListener::bind(config.bind_addr())?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        let discovery = if config.lan_discovery || config.advertise {
            let master = if config.advertise {
                config.master_addr()
            } else {
                None
            };
            match DiscoveryServer::bind(
                (config.bind.as_str(), local_addr.port()),
                local_addr.port(),
                resolver,
                master,
                config.advertise_timing,
            ) {
                Ok(discovery) => Some(discovery),
                Err(e) => {
                    log::warn!("discovery disabled, cannot bind UDP port: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let mut server = Self {
            listener,
            local_addr,
            discovery,
            sessions: SessionRegistry::new(config.max_clients),
            handlers: Arc::new(Self::handlers()),
            sim,
            lockstep: Lockstep::new(0),
            local_commands: CommandQueue::new(),
            company_passwords: HashMap::new(),
            timestep: FixedTimestep::new(config.tick_rate),
            last_tick_time: Instant::now(),
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            config,
        };
        server.refresh_discovery();

        log::info!(
            "server '{}' ({}) listening on {}",
            server.config.server_name,
            server.config.revision,
            local_addr
        );
        Ok(server)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn discovery_addr(&self) -> Option<SocketAddr> {
        self.discovery.as_ref().map(DiscoveryServer::local_addr)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn simulation(&self) -> &S {
        &self.sim
    }

    pub fn frame(&self) -> u32 {
        self.lockstep.frame()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    /// Time the caller may sleep before the next frame is due.
    pub fn until_next_tick(&self) -> Duration {
        self.timestep.until_next_tick()
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        self.timestep.accumulate(now - self.last_tick_time);
        self.last_tick_time = now;

        self.poll_network();
        while self.timestep.consume_tick() {
            self.advance_frame();
        }
    }

    /// Accepts connections and handles everything the clients sent.
    pub fn poll_network(&mut self) {
        self.accept_connections();

        let handlers = Arc::clone(&self.handlers);
        for id in self.sessions.ids() {
            let received = match self.sessions.get_mut(id) {
                Some(session) if !session.state.is_closed() => session.channel_mut().receive(),
                _ => continue,
            };

            let packets = match received {
                Ok(packets) => packets,
                Err(e) => {
                    self.fail_session(id, e);
                    continue;
                }
            };

            for mut packet in packets {
                let result = match handlers.dispatch(self, id, &mut packet) {
                    Ok(Dispatch::Handled) => Ok(()),
                    Ok(Dispatch::Unhandled(kind)) => {
                        Err(NetworkError::UnexpectedPacket(kind))
                    }
                    Err(e) => Err(e),
                };

                if let Err(e) = result {
                    self.fail_session(id, e);
                }
                if !self.is_open(id) {
                    break;
                }
            }
        }

        if let Some(discovery) = &mut self.discovery {
            discovery.poll();
        }

        self.flush_sessions();
    }

    /// Runs one server frame: schedule, execute, release, then housekeeping.
    pub fn advance_frame(&mut self) {
        let next = self.lockstep.frame() + 1;

        let mut origins = Vec::new();
        let mut collected = Vec::new();
        for command in self.local_commands.drain() {
            origins.push(None);
            collected.push(command);
        }
        for session in self.sessions.iter_mut().filter(|s| s.state.is_active()) {
            let id = session.id();
            for command in session.inbound.drain() {
                origins.push(Some(id));
                collected.push(command);
            }
        }

        let scheduled = self.config.frame.schedule(next, collected);
        for (origin, command) in origins.into_iter().zip(scheduled) {
            for session in self.sessions.iter_mut() {
                if !session.state.collects_commands() {
                    continue;
                }
                let mut copy = command.clone();
                if origin != Some(session.id()) {
                    copy.callback = 0;
                }
                session.outbound.push(copy);
            }
            if let Err(e) = self.lockstep.schedule(command) {
                log::error!("failed to schedule command: {}", e);
            }
        }

        self.lockstep.release(next);
        if let Err(e) = self.lockstep.advance_one(&mut self.sim) {
            log::error!("server failed to run frame {}: {}", next, e);
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("frame {} failed: {}", next, e),
            });
        }

        self.broadcast_frame(next);
        self.progress_map_transfers();
        self.check_lag();

        if next % DISCOVERY_REFRESH_FRAMES == 0 {
            self.refresh_discovery();
        }
        if let Some(discovery) = &mut self.discovery {
            discovery.tick(next);
        }

        self.flush_sessions();
    }

    /// Queues a command from the server's own company in the form the
    /// clients will decode it.
    pub fn issue_command(&mut self, command: Command) -> Result<(), PacketError> {
        self.local_commands.push(command.normalized()?);
        Ok(())
    }

    /// Queues `packet` for `id`. A packet the server cannot build leaves the
    /// session behind the others, so the session is dropped.
    fn send(&mut self, id: SessionId, packet: Result<Packet, PacketError>) {
        match packet {
            Ok(packet) => {
                if let Some(session) = self.sessions.get_mut(id) {
                    session.send(packet);
                }
            }
            Err(e) => self.drop_unbuildable(id, e),
        }
    }

    /// Sends to every welcomed session except `except`.
    fn send_joined(&mut self, packet: Result<Packet, PacketError>, except: Option<SessionId>) {
        let packet = match packet {
            Ok(packet) => packet,
            Err(e) => {
                log::error!("failed to build broadcast packet: {}", e);
                debug_assert!(false, "server packets fit the MTU: {}", e);
                return;
            }
        };
        for id in self.sessions.joined() {
            if Some(id) == except {
                continue;
            }
            if let Some(session) = self.sessions.get_mut(id) {
                session.send(packet.clone());
            }
        }
    }

    fn drop_unbuildable(&mut self, id: SessionId, err: PacketError) {
        log::error!("failed to build packet: {}", err);
        debug_assert!(false, "server packets fit the MTU: {}", err);
        self.disconnect(id, DisconnectReason::Error(ErrorCode::General));
    }

    fn is_open(&self, id: SessionId) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| !s.state.is_closed())
    }

    fn accept_connections(&mut self) {
        loop {
            let (stream, addr) = match self.listener.accept() {
                Ok(accepted) => accepted,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {}", e);
                    break;
                }
            };

            if self.sessions.is_full() {
                log::info!("refusing {}: server full", addr);
                if let Err(e) = reject(stream, &Packet::new(PacketType::ServerFull)) {
                    log::debug!("could not tell {} the server is full: {}", addr, e);
                }
                self.pending_events.push_back(ServerEvent::ConnectionRefused {
                    addr,
                    reason: "server full".into(),
                });
                continue;
            }

            let channel = match TcpChannel::new(stream) {
                Ok(channel) => channel,
                Err(e) => {
                    log::warn!("failed to set up connection from {}: {}", addr, e);
                    continue;
                }
            };

            if let Some(id) = self.sessions.insert(channel, self.lockstep.frame()) {
                let index = self.sessions.get(id).map(|s| s.index()).unwrap_or_default();
                log::info!("client #{} connected from {}", index, addr);
                self.pending_events
                    .push_back(ServerEvent::ClientConnected { addr });
            }
        }
    }

    fn broadcast_frame(&mut self, frame: u32) {
        let sync = self
            .config
            .frame
            .is_sync_frame(frame)
            .then(|| self.sim.checksum());
        let tail: Result<Vec<Packet>, PacketError> = std::iter::once(packets::frame(frame, frame))
            .chain(sync.map(|checksum| packets::sync(frame, checksum)))
            .collect();
        let tail = match tail {
            Ok(tail) => tail,
            Err(e) => {
                log::error!("failed to build frame {}: {}", frame, e);
                debug_assert!(false, "frame packets fit the MTU: {}", e);
                return;
            }
        };

        let mut broken = Vec::new();
        for id in self.sessions.broadcast_targets() {
            let Some(session) = self.sessions.get_mut(id) else {
                continue;
            };
            let commands: Result<Vec<Packet>, PacketError> =
                session.outbound.drain().map(|c| packets::command(&c)).collect();
            match commands {
                Ok(commands) => {
                    for packet in commands {
                        session.send(packet);
                    }
                }
                Err(e) => {
                    broken.push((id, e));
                    continue;
                }
            }
            for packet in &tail {
                session.send(packet.clone());
            }
            session.last_frame_sent = frame;
        }

        for (id, e) in broken {
            self.drop_unbuildable(id, e);
        }
    }

    /// Saves the world for `id` and queues the start of the download.
    fn begin_transfer(&mut self, id: SessionId) -> Result<MapCursor, NetworkError> {
        let data = self.sim.save()?;
        let frame = self.lockstep.frame();
        let pending: Vec<Command> = self
            .lockstep
            .pending()
            .map(|command| Command {
                callback: 0,
                ..command.clone()
            })
            .collect();

        let settings = self.config.frame;
        let session = self
            .sessions
            .get_mut(id)
            .ok_or(NetworkError::ConnectionLost)?;
        session.outbound.clear();
        session.outbound.extend(pending);
        session.record_ack(frame, frame);
        session.send(packets::map_start(frame, data.len())?);
        session.send(packets::map_patch(settings.ready_ahead, settings.sync_freq)?);
        session.state_since = frame;

        log::info!(
            "sending map to client #{} ({} bytes, frame {})",
            session.index(),
            data.len(),
            frame
        );
        Ok(MapCursor::new(data, frame))
    }

    fn progress_map_transfers(&mut self) {
        if !self.sessions.map_transfer_busy() {
            if let Some(id) = self.sessions.first_waiting() {
                match self.begin_transfer(id) {
                    Ok(cursor) => self.apply(id, SessionEvent::TransferStarted(cursor)),
                    Err(e) => self.fail_session(id, e),
                }

                let waiting: Vec<SessionId> = self
                    .sessions
                    .iter()
                    .filter(|s| s.state == SessionState::MapWait)
                    .map(|s| s.id())
                    .collect();
                for (ahead, id) in waiting.into_iter().enumerate() {
                    self.send(id, packets::wait(ahead));
                }
            }
        }

        let chunks = self.config.map_chunks_per_tick.max(1);
        let frame = self.lockstep.frame();
        let mut finished = Vec::new();
        let mut broken = Vec::new();
        for session in self.sessions.iter_mut() {
            let index = session.index();
            let Some(cursor) = session.state.map_cursor_mut() else {
                continue;
            };

            let mut outgoing = Vec::new();
            for _ in 0..chunks {
                match cursor.next_chunk(MAP_CHUNK_SIZE) {
                    Some(chunk) => outgoing.push(packets::map_chunk(chunk)),
                    None => break,
                }
            }
            let done = cursor.is_done();
            if done {
                log::info!(
                    "client #{} has the map of frame {} ({} bytes)",
                    index,
                    cursor.frame(),
                    cursor.total()
                );
                outgoing.push(packets::map_end());
            }

            let outgoing: Result<Vec<Packet>, PacketError> = outgoing.into_iter().collect();
            match outgoing {
                Ok(outgoing) => {
                    for packet in outgoing {
                        session.send(packet);
                    }
                }
                Err(e) => {
                    broken.push((session.id(), e));
                    continue;
                }
            }
            if done {
                session.state_since = frame;
                finished.push(session.id());
            }
        }

        for id in finished {
            self.apply(id, SessionEvent::MapSent);
        }
        for (id, e) in broken {
            self.drop_unbuildable(id, e);
        }
    }

    fn check_lag(&mut self) {
        let frame = self.lockstep.frame();
        let settings = self.config.frame;
        let mut timed_out = Vec::new();

        for session in self.sessions.iter_mut() {
            match session.state {
                SessionState::Active | SessionState::PreActive => {
                    if session.silent_for(frame) > settings.client_timeout {
                        timed_out.push(session.id());
                        continue;
                    }

                    let lagging = session.frames_behind() > settings.lag_pause;
                    if lagging != session.paused {
                        if lagging {
                            log::warn!(
                                "client #{} is {} frames behind, holding back frames",
                                session.index(),
                                session.frames_behind()
                            );
                        } else {
                            log::info!("client #{} caught up", session.index());
                        }
                        session.paused = lagging;
                    }
                }
                SessionState::MapTransfer(_) | SessionState::MapDone => {
                    if frame.saturating_sub(session.state_since) > settings.client_timeout {
                        timed_out.push(session.id());
                    }
                }
                _ => {}
            }
        }

        for id in timed_out {
            if let Some(session) = self.sessions.get(id) {
                log::warn!("client #{} timed out", session.index());
            }
            self.send(id, packets::error(ErrorCode::ConnectionLost));
            self.disconnect(id, DisconnectReason::Timeout);
        }
    }

    fn flush_sessions(&mut self) {
        let mut lost = Vec::new();
        for session in self.sessions.iter_mut() {
            if session.state.is_closed() {
                continue;
            }
            if let Err(e) = session.channel_mut().flush() {
                log::debug!("flush to client #{} failed: {}", session.index(), e);
                lost.push(session.id());
            }
        }
        for id in lost {
            self.disconnect(id, DisconnectReason::ConnectionLost);
        }

        for id in self.sessions.ids() {
            if self.sessions.get(id).is_some_and(|s| s.state.is_closed()) {
                self.sessions.remove(id);
            }
        }
    }

    fn apply(&mut self, id: SessionId, event: SessionEvent) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if let Err(e) = session.state.apply(event) {
            log::error!("client #{}: {}", session.index(), e);
        }
    }

    /// Ends a session because of `err`, telling the peer why when it can
    /// still hear us.
    fn fail_session(&mut self, id: SessionId, err: NetworkError) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let index = session.index();

        match err {
            NetworkError::ConnectionLost | NetworkError::Io(_) => {
                log::info!("client #{} connection lost", index);
                self.disconnect(id, DisconnectReason::ConnectionLost);
            }
            NetworkError::ServerFull => {
                log::info!("refusing client #{}: no room for its company choice", index);
                self.send(id, Ok(Packet::new(PacketType::ServerFull)));
                self.disconnect(id, DisconnectReason::Error(ErrorCode::General));
            }
            err => {
                let code = err.error_code();
                log::warn!("dropping client #{}: {}", index, err);
                self.send(id, packets::error(code));
                self.disconnect(id, DisconnectReason::Error(code));
            }
        }
    }

    /// Closes the session and returns its index if it had been welcomed.
    fn close_session(&mut self, id: SessionId, reason: DisconnectReason) -> Option<ClientIndex> {
        let session = self.sessions.get_mut(id)?;
        if session.state.is_closed() {
            return None;
        }

        let joined = session.state.has_joined();
        let index = session.index();
        if let Err(e) = session.state.apply(SessionEvent::Close(reason)) {
            log::error!("client #{}: {}", index, e);
        }
        session.channel_mut().close();

        log::info!(
            "client #{} {} ({}, connected for {}s)",
            index,
            reason.as_str(),
            session.addr(),
            session.connected_at.elapsed().as_secs()
        );
        self.pending_events
            .push_back(ServerEvent::ClientDisconnected { index, reason });

        joined.then_some(index)
    }

    /// Closes the session and tells everyone else why it left.
    fn disconnect(&mut self, id: SessionId, reason: DisconnectReason) {
        if let Some(index) = self.close_session(id, reason) {
            let packet = match reason {
                DisconnectReason::Graceful => packets::quit(index, reason.as_str()),
                _ => packets::error_quit(index, reason.error_code()),
            };
            self.send_joined(packet, Some(id));
        }
    }

    pub fn kick_client(&mut self, index: ClientIndex) -> bool {
        let Some(id) = self.sessions.id_of_index(index) else {
            return false;
        };
        self.send(id, packets::error(ErrorCode::Kicked));
        self.disconnect(id, DisconnectReason::Kicked);
        self.flush_sessions();
        true
    }

    pub fn shutdown_connections(&mut self) {
        log::info!("shutting down {} connections", self.sessions.len());
        if let Some(discovery) = &mut self.discovery {
            discovery.set_advertise(false);
        }
        self.close_all(PacketType::ServerShutdown);
    }

    /// Sends everyone to a fresh world; clients are expected to reconnect.
    pub fn new_game(&mut self, sim: S) {
        log::info!("starting a new game");
        self.close_all(PacketType::ServerNewGame);
        self.sim = sim;
        self.lockstep.reset(0);
        self.timestep.reset();
        self.last_tick_time = Instant::now();
        self.local_commands.clear();
        self.company_passwords.clear();
        self.refresh_discovery();
    }

    fn close_all(&mut self, kind: PacketType) {
        for id in self.sessions.ids() {
            self.send(id, Ok(Packet::new(kind)));
            self.close_session(id, DisconnectReason::Shutdown);
        }
        self.flush_sessions();
    }

    pub fn send_chat(&mut self, dest_type: DestType, dest: u16, message: &str) {
        let action = match dest_type {
            DestType::Broadcast => ChatAction::Chat,
            DestType::Company => ChatAction::ChatCompany,
            DestType::Client => ChatAction::ChatClient,
        };
        self.route_chat(None, action, dest_type, dest, message);
    }

    pub fn set_ready_ahead(&mut self, ready_ahead: u16) -> Result<(), ConfigError> {
        self.update_frame_settings("ready_ahead", FrameSettings {
            ready_ahead,
            ..self.config.frame
        })
    }

    pub fn set_sync_freq(&mut self, sync_freq: u16) -> Result<(), ConfigError> {
        self.update_frame_settings("sync_freq", FrameSettings {
            sync_freq,
            ..self.config.frame
        })
    }

    fn update_frame_settings(
        &mut self,
        name: &'static str,
        settings: FrameSettings,
    ) -> Result<(), ConfigError> {
        if self.sessions.any_active() {
            return Err(ConfigError::Locked(name));
        }
        settings.validate()?;
        self.config.frame = settings;
        Ok(())
    }

    pub fn set_client_timeout(&mut self, frames: u32) -> Result<(), ConfigError> {
        if frames == 0 {
            return Err(ConfigError::OutOfRange {
                name: "client_timeout",
                min: 1,
            });
        }
        self.config.frame.client_timeout = frames;
        Ok(())
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.config.game_password = password.into();
        self.refresh_discovery();
    }

    pub fn set_company_password(&mut self, company: CompanyId, password: impl Into<String>) {
        let password = password.into();
        if password.is_empty() {
            self.company_passwords.remove(&company);
        } else {
            self.company_passwords.insert(company, password);
        }
    }

    fn company_password(&self, company: CompanyId) -> Option<&str> {
        self.company_passwords.get(&company).map(String::as_str)
    }

    fn company_infos(&self) -> Vec<CompanyInfo> {
        let mut companies = self.sim.companies();
        for company in &mut companies {
            company.has_password = self.company_passwords.contains_key(&company.id);
            company.clients = self
                .sessions
                .iter()
                .filter(|s| s.state.has_joined() && s.playas == company.id)
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
        }
        companies
    }

    /// Lowest company id the simulation does not know yet.
    fn free_company(&self) -> Option<CompanyId> {
        let taken: Vec<CompanyId> = self.sim.companies().iter().map(|c| c.id).collect();
        let claimed = |id: CompanyId| self.sessions.iter().any(|s| s.playas == id);
        (0..self.config.max_companies.min(MAX_COMPANIES)).find(|id| !taken.contains(id) && !claimed(*id))
    }

    pub fn game_info(&self) -> GameInfo {
        let world = self.sim.world_info();
        let joined: Vec<_> = self.sessions.iter().filter(|s| s.state.has_joined()).collect();
        let server_client = u8::from(!self.config.dedicated);

        GameInfo {
            content: self.sim.content(),
            game_date: world.game_date,
            start_date: world.start_date,
            companies_max: self.config.max_companies,
            companies_on: saturating_u8(self.sim.companies().len()),
            spectators_max: self.config.max_spectators,
            server_name: self.config.server_name.clone(),
            server_revision: self.config.revision.clone(),
            server_lang: self.config.server_lang,
            use_password: !self.config.game_password.is_empty(),
            clients_max: saturating_u8(self.config.max_clients),
            clients_on: saturating_u8(joined.len()).saturating_add(server_client),
            spectators_on: saturating_u8(joined.iter().filter(|s| s.playas == SPECTATOR).count()),
            map_width: world.map_width,
            map_height: world.map_height,
            map_set: world.map_set,
            dedicated: self.config.dedicated,
        }
    }

    fn refresh_discovery(&mut self) {
        if self.discovery.is_none() {
            return;
        }
        let info = self.game_info();
        let companies = self.company_infos();
        if let Some(discovery) = &mut self.discovery {
            discovery.update(info, companies);
        }
    }

    pub fn stats(&self) -> ServerStats {
        let mut network = NetworkStats::default();
        for session in self.sessions.iter() {
            network += session.channel().stats();
        }
        if let Some(discovery) = &self.discovery {
            network += discovery.stats();
        }

        ServerStats {
            frame: self.lockstep.frame(),
            sessions: self.sessions.len(),
            active: self.sessions.active_count(),
            max_clients: self.sessions.capacity(),
            network,
        }
    }
}

fn saturating_u8(count: usize) -> u8 {
    u8::try_from(count).unwrap_or(u8::MAX)
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub frame: u32,
    pub sessions: usize,
    pub active: usize,
    pub max_clients: usize,
    pub network: NetworkStats,
}
