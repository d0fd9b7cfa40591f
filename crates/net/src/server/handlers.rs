use super::{GameServer, Handlers, ServerEvent, packets};
use crate::command::Command;
use crate::error::NetworkError;
use crate::net::{
    CHAT_LENGTH, ChatAction, CompanyId, DestType, ErrorCode, MAX_COMPANIES, NAME_LENGTH,
    NEW_COMPANY, PASSWORD_LENGTH, Packet, PacketType, PasswordKind, REVISION_LENGTH,
    SERVER_INDEX, SPECTATOR, UNIQUE_ID_LENGTH, version_compatible,
};
use crate::session::{
    AuthStage, DisconnectReason, Session, SessionEvent, SessionId, SessionState,
};
use crate::sim::Simulation;

impl<S: Simulation> GameServer<S> {
    pub(super) fn handlers() -> Handlers<S> {
        Handlers::<S>::new()
            .on(PacketType::ClientJoin, Self::handle_join)
            .on(PacketType::ClientCompanyInfo, Self::handle_company_info)
            .on(PacketType::ClientPassword, Self::handle_password)
            .on(PacketType::ClientGetMap, Self::handle_getmap)
            .on(PacketType::ClientMapOk, Self::handle_map_ok)
            .on(PacketType::ClientAck, Self::handle_ack)
            .on(PacketType::ClientCommand, Self::handle_command)
            .on(PacketType::ClientChat, Self::handle_chat)
            .on(PacketType::ClientSetPassword, Self::handle_set_password)
            .on(PacketType::ClientSetName, Self::handle_set_name)
            .on(PacketType::ClientQuit, Self::handle_quit)
            .on(PacketType::ClientError, Self::handle_error)
    }

    fn session(&mut self, id: SessionId) -> Result<&mut Session, NetworkError> {
        self.sessions.get_mut(id).ok_or(NetworkError::ConnectionLost)
    }

    fn transition(
        &mut self,
        id: SessionId,
        event: SessionEvent,
        kind: PacketType,
    ) -> Result<(), NetworkError> {
        let session = self.session(id)?;
        let index = session.index();
        session.state.apply(event).map_err(|e| {
            log::debug!("client #{}: {}", index, e);
            NetworkError::UnexpectedPacket(kind)
        })
    }

    fn require_joined(&mut self, id: SessionId, kind: PacketType) -> Result<(), NetworkError> {
        if self.session(id)?.state.has_joined() {
            Ok(())
        } else {
            Err(NetworkError::NotAuthorized(kind))
        }
    }

    /// `wanted`, or `wanted #n` with the lowest free `n`, never longer than
    /// `NAME_LENGTH`.
    fn unique_name(&self, wanted: &str, except: Option<SessionId>) -> String {
        let base = match wanted.trim() {
            "" => "Player",
            trimmed => trimmed,
        };
        let taken =
            |name: &str| name == self.config.player_name || self.sessions.name_in_use(name, except);

        let base = truncate_name(base, NAME_LENGTH);
        if !taken(base) {
            return base.to_string();
        }
        (1u32..)
            .map(|n| {
                let suffix = format!(" #{}", n);
                let room = NAME_LENGTH.saturating_sub(suffix.len());
                format!("{}{}", truncate_name(base, room), suffix)
            })
            .find(|name| !taken(name))
            .unwrap_or_else(|| base.to_string())
    }

    fn welcome(&mut self, id: SessionId) {
        let Some(session) = self.sessions.get(id) else {
            return;
        };
        let index = session.index();
        let playas = session.playas;
        let name = session.name.clone();

        let others: Vec<_> = self
            .sessions
            .iter()
            .filter(|s| s.id() != id && s.state.has_joined())
            .map(|s| (s.index(), s.playas, s.name.clone()))
            .collect();

        self.send(id, packets::welcome(index));
        self.send(
            id,
            packets::client_info(SERVER_INDEX, SPECTATOR, &self.config.player_name),
        );
        for (other, other_playas, other_name) in others {
            self.send(id, packets::client_info(other, other_playas, &other_name));
        }
        self.send(id, packets::client_info(index, playas, &name));

        log::info!("client #{} '{}' joined as company {}", index, name, playas);
        self.pending_events
            .push_back(ServerEvent::ClientJoined { index, name });
    }

    fn handle_join(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        if self.session(id)?.state != SessionState::Inactive {
            return Err(NetworkError::UnexpectedPacket(PacketType::ClientJoin));
        }

        let revision = packet.read_string(REVISION_LENGTH)?;
        let name = packet.read_string(NAME_LENGTH)?;
        let playas = packet.read_u8()?;
        let language = packet.read_u8()?;
        let unique_id = packet.read_string(UNIQUE_ID_LENGTH)?;

        if !version_compatible(&self.config.revision, &revision) {
            log::info!(
                "client revision {:?} does not match {:?}",
                revision,
                self.config.revision
            );
            return Err(NetworkError::Rejected(ErrorCode::WrongRevision));
        }

        let playas = match playas {
            SPECTATOR => {
                let spectators = self
                    .sessions
                    .iter()
                    .filter(|s| s.state.has_joined() && s.playas == SPECTATOR)
                    .count();
                if spectators >= self.config.max_spectators as usize {
                    return Err(NetworkError::ServerFull);
                }
                SPECTATOR
            }
            NEW_COMPANY => self.free_company().ok_or(NetworkError::ServerFull)?,
            company if self.sim.companies().iter().any(|c| c.id == company) => company,
            _ => return Err(NetworkError::NotAuthorized(PacketType::ClientJoin)),
        };

        let name = self.unique_name(&name, Some(id));
        let password = if !self.config.game_password.is_empty() {
            Some(PasswordKind::Game)
        } else if self.company_password(playas).is_some() {
            Some(PasswordKind::Company)
        } else {
            None
        };

        let session = self.session(id)?;
        session.name = name;
        session.playas = playas;
        session.language = language;
        session.unique_id = unique_id;
        self.transition(id, SessionEvent::Join { password }, PacketType::ClientJoin)?;

        match password {
            Some(kind) => self.send(id, packets::need_password(kind)),
            None => self.welcome(id),
        }
        Ok(())
    }

    fn handle_company_info(
        &mut self,
        id: SessionId,
        _packet: &mut Packet,
    ) -> Result<(), NetworkError> {
        let companies = self.company_infos();
        let session = self.session(id)?;
        for packet in packets::company_info(&companies)? {
            session.send(packet);
        }
        Ok(())
    }

    fn handle_password(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        let expected = match self.session(id)?.state {
            SessionState::Authorizing(AuthStage::NeedPassword(kind)) => kind,
            _ => return Err(NetworkError::UnexpectedPacket(PacketType::ClientPassword)),
        };

        let kind = PasswordKind::try_from(packet.read_u8()?)?;
        let password = packet.read_string(PASSWORD_LENGTH)?;
        if kind != expected {
            return Err(NetworkError::UnexpectedPacket(PacketType::ClientPassword));
        }

        let playas = self.session(id)?.playas;
        let correct = match kind {
            PasswordKind::Game => password == self.config.game_password,
            PasswordKind::Company => self.company_password(playas) == Some(password.as_str()),
        };
        if !correct {
            return Err(NetworkError::Rejected(ErrorCode::WrongPassword));
        }

        let next = (kind == PasswordKind::Game && self.company_password(playas).is_some())
            .then_some(PasswordKind::Company);
        self.transition(
            id,
            SessionEvent::PasswordAccepted { next },
            PacketType::ClientPassword,
        )?;

        match next {
            Some(kind) => self.send(id, packets::need_password(kind)),
            None => self.welcome(id),
        }
        Ok(())
    }

    fn handle_getmap(&mut self, id: SessionId, _packet: &mut Packet) -> Result<(), NetworkError> {
        match self.session(id)?.state {
            SessionState::Authorizing(AuthStage::Authorized) => {}
            SessionState::Inactive | SessionState::Authorizing(_) => {
                return Err(NetworkError::NotAuthorized(PacketType::ClientGetMap));
            }
            _ => return Err(NetworkError::UnexpectedPacket(PacketType::ClientGetMap)),
        }

        if self.sessions.map_transfer_busy() {
            let ahead = self.sessions.waiting_count();
            self.transition(
                id,
                SessionEvent::MapRequested { transfer: None },
                PacketType::ClientGetMap,
            )?;
            log::info!(
                "client #{} waits for the map ({} ahead)",
                self.session(id)?.index(),
                ahead
            );
            self.send(id, packets::wait(ahead));
        } else {
            let cursor = self.begin_transfer(id)?;
            self.transition(
                id,
                SessionEvent::MapRequested {
                    transfer: Some(cursor),
                },
                PacketType::ClientGetMap,
            )?;
        }
        Ok(())
    }

    /// The client loaded the map: hand it everything queued since the save
    /// and release frames up to now.
    fn handle_map_ok(&mut self, id: SessionId, _packet: &mut Packet) -> Result<(), NetworkError> {
        self.transition(id, SessionEvent::MapAcknowledged, PacketType::ClientMapOk)?;

        let frame = self.lockstep.frame();
        let session = self.session(id)?;
        let commands: Vec<Command> = session.outbound.drain().collect();
        for command in &commands {
            session.send(packets::command(command)?);
        }
        session.send(packets::frame(frame, frame)?);
        session.last_frame_sent = frame;
        session.last_ack_server_frame = frame;
        session.state_since = frame;

        let index = session.index();
        let playas = session.playas;
        let name = session.name.clone();
        log::info!(
            "client #{} loaded the map, catching up to frame {} ({} commands)",
            index,
            frame,
            commands.len()
        );

        self.send_joined(packets::join(index), Some(id));
        self.send_joined(packets::client_info(index, playas, &name), Some(id));
        self.refresh_discovery();
        Ok(())
    }

    fn handle_ack(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        let frame = packet.read_u32()?;
        let current = self.lockstep.frame();

        let session = self.session(id)?;
        let index = session.index();
        let caught_up = match session.state {
            SessionState::Active => false,
            SessionState::PreActive => true,
            _ => return Err(NetworkError::UnexpectedPacket(PacketType::ClientAck)),
        };
        let acked = frame.min(session.last_frame_sent);
        session.record_ack(acked, current);

        if caught_up {
            self.transition(id, SessionEvent::CaughtUp, PacketType::ClientAck)?;
            log::info!("client #{} is active at frame {}", index, acked);
            self.pending_events
                .push_back(ServerEvent::ClientActive { index });
        }
        Ok(())
    }

    fn handle_command(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        let session = self.session(id)?;
        if !session.state.is_active() {
            return Err(NetworkError::UnexpectedPacket(PacketType::ClientCommand));
        }

        let command = Command::read_request(packet)?;
        if command.player != session.playas {
            return Err(NetworkError::PlayerMismatch {
                expected: session.playas,
                got: command.player,
            });
        }

        log::debug!(
            "client #{} queued command {} for company {}",
            session.index(),
            command.cmd,
            command.player
        );
        session.inbound.push(command);
        Ok(())
    }

    fn handle_chat(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        self.require_joined(id, PacketType::ClientChat)?;

        let action = ChatAction::try_from(packet.read_u8()?)?;
        let dest_type = DestType::try_from(packet.read_u8()?)?;
        let dest = packet.read_u16()?;
        let message = packet.read_string(CHAT_LENGTH)?;

        if !matches!(
            action,
            ChatAction::Chat | ChatAction::ChatCompany | ChatAction::ChatClient
        ) {
            return Err(NetworkError::UnexpectedPacket(PacketType::ClientChat));
        }

        self.route_chat(Some(id), action, dest_type, dest, &message);
        Ok(())
    }

    /// Delivers a chat line. Private lines are echoed to the sender with
    /// `self_send` set and the recipient in place of the sender.
    pub(super) fn route_chat(
        &mut self,
        sender: Option<SessionId>,
        action: ChatAction,
        dest_type: DestType,
        dest: u16,
        message: &str,
    ) {
        let from = sender
            .and_then(|id| self.sessions.get(id))
            .map_or(SERVER_INDEX, Session::index);

        self.pending_events.push_back(ServerEvent::Chat {
            from,
            action,
            dest_type,
            dest,
            message: message.to_string(),
        });

        match dest_type {
            DestType::Broadcast => {
                self.send_joined(packets::chat(action, from, false, message), None);
            }
            DestType::Client => {
                let target = self
                    .sessions
                    .find_by_index(dest)
                    .filter(|s| s.state.has_joined())
                    .map(Session::id);
                match target {
                    Some(target) => self.send(target, packets::chat(action, from, false, message)),
                    None if dest == SERVER_INDEX => {}
                    None => return,
                }
                if let Some(sender) = sender.filter(|&s| Some(s) != target) {
                    self.send(sender, packets::chat(action, dest, true, message));
                }
            }
            DestType::Company => {
                let Ok(company) = CompanyId::try_from(dest) else {
                    return;
                };
                let recipients: Vec<SessionId> = self
                    .sessions
                    .iter()
                    .filter(|s| s.state.has_joined() && s.playas == company)
                    .map(Session::id)
                    .filter(|&id| Some(id) != sender)
                    .collect();
                for recipient in recipients {
                    self.send(recipient, packets::chat(action, from, false, message));
                }
                if let Some(sender) = sender {
                    self.send(sender, packets::chat(action, dest, true, message));
                }
            }
        }
    }

    fn handle_set_password(
        &mut self,
        id: SessionId,
        packet: &mut Packet,
    ) -> Result<(), NetworkError> {
        self.require_joined(id, PacketType::ClientSetPassword)?;
        let password = packet.read_string(PASSWORD_LENGTH)?;

        let session = self.session(id)?;
        let (index, playas) = (session.index(), session.playas);
        if playas < MAX_COMPANIES {
            log::info!("client #{} changed the password of company {}", index, playas);
            self.set_company_password(playas, password);
        }
        Ok(())
    }

    fn handle_set_name(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        self.require_joined(id, PacketType::ClientSetName)?;
        let wanted = packet.read_string(NAME_LENGTH)?;
        let name = self.unique_name(&wanted, Some(id));

        let session = self.session(id)?;
        if session.name == name {
            return Ok(());
        }
        log::info!(
            "client #{} is now known as '{}' (was '{}')",
            session.index(),
            name,
            session.name
        );
        session.name = name.clone();

        let (index, playas) = (session.index(), session.playas);
        self.send_joined(packets::client_info(index, playas, &name), None);
        Ok(())
    }

    fn handle_quit(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        let message = packet.read_string(CHAT_LENGTH)?;
        if let Some(index) = self.close_session(id, DisconnectReason::Graceful) {
            self.send_joined(packets::quit(index, &message), Some(id));
        }
        Ok(())
    }

    fn handle_error(&mut self, id: SessionId, packet: &mut Packet) -> Result<(), NetworkError> {
        let code = ErrorCode::from_wire(packet.read_u8()?);
        log::warn!("client #{} reported an error: {}", self.session(id)?.index(), code);
        self.disconnect(id, DisconnectReason::Error(code));
        Ok(())
    }
}

fn truncate_name(name: &str, max: usize) -> &str {
    if name.len() <= max {
        return name;
    }
    let mut cut = max;
    while !name.is_char_boundary(cut) {
        cut -= 1;
    }
    &name[..cut]
}
