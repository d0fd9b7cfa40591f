use super::{
    ClientCloseReason, ClientEvent, ClientStatus, Handlers, MapDownload, NetworkClient,
    RemoteClient, packets,
};
use crate::command::Command;
use crate::error::{NetworkError, SimError};
use crate::net::{
    CHAT_LENGTH, COMPANY_INFO_VERSION, ChatAction, ErrorCode, MapPacket, NAME_LENGTH, Packet,
    PacketType, PasswordKind,
};
use crate::sim::{CompanyInfo, Simulation};

impl<S: Simulation> NetworkClient<S> {
    pub(super) fn handlers() -> Handlers<S> {
        Handlers::<S>::new()
            .on(PacketType::ServerFull, Self::handle_full)
            .on(PacketType::ServerError, Self::handle_error)
            .on(PacketType::ServerCompanyInfo, Self::handle_company_info)
            .on(PacketType::ServerClientInfo, Self::handle_client_info)
            .on(PacketType::ServerNeedPassword, Self::handle_need_password)
            .on(PacketType::ServerWelcome, Self::handle_welcome)
            .on(PacketType::ServerWait, Self::handle_wait)
            .on(PacketType::ServerMap, Self::handle_map)
            .on(PacketType::ServerJoin, Self::handle_join)
            .on(PacketType::ServerFrame, Self::handle_frame)
            .on(PacketType::ServerSync, Self::handle_sync)
            .on(PacketType::ServerCommand, Self::handle_command)
            .on(PacketType::ServerChat, Self::handle_chat)
            .on(PacketType::ServerQuit, Self::handle_quit)
            .on(PacketType::ServerErrorQuit, Self::handle_error_quit)
            .on(PacketType::ServerShutdown, Self::handle_shutdown)
            .on(PacketType::ServerNewGame, Self::handle_new_game)
    }

    fn require_frames(&self, kind: PacketType) -> Result<(), NetworkError> {
        if self.status.runs_frames() {
            Ok(())
        } else {
            Err(NetworkError::UnexpectedPacket(kind))
        }
    }

    fn handle_full(&mut self, _: (), _packet: &mut Packet) -> Result<(), NetworkError> {
        self.pending_events.push_back(ClientEvent::ServerFull);
        Err(NetworkError::ServerFull)
    }

    fn handle_error(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let code = ErrorCode::from_wire(packet.read_u8()?);
        self.pending_events.push_back(ClientEvent::Error(code));
        Err(NetworkError::Rejected(code))
    }

    fn handle_company_info(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let version = packet.read_u8()?;
        if version != COMPANY_INFO_VERSION {
            log::debug!("ignoring company info version {}", version);
            return Ok(());
        }

        let total = packet.read_u8()? as usize;
        if total > 0 {
            self.companies.push(CompanyInfo::read(packet)?);
            if self.companies.len() < total {
                return Ok(());
            }
        }

        let companies = std::mem::take(&mut self.companies);
        self.pending_events
            .push_back(ClientEvent::CompanyInfo(companies));
        Ok(())
    }

    fn handle_client_info(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let index = packet.read_u16()?;
        let playas = packet.read_u8()?;
        let name = packet.read_string(NAME_LENGTH)?;

        if self.index == Some(index) {
            if self.playas != playas {
                log::info!("playing as company {}", playas);
            }
            self.playas = playas;
        }
        self.clients.insert(
            index,
            RemoteClient {
                playas,
                name: name.clone(),
            },
        );
        self.pending_events.push_back(ClientEvent::ClientInfo {
            index,
            playas,
            name,
        });
        Ok(())
    }

    fn handle_need_password(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        if !matches!(
            self.status,
            ClientStatus::Joining | ClientStatus::Authorizing(_)
        ) {
            return Err(NetworkError::UnexpectedPacket(PacketType::ServerNeedPassword));
        }

        let kind = PasswordKind::try_from(packet.read_u8()?)?;
        self.status = ClientStatus::Authorizing(kind);

        let known = match kind {
            PasswordKind::Game => &self.config.game_password,
            PasswordKind::Company => &self.config.company_password,
        };
        if known.is_empty() {
            log::info!("server wants a {:?} password", kind);
            self.pending_events
                .push_back(ClientEvent::PasswordRequired(kind));
        } else {
            let password = known.clone();
            self.send(packets::password(kind, &password));
        }
        Ok(())
    }

    fn handle_welcome(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        if !matches!(
            self.status,
            ClientStatus::Joining | ClientStatus::Authorizing(_)
        ) {
            return Err(NetworkError::UnexpectedPacket(PacketType::ServerWelcome));
        }

        let index = packet.read_u16()?;
        log::info!("joined as client #{}, requesting map", index);
        self.index = Some(index);
        self.status = ClientStatus::Authorized;
        self.pending_events.push_back(ClientEvent::Joined { index });
        self.send(Ok(Packet::new(PacketType::ClientGetMap)));
        Ok(())
    }

    fn handle_wait(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        if !matches!(
            self.status,
            ClientStatus::Authorized | ClientStatus::MapWait(_)
        ) {
            return Err(NetworkError::UnexpectedPacket(PacketType::ServerWait));
        }

        let ahead = packet.read_u8()?;
        log::debug!("waiting for the map, {} ahead", ahead);
        self.status = ClientStatus::MapWait(ahead);
        self.pending_events.push_back(ClientEvent::Waiting { ahead });
        Ok(())
    }

    fn handle_map(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let unexpected = NetworkError::UnexpectedPacket(PacketType::ServerMap);
        match MapPacket::try_from(packet.read_u8()?)? {
            MapPacket::Start => {
                if !matches!(
                    self.status,
                    ClientStatus::Authorized | ClientStatus::MapWait(_)
                ) {
                    return Err(unexpected);
                }
                let frame = packet.read_u32()?;
                let total = packet.read_u32()? as usize;
                log::info!("downloading map: {} bytes at frame {}", total, frame);
                self.download = Some(MapDownload {
                    frame,
                    total,
                    data: Vec::with_capacity(total.min(1 << 20)),
                });
                self.status = ClientStatus::Downloading;
            }
            MapPacket::Patch => {
                if self.status != ClientStatus::Downloading {
                    return Err(unexpected);
                }
                let ready_ahead = packet.read_u16()?;
                let sync_freq = packet.read_u16()?;
                self.server_settings = Some((ready_ahead, sync_freq));
            }
            MapPacket::Normal => {
                let download = self.download.as_mut().ok_or(unexpected)?;
                download.data.extend(packet.read_rest());
                if download.data.len() > download.total {
                    return Err(SimError::InvalidData("map larger than announced".into()).into());
                }
                let (received, total) = (download.data.len(), download.total);
                self.pending_events
                    .push_back(ClientEvent::MapProgress { received, total });
            }
            MapPacket::End => {
                let download = self.download.take().ok_or(unexpected)?;
                if download.data.len() != download.total {
                    return Err(SimError::InvalidData(format!(
                        "map ended after {} of {} bytes",
                        download.data.len(),
                        download.total
                    ))
                    .into());
                }

                self.sim.load(&download.data)?;
                self.lockstep.reset(download.frame);
                self.frame_received = false;
                self.last_ack = None;
                self.status = ClientStatus::PreActive;
                log::info!("map loaded at frame {}", download.frame);
                self.pending_events.push_back(ClientEvent::MapLoaded {
                    frame: download.frame,
                });
                self.send(Ok(Packet::new(PacketType::ClientMapOk)));
            }
        }
        Ok(())
    }

    fn handle_join(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let index = packet.read_u16()?;
        log::info!("client #{} joined the game", index);
        self.pending_events
            .push_back(ClientEvent::ClientJoined { index });
        Ok(())
    }

    fn handle_frame(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        self.require_frames(PacketType::ServerFrame)?;
        let frame = packet.read_u32()?;
        let frame_max = packet.read_u32()?;

        log::debug!("server at frame {}, released up to {}", frame, frame_max);
        self.lockstep.release(frame_max);
        self.frame_received = true;
        Ok(())
    }

    fn handle_sync(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        self.require_frames(PacketType::ServerSync)?;
        let frame = packet.read_u32()?;
        let checksum = packet.read_u64()?;
        self.lockstep.expect_checksum(frame, checksum, &self.sim)?;
        Ok(())
    }

    fn handle_command(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        self.require_frames(PacketType::ServerCommand)?;
        let command = Command::read_scheduled(packet)?;
        log::debug!(
            "command {} for company {} at frame {}",
            command.cmd,
            command.player,
            command.frame
        );
        self.lockstep.schedule(command)?;
        Ok(())
    }

    fn handle_chat(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let action = ChatAction::try_from(packet.read_u8()?)?;
        let from = packet.read_u16()?;
        let self_send = packet.read_bool()?;
        let message = packet.read_string(CHAT_LENGTH)?;

        self.pending_events.push_back(ClientEvent::Chat {
            action,
            from,
            self_send,
            message,
        });
        Ok(())
    }

    fn handle_quit(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let index = packet.read_u16()?;
        let reason = packet.read_string(CHAT_LENGTH)?;
        log::info!("client #{} left: {}", index, reason);
        self.clients.remove(&index);
        self.pending_events
            .push_back(ClientEvent::ClientQuit { index, reason });
        Ok(())
    }

    fn handle_error_quit(&mut self, _: (), packet: &mut Packet) -> Result<(), NetworkError> {
        let index = packet.read_u16()?;
        let code = ErrorCode::from_wire(packet.read_u8()?);
        log::info!("client #{} dropped: {}", index, code);
        self.clients.remove(&index);
        self.pending_events.push_back(ClientEvent::ClientQuit {
            index,
            reason: code.as_str().to_string(),
        });
        Ok(())
    }

    fn handle_shutdown(&mut self, _: (), _packet: &mut Packet) -> Result<(), NetworkError> {
        log::info!("server is shutting down");
        self.pending_events.push_back(ClientEvent::Shutdown);
        self.close(ClientCloseReason::Shutdown);
        Ok(())
    }

    fn handle_new_game(&mut self, _: (), _packet: &mut Packet) -> Result<(), NetworkError> {
        log::info!("server is starting a new game");
        self.pending_events.push_back(ClientEvent::NewGame);
        self.close(ClientCloseReason::NewGame);
        Ok(())
    }
}

