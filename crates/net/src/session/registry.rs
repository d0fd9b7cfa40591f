use std::net::SocketAddr;
use std::time::Instant;

use super::state::SessionState;
use crate::command::CommandQueue;
use crate::net::{
    ClientIndex, CompanyId, FIRST_CLIENT_INDEX, Packet, SPECTATOR, TcpChannel,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(usize);

pub struct Session {
    id: SessionId,
    index: ClientIndex,
    channel: TcpChannel,
    pub state: SessionState,
    pub name: String,
    pub playas: CompanyId,
    pub language: u8,
    pub unique_id: String,
    pub inbound: CommandQueue,
    pub outbound: CommandQueue,
    pub last_ack_frame: u32,
    pub last_ack_server_frame: u32,
    pub last_frame_sent: u32,
    pub paused: bool,
    pub state_since: u32,
    pub connected_at: Instant,
}

impl Session {
    fn new(id: SessionId, index: ClientIndex, channel: TcpChannel, frame: u32) -> Self {
        Self {
            id,
            index,
            channel,
            state: SessionState::Inactive,
            name: String::new(),
            playas: SPECTATOR,
            language: 0,
            unique_id: String::new(),
            inbound: CommandQueue::new(),
            outbound: CommandQueue::new(),
            last_ack_frame: frame,
            last_ack_server_frame: frame,
            last_frame_sent: frame,
            paused: false,
            state_since: frame,
            connected_at: Instant::now(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn index(&self) -> ClientIndex {
        self.index
    }

    pub fn addr(&self) -> SocketAddr {
        self.channel.peer_addr()
    }

    pub fn channel(&self) -> &TcpChannel {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut TcpChannel {
        &mut self.channel
    }

    pub fn send(&mut self, packet: Packet) {
        self.channel.send_packet(packet);
    }

    /// Frames sent to the client that it has not acknowledged executing.
    pub fn frames_behind(&self) -> u32 {
        self.last_frame_sent.saturating_sub(self.last_ack_frame)
    }

    /// Frames of server time since the client last acknowledged anything.
    pub fn silent_for(&self, current_frame: u32) -> u32 {
        current_frame.saturating_sub(self.last_ack_server_frame)
    }

    pub fn record_ack(&mut self, frame: u32, server_frame: u32) {
        self.last_ack_frame = frame;
        self.last_ack_server_frame = server_frame;
    }
}

/// Fixed-capacity session table. Iteration always follows slot order, which
/// keeps command collection and broadcasts deterministic.
pub struct SessionRegistry {
    slots: Vec<Option<Session>>,
    next_index: ClientIndex,
}

impl SessionRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            slots: (0..max_clients).map(|_| None).collect(),
            next_index: FIRST_CLIENT_INDEX,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    fn allocate_index(&mut self) -> ClientIndex {
        loop {
            let index = self.next_index;
            self.next_index = self.next_index.wrapping_add(1);
            if self.next_index < FIRST_CLIENT_INDEX {
                self.next_index = FIRST_CLIENT_INDEX;
            }
            if self.find_by_index(index).is_none() {
                return index;
            }
        }
    }

    pub fn insert(&mut self, channel: TcpChannel, frame: u32) -> Option<SessionId> {
        let slot = self.slots.iter().position(Option::is_none)?;
        let id = SessionId(slot);
        let index = self.allocate_index();
        self.slots[slot] = Some(Session::new(id, index, channel, frame));
        Some(id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        self.slots.get_mut(id.0).and_then(Option::take)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.iter().map(Session::id).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Session> {
        self.slots.iter_mut().flatten()
    }

    pub fn find_by_index(&self, index: ClientIndex) -> Option<&Session> {
        self.iter().find(|s| s.index == index)
    }

    pub fn id_of_index(&self, index: ClientIndex) -> Option<SessionId> {
        self.find_by_index(index).map(Session::id)
    }

    pub fn name_in_use(&self, name: &str, except: Option<SessionId>) -> bool {
        self.iter()
            .filter(|s| Some(s.id) != except && s.state.has_joined())
            .any(|s| s.name == name)
    }

    /// Sessions that should hear about joins, quits and chat.
    pub fn joined(&self) -> Vec<SessionId> {
        self.iter()
            .filter(|s| s.state.has_joined())
            .map(Session::id)
            .collect()
    }

    pub fn any_active(&self) -> bool {
        self.iter().any(|s| s.state.is_active())
    }

    pub fn active_count(&self) -> usize {
        self.iter().filter(|s| s.state.is_active()).count()
    }

    /// Recipients of the per-frame broadcast: active sessions only.
    pub fn broadcast_targets(&self) -> Vec<SessionId> {
        self.iter()
            .filter(|s| s.state.is_active() && !s.paused)
            .map(Session::id)
            .collect()
    }

    pub fn map_transfer_busy(&self) -> bool {
        self.iter().any(|s| s.state.in_map_transfer())
    }

    pub fn first_waiting(&self) -> Option<SessionId> {
        self.iter()
            .find(|s| s.state == SessionState::MapWait)
            .map(Session::id)
    }

    pub fn waiting_count(&self) -> usize {
        self.iter()
            .filter(|s| s.state == SessionState::MapWait)
            .count()
    }
}
