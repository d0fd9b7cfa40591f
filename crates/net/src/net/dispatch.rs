use std::marker::PhantomData;

use super::packet::Packet;
use super::protocol::PacketKind;
use crate::error::NetworkError;

pub type Handler<C, A> = fn(&mut C, A, &mut Packet) -> Result<(), NetworkError>;

pub enum Dispatch<K> {
    Handled,
    Unhandled(K),
}

/// Packet type → handler table, filled once when the owner is built.
pub struct Dispatcher<K, C, A> {
    handlers: Vec<Option<Handler<C, A>>>,
    _kind: PhantomData<K>,
}

impl<K: PacketKind, C, A> Dispatcher<K, C, A> {
    pub fn new() -> Self {
        Self {
            handlers: vec![None; K::COUNT],
            _kind: PhantomData,
        }
    }

    pub fn on(mut self, kind: K, handler: Handler<C, A>) -> Self {
        self.handlers[slot(kind)] = Some(handler);
        self
    }

    /// Unknown tags are malformed input; known tags without a handler are
    /// returned to the caller to decide.
    pub fn dispatch(
        &self,
        ctx: &mut C,
        arg: A,
        packet: &mut Packet,
    ) -> Result<Dispatch<K>, NetworkError> {
        let kind = K::try_from(packet.kind())?;
        match self.handlers[slot(kind)] {
            Some(handler) => handler(ctx, arg, packet).map(|()| Dispatch::Handled),
            None => Ok(Dispatch::Unhandled(kind)),
        }
    }
}

fn slot<K: PacketKind>(kind: K) -> usize {
    let tag: u8 = kind.into();
    tag as usize
}

impl<K: PacketKind, C, A> Default for Dispatcher<K, C, A> {
    fn default() -> Self {
        Self::new()
    }
}
