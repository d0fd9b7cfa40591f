use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::net::{COMMAND_TEXT_LENGTH, CompanyId, Packet, PacketError, PacketType};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Command {
    pub player: CompanyId,
    pub cmd: u32,
    pub p1: u32,
    pub p2: u32,
    pub tile: u32,
    pub text: String,
    pub frame: u32,
    pub callback: u8,
}

impl Command {
    pub fn new(player: CompanyId, cmd: u32) -> Self {
        Self {
            player,
            cmd,
            ..Default::default()
        }
    }

    pub fn with_params(mut self, p1: u32, p2: u32, tile: u32) -> Self {
        self.p1 = p1;
        self.p2 = p2;
        self.tile = tile;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let mut text = text.into();
        if text.len() > COMMAND_TEXT_LENGTH {
            let mut cut = COMMAND_TEXT_LENGTH;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
        }
        self.text = text;
        self
    }

    fn write_body(&self, packet: &mut Packet) -> Result<(), PacketError> {
        packet.write_u8(self.player)?;
        packet.write_u32(self.cmd)?;
        packet.write_u32(self.p1)?;
        packet.write_u32(self.p2)?;
        packet.write_u32(self.tile)?;
        packet.write_str(&self.text)
    }

    fn read_body(packet: &mut Packet) -> Result<Self, PacketError> {
        Ok(Self {
            player: packet.read_u8()?,
            cmd: packet.read_u32()?,
            p1: packet.read_u32()?,
            p2: packet.read_u32()?,
            tile: packet.read_u32()?,
            text: packet.read_string(COMMAND_TEXT_LENGTH)?,
            frame: 0,
            callback: 0,
        })
    }

    /// CLIENT_COMMAND layout: the client never picks the frame.
    pub fn write_request(&self, packet: &mut Packet) -> Result<(), PacketError> {
        self.write_body(packet)?;
        packet.write_u8(self.callback)
    }

    pub fn read_request(packet: &mut Packet) -> Result<Self, PacketError> {
        let mut command = Self::read_body(packet)?;
        command.callback = packet.read_u8()?;
        Ok(command)
    }

    /// The command as every peer decodes it: text capped, cut at the first
    /// NUL and control characters replaced.
    pub fn normalized(&self) -> Result<Self, PacketError> {
        let capped = Command {
            text: String::new(),
            ..self.clone()
        }
        .with_text(self.text.as_str());

        let mut packet = Packet::new(PacketType::ClientCommand);
        capped.write_request(&mut packet)?;
        let mut packet = Packet::from_wire(packet.into_wire())?;
        let mut command = Self::read_request(&mut packet)?;
        command.frame = self.frame;
        Ok(command)
    }

    /// SERVER_COMMAND layout.
    pub fn write_scheduled(&self, packet: &mut Packet) -> Result<(), PacketError> {
        self.write_body(packet)?;
        packet.write_u32(self.frame)?;
        packet.write_u8(self.callback)
    }

    pub fn read_scheduled(packet: &mut Packet) -> Result<Self, PacketError> {
        let mut command = Self::read_body(packet)?;
        command.frame = packet.read_u32()?;
        command.callback = packet.read_u8()?;
        Ok(command)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("command for frame {command_frame} still queued at frame {frame}")]
    MissedFrame { command_frame: u32, frame: u32 },
}

#[derive(Debug, Clone, Default)]
pub struct CommandQueue {
    commands: VecDeque<Command>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push_back(command);
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    pub fn drain(&mut self) -> impl Iterator<Item = Command> + '_ {
        self.commands.drain(..)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter()
    }

    /// Removes and returns the commands scheduled for exactly `frame`, in
    /// arrival order. Anything scheduled earlier can no longer run.
    pub fn take_frame(&mut self, frame: u32) -> Result<Vec<Command>, QueueError> {
        if let Some(missed) = self.commands.iter().find(|c| c.frame < frame) {
            return Err(QueueError::MissedFrame {
                command_frame: missed.frame,
                frame,
            });
        }

        let (due, pending): (Vec<Command>, Vec<Command>) =
            self.commands.drain(..).partition(|c| c.frame == frame);
        self.commands = pending.into();
        Ok(due)
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduled(cmd: u32, frame: u32) -> Command {
        Command {
            frame,
            ..Command::new(0, cmd)
        }
    }

    #[test]
    fn test_take_frame_keeps_arrival_order() {
        let mut queue = CommandQueue::new();
        queue.push(scheduled(1, 12));
        queue.push(scheduled(2, 13));
        queue.push(scheduled(3, 12));

        let due = queue.take_frame(12).unwrap();
        assert_eq!(due.iter().map(|c| c.cmd).collect::<Vec<_>>(), vec![1, 3]);
        assert_eq!(queue.len(), 1);
        assert!(queue.take_frame(12).unwrap().is_empty());
        assert_eq!(queue.take_frame(13).unwrap()[0].cmd, 2);
    }

    #[test]
    fn test_missed_frame_is_an_error() {
        let mut queue = CommandQueue::new();
        queue.push(scheduled(1, 4));

        assert_eq!(
            queue.take_frame(5),
            Err(QueueError::MissedFrame {
                command_frame: 4,
                frame: 5
            })
        );
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_normalized_matches_the_wire() {
        let command = Command::new(255, 2).with_params(1, 2, 3);
        let command = Command {
            text: format!("line\nbreak\0hidden{}", "x".repeat(300)),
            callback: 9,
            ..command
        };

        let normalized = command.normalized().unwrap();
        assert_eq!(normalized.text, "line?break");
        assert_eq!(normalized.callback, 9);
        assert_eq!((normalized.p1, normalized.p2, normalized.tile), (1, 2, 3));
        assert_eq!(normalized.normalized().unwrap(), normalized);

        let long = Command::new(0, 2);
        let long = Command {
            text: "\u{85}".repeat(100),
            ..long
        };
        let normalized = long.normalized().unwrap();
        let mut packet = Packet::new(PacketType::ClientCommand);
        normalized.write_request(&mut packet).unwrap();
        let mut packet = Packet::from_wire(packet.into_wire()).unwrap();
        assert_eq!(Command::read_request(&mut packet).unwrap(), normalized);
    }

    #[test]
    fn test_request_omits_frame() {
        let command = Command {
            frame: 99,
            callback: 3,
            ..Command::new(2, 40).with_params(1, 2, 0x1234).with_text("Station")
        };

        let mut packet = Packet::new(17u8);
        command.write_request(&mut packet).unwrap();
        let mut received = Packet::from_wire(packet.into_wire()).unwrap();
        let decoded = Command::read_request(&mut received).unwrap();

        assert_eq!(decoded.frame, 0);
        assert_eq!(decoded.callback, 3);
        assert_eq!(decoded.text, "Station");
        assert_eq!(decoded.tile, 0x1234);
        assert_eq!(received.remaining(), 0);

        let mut packet = Packet::new(18u8);
        command.write_scheduled(&mut packet).unwrap();
        let mut received = Packet::from_wire(packet.into_wire()).unwrap();
        assert_eq!(Command::read_scheduled(&mut received).unwrap(), command);
    }

    #[test]
    fn test_text_is_capped() {
        let command = Command::new(0, 1).with_text("x".repeat(COMMAND_TEXT_LENGTH + 10));
        assert_eq!(command.text.len(), COMMAND_TEXT_LENGTH);
    }
}
