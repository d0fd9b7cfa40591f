//! Builders for everything the client sends over the game connection.

use crate::command::Command;
use crate::net::{
    ChatAction, CompanyId, DestType, ErrorCode, Packet, PacketError, PacketType, PasswordKind,
};

pub fn join(
    revision: &str,
    name: &str,
    playas: CompanyId,
    language: u8,
    unique_id: &str,
) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientJoin);
    packet.write_str(revision)?;
    packet.write_str(name)?;
    packet.write_u8(playas)?;
    packet.write_u8(language)?;
    packet.write_str(unique_id)?;
    Ok(packet)
}

pub fn password(kind: PasswordKind, password: &str) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientPassword);
    packet.write_u8(kind.into())?;
    packet.write_str(password)?;
    Ok(packet)
}

pub fn ack(frame: u32) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientAck);
    packet.write_u32(frame)?;
    Ok(packet)
}

pub fn command(command: &Command) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientCommand);
    command.write_request(&mut packet)?;
    Ok(packet)
}

pub fn chat(
    action: ChatAction,
    dest_type: DestType,
    dest: u16,
    message: &str,
) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientChat);
    packet.write_u8(action.into())?;
    packet.write_u8(dest_type.into())?;
    packet.write_u16(dest)?;
    packet.write_str(message)?;
    Ok(packet)
}

pub fn set_password(password: &str) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientSetPassword);
    packet.write_str(password)?;
    Ok(packet)
}

pub fn set_name(name: &str) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientSetName);
    packet.write_str(name)?;
    Ok(packet)
}

pub fn quit(message: &str) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientQuit);
    packet.write_str(message)?;
    Ok(packet)
}

pub fn error(code: ErrorCode) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ClientError);
    packet.write_u8(code.into())?;
    Ok(packet)
}
