//! Builders for everything the server sends over the game connection.

use crate::command::Command;
use crate::net::{
    COMPANY_INFO_VERSION, ChatAction, ClientIndex, CompanyId, ErrorCode, HEADER_SIZE, MapPacket,
    Packet, PacketError, PacketType, PasswordKind, SEND_MTU,
};
use crate::sim::CompanyInfo;

pub const MAP_CHUNK_SIZE: usize = SEND_MTU - HEADER_SIZE - 1;

pub fn error(code: ErrorCode) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerError);
    packet.write_u8(code.into())?;
    Ok(packet)
}

pub fn need_password(kind: PasswordKind) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerNeedPassword);
    packet.write_u8(kind.into())?;
    Ok(packet)
}

pub fn welcome(index: ClientIndex) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerWelcome);
    packet.write_u16(index)?;
    Ok(packet)
}

pub fn client_info(index: ClientIndex, playas: CompanyId, name: &str) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerClientInfo);
    packet.write_u16(index)?;
    packet.write_u8(playas)?;
    packet.write_str(name)?;
    Ok(packet)
}

pub fn wait(ahead: usize) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerWait);
    packet.write_u8(ahead.min(u8::MAX as usize) as u8)?;
    Ok(packet)
}

pub fn map_start(frame: u32, total: usize) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerMap);
    packet.write_u8(MapPacket::Start.into())?;
    packet.write_u32(frame)?;
    let total = u32::try_from(total).map_err(|_| PacketError::FieldOverflow {
        field: "map size",
        value: total as u64,
    })?;
    packet.write_u32(total)?;
    Ok(packet)
}

pub fn map_patch(ready_ahead: u16, sync_freq: u16) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerMap);
    packet.write_u8(MapPacket::Patch.into())?;
    packet.write_u16(ready_ahead)?;
    packet.write_u16(sync_freq)?;
    Ok(packet)
}

pub fn map_chunk(bytes: &[u8]) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerMap);
    packet.write_u8(MapPacket::Normal.into())?;
    packet.write_bytes(bytes)?;
    Ok(packet)
}

pub fn map_end() -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerMap);
    packet.write_u8(MapPacket::End.into())?;
    Ok(packet)
}

pub fn join(index: ClientIndex) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerJoin);
    packet.write_u16(index)?;
    Ok(packet)
}

pub fn frame(frame: u32, frame_max: u32) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerFrame);
    packet.write_u32(frame)?;
    packet.write_u32(frame_max)?;
    Ok(packet)
}

pub fn sync(frame: u32, checksum: u64) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerSync);
    packet.write_u32(frame)?;
    packet.write_u64(checksum)?;
    Ok(packet)
}

pub fn command(command: &Command) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerCommand);
    command.write_scheduled(&mut packet)?;
    Ok(packet)
}

pub fn chat(
    action: ChatAction,
    from: u16,
    self_send: bool,
    message: &str,
) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerChat);
    packet.write_u8(action.into())?;
    packet.write_u16(from)?;
    packet.write_bool(self_send)?;
    packet.write_str(message)?;
    Ok(packet)
}

pub fn quit(index: ClientIndex, message: &str) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerQuit);
    packet.write_u16(index)?;
    packet.write_str(message)?;
    Ok(packet)
}

pub fn error_quit(index: ClientIndex, code: ErrorCode) -> Result<Packet, PacketError> {
    let mut packet = Packet::new(PacketType::ServerErrorQuit);
    packet.write_u16(index)?;
    packet.write_u8(code.into())?;
    Ok(packet)
}

/// One packet per company; a lone packet with `total = 0` when there are none.
pub fn company_info(companies: &[CompanyInfo]) -> Result<Vec<Packet>, PacketError> {
    let total = companies.len().min(u8::MAX as usize) as u8;
    if companies.is_empty() {
        let mut packet = Packet::new(PacketType::ServerCompanyInfo);
        packet.write_u8(COMPANY_INFO_VERSION)?;
        packet.write_u8(0)?;
        return Ok(vec![packet]);
    }

    companies
        .iter()
        .map(|company| {
            let mut packet = Packet::new(PacketType::ServerCompanyInfo);
            packet.write_u8(COMPANY_INFO_VERSION)?;
            packet.write_u8(total)?;
            company.write(&mut packet)?;
            Ok(packet)
        })
        .collect()
}
