use super::content::{ContentId, MAX_GRF_COUNT};
use crate::net::{GAME_INFO_VERSION, NAME_LENGTH, Packet, PacketError, REVISION_LENGTH};

/// Advertisement record answered to FIND_SERVER.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GameInfo {
    pub content: Vec<ContentId>,
    pub game_date: u32,
    pub start_date: u32,
    pub companies_max: u8,
    pub companies_on: u8,
    pub spectators_max: u8,
    pub server_name: String,
    pub server_revision: String,
    pub server_lang: u8,
    pub use_password: bool,
    pub clients_max: u8,
    pub clients_on: u8,
    pub spectators_on: u8,
    pub map_width: u16,
    pub map_height: u16,
    pub map_set: u8,
    pub dedicated: bool,
}

impl GameInfo {
    pub fn write(&self, packet: &mut Packet) -> Result<(), PacketError> {
        packet.write_u8(GAME_INFO_VERSION)?;

        let content = &self.content[..self.content.len().min(MAX_GRF_COUNT)];
        packet.write_u8(content.len() as u8)?;
        for id in content {
            id.write(packet)?;
        }

        packet.write_u32(self.game_date)?;
        packet.write_u32(self.start_date)?;
        packet.write_u8(self.companies_max)?;
        packet.write_u8(self.companies_on)?;
        packet.write_u8(self.spectators_max)?;
        packet.write_str(&self.server_name)?;
        packet.write_str(&self.server_revision)?;
        packet.write_u8(self.server_lang)?;
        packet.write_bool(self.use_password)?;
        packet.write_u8(self.clients_max)?;
        packet.write_u8(self.clients_on)?;
        packet.write_u8(self.spectators_on)?;
        packet.write_u16(self.map_width)?;
        packet.write_u16(self.map_height)?;
        packet.write_u8(self.map_set)?;
        packet.write_bool(self.dedicated)
    }

    pub fn read(packet: &mut Packet) -> Result<Self, PacketError> {
        let version = packet.read_u8()?;
        if version != GAME_INFO_VERSION {
            return Err(PacketError::InvalidValue {
                field: "game info version",
                value: version as u32,
            });
        }

        let count = packet.read_u8()? as usize;
        if count > MAX_GRF_COUNT {
            return Err(PacketError::InvalidValue {
                field: "content count",
                value: count as u32,
            });
        }
        let content = (0..count)
            .map(|_| ContentId::read(packet))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            content,
            game_date: packet.read_u32()?,
            start_date: packet.read_u32()?,
            companies_max: packet.read_u8()?,
            companies_on: packet.read_u8()?,
            spectators_max: packet.read_u8()?,
            server_name: packet.read_string(NAME_LENGTH)?,
            server_revision: packet.read_string(REVISION_LENGTH)?,
            server_lang: packet.read_u8()?,
            use_password: packet.read_bool()?,
            clients_max: packet.read_u8()?,
            clients_on: packet.read_u8()?,
            spectators_on: packet.read_u8()?,
            map_width: packet.read_u16()?,
            map_height: packet.read_u16()?,
            map_set: packet.read_u8()?,
            dedicated: packet.read_bool()?,
        })
    }

    pub fn years_running(&self) -> u32 {
        self.game_date.saturating_sub(self.start_date) / 365
    }

    pub fn map_area(&self) -> u32 {
        self.map_width as u32 * self.map_height as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{SEND_MTU, UdpPacketType};

    fn sample() -> GameInfo {
        GameInfo {
            content: vec![ContentId::new(1, [9; 16]), ContentId::new(2, [8; 16])],
            game_date: 730,
            start_date: 365,
            companies_max: 8,
            companies_on: 2,
            spectators_max: 10,
            server_name: "Lockstep Land".into(),
            server_revision: "1.0".into(),
            server_lang: 3,
            use_password: true,
            clients_max: 10,
            clients_on: 4,
            spectators_on: 1,
            map_width: 512,
            map_height: 256,
            map_set: 1,
            dedicated: true,
        }
    }

    #[test]
    fn test_advertisement_survives_the_wire() {
        let info = sample();
        let mut packet = Packet::new(UdpPacketType::ServerResponse);
        info.write(&mut packet).unwrap();

        let mut received = Packet::from_wire(packet.into_wire()).unwrap();
        assert_eq!(GameInfo::read(&mut received).unwrap(), info);
        assert_eq!(info.years_running(), 1);
    }

    #[test]
    fn test_full_content_list_fits_the_mtu() {
        let info = GameInfo {
            content: (0..MAX_GRF_COUNT as u32 + 5)
                .map(|i| ContentId::new(i, [0; 16]))
                .collect(),
            server_name: "n".repeat(NAME_LENGTH),
            ..sample()
        };

        let mut packet = Packet::new(UdpPacketType::ServerResponse);
        info.write(&mut packet).unwrap();
        assert!(packet.size() <= SEND_MTU);

        let mut received = Packet::from_wire(packet.into_wire()).unwrap();
        assert_eq!(GameInfo::read(&mut received).unwrap().content.len(), MAX_GRF_COUNT);
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut packet = Packet::new(UdpPacketType::ServerResponse);
        packet.write_u8(GAME_INFO_VERSION + 1).unwrap();
        let mut received = Packet::from_wire(packet.into_wire()).unwrap();
        assert!(GameInfo::read(&mut received).is_err());
    }
}
