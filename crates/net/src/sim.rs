use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::Command;
use crate::discovery::ContentId;
use crate::error::SimError;
use crate::net::{CompanyId, MAX_COMPANIES, NAME_LENGTH, Packet, PacketError};

pub const DAY_TICKS: u32 = 74;

/// The deterministic world a lockstep participant drives.
pub trait Simulation {
    fn execute(&mut self, command: &Command);
    fn advance(&mut self, frame: u32);
    fn checksum(&self) -> u64;
    fn save(&self) -> Result<Vec<u8>, SimError>;
    fn load(&mut self, data: &[u8]) -> Result<(), SimError>;

    fn world_info(&self) -> WorldInfo {
        WorldInfo::default()
    }

    fn companies(&self) -> Vec<CompanyInfo> {
        Vec::new()
    }

    fn content(&self) -> Vec<ContentId> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorldInfo {
    pub game_date: u32,
    pub start_date: u32,
    pub map_width: u16,
    pub map_height: u16,
    pub map_set: u8,
}

impl Default for WorldInfo {
    fn default() -> Self {
        Self {
            game_date: 0,
            start_date: 0,
            map_width: 256,
            map_height: 256,
            map_set: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompanyInfo {
    pub id: CompanyId,
    pub name: String,
    pub inaugurated_year: u32,
    pub value: u64,
    pub money: u64,
    pub income: u64,
    pub performance: u16,
    pub has_password: bool,
    pub clients: String,
}

impl CompanyInfo {
    pub fn write(&self, packet: &mut Packet) -> Result<(), PacketError> {
        packet.write_u8(self.id)?;
        packet.write_str(&self.name)?;
        packet.write_u32(self.inaugurated_year)?;
        packet.write_u64(self.value)?;
        packet.write_u64(self.money)?;
        packet.write_u64(self.income)?;
        packet.write_u16(self.performance)?;
        packet.write_bool(self.has_password)?;
        packet.write_str(&self.clients)
    }

    pub fn read(packet: &mut Packet) -> Result<Self, PacketError> {
        Ok(Self {
            id: packet.read_u8()?,
            name: packet.read_string(NAME_LENGTH)?,
            inaugurated_year: packet.read_u32()?,
            value: packet.read_u64()?,
            money: packet.read_u64()?,
            income: packet.read_u64()?,
            performance: packet.read_u16()?,
            has_password: packet.read_bool()?,
            clients: packet.read_string(NAME_LENGTH * 4)?,
        })
    }

    /// Upper bound of the encoded size, used to stop before the MTU.
    pub fn wire_size(&self) -> usize {
        1 + self.name.len() + 1 + 4 + 8 * 3 + 2 + 1 + self.clients.len() + 1
    }
}

pub const CMD_FOUND_COMPANY: u32 = 1;
pub const CMD_RENAME_COMPANY: u32 = 2;
pub const CMD_COMPANY_INCOME: u32 = 3;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const START_YEAR: u32 = 1950;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct JournalCompany {
    name: String,
    founded_frame: u32,
    money: u64,
    income: u64,
}

/// Reference world: hashes every command and frame it sees and keeps the
/// journal of executed commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalWorld {
    frame: u32,
    checksum: u64,
    map_width: u16,
    map_height: u16,
    companies: BTreeMap<CompanyId, JournalCompany>,
    #[serde(skip)]
    journal: Vec<Command>,
}

impl Default for JournalWorld {
    fn default() -> Self {
        Self::new(256, 256)
    }
}

impl JournalWorld {
    pub fn new(map_width: u16, map_height: u16) -> Self {
        Self {
            frame: 0,
            checksum: FNV_OFFSET,
            map_width,
            map_height,
            companies: BTreeMap::new(),
            journal: Vec::new(),
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn journal(&self) -> &[Command] {
        &self.journal
    }

    fn fold(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.checksum ^= byte as u64;
            self.checksum = self.checksum.wrapping_mul(FNV_PRIME);
        }
    }
}

impl Simulation for JournalWorld {
    fn execute(&mut self, command: &Command) {
        self.fold(&[command.player]);
        for word in [command.cmd, command.p1, command.p2, command.tile, command.frame] {
            self.fold(&word.to_le_bytes());
        }
        self.fold(command.text.as_bytes());

        match command.cmd {
            CMD_FOUND_COMPANY => {
                let id = command.p1 as CompanyId;
                if id < MAX_COMPANIES && !self.companies.contains_key(&id) {
                    self.companies.insert(
                        id,
                        JournalCompany {
                            name: format!("Company {}", id + 1),
                            founded_frame: command.frame,
                            money: 100_000,
                            income: 0,
                        },
                    );
                }
            }
            CMD_RENAME_COMPANY => {
                if let Some(company) = self.companies.get_mut(&command.player) {
                    company.name = command.text.clone();
                }
            }
            CMD_COMPANY_INCOME => {
                if let Some(company) = self.companies.get_mut(&command.player) {
                    company.income = command.p1 as u64;
                }
            }
            _ => {}
        }

        self.journal.push(command.clone());
    }

    fn advance(&mut self, frame: u32) {
        self.frame = frame;
        self.fold(&frame.to_le_bytes());
        if frame % DAY_TICKS == 0 {
            for company in self.companies.values_mut() {
                company.money = company.money.saturating_add(company.income);
            }
        }
    }

    fn checksum(&self) -> u64 {
        self.checksum
    }

    fn save(&self) -> Result<Vec<u8>, SimError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn load(&mut self, data: &[u8]) -> Result<(), SimError> {
        let loaded: JournalWorld = serde_json::from_slice(data)?;
        if loaded.map_width == 0 || loaded.map_height == 0 {
            return Err(SimError::InvalidData("empty map".into()));
        }
        *self = loaded;
        Ok(())
    }

    fn world_info(&self) -> WorldInfo {
        WorldInfo {
            game_date: self.frame / DAY_TICKS,
            start_date: 0,
            map_width: self.map_width,
            map_height: self.map_height,
            map_set: 0,
        }
    }

    fn companies(&self) -> Vec<CompanyInfo> {
        self.companies
            .iter()
            .map(|(&id, company)| CompanyInfo {
                id,
                name: company.name.clone(),
                inaugurated_year: START_YEAR + company.founded_frame / (DAY_TICKS * 365),
                value: company.money,
                money: company.money,
                income: company.income,
                performance: 0,
                has_password: false,
                clients: String::new(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(company: u8, frame: u32) -> Command {
        Command {
            frame,
            ..Command::new(company, CMD_FOUND_COMPANY).with_params(company as u32, 0, 0)
        }
    }

    #[test]
    fn test_save_load_preserves_checksum() {
        let mut world = JournalWorld::default();
        world.execute(&found(0, 3));
        world.advance(3);

        let data = world.save().unwrap();
        let mut loaded = JournalWorld::new(1, 1);
        loaded.load(&data).unwrap();

        assert_eq!(loaded.checksum(), world.checksum());
        assert_eq!(loaded.frame(), 3);
        assert!(loaded.journal().is_empty());
        assert_eq!(loaded.companies().len(), 1);
    }

    #[test]
    fn test_command_order_changes_checksum() {
        let mut a = JournalWorld::default();
        let mut b = JournalWorld::default();

        a.execute(&found(0, 1));
        a.execute(&found(1, 1));
        b.execute(&found(1, 1));
        b.execute(&found(0, 1));

        assert_ne!(a.checksum(), b.checksum());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let mut world = JournalWorld::default();
        assert!(world.load(b"not json").is_err());
        assert_eq!(world.checksum(), FNV_OFFSET);
    }
}
