use std::collections::HashMap;
use std::fmt;

use crate::net::{Packet, PacketError};

pub const MAX_GRF_COUNT: usize = 62;
pub const UNKNOWN_GRF_NAME: &str = "<unknown>";

/// Identifies one piece of add-on content: its grf id and md5 checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentId {
    pub grfid: u32,
    pub md5sum: [u8; 16],
}

impl ContentId {
    pub const WIRE_SIZE: usize = 4 + 16;

    pub fn new(grfid: u32, md5sum: [u8; 16]) -> Self {
        Self { grfid, md5sum }
    }

    pub fn write(&self, packet: &mut Packet) -> Result<(), PacketError> {
        packet.write_u32(self.grfid)?;
        packet.write_bytes(&self.md5sum)
    }

    pub fn read(packet: &mut Packet) -> Result<Self, PacketError> {
        Ok(Self {
            grfid: packet.read_u32()?,
            md5sum: packet.read_array()?,
        })
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}:", self.grfid.swap_bytes())?;
        for byte in self.md5sum {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Local knowledge of content names.
pub trait ContentResolver {
    fn find(&self, id: &ContentId) -> Option<String>;
}

impl ContentResolver for HashMap<ContentId, String> {
    fn find(&self, id: &ContentId) -> Option<String> {
        self.get(id).cloned()
    }
}

pub struct NoContent;

impl ContentResolver for NoContent {
    fn find(&self, _id: &ContentId) -> Option<String> {
        None
    }
}

/// Names learned from remote servers for content we do not have.
#[derive(Debug, Default)]
pub struct NameCache {
    names: HashMap<ContentId, String>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached name, inserting the placeholder on first sight.
    pub fn get_or_placeholder(&mut self, id: ContentId) -> &str {
        self.names
            .entry(id)
            .or_insert_with(|| UNKNOWN_GRF_NAME.to_string())
    }

    pub fn get(&self, id: &ContentId) -> Option<&str> {
        self.names.get(id).map(String::as_str)
    }

    pub fn is_unknown(&self, id: &ContentId) -> bool {
        self.get(id).is_none_or(|name| name == UNKNOWN_GRF_NAME)
    }

    /// Replaces a placeholder. Names already learned are kept.
    pub fn fill(&mut self, id: ContentId, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        match self.names.get_mut(&id) {
            Some(current) if current == UNKNOWN_GRF_NAME => {
                *current = name.to_string();
                true
            }
            _ => false,
        }
    }
}
