//! Bounded, cursor-based packet buffer.
//!
//! Wire layout: `[size: u16 LE][type: u8][payload]`, where `size` counts the
//! header too. Every integer is little-endian and fixed width; strings are
//! NUL terminated without a length prefix.

pub const SEND_MTU: usize = 1460;
pub const HEADER_SIZE: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("packet overflow: {needed} bytes needed, {available} available")]
    BufferOverflow { needed: usize, available: usize },
    #[error("read past end of packet: {needed} bytes needed, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },
    #[error("unterminated string")]
    UnterminatedString,
    #[error("invalid packet size {0}")]
    InvalidSize(usize),
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("invalid value {value} for {field}")]
    InvalidValue { field: &'static str, value: u32 },
    #[error("{field} of {value} does not fit its wire field")]
    FieldOverflow { field: &'static str, value: u64 },
}

impl PacketError {
    pub fn is_overflow(&self) -> bool {
        matches!(
            self,
            PacketError::BufferOverflow { .. } | PacketError::FieldOverflow { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    buffer: Vec<u8>,
    pos: usize,
}

impl Packet {
    pub fn new(kind: impl Into<u8>) -> Self {
        let mut buffer = Vec::with_capacity(64);
        buffer.extend_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        buffer.push(kind.into());
        Self {
            buffer,
            pos: HEADER_SIZE,
        }
    }

    pub fn from_wire(bytes: Vec<u8>) -> Result<Self, PacketError> {
        if bytes.len() < HEADER_SIZE || bytes.len() > SEND_MTU {
            return Err(PacketError::InvalidSize(bytes.len()));
        }

        let declared = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if declared != bytes.len() {
            return Err(PacketError::InvalidSize(declared));
        }

        Ok(Self {
            buffer: bytes,
            pos: HEADER_SIZE,
        })
    }

    pub fn kind(&self) -> u8 {
        self.buffer[2]
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn wire(&self) -> &[u8] {
        &self.buffer
    }

    pub fn into_wire(self) -> Vec<u8> {
        self.buffer
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }

    pub fn space_left(&self) -> usize {
        SEND_MTU - self.buffer.len()
    }

    pub fn can_fit(&self, bytes: usize) -> bool {
        bytes <= self.space_left()
    }

    fn append(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        if !self.can_fit(bytes.len()) {
            return Err(PacketError::BufferOverflow {
                needed: bytes.len(),
                available: self.space_left(),
            });
        }

        self.buffer.extend_from_slice(bytes);
        let size = (self.buffer.len() as u16).to_le_bytes();
        self.buffer[..2].copy_from_slice(&size);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), PacketError> {
        self.append(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), PacketError> {
        self.append(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), PacketError> {
        self.append(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), PacketError> {
        self.append(&value.to_le_bytes())
    }

    pub fn write_bool(&mut self, value: bool) -> Result<(), PacketError> {
        self.write_u8(value as u8)
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), PacketError> {
        self.append(bytes)
    }

    /// Writes `value` up to its first NUL, then the terminator.
    pub fn write_str(&mut self, value: &str) -> Result<(), PacketError> {
        let bytes = value.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());

        if !self.can_fit(end + 1) {
            return Err(PacketError::BufferOverflow {
                needed: end + 1,
                available: self.space_left(),
            });
        }

        self.append(&bytes[..end])?;
        self.append(&[0])
    }

    fn take(&mut self, count: usize) -> Result<&[u8], PacketError> {
        if count > self.remaining() {
            return Err(PacketError::Truncated {
                needed: count,
                remaining: self.remaining(),
            });
        }

        let start = self.pos;
        self.pos += count;
        Ok(&self.buffer[start..self.pos])
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, PacketError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, PacketError> {
        Ok(u16::from_le_bytes(self.take_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, PacketError> {
        Ok(u32::from_le_bytes(self.take_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, PacketError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn read_bool(&mut self) -> Result<bool, PacketError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], PacketError> {
        self.take_array()
    }

    pub fn read_rest(&mut self) -> Vec<u8> {
        let rest = self.buffer[self.pos..].to_vec();
        self.pos = self.buffer.len();
        rest
    }

    /// Reads a NUL-terminated string, keeping at most `max_len` bytes of it.
    /// Control characters come back as `?`.
    pub fn read_string(&mut self, max_len: usize) -> Result<String, PacketError> {
        let Some(nul) = self.buffer[self.pos..].iter().position(|&b| b == 0) else {
            return Err(PacketError::UnterminatedString);
        };

        let raw = self.take(nul + 1)?;
        let mut value: String = String::from_utf8_lossy(&raw[..nul])
            .chars()
            .map(|c| if c.is_control() { '?' } else { c })
            .collect();

        if value.len() > max_len {
            let mut cut = max_len;
            while !value.is_char_boundary(cut) {
                cut -= 1;
            }
            value.truncate(cut);
        }

        Ok(value)
    }
}
