use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NodeError, Result};

/// An access layer opcode.
///
/// Wire format, selected by the two most significant bits of the first octet:
/// ```text
/// 0b00xxxxxx / 0b01xxxxxx   1 octet   (0x7F reserved)
/// 0b10xxxxxx                2 octets  big-endian
/// 0b11xxxxxx                3 octets  opcode octet, then company id (LE)
/// ```
/// 3-octet opcodes are stored as `first_octet << 16 | company_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u32);

impl Opcode {
    /// A 1-octet SIG opcode.
    pub const fn op1(b0: u8) -> Self {
        Self(b0 as u32)
    }

    /// A 2-octet SIG opcode.
    pub const fn op2(b0: u8, b1: u8) -> Self {
        Self(((b0 as u32) << 8) | b1 as u32)
    }

    /// A 3-octet vendor opcode. The two class bits are forced on.
    pub const fn op3(b0: u8, company: u16) -> Self {
        Self((((b0 | 0xC0) as u32) << 16) | company as u32)
    }

    /// Encoded length in octets.
    pub fn len(self) -> usize {
        if self.0 < 0x100 {
            1
        } else if self.0 < 0x10000 {
            2
        } else {
            3
        }
    }

    /// True for 3-octet vendor opcodes.
    pub fn is_vendor(self) -> bool {
        self.len() == 3
    }

    /// Company identifier of a vendor opcode.
    pub fn company(self) -> Option<u16> {
        self.is_vendor().then_some((self.0 & 0xFFFF) as u16)
    }

    /// Decode the opcode at the front of `src`, consuming its octets.
    pub fn decode(src: &mut Bytes) -> Result<Self> {
        let Some(&first) = src.first() else {
            return Err(NodeError::EmptyPayload);
        };

        match first >> 6 {
            0x00 | 0x01 => {
                if first == 0x7F {
                    return Err(NodeError::ReservedOpcode);
                }
                Ok(Self(src.get_u8() as u32))
            }
            0x02 => {
                if src.len() < 2 {
                    return Err(NodeError::ShortOpcode {
                        needed: 2,
                        len: src.len(),
                    });
                }
                Ok(Self(src.get_u16() as u32))
            }
            _ => {
                if src.len() < 3 {
                    return Err(NodeError::ShortOpcode {
                        needed: 3,
                        len: src.len(),
                    });
                }
                let b0 = src.get_u8() as u32;
                let company = src.get_u16_le() as u32;
                Ok(Self((b0 << 16) | company))
            }
        }
    }

    /// Append the wire encoding to `dst`.
    pub fn encode(self, dst: &mut BytesMut) {
        match self.len() {
            1 => dst.put_u8(self.0 as u8),
            2 => dst.put_u16(self.0 as u16),
            _ => {
                dst.put_u8((self.0 >> 16) as u8);
                dst.put_u16_le((self.0 & 0xFFFF) as u16);
            }
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:0width$x}", self.0, width = self.len() * 2)
    }
}
