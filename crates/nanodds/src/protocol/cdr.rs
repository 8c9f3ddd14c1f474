// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Byte-level CDR cursors used by the submessage and parameter-list codecs.
//!
//! Integers follow the endianness selected at construction (submessage
//! flag bit 0, or the PL_CDR encapsulation id). Parameter lists are 4-byte
//! aligned; alignment is relative to the start of the buffer the cursor
//! was created over.

use crate::core::guid::EntityId;
use crate::core::locator::Locator;
use crate::core::sequence::SequenceNumber;
use crate::error::{Error, Result};

/// Reading cursor over a received buffer.
pub struct CdrReader<'a> {
    buf: &'a [u8],
    pos: usize,
    little_endian: bool,
}

impl<'a> CdrReader<'a> {
    pub fn new(buf: &'a [u8], little_endian: bool) -> Self {
        Self {
            buf,
            pos: 0,
            little_endian,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn set_endianness(&mut self, little_endian: bool) {
        self.little_endian = little_endian;
    }

    /// Skip `count` bytes.
    pub fn advance(&mut self, count: usize) -> Result<()> {
        if self.remaining() < count {
            return Err(Error::Malformed);
        }
        self.pos += count;
        Ok(())
    }

    /// Skip padding up to the next multiple of `boundary`.
    pub fn align_to(&mut self, boundary: usize) -> Result<()> {
        let rem = self.pos % boundary;
        if rem != 0 {
            self.advance(boundary - rem)?;
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(Error::Malformed)?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes: [u8; 2] = self.read_array()?;
        Ok(if self.little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes: [u8; 4] = self.read_array()?;
        Ok(if self.little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        if self.remaining() < count {
            return Err(Error::Malformed);
        }
        let slice = &self.buf[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Entity ids are always big-endian on the wire (key bytes + kind).
    pub fn read_entity_id(&mut self) -> Result<EntityId> {
        self.read_array::<4>()
    }

    /// Sequence number: high word (i32) then low word (u32), each in the
    /// cursor's endianness.
    pub fn read_sequence_number(&mut self) -> Result<SequenceNumber> {
        let high = self.read_i32()?;
        let low = self.read_u32()?;
        Ok(SequenceNumber::new(high, low))
    }

    /// Full-length locator: kind + port + 16-byte address.
    pub fn read_locator(&mut self) -> Result<Locator> {
        let kind = self.read_i32()?;
        let port = self.read_u32()?;
        let address: [u8; 16] = self.read_array()?;
        Ok(Locator {
            kind,
            port,
            address,
        })
    }
}

/// Writing cursor over an owned buffer. Always emits little-endian data;
/// we announce PL_CDR_LE / set the endianness flag accordingly.
pub struct CdrWriter {
    buf: Vec<u8>,
}

impl CdrWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_sequence_number(&mut self, sn: SequenceNumber) {
        self.write_i32(sn.high);
        self.write_u32(sn.low);
    }

    pub fn write_locator(&mut self, loc: &Locator) {
        self.write_i32(loc.kind);
        self.write_u32(loc.port);
        self.write_bytes(&loc.address);
    }

    /// Pad with zero bytes up to the next multiple of `boundary`.
    pub fn align_to(&mut self, boundary: usize) {
        while self.buf.len() % boundary != 0 {
            self.buf.push(0);
        }
    }
}

impl Default for CdrWriter {
    fn default() -> Self {
        Self::new()
    }
}
