//! The on-disk format is native-endian and native-alignment of whatever
//! engine wrote it. This crate exposes the target endianness as a
//! configurable rather than assuming the host's, and defaults to
//! little-endian since that's what the overwhelming majority of deployed
//! database files on disk actually are.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    Little,
    Big,
}

impl Default for Endianness {
    fn default() -> Self {
        Endianness::Little
    }
}

impl Endianness {
    pub fn host() -> Self {
        if cfg!(target_endian = "little") {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    pub fn read_u16(self, b: &[u8]) -> u16 {
        match self {
            Endianness::Little => LittleEndian::read_u16(b),
            Endianness::Big => BigEndian::read_u16(b),
        }
    }

    pub fn read_u32(self, b: &[u8]) -> u32 {
        match self {
            Endianness::Little => LittleEndian::read_u32(b),
            Endianness::Big => BigEndian::read_u32(b),
        }
    }

    pub fn read_u64(self, b: &[u8]) -> u64 {
        match self {
            Endianness::Little => LittleEndian::read_u64(b),
            Endianness::Big => BigEndian::read_u64(b),
        }
    }

    pub fn read_i16(self, b: &[u8]) -> i16 {
        self.read_u16(b) as i16
    }

    pub fn read_i32(self, b: &[u8]) -> i32 {
        self.read_u32(b) as i32
    }

    pub fn read_i64(self, b: &[u8]) -> i64 {
        self.read_u64(b) as i64
    }

    pub fn write_u32(self, b: &mut [u8], v: u32) {
        match self {
            Endianness::Little => LittleEndian::write_u32(b, v),
            Endianness::Big => BigEndian::write_u32(b, v),
        }
    }

    pub fn write_u16(self, b: &mut [u8], v: u16) {
        match self {
            Endianness::Little => LittleEndian::write_u16(b, v),
            Endianness::Big => BigEndian::write_u16(b, v),
        }
    }
}
