use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::Error;

pub const SUPERBLOCK_SIZE: usize = 4096;
pub const SECTOR_SIZE: u64 = 512;

const MAX_SECTORS_PER_CLUSTER: u32 = 1024;

/// Byte order of every multi-byte field on the volume, chosen by the magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// `FATX`, as written by the Xbox.
    Little,
    /// `XTAF`, the byte-swapped variant.
    Big,
}

impl Endianness {
    pub fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endianness::Little => LittleEndian::read_u16(buf),
            Endianness::Big => BigEndian::read_u16(buf),
        }
    }

    pub fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endianness::Little => LittleEndian::read_u32(buf),
            Endianness::Big => BigEndian::read_u32(buf),
        }
    }

    pub fn write_u16(self, buf: &mut [u8], value: u16) {
        match self {
            Endianness::Little => LittleEndian::write_u16(buf, value),
            Endianness::Big => BigEndian::write_u16(buf, value),
        }
    }

    pub fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Endianness::Little => LittleEndian::write_u32(buf, value),
            Endianness::Big => BigEndian::write_u32(buf, value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperBlock {
    pub magic: [u8; 4],
    pub endianness: Endianness,
    pub volume_id: u32,
    pub sectors_per_cluster: u32,
    pub root_cluster: u32,
}

impl SuperBlock {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() < 16 {
            return Err(Error::FormatError(format!(
                "superblock truncated to {} bytes",
                bytes.len()
            )));
        }

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let endianness = match &magic {
            b"FATX" => Endianness::Little,
            b"XTAF" => Endianness::Big,
            other => {
                return Err(Error::FormatError(format!(
                    "bad superblock magic {other:02x?}"
                )))
            }
        };

        let volume_id = endianness.read_u32(&bytes[4..8]);
        let sectors_per_cluster = endianness.read_u32(&bytes[8..12]);
        let root_cluster = endianness.read_u32(&bytes[12..16]);

        if sectors_per_cluster == 0
            || !sectors_per_cluster.is_power_of_two()
            || sectors_per_cluster > MAX_SECTORS_PER_CLUSTER
        {
            return Err(Error::FormatError(format!(
                "unsupported sectors per cluster: {sectors_per_cluster}"
            )));
        }

        Ok(Self {
            magic,
            endianness,
            volume_id,
            sectors_per_cluster,
            root_cluster,
        })
    }

    pub fn cluster_size(&self) -> u64 {
        u64::from(self.sectors_per_cluster) * SECTOR_SIZE
    }
}
