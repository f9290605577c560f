#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use fatx::{Volume, VolumeConfig};
use tempfile::{tempdir, TempDir};

pub const SECTOR_SIZE: usize = 512;
pub const SUPERBLOCK_SIZE: usize = 4096;
pub const RECORD_SIZE: usize = 64;
pub const ROOT_CLUSTER: u32 = 1;
pub const VOLUME_ID: u32 = 0x4E41_4B4F;
pub const DIRECTORY: u8 = 0x10;

/// Writes a FATX image byte by byte, without going through the crate's encoders.
pub struct ImageBuilder {
    image: Vec<u8>,
    big_endian: bool,
    cluster_size: usize,
    cluster_count: usize,
    entry_width: usize,
    data_start: usize,
    next_cluster: u32,
}

impl ImageBuilder {
    pub fn new(image_size: usize, sectors_per_cluster: u32) -> Self {
        Self::with_byte_order(image_size, sectors_per_cluster, false)
    }

    pub fn with_byte_order(image_size: usize, sectors_per_cluster: u32, big_endian: bool) -> Self {
        let cluster_size = sectors_per_cluster as usize * SECTOR_SIZE;
        let cluster_count = image_size / cluster_size;
        let entry_width = if cluster_count <= 0xFFFF { 2 } else { 4 };
        let table_size = (cluster_count * entry_width).div_ceil(4096) * 4096;

        let mut builder = Self {
            image: vec![0u8; image_size],
            big_endian,
            cluster_size,
            cluster_count,
            entry_width,
            data_start: SUPERBLOCK_SIZE + table_size,
            next_cluster: 2,
        };

        builder.image[16..SUPERBLOCK_SIZE].fill(0xFF);
        builder.image[0..4].copy_from_slice(if big_endian { b"XTAF" } else { b"FATX" });
        builder.put_u32(4, VOLUME_ID);
        builder.put_u32(8, sectors_per_cluster);
        builder.put_u32(12, ROOT_CLUSTER);

        builder.set_fat(0, 1);
        let end = builder.end_of_chain();
        builder.set_fat(ROOT_CLUSTER, end);
        builder
    }

    fn put_u16(&mut self, offset: usize, value: u16) {
        let buf = &mut self.image[offset..offset + 2];
        if self.big_endian {
            BigEndian::write_u16(buf, value)
        } else {
            LittleEndian::write_u16(buf, value)
        }
    }

    fn put_u32(&mut self, offset: usize, value: u32) {
        let buf = &mut self.image[offset..offset + 4];
        if self.big_endian {
            BigEndian::write_u32(buf, value)
        } else {
            LittleEndian::write_u32(buf, value)
        }
    }

    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    pub fn cluster_count(&self) -> usize {
        self.cluster_count
    }

    pub fn records_per_cluster(&self) -> usize {
        self.cluster_size / RECORD_SIZE
    }

    pub fn end_of_chain(&self) -> u32 {
        if self.entry_width == 2 {
            0xFFFF
        } else {
            u32::MAX
        }
    }

    pub fn set_fat(&mut self, cluster: u32, value: u32) {
        let offset = SUPERBLOCK_SIZE + cluster as usize * self.entry_width;
        if self.entry_width == 2 {
            self.put_u16(offset, value as u16);
        } else {
            self.put_u32(offset, value);
        }
    }

    pub fn cluster_offset(&self, cluster: u32) -> usize {
        self.data_start + cluster as usize * self.cluster_size
    }

    /// Links `count` consecutive unused clusters into a chain.
    pub fn alloc_chain(&mut self, count: usize) -> Vec<u32> {
        let clusters = (0..count as u32)
            .map(|i| self.next_cluster + i)
            .collect::<Vec<_>>();
        self.next_cluster += count as u32;
        for pair in clusters.windows(2) {
            self.set_fat(pair[0], pair[1]);
        }
        if let Some(&last) = clusters.last() {
            let end = self.end_of_chain();
            self.set_fat(last, end);
        }
        clusters
    }

    pub fn write_record(&mut self, cluster: u32, index: usize, record: [u8; RECORD_SIZE]) {
        let offset = self.cluster_offset(cluster) + index * RECORD_SIZE;
        self.image[offset..offset + RECORD_SIZE].copy_from_slice(&record);
    }

    pub fn record(
        &self,
        flag: u8,
        name: &str,
        attributes: u8,
        cluster: u32,
        size: u32,
    ) -> [u8; RECORD_SIZE] {
        let mut record = [0xFFu8; RECORD_SIZE];
        record[0] = flag;
        record[1] = attributes;
        record[2..2 + name.len()].copy_from_slice(name.as_bytes());

        let write_u16 = |buf: &mut [u8], value: u16| {
            if self.big_endian {
                BigEndian::write_u16(buf, value)
            } else {
                LittleEndian::write_u16(buf, value)
            }
        };
        let write_u32 = |buf: &mut [u8], value: u32| {
            if self.big_endian {
                BigEndian::write_u32(buf, value)
            } else {
                LittleEndian::write_u32(buf, value)
            }
        };

        write_u32(&mut record[0x2C..0x30], cluster);
        write_u32(&mut record[0x30..0x34], size);
        for stamp in [0x34, 0x38, 0x3C] {
            write_u16(&mut record[stamp..stamp + 2], 12 << 11);
            write_u16(&mut record[stamp + 2..stamp + 4], (5 << 9) | (6 << 5) | 7);
        }
        record
    }

    pub fn add_file(&mut self, directory: u32, index: usize, name: &str, data: &[u8]) -> u32 {
        let count = data.len().div_ceil(self.cluster_size);
        let clusters = self.alloc_chain(count);
        for (cluster, chunk) in clusters.iter().zip(data.chunks(self.cluster_size)) {
            let offset = self.cluster_offset(*cluster);
            self.image[offset..offset + chunk.len()].copy_from_slice(chunk);
        }
        let start = clusters.first().copied().unwrap_or(0);
        let record = self.record(name.len() as u8, name, 0, start, data.len() as u32);
        self.write_record(directory, index, record);
        start
    }

    pub fn add_directory(&mut self, directory: u32, index: usize, name: &str) -> u32 {
        let cluster = self.alloc_chain(1)[0];
        let record = self.record(name.len() as u8, name, DIRECTORY, cluster, 0);
        self.write_record(directory, index, record);
        cluster
    }

    pub fn add_deleted_file(&mut self, directory: u32, index: usize, name: &str, size: u32) {
        let record = self.record(0xE5, name, 0, 0, size);
        self.write_record(directory, index, record);
    }

    pub fn add_skip_slot(&mut self, directory: u32, index: usize) {
        let mut record = [0xFFu8; RECORD_SIZE];
        record[0] = 0xE5;
        self.write_record(directory, index, record);
    }

    pub fn bytes(&self) -> &[u8] {
        &self.image
    }

    pub fn finish(self) -> Vec<u8> {
        self.image
    }
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub const XBE_NAME: &str = "default.xbe";
pub const NOTES: &[u8] = b"hello fatx";

/// 256 KiB, 512-byte clusters:
///
/// ```text
/// /default.xbe          2 clusters + 10 bytes
/// /saves/profile/settings.bin
/// /saves/notes.txt
/// /old.txt              deleted
/// /empty.bin            zero bytes
/// ```
pub fn sample_builder() -> ImageBuilder {
    let mut builder = ImageBuilder::new(256 * 1024, 1);
    let xbe = payload(2 * builder.cluster_size() + 10);
    builder.add_file(ROOT_CLUSTER, 0, XBE_NAME, &xbe);
    let saves = builder.add_directory(ROOT_CLUSTER, 1, "saves");
    builder.add_deleted_file(ROOT_CLUSTER, 2, "old.txt", 42);
    builder.add_file(ROOT_CLUSTER, 3, "empty.bin", &[]);

    let profile = builder.add_directory(saves, 0, "profile");
    builder.add_file(saves, 1, "notes.txt", NOTES);
    builder.add_file(profile, 0, "settings.bin", &payload(64));
    builder
}

pub fn sample_image() -> Vec<u8> {
    sample_builder().finish()
}

pub fn temp_image(bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("volume.img");
    fs::write(&path, bytes).expect("write image");
    (dir, path)
}

pub fn open(path: &Path) -> Volume {
    Volume::open_path(path, &VolumeConfig::default()).expect("open volume")
}

pub fn names(nodes: &[fatx::Node]) -> Vec<String> {
    use fatx::FatxObject;
    nodes.iter().map(|node| node.name().to_owned()).collect()
}
