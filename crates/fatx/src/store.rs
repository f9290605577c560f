use std::io::{Read, Seek, SeekFrom, Write};

use crate::Error;

/// Anything a volume can live on: an image file, a raw device, an in-memory buffer.
pub trait Device: Read + Write + Seek {}

impl<T: Read + Write + Seek> Device for T {}

/// Raw access to the partition: byte regions before the data area and whole clusters after it.
pub struct ClusterStore {
    device: Box<dyn Device>,
    partition_offset: u64,
    data_start: u64,
    cluster_size: u64,
}

impl ClusterStore {
    pub fn new(
        device: Box<dyn Device>,
        partition_offset: u64,
        data_start: u64,
        cluster_size: u64,
    ) -> Self {
        Self {
            device,
            partition_offset,
            data_start,
            cluster_size,
        }
    }

    pub fn cluster_size(&self) -> u64 {
        self.cluster_size
    }

    /// Byte offset of `cluster` relative to the start of the partition.
    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        u64::from(cluster) * self.cluster_size + self.data_start
    }

    pub fn read_cluster(&mut self, cluster: u32) -> Result<Vec<u8>, Error> {
        let mut buffer = vec![0u8; self.cluster_size as usize];
        self.read_at(self.cluster_offset(cluster), &mut buffer)?;
        Ok(buffer)
    }

    /// Writes `data` to the start of `cluster`, zero-filling the remainder.
    pub fn write_cluster(&mut self, cluster: u32, data: &[u8]) -> Result<(), Error> {
        if data.len() as u64 > self.cluster_size {
            return Err(Error::InvalidOperationError(
                "cluster payload exceeds the cluster size",
            ));
        }
        let mut buffer = vec![0u8; self.cluster_size as usize];
        buffer[..data.len()].copy_from_slice(data);
        self.write_at(self.cluster_offset(cluster), &buffer)
    }

    pub fn read_at(&mut self, offset: u64, buffer: &mut [u8]) -> Result<(), Error> {
        self.device
            .seek(SeekFrom::Start(self.partition_offset + offset))?;
        self.device.read_exact(buffer)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<(), Error> {
        self.device
            .seek(SeekFrom::Start(self.partition_offset + offset))?;
        self.device.write_all(data)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), Error> {
        self.device.flush()?;
        Ok(())
    }
}
