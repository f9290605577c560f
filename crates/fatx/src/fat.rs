//! The cluster allocation table.
//!
//! Every cluster id owns one entry that either links to the next cluster of a
//! chain, terminates a chain, or marks the cluster free, bad or reserved. The
//! table is kept in its on-disk encoding so dirty pages can be written back
//! verbatim, padding included.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use log::trace;

use crate::superblock::Endianness;
use crate::Error;

pub const TABLE_ALIGNMENT: u64 = 4096;

/// Ids 0 and 1 cannot be expressed as next-pointers, so they are never handed out.
pub const FIRST_ALLOCATABLE_CLUSTER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryWidth {
    Fat16,
    Fat32,
}

impl EntryWidth {
    pub fn for_cluster_count(cluster_count: u64) -> Self {
        if cluster_count <= 0xFFFF {
            EntryWidth::Fat16
        } else {
            EntryWidth::Fat32
        }
    }

    pub const fn bytes(self) -> usize {
        match self {
            EntryWidth::Fat16 => 2,
            EntryWidth::Fat32 => 4,
        }
    }

    pub const fn max_value(self) -> u32 {
        match self {
            EntryWidth::Fat16 => 0xFFFF,
            EntryWidth::Fat32 => u32::MAX,
        }
    }

    /// Largest value that still decodes as a next-cluster pointer.
    pub const fn max_pointer(self) -> u32 {
        self.max_value() - 7
    }

    /// Byte length of the on-disk table, padded to the next 4096-byte boundary.
    pub fn table_size(self, cluster_count: u64) -> u64 {
        let raw = cluster_count * self.bytes() as u64;
        raw.div_ceil(TABLE_ALIGNMENT) * TABLE_ALIGNMENT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationEntry {
    Free,
    Reserved,
    Next(u32),
    Bad,
    EndOfChain,
}

impl AllocationEntry {
    pub fn decode(raw: u32, width: EntryWidth) -> Self {
        let max = width.max_value();
        match raw {
            0 => AllocationEntry::Free,
            1 => AllocationEntry::Reserved,
            value if value == max => AllocationEntry::EndOfChain,
            value if value == max - 1 => AllocationEntry::Bad,
            value if value > width.max_pointer() => AllocationEntry::Reserved,
            value => AllocationEntry::Next(value),
        }
    }

    pub fn encode(self, width: EntryWidth) -> u32 {
        match self {
            AllocationEntry::Free => 0,
            AllocationEntry::Reserved => 1,
            AllocationEntry::Next(id) => id,
            AllocationEntry::Bad => width.max_value() - 1,
            AllocationEntry::EndOfChain => width.max_value(),
        }
    }
}

/// Why a chain could not be followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFault {
    Cycle,
    OutOfRange,
    Unexpected(AllocationEntry),
}

impl fmt::Display for ChainFault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ChainFault::Cycle => write!(f, "cluster is visited twice"),
            ChainFault::OutOfRange => write!(f, "cluster id is outside the table"),
            ChainFault::Unexpected(entry) => write!(f, "chain runs into a {entry:?} entry"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClusterAllocationTable {
    raw: Vec<u8>,
    cluster_count: u32,
    width: EntryWidth,
    endianness: Endianness,
    allocatable_end: u32,
    dirty_pages: BTreeSet<usize>,
}

impl ClusterAllocationTable {
    pub fn parse(bytes: &[u8], cluster_count: u32, endianness: Endianness) -> Result<Self, Error> {
        let width = EntryWidth::for_cluster_count(u64::from(cluster_count));
        let needed = cluster_count as usize * width.bytes();
        if bytes.len() < needed {
            return Err(Error::FormatError(format!(
                "allocation table holds {} bytes, {cluster_count} clusters need {needed}",
                bytes.len()
            )));
        }

        Ok(Self {
            raw: bytes.to_vec(),
            cluster_count,
            width,
            endianness,
            allocatable_end: cluster_count.min(width.max_pointer() + 1),
            dirty_pages: BTreeSet::new(),
        })
    }

    /// Keeps allocation below `end`, e.g. when the data area is shorter than the table.
    pub fn limit_allocation(&mut self, end: u32) {
        self.allocatable_end = self.allocatable_end.min(end);
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn width(&self) -> EntryWidth {
        self.width
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn entry(&self, cluster: u32) -> Option<AllocationEntry> {
        if cluster >= self.cluster_count {
            return None;
        }
        Some(AllocationEntry::decode(self.raw_value(cluster), self.width))
    }

    fn raw_value(&self, cluster: u32) -> u32 {
        let offset = cluster as usize * self.width.bytes();
        match self.width {
            EntryWidth::Fat16 => {
                u32::from(self.endianness.read_u16(&self.raw[offset..offset + 2]))
            }
            EntryWidth::Fat32 => self.endianness.read_u32(&self.raw[offset..offset + 4]),
        }
    }

    fn set(&mut self, cluster: u32, entry: AllocationEntry) {
        let offset = cluster as usize * self.width.bytes();
        let value = entry.encode(self.width);
        match self.width {
            EntryWidth::Fat16 => {
                self.endianness
                    .write_u16(&mut self.raw[offset..offset + 2], value as u16)
            }
            EntryWidth::Fat32 => self
                .endianness
                .write_u32(&mut self.raw[offset..offset + 4], value),
        }
        self.dirty_pages.insert(offset / TABLE_ALIGNMENT as usize);
    }

    pub fn walk(&self, start: u32) -> ChainWalk<'_> {
        ChainWalk {
            table: self,
            next: Some(start),
            visited: HashSet::new(),
        }
    }

    pub fn chain(&self, start: u32) -> Result<Vec<u32>, Error> {
        self.walk(start).collect()
    }

    pub fn free_clusters(&self) -> usize {
        (FIRST_ALLOCATABLE_CLUSTER..self.allocatable_end)
            .filter(|&cluster| self.raw_value(cluster) == 0)
            .count()
    }

    /// First-fit allocation of `count` clusters linked in discovery order.
    pub fn allocate(&mut self, count: usize) -> Result<u32, Error> {
        let clusters = self.find_free(count)?;
        self.link(&clusters);
        trace!("allocated {count} clusters starting at {}", clusters[0]);
        Ok(clusters[0])
    }

    /// Allocates `count` clusters and links them after `tail`, returning the first new id.
    pub fn extend(&mut self, tail: u32, count: usize) -> Result<u32, Error> {
        match self.entry(tail) {
            Some(AllocationEntry::EndOfChain) => {}
            Some(other) => {
                return Err(Error::CorruptChainError {
                    cluster: tail,
                    fault: ChainFault::Unexpected(other),
                })
            }
            None => {
                return Err(Error::CorruptChainError {
                    cluster: tail,
                    fault: ChainFault::OutOfRange,
                })
            }
        }

        let clusters = self.find_free(count)?;
        self.link(&clusters);
        self.set(tail, AllocationEntry::Next(clusters[0]));
        trace!("extended chain at {tail} by {count} clusters");
        Ok(clusters[0])
    }

    /// Releases every cluster of the chain. Nothing is modified if the chain is corrupt.
    pub fn free(&mut self, start: u32) -> Result<usize, Error> {
        let chain = self.chain(start)?;
        for &cluster in &chain {
            self.set(cluster, AllocationEntry::Free);
        }
        trace!("freed {} clusters starting at {start}", chain.len());
        Ok(chain.len())
    }

    fn find_free(&self, count: usize) -> Result<Vec<u32>, Error> {
        if count == 0 {
            return Err(Error::InvalidOperationError("cannot allocate an empty chain"));
        }

        let found = (FIRST_ALLOCATABLE_CLUSTER..self.allocatable_end)
            .filter(|&cluster| self.raw_value(cluster) == 0)
            .take(count)
            .collect::<Vec<_>>();

        if found.len() < count {
            return Err(Error::OutOfSpaceError {
                requested: count,
                available: found.len(),
            });
        }
        Ok(found)
    }

    fn link(&mut self, clusters: &[u32]) {
        for pair in clusters.windows(2) {
            self.set(pair[0], AllocationEntry::Next(pair[1]));
        }
        if let Some(&last) = clusters.last() {
            self.set(last, AllocationEntry::EndOfChain);
        }
    }

    /// Drains the set of modified pages as `(byte offset, page bytes)` pairs.
    pub fn take_dirty_pages(&mut self) -> Vec<(u64, Vec<u8>)> {
        let pages = std::mem::take(&mut self.dirty_pages);
        pages
            .into_iter()
            .map(|page| {
                let start = page * TABLE_ALIGNMENT as usize;
                let end = (start + TABLE_ALIGNMENT as usize).min(self.raw.len());
                (start as u64, self.raw[start..end].to_vec())
            })
            .collect()
    }
}

/// Lazy walk along a chain. Yields at most one error, after which it is exhausted.
pub struct ChainWalk<'a> {
    table: &'a ClusterAllocationTable,
    next: Option<u32>,
    visited: HashSet<u32>,
}

impl Iterator for ChainWalk<'_> {
    type Item = Result<u32, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let cluster = self.next.take()?;

        let Some(entry) = self.table.entry(cluster) else {
            return Some(Err(Error::CorruptChainError {
                cluster,
                fault: ChainFault::OutOfRange,
            }));
        };

        if !self.visited.insert(cluster) {
            return Some(Err(Error::CorruptChainError {
                cluster,
                fault: ChainFault::Cycle,
            }));
        }

        match entry {
            AllocationEntry::Next(next) => self.next = Some(next),
            AllocationEntry::EndOfChain => {}
            other => {
                return Some(Err(Error::CorruptChainError {
                    cluster,
                    fault: ChainFault::Unexpected(other),
                }))
            }
        }

        Some(Ok(cluster))
    }
}
