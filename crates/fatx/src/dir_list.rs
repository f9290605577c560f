use crate::dir_entry::{check_name, skip_record, DirectoryEntry, Record, DIRENT_SIZE};
use crate::superblock::Endianness;
use crate::Error;

/// A directory entry together with the record slot it occupies.
///
/// Slots are positional across the whole chain: slot `n` lives in cluster
/// `n / slots_per_cluster` of the chain, at record `n % slots_per_cluster`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub slot: usize,
    pub entry: DirectoryEntry,
}

/// The records of one directory, materialized from its cluster chain.
#[derive(Debug, Clone)]
pub struct DirectoryEntryList {
    start_cluster: u32,
    chain: Vec<u32>,
    slots_per_cluster: usize,
    endianness: Endianness,
    entries: Vec<ListedEntry>,
}

impl DirectoryEntryList {
    pub fn new(start_cluster: u32, cluster_size: usize, endianness: Endianness) -> Self {
        Self {
            start_cluster,
            chain: Vec::new(),
            slots_per_cluster: cluster_size / DIRENT_SIZE,
            endianness,
            entries: Vec::new(),
        }
    }

    /// Scans the records of the next cluster in the chain.
    ///
    /// An end-of-list record stops the scan of this cluster only; skip slots are
    /// left unoccupied.
    pub fn scan_cluster(&mut self, cluster: u32, bytes: &[u8]) -> Result<(), Error> {
        let base = self.chain.len() * self.slots_per_cluster;
        self.chain.push(cluster);

        for (index, record) in bytes
            .chunks_exact(DIRENT_SIZE)
            .take(self.slots_per_cluster)
            .enumerate()
        {
            match DirectoryEntry::decode(record, self.endianness)? {
                Record::Entry(entry) => self.entries.push(ListedEntry {
                    slot: base + index,
                    entry,
                }),
                Record::Skip => continue,
                Record::EndOfList => break,
            }
        }
        Ok(())
    }

    pub fn start_cluster(&self) -> u32 {
        self.start_cluster
    }

    pub fn chain(&self) -> &[u32] {
        &self.chain
    }

    pub fn listed(&self) -> &[ListedEntry] {
        &self.entries
    }

    pub fn entries(&self) -> impl Iterator<Item = &DirectoryEntry> {
        self.entries.iter().map(|listed| &listed.entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The live entry called `name`, or a deleted one when no live entry has it.
    pub fn find(&self, name: &str) -> Option<&ListedEntry> {
        let mut matches = self
            .entries
            .iter()
            .filter(|listed| listed.entry.name == name);
        let first = matches.next()?;
        if !first.entry.is_deleted() {
            return Some(first);
        }
        matches
            .find(|listed| !listed.entry.is_deleted())
            .or(Some(first))
    }

    /// Whether a live entry is called `name`. Deleted records never block a name.
    pub fn contains_name(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|listed| listed.entry.name == name && !listed.entry.is_deleted())
    }

    pub fn get(&self, slot: usize) -> Option<&ListedEntry> {
        self.entries.iter().find(|listed| listed.slot == slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut DirectoryEntry> {
        self.entries
            .iter_mut()
            .find(|listed| listed.slot == slot)
            .map(|listed| &mut listed.entry)
    }

    /// Record slots available without growing the chain.
    pub fn capacity(&self) -> usize {
        self.chain.len() * self.slots_per_cluster
    }

    /// Number of clusters the chain must span to hold every occupied slot.
    pub fn clusters_needed(&self) -> usize {
        self.entries
            .iter()
            .map(|listed| listed.slot / self.slots_per_cluster + 1)
            .max()
            .unwrap_or(0)
            .max(self.chain.len())
    }

    /// Adds an entry in the lowest free slot and returns that slot.
    ///
    /// Slots past [`capacity`](Self::capacity) are only handed out once every
    /// slot of the current chain is taken.
    pub fn append(&mut self, entry: DirectoryEntry) -> Result<usize, Error> {
        if self.contains_name(&entry.name) {
            return Err(Error::DuplicateNameError(entry.name));
        }

        let mut occupied = self
            .entries
            .iter()
            .map(|listed| listed.slot)
            .collect::<Vec<_>>();
        occupied.sort_unstable();

        let slot = occupied
            .iter()
            .enumerate()
            .find(|(expected, slot)| *expected != **slot)
            .map(|(expected, _)| expected)
            .unwrap_or(occupied.len());

        let position = self
            .entries
            .iter()
            .position(|listed| listed.slot > slot)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, ListedEntry { slot, entry });
        Ok(slot)
    }

    /// Renames the entry at `slot`, keeping live names unique within the list.
    pub fn rename(&mut self, slot: usize, name: &str) -> Result<&DirectoryEntry, Error> {
        if !check_name(name) {
            return Err(Error::NameError(name.to_owned()));
        }
        if self.entries.iter().any(|listed| {
            listed.slot != slot && listed.entry.name == name && !listed.entry.is_deleted()
        }) {
            return Err(Error::DuplicateNameError(name.to_owned()));
        }

        let entry = self
            .get_mut(slot)
            .ok_or_else(|| Error::PathNotFoundError(name.to_owned()))?;
        entry.name = name.to_owned();
        Ok(entry)
    }

    pub fn extend_chain(&mut self, clusters: impl IntoIterator<Item = u32>) {
        self.chain.extend(clusters);
    }

    /// Encodes the records that belong to the `index`-th cluster of the chain.
    ///
    /// Gaps below the highest occupied slot become skip records so the scan
    /// reaches every entry; everything after it reads as end-of-list.
    pub fn encode_cluster(&self, index: usize, cluster_size: usize) -> Result<Vec<u8>, Error> {
        let mut bytes = vec![0xFFu8; cluster_size];
        let first = index * self.slots_per_cluster;
        let last = first + self.slots_per_cluster;

        let in_cluster = self
            .entries
            .iter()
            .filter(|listed| (first..last).contains(&listed.slot))
            .collect::<Vec<_>>();
        let Some(high_water) = in_cluster.iter().map(|listed| listed.slot - first).max() else {
            return Ok(bytes);
        };

        for local in 0..=high_water {
            let offset = local * DIRENT_SIZE;
            bytes[offset..offset + DIRENT_SIZE].copy_from_slice(&skip_record());
        }
        for listed in in_cluster {
            let offset = (listed.slot - first) * DIRENT_SIZE;
            let record = listed.entry.encode(self.endianness)?;
            bytes[offset..offset + DIRENT_SIZE].copy_from_slice(&record);
        }
        Ok(bytes)
    }
}
