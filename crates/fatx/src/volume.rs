//! Volume orchestration: ties the superblock, allocation table, cluster store
//! and directory lists together behind a shared handle.

use std::cell::RefCell;
use std::fmt;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use chrono::NaiveDateTime;
use log::{debug, trace, warn};

use crate::config::VolumeConfig;
use crate::dir_entry::{check_name, Attributes, DirectoryEntry};
use crate::dir_list::{DirectoryEntryList, ListedEntry};
use crate::fat::{ClusterAllocationTable, EntryWidth};
use crate::store::{ClusterStore, Device};
use crate::superblock::{SuperBlock, SUPERBLOCK_SIZE};
use crate::tree::{Node, Root};
use crate::Error;

/// Where the record of a directory entry lives: the first cluster of the
/// containing directory and the record slot inside its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub directory: u32,
    pub slot: usize,
}

struct VolumeInner {
    store: ClusterStore,
    superblock: SuperBlock,
    table: ClusterAllocationTable,
    read_only: bool,
}

impl VolumeInner {
    fn ensure_writable(&self) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnlyError);
        }
        Ok(())
    }

    fn flush_table(&mut self) -> Result<(), Error> {
        for (offset, page) in self.table.take_dirty_pages() {
            self.store.write_at(SUPERBLOCK_SIZE as u64 + offset, &page)?;
        }
        self.store.flush()
    }

    fn read_file(&mut self, entry: &DirectoryEntry) -> Result<Vec<u8>, Error> {
        let size = entry.size as usize;
        if size == 0 {
            return Ok(Vec::new());
        }

        let chain = self.table.chain(entry.start_cluster)?;
        let mut data = Vec::with_capacity(size);
        for cluster in chain {
            if data.len() >= size {
                break;
            }
            data.extend_from_slice(&self.store.read_cluster(cluster)?);
        }

        if data.len() < size {
            return Err(Error::FormatError(format!(
                "{}: chain holds {} bytes but the entry claims {size}",
                entry.name,
                data.len()
            )));
        }
        data.truncate(size);
        Ok(data)
    }

    fn write_file<R: Read>(&mut self, reader: &mut R, size: u64) -> Result<u32, Error> {
        self.ensure_writable()?;
        if size > u64::from(u32::MAX) {
            return Err(Error::FormatError(format!(
                "{size} bytes exceed the largest file a directory entry can describe"
            )));
        }
        if size == 0 {
            return Ok(0);
        }

        let count = size.div_ceil(self.store.cluster_size()) as usize;
        let head = self.table.allocate(count)?;
        if let Err(err) = self.fill_chain(head, reader, size) {
            warn!("writing {size} bytes failed, releasing chain at {head}: {err}");
            self.table.free(head)?;
            return Err(err);
        }
        self.flush_table()?;
        Ok(head)
    }

    fn fill_chain<R: Read>(&mut self, head: u32, reader: &mut R, size: u64) -> Result<(), Error> {
        let cluster_size = self.store.cluster_size();
        let mut buffer = vec![0u8; cluster_size as usize];
        let mut remaining = size;
        for cluster in self.table.chain(head)? {
            let len = remaining.min(cluster_size) as usize;
            reader.read_exact(&mut buffer[..len])?;
            self.store.write_cluster(cluster, &buffer[..len])?;
            remaining -= len as u64;
        }
        Ok(())
    }

    fn open_directory(&mut self, start_cluster: u32) -> Result<DirectoryEntryList, Error> {
        let chain = self.table.chain(start_cluster)?;
        let mut list = DirectoryEntryList::new(
            start_cluster,
            self.store.cluster_size() as usize,
            self.superblock.endianness,
        );
        for cluster in chain {
            let bytes = self.store.read_cluster(cluster)?;
            list.scan_cluster(cluster, &bytes)?;
        }
        Ok(list)
    }

    fn write_directory_entry_list(&mut self, list: &mut DirectoryEntryList) -> Result<(), Error> {
        self.ensure_writable()?;

        let have = list.chain().len();
        let needed = list.clusters_needed();
        if needed > have {
            let tail = *list
                .chain()
                .last()
                .ok_or(Error::InvalidOperationError("directory has no clusters"))?;
            let first = self.table.extend(tail, needed - have)?;
            list.extend_chain(self.table.chain(first)?);
            self.flush_table()?;
        }

        let cluster_size = self.store.cluster_size() as usize;
        for (index, &cluster) in list.chain().iter().enumerate() {
            let bytes = list.encode_cluster(index, cluster_size)?;
            self.store.write_cluster(cluster, &bytes)?;
        }
        trace!(
            "persisted {} entries of directory {} across {} clusters",
            list.len(),
            list.start_cluster(),
            list.chain().len()
        );
        self.store.flush()
    }

    fn locate<'a>(
        list: &'a DirectoryEntryList,
        location: EntryLocation,
        expected: &DirectoryEntry,
    ) -> Result<&'a ListedEntry, Error> {
        match list.get(location.slot) {
            Some(listed)
                if listed.entry.start_cluster == expected.start_cluster
                    && listed.entry.name == expected.name =>
            {
                Ok(listed)
            }
            _ => Err(Error::PathNotFoundError(expected.name.clone())),
        }
    }

    /// First cluster of the directory an import lands in, after checking that
    /// its record still describes a live directory.
    fn target_directory(
        &mut self,
        owner: Option<(EntryLocation, &DirectoryEntry)>,
    ) -> Result<u32, Error> {
        let Some((location, expected)) = owner else {
            return Ok(self.superblock.root_cluster);
        };
        let parent = self.open_directory(location.directory)?;
        let record = &Self::locate(&parent, location, expected)?.entry;
        if record.is_deleted() {
            return Err(Error::PathNotFoundError(record.name.clone()));
        }
        if !record.is_directory() {
            return Err(Error::NotADirectoryError(record.name.clone()));
        }
        Ok(record.start_cluster)
    }

    fn import<R: Read>(
        &mut self,
        owner: Option<(EntryLocation, &DirectoryEntry)>,
        name: &str,
        reader: &mut R,
        size: u64,
        timestamp: NaiveDateTime,
    ) -> Result<ListedEntry, Error> {
        self.ensure_writable()?;
        if !check_name(name) {
            return Err(Error::NameError(name.to_owned()));
        }

        let directory = self.target_directory(owner)?;
        let mut list = self.open_directory(directory)?;
        if list.contains_name(name) {
            return Err(Error::DuplicateNameError(name.to_owned()));
        }

        let head = self.write_file(reader, size)?;
        let entry = DirectoryEntry::new_file(name, size as u32, head, timestamp);
        let slot = list.append(entry.clone())?;
        if let Err(err) = self.write_directory_entry_list(&mut list) {
            if head != 0 {
                warn!("linking {name} failed, releasing chain at {head}: {err}");
                self.table.free(head)?;
                self.flush_table()?;
            }
            return Err(err);
        }

        debug!("imported {name} ({size} bytes) into directory {directory} slot {slot}");
        Ok(ListedEntry { slot, entry })
    }

    fn rename(
        &mut self,
        location: EntryLocation,
        current: &DirectoryEntry,
        name: &str,
    ) -> Result<DirectoryEntry, Error> {
        self.ensure_writable()?;
        let mut list = self.open_directory(location.directory)?;
        if Self::locate(&list, location, current)?.entry.is_deleted() {
            return Err(Error::PathNotFoundError(current.name.clone()));
        }
        let renamed = list.rename(location.slot, name)?.clone();
        self.write_directory_entry_list(&mut list)?;
        Ok(renamed)
    }

    fn delete(
        &mut self,
        location: EntryLocation,
        current: &DirectoryEntry,
    ) -> Result<DirectoryEntry, Error> {
        self.ensure_writable()?;
        let mut list = self.open_directory(location.directory)?;
        let entry = Self::locate(&list, location, current)?.entry.clone();
        if entry.is_deleted() {
            return Ok(entry);
        }

        if entry.is_directory() {
            let children = self.open_directory(entry.start_cluster)?;
            if children.entries().any(|child| !child.is_deleted()) {
                return Err(Error::DirectoryNotEmptyError(entry.name));
            }
        }

        let deleted = match list.get_mut(location.slot) {
            Some(record) => {
                record.attributes.insert(Attributes::DELETED);
                record.clone()
            }
            None => return Err(Error::PathNotFoundError(entry.name)),
        };
        self.write_directory_entry_list(&mut list)?;

        if entry.start_cluster != 0 {
            self.table.free(entry.start_cluster)?;
            self.flush_table()?;
        }
        debug!("deleted {} from directory {}", entry.name, location.directory);
        Ok(deleted)
    }
}

/// An open FATX volume.
///
/// Cloning is cheap; every clone, and every [`Node`] built from it, shares the
/// same device, superblock and allocation table.
#[derive(Clone)]
pub struct Volume {
    inner: Rc<RefCell<VolumeInner>>,
}

impl Volume {
    pub fn open<D: Device + 'static>(device: D) -> Result<Self, Error> {
        Self::open_with_config(device, &VolumeConfig::default())
    }

    pub fn open_path(path: &Path, config: &VolumeConfig) -> Result<Self, Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(!config.read_only)
            .open(path)?;
        Self::open_with_config(file, config)
    }

    pub fn open_with_config<D: Device + 'static>(
        mut device: D,
        config: &VolumeConfig,
    ) -> Result<Self, Error> {
        let device_len = device.seek(SeekFrom::End(0))?;
        let available = device_len
            .checked_sub(config.partition_offset)
            .ok_or_else(|| {
                Error::FormatError(format!(
                    "partition offset {} lies past the end of the device ({device_len} bytes)",
                    config.partition_offset
                ))
            })?;
        let partition_size = match config.partition_size {
            Some(size) if size > available => {
                return Err(Error::FormatError(format!(
                    "partition size {size} exceeds the {available} bytes available"
                )))
            }
            Some(size) => size,
            None => available,
        };
        if partition_size < SUPERBLOCK_SIZE as u64 {
            return Err(Error::FormatError(format!(
                "partition of {partition_size} bytes cannot hold a superblock"
            )));
        }

        device.seek(SeekFrom::Start(config.partition_offset))?;
        let mut header = vec![0u8; SUPERBLOCK_SIZE];
        device.read_exact(&mut header)?;
        let superblock = SuperBlock::parse(&header)?;

        let cluster_size = superblock.cluster_size();
        let cluster_count = u32::try_from(partition_size / cluster_size).map_err(|_| {
            Error::FormatError(format!("{partition_size} bytes hold too many clusters"))
        })?;
        let width = EntryWidth::for_cluster_count(u64::from(cluster_count));
        let table_size = width.table_size(u64::from(cluster_count));
        let data_start = SUPERBLOCK_SIZE as u64 + table_size;
        if data_start > partition_size {
            return Err(Error::FormatError(format!(
                "partition of {partition_size} bytes cannot hold a {table_size}-byte allocation table"
            )));
        }

        let mut table_bytes = vec![0u8; table_size as usize];
        device.read_exact(&mut table_bytes)?;
        let mut table =
            ClusterAllocationTable::parse(&table_bytes, cluster_count, superblock.endianness)?;
        let data_clusters = (partition_size - data_start) / cluster_size;
        table.limit_allocation(u32::try_from(data_clusters).unwrap_or(u32::MAX));

        let root_cluster = superblock.root_cluster;
        if root_cluster >= cluster_count {
            return Err(Error::FormatError(format!(
                "root cluster {root_cluster} is outside the {cluster_count}-cluster table"
            )));
        }

        debug!(
            "opened {:?}-endian volume {:#010x}: {cluster_count} clusters of {cluster_size} bytes, {:?} table",
            superblock.endianness, superblock.volume_id, width
        );

        let mut inner = VolumeInner {
            store: ClusterStore::new(
                Box::new(device),
                config.partition_offset,
                data_start,
                cluster_size,
            ),
            superblock,
            table,
            read_only: config.read_only,
        };
        let root = inner.open_directory(root_cluster)?;
        debug!("root directory holds {} entries", root.len());

        Ok(Self {
            inner: Rc::new(RefCell::new(inner)),
        })
    }

    pub fn root(&self) -> Node {
        Node::Root(Root::new(self.clone()))
    }

    pub fn superblock(&self) -> SuperBlock {
        self.inner.borrow().superblock.clone()
    }

    pub fn root_cluster(&self) -> u32 {
        self.inner.borrow().superblock.root_cluster
    }

    pub fn cluster_size(&self) -> u64 {
        self.inner.borrow().store.cluster_size()
    }

    pub fn cluster_count(&self) -> u32 {
        self.inner.borrow().table.cluster_count()
    }

    pub fn entry_width(&self) -> EntryWidth {
        self.inner.borrow().table.width()
    }

    pub fn free_clusters(&self) -> usize {
        self.inner.borrow().table.free_clusters()
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.borrow().read_only
    }

    pub fn chain(&self, start_cluster: u32) -> Result<Vec<u32>, Error> {
        self.inner.borrow().table.chain(start_cluster)
    }

    pub fn read_file(&self, entry: &DirectoryEntry) -> Result<Vec<u8>, Error> {
        self.inner.borrow_mut().read_file(entry)
    }

    /// Stores `size` bytes from `reader` in a fresh chain and returns its head.
    ///
    /// The caller links the chain to a directory entry; an empty file gets
    /// start cluster 0 and no chain.
    pub fn write_file<R: Read>(&self, reader: &mut R, size: u64) -> Result<u32, Error> {
        self.inner.borrow_mut().write_file(reader, size)
    }

    pub fn open_directory(&self, start_cluster: u32) -> Result<DirectoryEntryList, Error> {
        self.inner.borrow_mut().open_directory(start_cluster)
    }

    pub fn root_directory(&self) -> Result<DirectoryEntryList, Error> {
        let root_cluster = self.root_cluster();
        self.open_directory(root_cluster)
    }

    pub fn write_directory_entry_list(&self, list: &mut DirectoryEntryList) -> Result<(), Error> {
        self.inner.borrow_mut().write_directory_entry_list(list)
    }

    /// Stores a new file called `name` in a directory and links it there.
    ///
    /// `owner` is the record of the target directory, or `None` for the root.
    /// The record is re-read first, so a directory deleted through another
    /// handle is refused with [`Error::PathNotFoundError`] before any cluster
    /// is touched.
    pub fn import<R: Read>(
        &self,
        owner: Option<(EntryLocation, &DirectoryEntry)>,
        name: &str,
        reader: &mut R,
        size: u64,
        timestamp: NaiveDateTime,
    ) -> Result<ListedEntry, Error> {
        self.inner
            .borrow_mut()
            .import(owner, name, reader, size, timestamp)
    }

    pub fn rename(
        &self,
        location: EntryLocation,
        current: &DirectoryEntry,
        name: &str,
    ) -> Result<DirectoryEntry, Error> {
        self.inner.borrow_mut().rename(location, current, name)
    }

    pub fn delete(
        &self,
        location: EntryLocation,
        current: &DirectoryEntry,
    ) -> Result<DirectoryEntry, Error> {
        self.inner.borrow_mut().delete(location, current)
    }

    pub(crate) fn same_volume(&self, other: &Volume) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Volume {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.try_borrow() {
            Ok(inner) => f
                .debug_struct("Volume")
                .field("superblock", &inner.superblock)
                .field("cluster_count", &inner.table.cluster_count())
                .field("read_only", &inner.read_only)
                .finish_non_exhaustive(),
            Err(_) => f.write_str("Volume { <in use> }"),
        }
    }
}
