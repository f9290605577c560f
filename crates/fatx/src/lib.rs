//! Reading and modifying FATX volumes.
//!
//! A [`Volume`] is opened from any seekable device (an image file, a raw disk,
//! an in-memory buffer). Its contents are reached through [`Volume::root`],
//! which hands out [`Node`]s that can be listed, resolved by path, exported,
//! renamed or deleted, and that accept imports when they are directories.
//!
//! ```no_run
//! use fatx::{FatxObject, Volume, VolumeConfig};
//! use std::path::Path;
//!
//! let volume = Volume::open_path(Path::new("partition.img"), &VolumeConfig::read_only())?;
//! for node in volume.root().ls("/", false)? {
//!     println!("{}", node.path());
//! }
//! # Ok::<(), fatx::Error>(())
//! ```

pub mod config;
pub mod dir_entry;
pub mod dir_list;
pub mod fat;
pub mod store;
pub mod superblock;
pub mod tree;
pub mod volume;

pub use config::{load_config, VolumeConfig};
pub use dir_entry::{Attributes, DirectoryEntry, Record, Timestamp};
pub use dir_list::{DirectoryEntryList, ListedEntry};
pub use fat::{AllocationEntry, ChainFault, ClusterAllocationTable, EntryWidth};
pub use store::Device;
pub use superblock::{Endianness, SuperBlock};
pub use tree::{Details, FatxObject, Node};
pub use volume::{EntryLocation, Volume};

#[derive(Debug)]
pub enum Error {
    IOError(std::io::Error),
    FormatError(String),
    CorruptChainError { cluster: u32, fault: ChainFault },
    OutOfSpaceError { requested: usize, available: usize },
    PathNotFoundError(String),
    NotADirectoryError(String),
    NotAFileError(String),
    DuplicateNameError(String),
    NameError(String),
    DirectoryNotEmptyError(String),
    InvalidOperationError(&'static str),
    ReadOnlyError,
    ConfigError(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::IOError(err) => write!(f, "{err:?}"),
            Error::FormatError(err) => write!(f, "Not a valid FATX volume: {err}"),
            Error::CorruptChainError { cluster, fault } => {
                write!(f, "Corrupt cluster chain at {cluster}: {fault}")
            }
            Error::OutOfSpaceError {
                requested,
                available,
            } => write!(
                f,
                "Out of space: {requested} clusters requested, {available} free"
            ),
            Error::PathNotFoundError(path) => write!(f, "{path} not found"),
            Error::NotADirectoryError(name) => write!(f, "{name} is not a directory"),
            Error::NotAFileError(name) => write!(f, "{name} is not a file"),
            Error::DuplicateNameError(name) => write!(f, "{name} already exists"),
            Error::NameError(name) => write!(
                f,
                "Invalid name {name:?}: must be 1-42 characters of [a-zA-Z0-9 !#$%&'()-.@[]^_`{{}}~]"
            ),
            Error::DirectoryNotEmptyError(name) => write!(f, "{name} is not empty"),
            Error::InvalidOperationError(reason) => write!(f, "{reason}"),
            Error::ReadOnlyError => write!(f, "Volume is opened read-only"),
            Error::ConfigError(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IOError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IOError(err)
    }
}
