//! Path-addressable view of a volume.
//!
//! Nodes are cheap snapshots. A directory's children are read from disk each
//! time it is listed or resolved, so every node sees the state left by the
//! latest mutation no matter which handle applied it.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;

use crate::dir_entry::DirectoryEntry;
use crate::dir_list::ListedEntry;
use crate::volume::{EntryLocation, Volume};
use crate::Error;

/// Operations every node answers, with a typed error where a variant cannot
/// support them.
pub trait FatxObject {
    fn name(&self) -> &str;

    /// Direct children of the directory at `path`, relative to this node.
    fn ls(&self, _path: &str, _include_deleted: bool) -> Result<Vec<Node>, Error> {
        Err(Error::NotADirectoryError(self.name().to_owned()))
    }

    fn get(&self, path: &str) -> Result<Node, Error>;

    fn export_file(&self) -> Result<Vec<u8>, Error> {
        Err(Error::NotAFileError(self.name().to_owned()))
    }

    /// Copies a local file into this directory under its own file name.
    fn import_file(&self, _source: &Path) -> Result<Node, Error> {
        Err(Error::NotADirectoryError(self.name().to_owned()))
    }

    fn import_data(&self, _name: &str, _data: &[u8]) -> Result<Node, Error> {
        Err(Error::NotADirectoryError(self.name().to_owned()))
    }

    fn rename(&mut self, name: &str) -> Result<(), Error>;

    fn delete(&mut self) -> Result<(), Error>;

    fn details(&self) -> Result<Details, Error>;

    fn parent(&self) -> Node;
}

#[derive(Clone)]
pub enum Node {
    Root(Root),
    Directory(Directory),
    File(File),
}

#[derive(Clone)]
pub struct Root {
    volume: Volume,
}

#[derive(Clone)]
pub struct Directory {
    link: Link,
}

#[derive(Clone)]
pub struct File {
    link: Link,
}

/// The backing record of a non-root node and the directory it was found in.
#[derive(Clone)]
struct Link {
    volume: Volume,
    entry: DirectoryEntry,
    location: EntryLocation,
    parent: Rc<Node>,
}

impl Link {
    fn rename(&mut self, name: &str) -> Result<(), Error> {
        self.entry = self.volume.rename(self.location, &self.entry, name)?;
        Ok(())
    }

    fn delete(&mut self) -> Result<(), Error> {
        self.entry = self.volume.delete(self.location, &self.entry)?;
        Ok(())
    }
}

impl PartialEq for Link {
    fn eq(&self, other: &Self) -> bool {
        self.volume.same_volume(&other.volume)
            && self.location == other.location
            && self.entry == other.entry
    }
}

/// Attribute mapping of a non-root node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Details {
    pub name: String,
    pub size: u32,
    pub start_cluster: u32,
    pub attributes: BTreeMap<String, bool>,
    #[serde(serialize_with = "date_format::serialize")]
    pub created: Option<NaiveDateTime>,
    #[serde(serialize_with = "date_format::serialize")]
    pub modified: Option<NaiveDateTime>,
    #[serde(serialize_with = "date_format::serialize")]
    pub accessed: Option<NaiveDateTime>,
}

impl From<&DirectoryEntry> for Details {
    fn from(entry: &DirectoryEntry) -> Self {
        Self {
            name: entry.name.clone(),
            size: entry.size,
            start_cluster: entry.start_cluster,
            attributes: entry.attributes.flags().collect(),
            created: entry.created.to_naive(),
            modified: entry.modified.to_naive(),
            accessed: entry.accessed.to_naive(),
        }
    }
}

mod date_format {
    use chrono::NaiveDateTime;
    use serde::Serializer;

    const FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn serialize<S>(value: &Option<NaiveDateTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(value) => serializer.serialize_some(&value.format(FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }
}

pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|segment| !segment.is_empty()).collect()
}

impl Node {
    fn from_listed(volume: &Volume, directory: u32, listed: ListedEntry, parent: Rc<Node>) -> Self {
        let link = Link {
            volume: volume.clone(),
            location: EntryLocation {
                directory,
                slot: listed.slot,
            },
            entry: listed.entry,
            parent,
        };
        if link.entry.is_directory() {
            Node::Directory(Directory { link })
        } else {
            Node::File(File { link })
        }
    }

    fn object(&self) -> &dyn FatxObject {
        match self {
            Node::Root(root) => root,
            Node::Directory(directory) => directory,
            Node::File(file) => file,
        }
    }

    fn object_mut(&mut self) -> &mut dyn FatxObject {
        match self {
            Node::Root(root) => root,
            Node::Directory(directory) => directory,
            Node::File(file) => file,
        }
    }

    fn link(&self) -> Option<&Link> {
        match self {
            Node::Root(_) => None,
            Node::Directory(Directory { link }) | Node::File(File { link }) => Some(link),
        }
    }

    pub fn volume(&self) -> &Volume {
        match self {
            Node::Root(root) => &root.volume,
            Node::Directory(Directory { link }) | Node::File(File { link }) => &link.volume,
        }
    }

    /// The backing record; `None` for the root.
    pub fn entry(&self) -> Option<&DirectoryEntry> {
        self.link().map(|link| &link.entry)
    }

    pub fn location(&self) -> Option<EntryLocation> {
        self.link().map(|link| link.location)
    }

    pub fn is_directory(&self) -> bool {
        !matches!(self, Node::File(_))
    }

    pub fn is_deleted(&self) -> bool {
        self.entry().is_some_and(DirectoryEntry::is_deleted)
    }

    /// First cluster of the entry list this node owns, if it is a directory.
    pub fn directory_cluster(&self) -> Option<u32> {
        match self {
            Node::Root(root) => Some(root.volume.root_cluster()),
            Node::Directory(Directory { link }) => Some(link.entry.start_cluster),
            Node::File(_) => None,
        }
    }

    /// Absolute slash-separated path from the root.
    pub fn path(&self) -> String {
        match self.link() {
            None => "/".to_owned(),
            Some(link) => {
                let parent = link.parent.path();
                if parent.ends_with('/') {
                    format!("{parent}{}", link.entry.name)
                } else {
                    format!("{parent}/{}", link.entry.name)
                }
            }
        }
    }
}

impl FatxObject for Node {
    fn name(&self) -> &str {
        self.object().name()
    }

    fn ls(&self, path: &str, include_deleted: bool) -> Result<Vec<Node>, Error> {
        self.object().ls(path, include_deleted)
    }

    fn get(&self, path: &str) -> Result<Node, Error> {
        self.object().get(path)
    }

    fn export_file(&self) -> Result<Vec<u8>, Error> {
        self.object().export_file()
    }

    fn import_file(&self, source: &Path) -> Result<Node, Error> {
        self.object().import_file(source)
    }

    fn import_data(&self, name: &str, data: &[u8]) -> Result<Node, Error> {
        self.object().import_data(name, data)
    }

    fn rename(&mut self, name: &str) -> Result<(), Error> {
        self.object_mut().rename(name)
    }

    fn delete(&mut self) -> Result<(), Error> {
        self.object_mut().delete()
    }

    fn details(&self) -> Result<Details, Error> {
        self.object().details()
    }

    fn parent(&self) -> Node {
        self.object().parent()
    }
}

fn children(node: &Node, cluster: u32) -> Result<Vec<Node>, Error> {
    let volume = node.volume();
    let list = volume.open_directory(cluster)?;
    let parent = Rc::new(node.clone());
    Ok(list
        .listed()
        .iter()
        .cloned()
        .map(|listed| Node::from_listed(volume, cluster, listed, Rc::clone(&parent)))
        .collect())
}

/// Matches the first segment among the direct children and hands the rest to that child.
///
/// A live child wins over a deleted record of the same name.
fn resolve(node: &Node, path: &str) -> Result<Node, Error> {
    let segments = split_path(path);
    let Some((first, rest)) = segments.split_first() else {
        return Ok(node.clone());
    };
    let cluster = live_directory_cluster(node)?;

    let matches = children(node, cluster)?
        .into_iter()
        .filter(|child| child.name() == *first)
        .collect::<Vec<_>>();
    let child = matches
        .iter()
        .find(|child| !child.is_deleted())
        .or_else(|| matches.first())
        .ok_or_else(|| Error::PathNotFoundError((*first).to_owned()))?;
    child.get(&rest.join("/"))
}

/// The entry-list cluster of a directory whose record is not deleted.
fn live_directory_cluster(node: &Node) -> Result<u32, Error> {
    let Some(cluster) = node.directory_cluster() else {
        return Err(Error::NotADirectoryError(node.name().to_owned()));
    };
    if node.is_deleted() {
        return Err(Error::PathNotFoundError(node.name().to_owned()));
    }
    Ok(cluster)
}

fn list(node: &Node, path: &str, include_deleted: bool) -> Result<Vec<Node>, Error> {
    let target = node.get(path)?;
    let cluster = live_directory_cluster(&target)?;
    Ok(children(&target, cluster)?
        .into_iter()
        .filter(|child| include_deleted || !child.is_deleted())
        .collect())
}

fn import<R: Read>(
    node: &Node,
    name: &str,
    reader: &mut R,
    size: u64,
    timestamp: NaiveDateTime,
) -> Result<Node, Error> {
    let cluster = live_directory_cluster(node)?;
    let owner = node.link().map(|link| (link.location, &link.entry));
    let volume = node.volume();
    let listed = volume.import(owner, name, reader, size, timestamp)?;
    Ok(Node::from_listed(volume, cluster, listed, Rc::new(node.clone())))
}

fn import_file(node: &Node, source: &Path) -> Result<Node, Error> {
    let name = source
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::NameError(source.display().to_string()))?;
    let mut file = fs::File::open(source)?;
    let metadata = file.metadata()?;
    if !metadata.is_file() {
        return Err(Error::NotAFileError(source.display().to_string()));
    }
    let timestamp = metadata
        .modified()
        .map(convert_timestamp)
        .unwrap_or_else(|_| Local::now().naive_local());
    import(node, name, &mut file, metadata.len(), timestamp)
}

fn import_data(node: &Node, name: &str, data: &[u8]) -> Result<Node, Error> {
    let mut reader = data;
    import(
        node,
        name,
        &mut reader,
        data.len() as u64,
        Local::now().naive_local(),
    )
}

fn convert_timestamp(time: SystemTime) -> NaiveDateTime {
    let duration = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    DateTime::from_timestamp(duration.as_secs() as i64, duration.subsec_nanos())
        .unwrap_or_default()
        .with_timezone(&Local)
        .naive_local()
}

impl Root {
    pub(crate) fn new(volume: Volume) -> Self {
        Self { volume }
    }

    fn node(&self) -> Node {
        Node::Root(self.clone())
    }
}

impl FatxObject for Root {
    fn name(&self) -> &str {
        "/"
    }

    fn ls(&self, path: &str, include_deleted: bool) -> Result<Vec<Node>, Error> {
        list(&self.node(), path, include_deleted)
    }

    fn get(&self, path: &str) -> Result<Node, Error> {
        resolve(&self.node(), path)
    }

    fn import_file(&self, source: &Path) -> Result<Node, Error> {
        import_file(&self.node(), source)
    }

    fn import_data(&self, name: &str, data: &[u8]) -> Result<Node, Error> {
        import_data(&self.node(), name, data)
    }

    fn rename(&mut self, _name: &str) -> Result<(), Error> {
        Err(Error::InvalidOperationError("the volume root cannot be renamed"))
    }

    fn delete(&mut self) -> Result<(), Error> {
        Err(Error::InvalidOperationError("the volume root cannot be deleted"))
    }

    fn details(&self) -> Result<Details, Error> {
        Err(Error::InvalidOperationError("the volume root has no directory entry"))
    }

    fn parent(&self) -> Node {
        self.node()
    }
}

impl Directory {
    fn node(&self) -> Node {
        Node::Directory(self.clone())
    }
}

impl FatxObject for Directory {
    fn name(&self) -> &str {
        &self.link.entry.name
    }

    fn ls(&self, path: &str, include_deleted: bool) -> Result<Vec<Node>, Error> {
        list(&self.node(), path, include_deleted)
    }

    fn get(&self, path: &str) -> Result<Node, Error> {
        resolve(&self.node(), path)
    }

    fn import_file(&self, source: &Path) -> Result<Node, Error> {
        import_file(&self.node(), source)
    }

    fn import_data(&self, name: &str, data: &[u8]) -> Result<Node, Error> {
        import_data(&self.node(), name, data)
    }

    fn rename(&mut self, name: &str) -> Result<(), Error> {
        self.link.rename(name)
    }

    fn delete(&mut self) -> Result<(), Error> {
        self.link.delete()
    }

    fn details(&self) -> Result<Details, Error> {
        Ok(Details::from(&self.link.entry))
    }

    fn parent(&self) -> Node {
        (*self.link.parent).clone()
    }
}

impl FatxObject for File {
    fn name(&self) -> &str {
        &self.link.entry.name
    }

    fn get(&self, path: &str) -> Result<Node, Error> {
        if split_path(path).is_empty() {
            return Ok(Node::File(self.clone()));
        }
        Err(Error::NotADirectoryError(self.name().to_owned()))
    }

    fn export_file(&self) -> Result<Vec<u8>, Error> {
        if self.link.entry.is_deleted() {
            return Err(Error::PathNotFoundError(self.name().to_owned()));
        }
        self.link.volume.read_file(&self.link.entry)
    }

    fn rename(&mut self, name: &str) -> Result<(), Error> {
        self.link.rename(name)
    }

    fn delete(&mut self) -> Result<(), Error> {
        self.link.delete()
    }

    fn details(&self) -> Result<Details, Error> {
        Ok(Details::from(&self.link.entry))
    }

    fn parent(&self) -> Node {
        (*self.link.parent).clone()
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Root(a), Node::Root(b)) => a.volume.same_volume(&b.volume),
            (Node::Directory(a), Node::Directory(b)) => a.link == b.link,
            (Node::File(a), Node::File(b)) => a.link == b.link,
            _ => false,
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Node::Root(_) => f.write_str("Root"),
            Node::Directory(directory) => f
                .debug_struct("Directory")
                .field("entry", &directory.link.entry)
                .field("location", &directory.link.location)
                .finish(),
            Node::File(file) => f
                .debug_struct("File")
                .field("entry", &file.link.entry)
                .field("location", &file.link.location)
                .finish(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}
