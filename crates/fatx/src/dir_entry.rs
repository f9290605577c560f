//! Fixed-size directory entry records.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};

use crate::superblock::Endianness;
use crate::Error;

pub const DIRENT_SIZE: usize = 64;
pub const MAX_NAME_LEN: usize = 42;

const DELETED_MARKER: u8 = 0xE5;
const NAME_OFFSET: usize = 0x02;
const CLUSTER_OFFSET: usize = 0x2C;
const SIZE_OFFSET: usize = 0x30;
const CREATED_OFFSET: usize = 0x34;
const MODIFIED_OFFSET: usize = 0x38;
const ACCESSED_OFFSET: usize = 0x3C;
const YEAR_BASE: i32 = 2000;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN = 0x02;
        const SYSTEM = 0x04;
        const VOLUME_LABEL = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE = 0x20;
        /// Never stored in the attribute byte; mirrors the 0xE5 name-length marker.
        const DELETED = 0x80;
    }
}

impl Attributes {
    pub const fn is_directory(self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    pub const fn is_deleted(self) -> bool {
        self.contains(Self::DELETED)
    }

    /// Every known flag, lower-cased, with its current state.
    pub fn flags(self) -> impl Iterator<Item = (String, bool)> {
        Self::all()
            .iter_names()
            .map(move |(name, flag)| (name.to_ascii_lowercase(), self.contains(flag)))
    }
}

/// Packed FAT date and time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timestamp {
    pub time: u16,
    pub date: u16,
}

impl Timestamp {
    pub fn from_naive(value: NaiveDateTime) -> Self {
        let year = (value.year() - YEAR_BASE).clamp(0, 0x7F) as u16;
        let date = (year << 9) | ((value.month() as u16) << 5) | value.day() as u16;
        let time = ((value.hour() as u16) << 11)
            | ((value.minute() as u16) << 5)
            | (value.second() / 2) as u16;
        Self { time, date }
    }

    pub fn to_naive(self) -> Option<NaiveDateTime> {
        let year = YEAR_BASE + i32::from(self.date >> 9);
        let month = u32::from((self.date >> 5) & 0x0F);
        let day = u32::from(self.date & 0x1F);
        let hour = u32::from(self.time >> 11);
        let minute = u32::from((self.time >> 5) & 0x3F);
        let second = u32::from(self.time & 0x1F) * 2;
        NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)
    }

    fn read(buf: &[u8], endianness: Endianness) -> Self {
        Self {
            time: endianness.read_u16(&buf[0..2]),
            date: endianness.read_u16(&buf[2..4]),
        }
    }

    fn write(self, buf: &mut [u8], endianness: Endianness) {
        endianness.write_u16(&mut buf[0..2], self.time);
        endianness.write_u16(&mut buf[2..4], self.date);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub attributes: Attributes,
    pub start_cluster: u32,
    pub size: u32,
    pub created: Timestamp,
    pub modified: Timestamp,
    pub accessed: Timestamp,
}

/// Outcome of decoding one record slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Entry(DirectoryEntry),
    /// Reusable slot with nothing worth listing.
    Skip,
    /// No further records in this cluster.
    EndOfList,
}

impl DirectoryEntry {
    pub fn new_file(name: &str, size: u32, start_cluster: u32, timestamp: NaiveDateTime) -> Self {
        let stamp = Timestamp::from_naive(timestamp);
        Self {
            name: name.to_owned(),
            attributes: Attributes::default(),
            start_cluster,
            size,
            created: stamp,
            modified: stamp,
            accessed: stamp,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.is_directory()
    }

    pub fn is_deleted(&self) -> bool {
        self.attributes.is_deleted()
    }

    pub fn decode(record: &[u8], endianness: Endianness) -> Result<Record, Error> {
        if record.len() < DIRENT_SIZE {
            return Err(Error::FormatError(format!(
                "directory record truncated to {} bytes",
                record.len()
            )));
        }

        let name_field = &record[NAME_OFFSET..NAME_OFFSET + MAX_NAME_LEN];
        let (name_bytes, deleted) = match record[0] {
            0x00 | 0xFF => return Ok(Record::EndOfList),
            DELETED_MARKER => {
                let len = name_field
                    .iter()
                    .position(|&b| b == 0x00 || b == 0xFF)
                    .unwrap_or(MAX_NAME_LEN);
                if len == 0 {
                    return Ok(Record::Skip);
                }
                (&name_field[..len], true)
            }
            len @ 1..=42 => (&name_field[..len as usize], false),
            other => {
                return Err(Error::FormatError(format!(
                    "invalid name length marker {other:#04x}"
                )))
            }
        };

        let mut attributes =
            Attributes::from_bits_retain(record[1]).difference(Attributes::DELETED);
        if deleted {
            attributes.insert(Attributes::DELETED);
        }

        Ok(Record::Entry(DirectoryEntry {
            name: name_bytes.iter().map(|&b| char::from(b)).collect(),
            attributes,
            start_cluster: endianness.read_u32(&record[CLUSTER_OFFSET..CLUSTER_OFFSET + 4]),
            size: endianness.read_u32(&record[SIZE_OFFSET..SIZE_OFFSET + 4]),
            created: Timestamp::read(&record[CREATED_OFFSET..], endianness),
            modified: Timestamp::read(&record[MODIFIED_OFFSET..], endianness),
            accessed: Timestamp::read(&record[ACCESSED_OFFSET..], endianness),
        }))
    }

    pub fn encode(&self, endianness: Endianness) -> Result<[u8; DIRENT_SIZE], Error> {
        let name = encode_name(&self.name)?;

        let mut record = [0xFFu8; DIRENT_SIZE];
        record[0] = if self.is_deleted() {
            DELETED_MARKER
        } else {
            name.len() as u8
        };
        record[1] = self.attributes.difference(Attributes::DELETED).bits();
        record[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(&name);
        endianness.write_u32(
            &mut record[CLUSTER_OFFSET..CLUSTER_OFFSET + 4],
            self.start_cluster,
        );
        endianness.write_u32(&mut record[SIZE_OFFSET..SIZE_OFFSET + 4], self.size);
        self.created
            .write(&mut record[CREATED_OFFSET..CREATED_OFFSET + 4], endianness);
        self.modified
            .write(&mut record[MODIFIED_OFFSET..MODIFIED_OFFSET + 4], endianness);
        self.accessed
            .write(&mut record[ACCESSED_OFFSET..ACCESSED_OFFSET + 4], endianness);
        Ok(record)
    }
}

/// A deleted record whose name buffer is blank; decodes as [`Record::Skip`].
pub fn skip_record() -> [u8; DIRENT_SIZE] {
    let mut record = [0xFFu8; DIRENT_SIZE];
    record[0] = DELETED_MARKER;
    record
}

fn encode_name(name: &str) -> Result<Vec<u8>, Error> {
    let bytes = name
        .chars()
        .map(|c| u8::try_from(u32::from(c)).ok())
        .collect::<Option<Vec<u8>>>()
        .ok_or_else(|| Error::NameError(name.to_owned()))?;
    if bytes.is_empty() || bytes.len() > MAX_NAME_LEN {
        return Err(Error::NameError(name.to_owned()));
    }
    Ok(bytes)
}

/// Whether `name` may be given to a new or renamed entry.
pub fn check_name(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_NAME_LEN || name == "." || name == ".." {
        return false;
    }
    name.chars().all(|c| {
        c.is_ascii_alphanumeric()
            || matches!(
                c,
                ' ' | '!'
                    | '#'
                    | '$'
                    | '%'
                    | '&'
                    | '\''
                    | '('
                    | ')'
                    | '-'
                    | '.'
                    | '@'
                    | '['
                    | ']'
                    | '^'
                    | '_'
                    | '`'
                    | '{'
                    | '}'
                    | '~'
            )
    })
}
