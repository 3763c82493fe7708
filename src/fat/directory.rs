use crate::BlockIdx;

use super::{Cluster, FatType};

bitflags::bitflags! {
    pub struct Attributes: u8 {
        const READ_ONLY = (1 << 0);
        const HIDDEN = (1 << 1);
        const SYSTEM = (1 << 2);
        const VOLUME_ID = (1 << 3);
        const DIRECTORY = (1 << 4);
        const ARCHIVE = (1 << 5);
    }
}

impl Attributes {
    pub fn is_long_name(&self) -> bool {
        self.contains(Self::READ_ONLY | Self::HIDDEN | Self::SYSTEM | Self::VOLUME_ID)
    }

    pub fn is_dir(&self) -> bool {
        self.contains(Self::DIRECTORY)
    }

    pub fn is_volume_label(&self) -> bool {
        self.contains(Self::VOLUME_ID) && !self.is_long_name()
    }
}

/// Why a name can't be used as an 8.3 short name.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong,
    InvalidCharacter(u8),
}

/// An 8.3 name as stored on disk: upper case, space padded, no dot.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ShortName {
    contents: [u8; 11],
}

impl ShortName {
    const PADDING: u8 = b' ';

    /// Convert a name like `1203log.txt` to its on-disk form.
    pub fn parse(name: &str) -> Result<ShortName, NameError> {
        let mut contents = [Self::PADDING; 11];
        let (base, ext) = match name.rfind('.') {
            Some(dot) => (&name[..dot], &name[dot + 1..]),
            None => (name, ""),
        };
        if base.is_empty() {
            return Err(NameError::Empty);
        }
        if base.len() > 8 || ext.len() > 3 {
            return Err(NameError::TooLong);
        }
        for (dst, src) in contents[..8].iter_mut().zip(base.bytes()) {
            *dst = Self::check_char(src)?;
        }
        for (dst, src) in contents[8..].iter_mut().zip(ext.bytes()) {
            *dst = Self::check_char(src)?;
        }
        Ok(ShortName { contents })
    }

    fn check_char(ch: u8) -> Result<u8, NameError> {
        match ch {
            b'A'..=b'Z' | b'0'..=b'9' => Ok(ch),
            b'a'..=b'z' => Ok(ch.to_ascii_uppercase()),
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'(' | b')' | b'-' | b'@' | b'^'
            | b'_' | b'`' | b'{' | b'}' | b'~' => Ok(ch),
            _ => Err(NameError::InvalidCharacter(ch)),
        }
    }

    pub fn from_raw(contents: [u8; 11]) -> ShortName {
        ShortName { contents }
    }

    pub fn as_bytes(&self) -> &[u8; 11] {
        &self.contents
    }

    fn trimmed(bytes: &[u8]) -> &[u8] {
        let len = bytes
            .iter()
            .rposition(|b| *b != Self::PADDING)
            .map_or(0, |p| p + 1);
        &bytes[..len]
    }

    pub fn main_name(&self) -> &[u8] {
        Self::trimmed(&self.contents[..8])
    }

    pub fn extension(&self) -> &[u8] {
        Self::trimmed(&self.contents[8..])
    }
}

impl core::fmt::Debug for ShortName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for b in self.main_name() {
            write!(f, "{}", *b as char)?;
        }
        if !self.extension().is_empty() {
            write!(f, ".")?;
            for b in self.extension() {
                write!(f, "{}", *b as char)?;
            }
        }
        Ok(())
    }
}

#[cfg(feature = "defmt-log")]
impl defmt::Format for ShortName {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "{=[u8]:a}.{=[u8]:a}", self.main_name(), self.extension())
    }
}

/// Where a directory entry is stored, so it can be written back.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryLocation {
    pub block: BlockIdx,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct DirEntry {
    name: ShortName,
    attributes: Attributes,
    file_size: u32,
    first_cluster: Cluster,
    location: EntryLocation,
}

impl DirEntry {
    pub fn new(raw: &DirEntryRaw, fat_type: FatType, location: EntryLocation) -> Self {
        let clus_hi = u32::from(raw.fst_clus_hi());
        let clus_lo = u32::from(raw.fst_clus_lo());
        let first_cluster = match fat_type {
            FatType::Fat16 => Cluster(clus_lo),
            FatType::Fat32 => Cluster(clus_hi << 16 | clus_lo),
        };

        Self {
            name: ShortName::from_raw(raw.name()),
            attributes: Attributes::from_bits_truncate(raw.attr()),
            file_size: raw.file_size(),
            first_cluster,
            location,
        }
    }

    /// A fresh, empty file.
    pub fn new_file(name: ShortName, location: EntryLocation) -> Self {
        Self {
            name,
            attributes: Attributes::ARCHIVE,
            file_size: 0,
            first_cluster: Cluster(0),
            location,
        }
    }

    pub fn name(&self) -> &ShortName {
        &self.name
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn is_dir(&self) -> bool {
        self.attributes().is_dir()
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn first_cluster(&self) -> Cluster {
        self.first_cluster
    }

    pub fn location(&self) -> EntryLocation {
        self.location
    }

    pub(crate) fn set_file_size(&mut self, file_size: u32) {
        self.file_size = file_size;
    }

    pub(crate) fn set_first_cluster(&mut self, cluster: Cluster) {
        self.first_cluster = cluster;
    }

    /// Copy the name, attributes, first cluster and size into `raw`,
    /// leaving timestamps alone.
    pub fn update_raw(&self, raw: &mut DirEntryRaw) {
        raw.set_name(self.name.as_bytes());
        raw.set_attr(self.attributes.bits());
        raw.set_fst_clus_hi((self.first_cluster.0 >> 16) as u16);
        raw.set_fst_clus_lo(self.first_cluster.0 as u16);
        raw.set_file_size(self.file_size);
    }
}

/// One 32 byte directory slot.
#[derive(Debug, Clone)]
pub struct DirEntryRaw {
    data: [u8; DirEntryRaw::LEN],
}

impl DirEntryRaw {
    pub const LEN: usize = 32;

    const END_OF_DIRECTORY: u8 = 0x00;
    const DELETED: u8 = 0xE5;

    pub fn new(data: &[u8]) -> Self {
        let mut raw = Self {
            data: [0u8; Self::LEN],
        };
        raw.data.copy_from_slice(&data[..Self::LEN]);
        raw
    }

    /// An all-zero slot.
    pub fn empty() -> Self {
        Self {
            data: [0u8; Self::LEN],
        }
    }

    fn data(&self) -> &[u8] {
        &self.data
    }

    fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn name(&self) -> [u8; 11] {
        let mut name = [0u8; 11];
        name.copy_from_slice(&self.data()[0..11]);
        name
    }

    fn set_name(&mut self, name: &[u8; 11]) {
        self.data_mut()[0..11].copy_from_slice(name);
    }

    /// This slot and every one after it are unused.
    pub fn is_end(&self) -> bool {
        self.data()[0] == Self::END_OF_DIRECTORY
    }

    /// This slot can be reused.
    pub fn is_free(&self) -> bool {
        self.is_end() || self.data()[0] == Self::DELETED
    }

    define_field!(attr, set_attr, u8, 11);
    define_field!(fst_clus_hi, set_fst_clus_hi, u16, 20);
    define_field!(fst_clus_lo, set_fst_clus_lo, u16, 26);
    define_field!(file_size, set_file_size, u32, 28);
}
