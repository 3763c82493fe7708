//! sdmmc-logger - FAT16/FAT32 volumes
//!
//! Enough of FAT to append to files in the root directory: mount, find or
//! create an 8.3 entry, grow a cluster chain and read a file back. The
//! volume only holds geometry; every operation borrows the block device.

use crate::mbr::{self, Mbr, PartitionNumber};
use crate::{Block, BlockCount, BlockDevice, BlockIdx};

use self::{
    bios_param_block::{BiosParameterBlock, BpbError},
    cluster::Cluster,
    directory::{DirEntry, DirEntryRaw, EntryLocation, NameError, ShortName},
    root_directory::RootDirectorySectors,
};

pub mod bios_param_block;
pub mod cluster;
pub mod directory;
pub mod file;
pub mod root_directory;

#[cfg(feature = "log")]
use log::{debug, trace};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace};

/// Something that yields the blocks of a directory or file in order.
pub trait SectorIter {
    fn next_sector<BD>(
        &mut self,
        volume: &FatVolume,
        device: &mut BD,
    ) -> Result<Option<BlockIdx>, FatError<BD::Error>>
    where
        BD: BlockDevice;
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    // Fat12
    Fat16,
    Fat32,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug)]
pub enum FatError<E>
where
    E: core::fmt::Debug,
{
    DeviceError(E),
    BpbError(BpbError),
    Mbr(mbr::Error),
    InvalidName(NameError),
    DirectoryFull,
    DiskFull,
    IsDirectory,
    FileTooLarge,
    /// Nothing is mounted
    NoVolume,
    /// No file is open
    NotOpen,
}

impl<E> From<BpbError> for FatError<E>
where
    E: core::fmt::Debug,
{
    fn from(e: BpbError) -> Self {
        Self::BpbError(e)
    }
}

impl<E> From<NameError> for FatError<E>
where
    E: core::fmt::Debug,
{
    fn from(e: NameError) -> Self {
        Self::InvalidName(e)
    }
}

/// A mounted volume.
#[derive(Debug, Clone)]
pub struct FatVolume {
    base: BlockIdx,
    bpb: BiosParameterBlock,
    next_free: Cluster,
}

impl FatVolume {
    /// Mount the volume at block 0, or else the first MBR partition.
    pub fn mount<BD>(device: &mut BD) -> Result<Self, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        let first_block = device
            .read_block(BlockIdx(0))
            .map_err(FatError::DeviceError)?;

        match BiosParameterBlock::new(first_block.clone()) {
            Ok(bpb) => return Ok(Self::new(BlockIdx(0), bpb)),
            Err(e) => debug!("No volume at block 0 ({:?}), trying MBR", e),
        }

        let partition = Mbr::partition_from_block(&first_block, PartitionNumber::One)
            .map_err(FatError::Mbr)?;
        if !partition.ty.is_fat() {
            return Err(FatError::Mbr(mbr::Error::UnsupportedPartitionType(
                first_block[446 + 4],
            )));
        }

        let boot_block = device
            .read_block(partition.lba_start)
            .map_err(FatError::DeviceError)?;
        let bpb = BiosParameterBlock::new(boot_block)?;
        Ok(Self::new(partition.lba_start, bpb))
    }

    fn new(base: BlockIdx, bpb: BiosParameterBlock) -> Self {
        debug!(
            "Mounted {:?} volume at block {}, {} clusters",
            bpb.fat_type(),
            base.0,
            bpb.cluster_count()
        );
        Self {
            base,
            bpb,
            next_free: Cluster::FIRST_DATA,
        }
    }

    pub fn bpb(&self) -> &BiosParameterBlock {
        &self.bpb
    }

    pub fn fat_type(&self) -> FatType {
        self.bpb.fat_type()
    }

    /// The first block of the volume on the device.
    pub fn base(&self) -> BlockIdx {
        self.base
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        self.bpb.bytes_per_cluster()
    }

    /// The first block of a data cluster.
    pub fn cluster_start(&self, cluster: Cluster) -> BlockIdx {
        let index = cluster.0.saturating_sub(Cluster::FIRST_DATA.0);
        self.base
            + self.bpb.data_start()
            + BlockCount(index * self.bpb.sectors_per_cluster().0)
    }

    pub fn root_directory(&self) -> Result<RootDirectorySectors, BpbError> {
        match self.fat_type() {
            FatType::Fat16 => Ok(RootDirectorySectors::Region {
                start_block: self.base + self.bpb.root_dir_start(),
                len: self.bpb.root_dir_sectors(),
            }),
            FatType::Fat32 => Ok(RootDirectorySectors::Cluster(Cluster(
                self.bpb.root_cluster()?,
            ))),
        }
    }

    /// Block and byte offset of a cluster's entry in the given FAT copy.
    fn fat_entry_position(&self, fat_number: u8, cluster: Cluster) -> (BlockIdx, usize) {
        let fat_offset = match self.fat_type() {
            FatType::Fat16 => cluster.0 * 2,
            FatType::Fat32 => cluster.0 * 4,
        };
        let block = self.base
            + self.bpb.reserved_sector_count()
            + BlockCount(u32::from(fat_number) * self.bpb.fat_size().0)
            + BlockCount(fat_offset / Block::LEN_U32);
        (block, (fat_offset % Block::LEN_U32) as usize)
    }

    fn entry_width(&self) -> usize {
        match self.fat_type() {
            FatType::Fat16 => 2,
            FatType::Fat32 => 4,
        }
    }

    fn decode_entry(&self, bytes: &[u8]) -> FatEntry {
        match self.fat_type() {
            FatType::Fat16 => FatEntry(u32::from(u16::from_le_bytes([bytes[0], bytes[1]]))),
            FatType::Fat32 => FatEntry(
                u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) & FatEntry::FAT32_MASK,
            ),
        }
    }

    /// Read a cluster's entry from the first FAT.
    pub fn fat_entry<BD>(&self, device: &mut BD, cluster: Cluster) -> Result<FatEntry, BD::Error>
    where
        BD: BlockDevice,
    {
        let (block, offset) = self.fat_entry_position(0, cluster);
        let width = self.entry_width();
        let mut bytes = [0u8; 4];
        device.read_partial(Some(&mut bytes[..width]), block, offset, width)?;
        Ok(self.decode_entry(&bytes))
    }

    /// Write a cluster's entry into every copy of the FAT.
    fn set_fat_entry<BD>(
        &self,
        device: &mut BD,
        cluster: Cluster,
        entry: FatEntry,
    ) -> Result<(), BD::Error>
    where
        BD: BlockDevice,
    {
        trace!("FAT[{}] = {:x}", cluster.0, entry.0);
        for fat_number in 0..self.bpb.num_fats() {
            let (block_idx, offset) = self.fat_entry_position(fat_number, cluster);
            let mut block = device.read_block(block_idx)?;
            match self.fat_type() {
                FatType::Fat16 => {
                    block[offset..offset + 2].copy_from_slice(&(entry.0 as u16).to_le_bytes())
                }
                FatType::Fat32 => {
                    let old = u32::from_le_bytes([
                        block[offset],
                        block[offset + 1],
                        block[offset + 2],
                        block[offset + 3],
                    ]);
                    // the top four bits are reserved
                    let new = (old & !FatEntry::FAT32_MASK) | (entry.0 & FatEntry::FAT32_MASK);
                    block[offset..offset + 4].copy_from_slice(&new.to_le_bytes());
                }
            }
            device.write(core::slice::from_ref(&block), block_idx)?;
        }
        Ok(())
    }

    /// The cluster after this one in its chain, if any.
    pub fn next_cluster<BD>(
        &self,
        device: &mut BD,
        cluster: Cluster,
    ) -> Result<Option<Cluster>, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        let entry = self
            .fat_entry(device, cluster)
            .map_err(FatError::DeviceError)?;
        if entry.is_final(self.fat_type()) || entry.is_free() || entry.is_bad(self.fat_type()) {
            Ok(None)
        } else {
            Ok(Some(Cluster(entry.0)))
        }
    }

    /// Claim a free cluster, mark it as the end of its chain and link it
    /// after `previous`.
    pub fn allocate_cluster<BD>(
        &mut self,
        device: &mut BD,
        previous: Option<Cluster>,
    ) -> Result<Cluster, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        let first = Cluster::FIRST_DATA.0;
        let last = self.bpb.maximum_valid_cluster();
        let start = self.next_free.0.max(first).min(last);
        let width = self.entry_width();

        let mut cached: Option<(BlockIdx, Block)> = None;
        let mut candidate = start;
        loop {
            let (block_idx, offset) = self.fat_entry_position(0, Cluster(candidate));
            let is_cached = matches!(&cached, Some((idx, _)) if *idx == block_idx);
            if !is_cached {
                let block = device
                    .read_block(block_idx)
                    .map_err(FatError::DeviceError)?;
                cached = Some((block_idx, block));
            }
            let is_free = match &cached {
                Some((_, block)) => self.decode_entry(&block[offset..offset + width]).is_free(),
                None => false,
            };
            if is_free {
                break;
            }
            candidate = if candidate >= last { first } else { candidate + 1 };
            if candidate == start {
                return Err(FatError::DiskFull);
            }
        }

        let cluster = Cluster(candidate);
        self.set_fat_entry(device, cluster, FatEntry::end_of_chain(self.fat_type()))
            .map_err(FatError::DeviceError)?;
        if let Some(previous) = previous {
            self.set_fat_entry(device, previous, FatEntry(cluster.0))
                .map_err(FatError::DeviceError)?;
        }
        self.next_free = Cluster(if candidate >= last { first } else { candidate + 1 });
        debug!("Allocated cluster {}", cluster.0);
        Ok(cluster)
    }

    /// Look for `name` in the root directory. With `create`, a missing
    /// file is added in the first free slot.
    pub fn find_entry<BD>(
        &self,
        device: &mut BD,
        name: &ShortName,
        create: bool,
    ) -> Result<Option<DirEntry>, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        let mut sectors = self.root_directory()?.iter(self);
        let mut free_slot: Option<EntryLocation> = None;

        'blocks: while let Some(block_idx) = sectors.next_sector(self, device)? {
            let block = device
                .read_block(block_idx)
                .map_err(FatError::DeviceError)?;
            for (slot, bytes) in block.chunks_exact(DirEntryRaw::LEN).enumerate() {
                let raw = DirEntryRaw::new(bytes);
                let location = EntryLocation {
                    block: block_idx,
                    offset: slot * DirEntryRaw::LEN,
                };
                if raw.is_free() {
                    if free_slot.is_none() {
                        free_slot = Some(location);
                    }
                    if raw.is_end() {
                        break 'blocks;
                    }
                    continue;
                }
                let entry = DirEntry::new(&raw, self.fat_type(), location);
                if entry.attributes().is_long_name() || entry.attributes().is_volume_label() {
                    continue;
                }
                if entry.name() == name {
                    return Ok(Some(entry));
                }
            }
        }

        if !create {
            return Ok(None);
        }
        let location = free_slot.ok_or(FatError::DirectoryFull)?;
        let entry = DirEntry::new_file(*name, location);
        self.write_entry(device, &entry)
            .map_err(FatError::DeviceError)?;
        debug!("Created {:?}", name);
        Ok(Some(entry))
    }

    /// Store an entry back in its directory slot.
    pub fn write_entry<BD>(&self, device: &mut BD, entry: &DirEntry) -> Result<(), BD::Error>
    where
        BD: BlockDevice,
    {
        let location = entry.location();
        let mut block = device.read_block(location.block)?;
        let slot = &mut block[location.offset..location.offset + DirEntryRaw::LEN];
        let mut raw = DirEntryRaw::new(slot);
        entry.update_raw(&mut raw);
        slot.copy_from_slice(raw.as_bytes());
        device.write(core::slice::from_ref(&block), location.block)
    }

    /// Read the start of a file into `buffer`. Returns the bytes read.
    pub fn read_file<BD>(
        &self,
        device: &mut BD,
        entry: &DirEntry,
        buffer: &mut [u8],
    ) -> Result<usize, FatError<BD::Error>>
    where
        BD: BlockDevice,
    {
        if entry.is_dir() {
            return Err(FatError::IsDirectory);
        }
        let wanted = buffer.len().min(entry.file_size() as usize);
        if wanted == 0 || !entry.first_cluster().is_data() {
            return Ok(0);
        }

        let mut sectors = entry.first_cluster().all_sectors(self);
        let mut done = 0;
        while done < wanted {
            let block_idx = match sectors.next_sector(self, device)? {
                Some(block_idx) => block_idx,
                None => break,
            };
            let count = (wanted - done).min(Block::LEN);
            device
                .read_partial(Some(&mut buffer[done..done + count]), block_idx, 0, count)
                .map_err(FatError::DeviceError)?;
            done += count;
        }
        Ok(done)
    }
}

/// The value stored in the FAT for one cluster.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatEntry(pub u32);

impl FatEntry {
    pub const FREE: Self = Self(0);

    const FAT32_MASK: u32 = 0x0FFF_FFFF;

    pub const FAT32_BAD: Self = Self(0x0FFF_FFF7);
    pub const FAT32_FINAL: Self = Self(0x0FFF_FFFF);
    const FAT32_RESERVED_RANGE_START: u32 = 0x0FFF_FFF8;

    pub const FAT16_BAD: Self = Self(0xFFF7);
    pub const FAT16_FINAL: Self = Self(0xFFFF);
    const FAT16_RESERVED_RANGE_START: u32 = 0xFFF8;

    pub fn end_of_chain(fat_type: FatType) -> Self {
        match fat_type {
            FatType::Fat16 => Self::FAT16_FINAL,
            FatType::Fat32 => Self::FAT32_FINAL,
        }
    }

    pub fn is_free(&self) -> bool {
        *self == Self::FREE
    }

    pub fn is_bad(&self, fat_type: FatType) -> bool {
        match fat_type {
            FatType::Fat16 => *self == Self::FAT16_BAD,
            FatType::Fat32 => *self == Self::FAT32_BAD,
        }
    }

    pub fn is_final(&self, fat_type: FatType) -> bool {
        match fat_type {
            FatType::Fat16 => self.0 >= Self::FAT16_RESERVED_RANGE_START,
            FatType::Fat32 => self.0 >= Self::FAT32_RESERVED_RANGE_START,
        }
    }
}
