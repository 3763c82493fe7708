use core::num::{NonZeroU16, NonZeroU32, NonZeroU8};

use crate::{Block, BlockCount};

use super::FatType;

/// The validated BIOS Parameter Block of a FAT16 or FAT32 volume.
#[derive(Debug, Clone)]
pub struct BiosParameterBlock {
    fat_type: FatType,
    fat_size: u32,
    reserved_sector_count: NonZeroU16,
    sectors_per_cluster: NonZeroU8,
    num_fats: NonZeroU8,
    root_entry_count: u16,
    total_sector_count: NonZeroU32,
    cluster_count: u32,
    raw: BiosParameterBlockRaw,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BpbError {
    Fat12NotSupported,
    InvalidMedia(u8),
    BothSectorCountsZero,
    BothSectorCountsNotZero,
    RootEntryCountSize,
    Fat32(Fat32BpbError),
    InvalidBytesPerSector(u16),
    InvalidSectorsPerCluster(u8),
    ReservedSectorCountZero,
    NoFats,
    /// The FATs and root directory don't fit in the volume
    TooSmall,
    InvalidSignature([u8; 2]),
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Fat32BpbError {
    Count16NotZero,
    FatSize16NotZero,
    RootEntryCountNotZero,
    FsVerNotZero,
    RootClusterLessThanTwo,
}

/// The BPB_Reserved and BS_* fields are not verified.
impl BiosParameterBlock {
    const SIGNATURE: [u8; 2] = [0x55, 0xAA];

    /// Size of one directory entry
    pub const DIR_ENTRY_LEN: u32 = 32;

    pub fn new(block: Block) -> Result<Self, BpbError> {
        let raw = BiosParameterBlockRaw { block };

        let signature = raw.signature_word();
        if signature != Self::SIGNATURE {
            return Err(BpbError::InvalidSignature(signature));
        }

        // Only 512 byte sectors, the same size as our blocks.
        if raw.bytes_per_sec() != Block::LEN as u16 {
            return Err(BpbError::InvalidBytesPerSector(raw.bytes_per_sec()));
        }

        let reserved_sector_count =
            NonZeroU16::new(raw.rsvd_sec_cnt()).ok_or(BpbError::ReservedSectorCountZero)?;
        let sectors_per_cluster = Self::sectors_per_cluster_checked(raw.sec_per_clu())?;
        let num_fats = NonZeroU8::new(raw.num_fats()).ok_or(BpbError::NoFats)?;
        Self::media_checked(raw.media())?;

        let fat_size = if raw.fat_sz_16() == 0 {
            raw.fat_sz_32()
        } else {
            u32::from(raw.fat_sz_16())
        };

        let root_entry_count = raw.root_entr_cnt();
        let total_sector_count = Self::total_sector_count_checked(&raw)?;

        let root_dir_sectors = Self::compute_root_dir_sectors(u32::from(root_entry_count));
        let data_sectors = total_sector_count
            .get()
            .checked_sub(
                u32::from(reserved_sector_count.get())
                    + u32::from(num_fats.get()) * fat_size
                    + root_dir_sectors,
            )
            .ok_or(BpbError::TooSmall)?;
        let cluster_count = data_sectors / u32::from(sectors_per_cluster.get());

        let fat_type = Self::compute_fat_type(cluster_count)?;

        let me = Self {
            fat_type,
            fat_size,
            reserved_sector_count,
            sectors_per_cluster,
            num_fats,
            root_entry_count,
            total_sector_count,
            cluster_count,
            raw,
        };

        match me
            .verify_root_entry_count()
            .or_else(|| me.verify_total_sector_count())
            .or_else(|| me.verify_fat_size())
            .or_else(|| me.verify_fs_version())
        {
            Some(err) => Err(err),
            None => Ok(me),
        }
    }

    pub fn fat_type(&self) -> FatType {
        self.fat_type
    }

    pub fn reserved_sector_count(&self) -> BlockCount {
        BlockCount(u32::from(self.reserved_sector_count.get()))
    }

    /// Blocks in one copy of the FAT
    pub fn fat_size(&self) -> BlockCount {
        BlockCount(self.fat_size)
    }

    pub fn num_fats(&self) -> u8 {
        self.num_fats.get()
    }

    pub fn sectors_per_cluster(&self) -> BlockCount {
        BlockCount(u32::from(self.sectors_per_cluster.get()))
    }

    pub fn bytes_per_cluster(&self) -> u32 {
        u32::from(self.sectors_per_cluster.get()) * Block::LEN_U32
    }

    pub fn root_entry_count(&self) -> u16 {
        self.root_entry_count
    }

    pub fn total_sector_count(&self) -> BlockCount {
        BlockCount(self.total_sector_count.get())
    }

    pub fn compute_root_dir_sectors(root_entry_count: u32) -> u32 {
        (root_entry_count * Self::DIR_ENTRY_LEN + (Block::LEN_U32 - 1)) / Block::LEN_U32
    }

    /// Blocks taken by the fixed FAT16 root directory. Zero on FAT32.
    pub fn root_dir_sectors(&self) -> BlockCount {
        BlockCount(Self::compute_root_dir_sectors(u32::from(
            self.root_entry_count,
        )))
    }

    /// Offset of the first root directory block from the volume start.
    pub fn root_dir_start(&self) -> BlockCount {
        self.reserved_sector_count() + BlockCount(u32::from(self.num_fats()) * self.fat_size)
    }

    /// Offset of the first data block (cluster 2) from the volume start.
    pub fn data_start(&self) -> BlockCount {
        self.root_dir_start() + self.root_dir_sectors()
    }

    pub fn cluster_count(&self) -> u32 {
        self.cluster_count
    }

    pub fn maximum_valid_cluster(&self) -> u32 {
        self.cluster_count + 1
    }

    /// The first cluster of the FAT32 root directory.
    pub fn root_cluster(&self) -> Result<u32, BpbError> {
        let value = self.raw.root_clus();
        if value >= 2 {
            Ok(value)
        } else {
            Err(BpbError::Fat32(Fat32BpbError::RootClusterLessThanTwo))
        }
    }

    fn compute_fat_type(cluster_count: u32) -> Result<FatType, BpbError> {
        if cluster_count < 4085 {
            Err(BpbError::Fat12NotSupported)
        } else if cluster_count < 65525 {
            Ok(FatType::Fat16)
        } else {
            Ok(FatType::Fat32)
        }
    }

    fn sectors_per_cluster_checked(sectors_per_cluster: u8) -> Result<NonZeroU8, BpbError> {
        match sectors_per_cluster {
            1 | 2 | 4 | 8 | 16 | 32 | 64 | 128 => NonZeroU8::new(sectors_per_cluster)
                .ok_or(BpbError::InvalidSectorsPerCluster(sectors_per_cluster)),
            _ => Err(BpbError::InvalidSectorsPerCluster(sectors_per_cluster)),
        }
    }

    fn total_sector_count_checked(raw: &BiosParameterBlockRaw) -> Result<NonZeroU32, BpbError> {
        let sec_16 = NonZeroU32::new(u32::from(raw.tot_sec_16()));
        let sec_32 = NonZeroU32::new(raw.tot_sec_32());
        match (sec_16, sec_32) {
            (Some(count), None) | (None, Some(count)) => Ok(count),
            (Some(_), Some(_)) => Err(BpbError::BothSectorCountsNotZero),
            (None, None) => Err(BpbError::BothSectorCountsZero),
        }
    }

    fn media_checked(media: u8) -> Result<(), BpbError> {
        match media {
            0xF0 | 0xF8..=0xFF => Ok(()),
            _ => Err(BpbError::InvalidMedia(media)),
        }
    }

    fn verify_total_sector_count(&self) -> Option<BpbError> {
        match self.fat_type {
            FatType::Fat32 if self.raw.tot_sec_16() != 0 => {
                Some(BpbError::Fat32(Fat32BpbError::Count16NotZero))
            }
            _ => None,
        }
    }

    fn verify_root_entry_count(&self) -> Option<BpbError> {
        let value = u32::from(self.root_entry_count);
        match self.fat_type {
            FatType::Fat16 => {
                if value != 0 && (value * Self::DIR_ENTRY_LEN) % Block::LEN_U32 == 0 {
                    None
                } else {
                    Some(BpbError::RootEntryCountSize)
                }
            }
            FatType::Fat32 => {
                if value != 0 {
                    Some(BpbError::Fat32(Fat32BpbError::RootEntryCountNotZero))
                } else {
                    None
                }
            }
        }
    }

    fn verify_fat_size(&self) -> Option<BpbError> {
        match self.fat_type {
            FatType::Fat32 if self.raw.fat_sz_16() != 0 => {
                Some(BpbError::Fat32(Fat32BpbError::FatSize16NotZero))
            }
            _ => None,
        }
    }

    fn verify_fs_version(&self) -> Option<BpbError> {
        match self.fat_type {
            FatType::Fat32 if self.raw.fs_ver() != 0 => {
                Some(BpbError::Fat32(Fat32BpbError::FsVerNotZero))
            }
            FatType::Fat32 => self.root_cluster().err(),
            FatType::Fat16 => None,
        }
    }
}

#[derive(Debug, Clone)]
struct BiosParameterBlockRaw {
    block: Block,
}

impl BiosParameterBlockRaw {
    fn data(&self) -> &[u8] {
        &self.block.contents
    }

    define_field!(bytes_per_sec, u16, 11);
    define_field!(sec_per_clu, u8, 13);
    define_field!(rsvd_sec_cnt, u16, 14);
    define_field!(num_fats, u8, 16);
    define_field!(root_entr_cnt, u16, 17);
    define_field!(tot_sec_16, u16, 19);
    define_field!(media, u8, 21);
    define_field!(fat_sz_16, u16, 22);
    define_field!(tot_sec_32, u32, 32);

    // FAT32 specific structure
    define_field!(fat_sz_32, u32, 36);
    define_field!(fs_ver, u16, 42);
    define_field!(root_clus, u32, 44);

    fn signature_word(&self) -> [u8; 2] {
        let d = self.data();
        [d[510], d[511]]
    }
}
