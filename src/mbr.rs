//! sdmmc-logger - Master Boot Record
//!
//! Just enough of the MBR to find a FAT partition on a card that has one.

use crate::{Block, BlockCount, BlockIdx};

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidMbrSignature,
    InvalidPartitionStatus(u8),
    UnsupportedPartitionType(u8),
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionNumber {
    One,
    Two,
    Three,
    Four,
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    Fat32ChsLba,
    Fat32Lba,
    Fat16Lba,
    Fat16,
    Unknown(u8),
}

impl PartitionType {
    /// Marker for a FAT32 partition. What Macosx disk utility (and also SD-Card formatter?)
    /// use.
    const FAT32_CHS_LBA: u8 = 0x0B;
    /// Marker for a FAT32 partition. Sometimes also use for FAT16 formatted
    /// partitions.
    const FAT32_LBA: u8 = 0x0C;
    /// Marker for a FAT16 partition with LBA. Seen on a Raspberry Pi SD card.
    const FAT16_LBA: u8 = 0x0E;
    /// Marker for a FAT16 partition. Seen on a card formatted with the official
    /// SD-Card formatter.
    const FAT16: u8 = 0x06;

    pub fn from_u8(value: u8) -> Self {
        match value {
            Self::FAT32_CHS_LBA => Self::Fat32ChsLba,
            Self::FAT32_LBA => Self::Fat32Lba,
            Self::FAT16_LBA => Self::Fat16Lba,
            Self::FAT16 => Self::Fat16,
            _ => Self::Unknown(value),
        }
    }

    pub fn is_fat(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Clone, Copy)]
pub struct Partition {
    pub ty: PartitionType,
    pub lba_start: BlockIdx,
    pub block_count: BlockCount,
}

impl Partition {
    const STATUS_IDX: usize = 0;
    const TYPE_IDX: usize = 4;
    const LBA_START_IDX: usize = 8;
    const NUM_BLOCKS_IDX: usize = 12;
    pub(crate) const PARTITION_INFO_LENGTH: usize = 16;

    pub fn from_info(info: &[u8; Self::PARTITION_INFO_LENGTH]) -> Result<Self, Error> {
        let pstatus = info[Self::STATUS_IDX];
        if pstatus != 0x80 && pstatus != 0x00 {
            return Err(Error::InvalidPartitionStatus(pstatus));
        }

        let le_u32 =
            |at: usize| u32::from_le_bytes([info[at], info[at + 1], info[at + 2], info[at + 3]]);

        Ok(Partition {
            ty: PartitionType::from_u8(info[Self::TYPE_IDX]),
            lba_start: BlockIdx(le_u32(Self::LBA_START_IDX)),
            block_count: BlockCount(le_u32(Self::NUM_BLOCKS_IDX)),
        })
    }
}

pub struct Mbr;

impl Mbr {
    const FOOTER_START: usize = 510;
    const FOOTER_VALUE: u16 = 0xAA55;
    const PARTITION1_START: usize = 446;

    /// Find a partition in an MBR block that has already been read.
    pub fn partition_from_block(
        block: &Block,
        partition_num: PartitionNumber,
    ) -> Result<Partition, Error> {
        let footer = u16::from_le_bytes([block[Self::FOOTER_START], block[Self::FOOTER_START + 1]]);
        if footer != Self::FOOTER_VALUE {
            return Err(Error::InvalidMbrSignature);
        }

        let index = match partition_num {
            PartitionNumber::One => 0,
            PartitionNumber::Two => 1,
            PartitionNumber::Three => 2,
            PartitionNumber::Four => 3,
        };
        let pinfo_start = Self::PARTITION1_START + index * Partition::PARTITION_INFO_LENGTH;

        let mut info = [0u8; Partition::PARTITION_INFO_LENGTH];
        info.copy_from_slice(&block[pinfo_start..pinfo_start + Partition::PARTITION_INFO_LENGTH]);
        Partition::from_info(&info)
    }
}
