//! sdmmc-logger - Constants and structures from the SD Specifications

//==============================================================================

// SD Card Commands

/// Marks a command index as an application-specific command, which must be
/// preceded by APP_CMD in the same transaction.
pub const ACMD_FLAG: u8 = 0x80;

/// GO_IDLE_STATE - init card in spi mode if CS low
pub const CMD0: u8 = 0x00;
/// SEND_OP_COND - initiate initialization process (MMC)
pub const CMD1: u8 = 0x01;
/// SEND_IF_COND - verify SD Memory Card interface operating condition.
pub const CMD8: u8 = 0x08;
/// SEND_CSD - read the Card Specific Data (CSD register)
pub const CMD9: u8 = 0x09;
/// STOP_TRANSMISSION - end multiple block read sequence
pub const CMD12: u8 = 0x0C;
/// SET_BLOCKLEN - set the block length used by byte-addressed cards
pub const CMD16: u8 = 0x10;
/// READ_SINGLE_BLOCK - read a single data block from the card
pub const CMD17: u8 = 0x11;
/// WRITE_BLOCK - write a single data block to the card
pub const CMD24: u8 = 0x18;
/// APP_CMD - escape for application specific command
pub const CMD55: u8 = 0x37;
/// READ_OCR - read the OCR register of a card
pub const CMD58: u8 = 0x3A;
/// SD_SEND_OP_COMD - Sends host capacity support information and activates
/// the card's initialization process
pub const ACMD41: u8 = ACMD_FLAG | 0x29;

//==============================================================================

/// Argument for SEND_IF_COND: 2.7-3.6V supply, check pattern 0xAA
pub const IF_COND_ARG: u32 = 0x0000_01AA;

/// Host Capacity Support bit for ACMD41
pub const OCR_HCS: u32 = 1 << 30;

/// Card Capacity Status bit, in the first OCR byte returned by READ_OCR
pub const OCR_CCS: u8 = 0x40;

/// Checksum that GO_IDLE_STATE(0) needs, since CRC checking is still on
pub const CRC_CMD0: u8 = 0x95;

/// Checksum that SEND_IF_COND(0x1AA) needs, since CRC checking is still on
pub const CRC_CMD8: u8 = 0x87;

/// Dummy CRC with the stop bit set, for every command sent once CRC
/// checking is off
pub const CRC_FILLER: u8 = 0x01;

/// How many bytes we clock while waiting for an R1 response
pub const RESPONSE_POLLS: usize = 10;

//==============================================================================

/// status for card in the ready state
pub const R1_READY_STATE: u8 = 0x00;

/// status for card in the idle state
pub const R1_IDLE_STATE: u8 = 0x01;

/// start data token for read or write single block
pub const DATA_START_BLOCK: u8 = 0xFE;

/// mask for data response tokens after a write block operation
pub const DATA_RES_MASK: u8 = 0x1F;

/// write data accepted token
pub const DATA_RES_ACCEPTED: u8 = 0x05;

/// The card drives the line high when it has nothing to say
pub const IDLE_BYTE: u8 = 0xFF;

bitflags::bitflags! {
    /// The flags carried by a valid R1 response.
    pub struct R1Status: u8 {
        const IDLE = 1 << 0;
        const ERASE_RESET = 1 << 1;
        const ILLEGAL_COMMAND = 1 << 2;
        const CRC_ERROR = 1 << 3;
        const ERASE_SEQUENCE_ERROR = 1 << 4;
        const ADDRESS_ERROR = 1 << 5;
        const PARAMETER_ERROR = 1 << 6;
    }
}

impl R1Status {
    /// Decode a raw response byte. Returns `None` if bit 7 is set, which
    /// means the card never answered.
    pub fn from_response(response: u8) -> Option<R1Status> {
        if is_valid_response(response) {
            Some(R1Status::from_bits_truncate(response))
        } else {
            None
        }
    }
}

/// An R1 response is valid iff its top bit is clear.
pub fn is_valid_response(response: u8) -> bool {
    (response & 0x80) == 0
}

/// The checksum byte sent with a command.
///
/// Only GO_IDLE_STATE and SEND_IF_COND go out before the card leaves CRC
/// mode, so only they need a real CRC7.
pub fn command_checksum(index: u8, arg: u32) -> u8 {
    match (index & !ACMD_FLAG, arg) {
        (CMD0, _) => CRC_CMD0,
        (CMD8, IF_COND_ARG) => CRC_CMD8,
        _ => CRC_FILLER,
    }
}

/// A six byte command packet.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Command index, without the ACMD flag
    pub index: u8,
    /// 32-bit argument
    pub argument: u32,
    /// Trailing CRC7 + stop bit
    pub checksum: u8,
}

impl CommandFrame {
    /// Build the frame for a command, picking the right checksum.
    pub fn new(index: u8, argument: u32) -> CommandFrame {
        let index = index & !ACMD_FLAG;
        CommandFrame {
            index,
            argument,
            checksum: command_checksum(index, argument),
        }
    }

    /// The bytes as they go on the wire.
    pub fn to_bytes(&self) -> [u8; 6] {
        let arg = self.argument.to_be_bytes();
        [
            0x40 | self.index,
            arg[0],
            arg[1],
            arg[2],
            arg[3],
            self.checksum,
        ]
    }
}

//==============================================================================

/// Card Specific Data, version 1
#[derive(Default)]
pub struct CsdV1 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data, version 2
#[derive(Default)]
pub struct CsdV2 {
    /// The 16-bytes of data in this Card Specific Data block
    pub data: [u8; 16],
}

/// Card Specific Data
pub enum Csd {
    /// A version 1 CSD
    V1(CsdV1),
    /// A version 2 CSD
    V2(CsdV2),
}

impl Csd {
    /// Pick the layout from the CSD_STRUCTURE bits.
    pub fn from_bytes(data: [u8; 16]) -> Csd {
        if (data[0] >> 6) == 0 {
            Csd::V1(CsdV1 { data })
        } else {
            Csd::V2(CsdV2 { data })
        }
    }

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        match self {
            Csd::V1(contents) => contents.card_capacity_bytes(),
            Csd::V2(contents) => contents.card_capacity_bytes(),
        }
    }

    /// Can this card erase single blocks?
    pub fn erase_single_block_enabled(&self) -> bool {
        match self {
            Csd::V1(contents) => contents.erase_single_block_enabled(),
            Csd::V2(contents) => contents.erase_single_block_enabled(),
        }
    }
}

impl CsdV1 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(6, 0, 2), (7, 0, 8), (8, 6, 2)]);
    define_field!(device_size_multiplier, u8, [(9, 0, 2), (10, 7, 1)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        let multiplier = self.device_size_multiplier() + self.read_block_length() + 2;
        (u64::from(self.device_size()) + 1) << multiplier
    }
}

impl CsdV2 {
    fn data(&self) -> &[u8] {
        &self.data
    }

    define_field!(csd_ver, u8, 0, 6, 2);
    define_field!(read_block_length, u8, 5, 0, 4);
    define_field!(device_size, u32, [(7, 0, 6), (8, 0, 8), (9, 0, 8)]);
    define_field!(erase_single_block_enabled, bool, 10, 6);

    /// Returns the card capacity in bytes
    pub fn card_capacity_bytes(&self) -> u64 {
        (u64::from(self.device_size()) + 1) * 512 * 1024
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
