//! sdmmc-logger - SDMMC Protocol
//!
//! Implements the SD/MMC protocol on some generic SPI interface.
//!
//! Only single-block transfers are used. Reads can pick any byte range out
//! of a block, and writes are streamed into an open block, which keeps the
//! RAM needed by callers well below one block.

mod busy;
use busy::Transaction;

use super::block_device::{Block, BlockCount, BlockDevice, BlockIdx, WritePhase};
use super::clock::{Clock, Deadline};
use super::sdmmc_proto::*;

use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

#[cfg(feature = "log")]
use log::{debug, trace, warn};

#[cfg(feature = "defmt-log")]
use defmt::{debug, trace, warn};

/// The clock rates the link runs at.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LinkSpeed {
    /// 100-400 kHz, required until the card is initialised
    Slow,
    /// As fast as the board allows
    Fast,
}

/// An SPI bus whose clock rate can be switched.
///
/// Cards must be initialised with a slow clock. Wrap a bus that cannot
/// change speed in [`SingleSpeed`].
pub trait SpiClock {
    /// Returned when the rate can't be changed
    type SpeedError;

    /// Switch the bus to the given speed tier.
    fn set_speed(&mut self, speed: LinkSpeed) -> Result<(), Self::SpeedError>;
}

/// An SPI bus left at whatever speed it was configured with.
pub struct SingleSpeed<SPI>(pub SPI);

impl<SPI> Transfer<u8> for SingleSpeed<SPI>
where
    SPI: Transfer<u8>,
{
    type Error = SPI::Error;

    fn transfer<'w>(&mut self, words: &'w mut [u8]) -> Result<&'w [u8], SPI::Error> {
        self.0.transfer(words)
    }
}

impl<SPI> SpiClock for SingleSpeed<SPI> {
    type SpeedError = core::convert::Infallible;

    fn set_speed(&mut self, _speed: LinkSpeed) -> Result<(), core::convert::Infallible> {
        Ok(())
    }
}

/// The possible errors `SdMmcSpi` can generate.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Error {
    /// We got an error from the SPI peripheral
    Transport,
    /// Couldn't set a GPIO pin
    GpioError,
    /// The card never entered the idle state
    CardNotFound,
    /// The card did not echo the voltage range and check pattern
    VoltageRangeRejected,
    /// The card did not leave the idle state in time
    InitTimeout,
    /// READ_OCR got this response
    OcrReadFailed(u8),
    /// SET_BLOCKLEN got this response
    BlockLengthRejected(u8),
    /// A command got a non-zero response (command, response)
    CommandRejected(u8, u8),
    /// No data token arrived in time
    DataTokenTimeout,
    /// We expected a data token and got this byte
    ReadError(u8),
    /// The card did not accept a data block. Holds the data response.
    WriteRejected(u8),
    /// The card stayed busy after a write
    BusyTimeout,
    /// We failed to read the Card Specific Data register
    RegisterReadError,
    /// The card has not been (successfully) initialised
    NotInitialized,
    /// Can't perform this operation with the card in this state
    BadState,
    /// Offset, count or buffer don't fit a block
    InvalidArgument,
    /// The block's byte address doesn't fit in 32 bits
    AddressOverflow,
}

/// The different types of card we support.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CardClass {
    /// MultiMediaCard
    Mmc,
    /// SD version 1.x
    Sd1,
    /// SD version 2 or later
    Sd2,
}

/// How a card expects block addresses in read and write commands.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// Arguments are byte offsets (standard capacity cards)
    Byte,
    /// Arguments are block numbers (SDHC/SDXC)
    Block,
}

/// What initialisation found out about the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CardContext {
    /// The type of card
    pub class: CardClass,
    /// How it is addressed
    pub addressing: Addressing,
    /// The speed tier the link was left at
    pub speed: LinkSpeed,
}

/// SEND_OP_COND polls allowed when the clock does not move
pub const DEFAULT_INIT_POLLS: u32 = 32_000;

/// Byte polls allowed when the clock does not move; well over 500 ms at 50 MHz
pub const DEFAULT_WAIT_POLLS: u32 = 4_000_000;

/// Options for acquiring the card.
#[cfg_attr(feature = "defmt-log", derive(defmt::Format))]
#[derive(Debug, Copy, Clone)]
pub struct AcquireOpts {
    /// How many times GO_IDLE_STATE is sent before giving up
    pub acquire_retries: u8,
    /// Bound on leaving the idle state, in ms
    pub init_timeout_ms: u32,
    /// Bound on waiting for a data token, in ms
    pub read_timeout_ms: u32,
    /// Bound on the busy period after a block write, in ms
    pub write_timeout_ms: u32,
    /// Most SEND_OP_COND polls while leaving the idle state
    pub init_polls: u32,
    /// Most bytes clocked while waiting for a data token or for busy to end
    pub wait_polls: u32,
}

impl Default for AcquireOpts {
    fn default() -> Self {
        AcquireOpts {
            acquire_retries: 4,
            init_timeout_ms: 1000,
            read_timeout_ms: 200,
            write_timeout_ms: 500,
            init_polls: DEFAULT_INIT_POLLS,
            wait_polls: DEFAULT_WAIT_POLLS,
        }
    }
}

/// An SD/MMC card on an SPI bus.
///
/// Built from an SPI peripheral, a Chip Select pin and a millisecond clock.
/// We need Chip Select to be separate so we can clock out some bytes without
/// Chip Select asserted (which puts the card into SPI mode).
pub struct SdMmcSpi<SPI, CS, CLK>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    CLK: Clock,
{
    spi: SPI,
    cs: CS,
    clock: CLK,
    options: AcquireOpts,
    card: Option<CardContext>,
    pending_write: Option<usize>,
}

impl<SPI, CS, CLK> SdMmcSpi<SPI, CS, CLK>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    CLK: Clock,
{
    /// Create a new SD/MMC controller using a raw SPI interface.
    pub fn new(spi: SPI, cs: CS, clock: CLK) -> Self {
        Self::new_with_opts(spi, cs, clock, AcquireOpts::default())
    }

    /// Create a new SD/MMC controller with non-default timeouts.
    pub fn new_with_opts(spi: SPI, cs: CS, clock: CLK, options: AcquireOpts) -> Self {
        SdMmcSpi {
            spi,
            cs,
            clock,
            options,
            card: None,
            pending_write: None,
        }
    }

    /// Give back the hardware.
    pub fn free(self) -> (SPI, CS, CLK) {
        (self.spi, self.cs, self.clock)
    }

    /// What we know about the card, if it is initialised.
    pub fn card_context(&self) -> Result<CardContext, Error> {
        self.card.ok_or(Error::NotInitialized)
    }

    /// Initializes the card into a known state.
    ///
    /// Any earlier card state is forgotten first, so on failure the card
    /// stays unusable until this succeeds.
    pub fn acquire(&mut self) -> Result<CardContext, Error> {
        debug!("acquiring card with opts: {:?}", self.options);
        self.card = None;
        self.pending_write = None;
        match self.run_init() {
            Ok(context) => {
                debug!("Card ready: {:?}", context);
                self.card = Some(context);
                Ok(context)
            }
            Err(e) => {
                warn!("Card init failed: {:?}", e);
                Err(e)
            }
        }
    }

    /// Mark the card as unused. Calls other than `acquire` will fail until
    /// it is initialised again.
    pub fn deinit(&mut self) {
        self.card = None;
        self.pending_write = None;
        self.cs.set_high().ok();
    }

    fn discard_byte(&mut self) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [IDLE_BYTE])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    fn run_init(&mut self) -> Result<CardContext, Error> {
        trace!("Reset card..");
        self.spi
            .set_speed(LinkSpeed::Slow)
            .map_err(|_| Error::Transport)?;

        // Supply minimum of 74 clock cycles without CS asserted.
        self.cs.set_high().map_err(|_| Error::GpioError)?;
        for _ in 0..10 {
            self.discard_byte()?;
        }

        let options = self.options;
        let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;

        // Enter SPI mode
        let mut attempts = 0;
        loop {
            let r = tx.card_command(CMD0, 0)?;
            if r == R1_IDLE_STATE {
                break;
            }
            attempts += 1;
            if attempts >= options.acquire_retries.max(1) {
                return Err(Error::CardNotFound);
            }
            warn!("Got response: {:x}, trying again..", r);
        }

        let (class, addressing) = if tx.card_command(CMD8, IF_COND_ARG)? == R1_IDLE_STATE {
            init_v2(&mut tx, &options)?
        } else {
            init_legacy(&mut tx, &options)?
        };
        drop(tx);

        self.spi
            .set_speed(LinkSpeed::Fast)
            .map_err(|_| Error::Transport)?;
        Ok(CardContext {
            class,
            addressing,
            speed: LinkSpeed::Fast,
        })
    }

    /// Send one command in its own transaction and return the R1 response.
    pub fn command(&mut self, index: u8, arg: u32) -> Result<u8, Error> {
        if self.pending_write.is_some() {
            return Err(Error::BadState);
        }
        let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;
        tx.card_command(index, arg)
    }

    /// The argument for a read or write of `block_idx`.
    fn card_address(card: CardContext, block_idx: BlockIdx) -> Result<u32, Error> {
        match card.addressing {
            Addressing::Block => Ok(block_idx.0),
            Addressing::Byte => block_idx
                .0
                .checked_mul(Block::LEN_U32)
                .ok_or(Error::AddressOverflow),
        }
    }

    /// Read `count` bytes from `offset` within a block.
    ///
    /// With no buffer the bytes are clocked through and dropped, which lets
    /// a caller probe a single byte of a block cheaply.
    pub fn partial_read(
        &mut self,
        buffer: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Error> {
        let card = self.card_context()?;
        if self.pending_write.is_some() {
            return Err(Error::BadState);
        }
        let end = offset.checked_add(count).ok_or(Error::InvalidArgument)?;
        if count == 0 || end > Block::LEN {
            return Err(Error::InvalidArgument);
        }
        if let Some(b) = &buffer {
            if b.len() < count {
                return Err(Error::InvalidArgument);
            }
        }
        let address = Self::card_address(card, block_idx)?;
        let timeout = self.options.read_timeout_ms;
        let polls = self.options.wait_polls;

        let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;
        let r = tx.card_command(CMD17, address)?;
        if r != R1_READY_STATE {
            return Err(Error::CommandRejected(CMD17, r));
        }
        let token = tx.wait_token(timeout, polls)?;
        if token != DATA_START_BLOCK {
            return Err(Error::ReadError(token));
        }
        tx.skip(offset)?;
        match buffer {
            Some(b) => tx.receive_into(&mut b[..count])?,
            None => tx.skip(count)?,
        }
        // rest of the block plus the CRC
        tx.skip(Block::LEN - end + 2)?;
        Ok(())
    }

    /// One phase of a single-block write.
    ///
    /// The card must see one `Open`, then `Stream`s adding up to 512 bytes,
    /// then one `Finalize`. Chip select stays asserted in between, so the
    /// bus must not be used for anything else until the write is finalised.
    pub fn partial_write(&mut self, phase: WritePhase<'_>) -> Result<usize, Error> {
        let card = self.card_context()?;
        match phase {
            WritePhase::Open(block_idx) => {
                if self.pending_write.is_some() {
                    return Err(Error::BadState);
                }
                let address = Self::card_address(card, block_idx)?;
                let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;
                let r = tx.card_command(CMD24, address)?;
                if r != R1_READY_STATE {
                    return Err(Error::CommandRejected(CMD24, r));
                }
                tx.send(IDLE_BYTE)?;
                tx.send(DATA_START_BLOCK)?;
                tx.keep_selected();
                self.pending_write = Some(Block::LEN);
                Ok(0)
            }
            WritePhase::Stream(data) => {
                let pending = self.pending_write.ok_or(Error::BadState)?;
                let count = data.len().min(pending);
                let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;
                match data[..count].iter().try_for_each(|b| tx.send(*b)) {
                    Ok(()) => {
                        tx.keep_selected();
                        self.pending_write = Some(pending - count);
                        Ok(count)
                    }
                    Err(e) => {
                        self.pending_write = None;
                        Err(e)
                    }
                }
            }
            WritePhase::Finalize => {
                let pending = self.pending_write.take().ok_or(Error::BadState)?;
                let timeout = self.options.write_timeout_ms;
                let polls = self.options.wait_polls;
                let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;
                // pad the block, then two CRC bytes
                for _ in 0..pending + 2 {
                    tx.send(0x00)?;
                }
                let response = tx.receive()?;
                if (response & DATA_RES_MASK) != DATA_RES_ACCEPTED {
                    return Err(Error::WriteRejected(response));
                }
                tx.wait_not_busy(timeout, polls)?;
                Ok(0)
            }
        }
    }

    /// Read the 'card specific data' block.
    pub fn read_csd(&mut self) -> Result<Csd, Error> {
        self.card_context()?;
        if self.pending_write.is_some() {
            return Err(Error::BadState);
        }
        let timeout = self.options.read_timeout_ms;
        let polls = self.options.wait_polls;
        let mut tx = Transaction::new(&mut self.spi, &mut self.cs, &self.clock)?;
        if tx.card_command(CMD9, 0)? != R1_READY_STATE {
            return Err(Error::RegisterReadError);
        }
        if tx.wait_token(timeout, polls)? != DATA_START_BLOCK {
            return Err(Error::RegisterReadError);
        }
        let mut data = [0u8; 16];
        tx.receive_into(&mut data)?;
        tx.skip(2)?;
        Ok(Csd::from_bytes(data))
    }

    /// Return the usable size of this SD card in bytes.
    pub fn card_size_bytes(&mut self) -> Result<u64, Error> {
        Ok(self.read_csd()?.card_capacity_bytes())
    }

    /// Can this card erase single blocks?
    pub fn erase_single_block_enabled(&mut self) -> Result<bool, Error> {
        Ok(self.read_csd()?.erase_single_block_enabled())
    }
}

/// SD version 2 cards: check the echo, then wait for ready and ask the OCR
/// how the card is addressed.
fn init_v2<SPI, CS, CLK>(
    tx: &mut Transaction<'_, SPI, CS, CLK>,
    options: &AcquireOpts,
) -> Result<(CardClass, Addressing), Error>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    CLK: Clock,
{
    let mut echo = [0u8; 4];
    tx.receive_into(&mut echo)?;
    if echo[2] != 0x01 || echo[3] != 0xAA {
        return Err(Error::VoltageRangeRejected);
    }

    let mut deadline = Deadline::start(tx.clock(), options.init_timeout_ms, options.init_polls);
    while tx.card_command(ACMD41, OCR_HCS)? != R1_READY_STATE {
        deadline.check(tx.clock(), Error::InitTimeout)?;
    }

    let r = tx.card_command(CMD58, 0)?;
    if r != R1_READY_STATE {
        return Err(Error::OcrReadFailed(r));
    }
    let mut ocr = [0u8; 4];
    tx.receive_into(&mut ocr)?;
    let addressing = if (ocr[0] & OCR_CCS) != 0 {
        Addressing::Block
    } else {
        Addressing::Byte
    };
    Ok((CardClass::Sd2, addressing))
}

/// SD version 1 and MMC: find which SEND_OP_COND the card understands, wait
/// for ready, then fix the block length.
fn init_legacy<SPI, CS, CLK>(
    tx: &mut Transaction<'_, SPI, CS, CLK>,
    options: &AcquireOpts,
) -> Result<(CardClass, Addressing), Error>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    CLK: Clock,
{
    let (class, op_cond) = if tx.card_command(ACMD41, 0)? <= R1_IDLE_STATE {
        (CardClass::Sd1, ACMD41)
    } else {
        (CardClass::Mmc, CMD1)
    };
    debug!("Legacy card: {:?}", class);

    let mut deadline = Deadline::start(tx.clock(), options.init_timeout_ms, options.init_polls);
    while tx.card_command(op_cond, 0)? != R1_READY_STATE {
        deadline.check(tx.clock(), Error::InitTimeout)?;
    }

    let r = tx.card_command(CMD16, Block::LEN_U32)?;
    if r != R1_READY_STATE {
        return Err(Error::BlockLengthRejected(r));
    }
    Ok((class, Addressing::Byte))
}

impl<SPI, CS, CLK> BlockDevice for SdMmcSpi<SPI, CS, CLK>
where
    SPI: Transfer<u8> + SpiClock,
    CS: OutputPin,
    CLK: Clock,
{
    type Error = Error;

    fn initialize(&mut self) -> Result<(), Self::Error> {
        self.acquire().map(|_| ())
    }

    fn read_partial(
        &mut self,
        buffer: Option<&mut [u8]>,
        block_idx: BlockIdx,
        offset: usize,
        count: usize,
    ) -> Result<(), Self::Error> {
        self.partial_read(buffer, block_idx, offset, count)
    }

    fn write_partial(&mut self, phase: WritePhase<'_>) -> Result<usize, Self::Error> {
        self.partial_write(phase)
    }

    /// Determine how many blocks this device can hold.
    fn num_blocks(&mut self) -> Result<BlockCount, Self::Error> {
        let num_bytes = self.card_size_bytes()?;
        let num_blocks = (num_bytes / Block::LEN as u64) as u32;
        Ok(BlockCount(num_blocks))
    }
}

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
