//! # sdmmc-logger
//!
//! > An SD/MMC SPI driver and buffered CSV append-log, written in Embedded Rust
//!
//! This crate is the storage half of a small environmental data logger. It
//! talks to an SD or MMC card over SPI, and appends timestamped sensor
//! readings to a CSV file on it. It is `#![no_std]` and does not use `alloc`;
//! the largest buffer it keeps is the append buffer, 256 bytes by default.
//!
//! ## Using the crate
//!
//! [`SdMmcSpi`] drives the card. It needs an SPI bus whose clock can be
//! switched between a slow and a fast rate ([`sdmmc::SpiClock`], or wrap the
//! bus in [`sdmmc::SingleSpeed`]), a chip select pin, and a millisecond
//! [`clock::Clock`] that bounds every wait.
//!
//! The driver is a [`BlockDevice`], and a [`storage::StorageBackend`] puts the
//! log on it: [`storage::FatStorage`] appends to a file on a FAT16/FAT32
//! volume, [`storage::RawBlockStorage`] appends to a plain block range. A
//! [`logger::Logger`] owns the backend and turns readings into CSV lines.
//!
//! ```rust,ignore
//! let card = SdMmcSpi::new(SingleSpeed(spi), cs, &TICKS);
//! let mut logger: Logger<_> = Logger::new(FatStorage::new(card), LoggerConfig::default());
//!
//! loop {
//!     if TOGGLE.take() {
//!         logger.toggle(&rtc.now()).ok();
//!     }
//!     if every_second.poll(&TICKS) {
//!         logger.append_line(&rtc.now(), &sensors.read()).ok();
//!     }
//!     display.show_logging(logger.is_logging());
//! }
//! ```
//!
//! ## Features
//!
//! * `defmt-log`: By turning off the default features and enabling the `defmt-log` feature you can
//! configure this crate to log messages over defmt instead.
//!
//! Make sure that either the `log` feature or the `defmt-log` feature is enabled.

#![cfg_attr(not(test), no_std)]

#[cfg(all(feature = "log", feature = "defmt-log"))]
compile_error!("Enable only one of the `log` and `defmt-log` features");

#[cfg(not(any(feature = "log", feature = "defmt-log")))]
compile_error!("Enable either the `log` or the `defmt-log` feature");

// ****************************************************************************
//
// Imports
//
// ****************************************************************************


#[macro_use]
mod structure;

pub mod block_device;
pub mod clock;
pub mod logger;
pub mod mbr;
pub mod sdmmc;
pub mod sdmmc_proto;
pub mod storage;

pub mod fat;

pub use crate::block_device::{Block, BlockCount, BlockDevice, BlockIdx, MemoryBlockDevice};
pub use crate::clock::{Clock, Periodic, TickCounter};
pub use crate::logger::{LogError, Logger, LoggerConfig, Measurement, Timestamp, ToggleRequest};
pub use crate::sdmmc::Error as SdMmcError;
pub use crate::sdmmc::SdMmcSpi;
pub use crate::storage::{FatStorage, RawBlockStorage, StorageBackend};

// ****************************************************************************
//
// End Of File
//
// ****************************************************************************
