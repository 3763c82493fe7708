//! sdmmc-logger - Storage backends
//!
//! Where the logger's bytes end up. [`RawBlockStorage`] appends to a plain
//! block range and [`FatStorage`] appends to a file on a FAT volume. Both sit
//! on any [`BlockDevice`](crate::BlockDevice).

mod fat;
mod raw;

pub use self::fat::FatStorage;
pub use self::raw::{RawBlockStorage, RawError};

/// Somewhere to append log data.
pub trait StorageBackend {
    /// The errors this backend can return. Must be debug formattable.
    type Error: core::fmt::Debug;

    /// Bring up the device (and mount, where there is something to mount).
    fn init(&mut self) -> Result<(), Self::Error>;

    /// Make `name` the target of following writes. Existing data is kept
    /// and new data goes after it.
    fn open_append(&mut self, name: &str) -> Result<(), Self::Error>;

    /// Append `data` to the open target.
    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error>;

    /// Finish with the open target.
    fn close(&mut self) -> Result<(), Self::Error>;
}

impl<T> StorageBackend for &mut T
where
    T: StorageBackend,
{
    type Error = T::Error;

    fn init(&mut self) -> Result<(), Self::Error> {
        (*self).init()
    }

    fn open_append(&mut self, name: &str) -> Result<(), Self::Error> {
        (*self).open_append(name)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        (*self).write(data)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        (*self).close()
    }
}
