//! Logging into a file in the root directory of a FAT16/FAT32 volume.

use crate::fat::directory::ShortName;
use crate::fat::file::AppendFile;
use crate::fat::{FatError, FatVolume};
use crate::BlockDevice;

use super::StorageBackend;

#[cfg(feature = "log")]
use log::info;

#[cfg(feature = "defmt-log")]
use defmt::info;

/// Appends to one file at a time on a FAT volume.
///
/// The directory entry is brought up to date after every write, so a card
/// pulled between writes shows every byte written so far.
pub struct FatStorage<D>
where
    D: BlockDevice,
{
    device: D,
    volume: Option<FatVolume>,
    file: Option<AppendFile>,
}

impl<D> FatStorage<D>
where
    D: BlockDevice,
{
    pub fn new(device: D) -> Self {
        Self {
            device,
            volume: None,
            file: None,
        }
    }

    pub fn device(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn release(self) -> D {
        self.device
    }

    pub fn volume(&self) -> Option<&FatVolume> {
        self.volume.as_ref()
    }

    /// Read the start of a root directory file into `buffer`. Returns the
    /// number of bytes read, or `None` if there is no such file.
    pub fn read_file(
        &mut self,
        name: &str,
        buffer: &mut [u8],
    ) -> Result<Option<usize>, FatError<D::Error>> {
        let volume = self.volume.as_ref().ok_or(FatError::NoVolume)?;
        let name = ShortName::parse(name)?;
        match volume.find_entry(&mut self.device, &name, false)? {
            Some(entry) => volume
                .read_file(&mut self.device, &entry, buffer)
                .map(Some),
            None => Ok(None),
        }
    }
}

impl<D> StorageBackend for FatStorage<D>
where
    D: BlockDevice,
{
    type Error = FatError<D::Error>;

    fn init(&mut self) -> Result<(), Self::Error> {
        self.file = None;
        self.volume = None;
        self.device.initialize().map_err(FatError::DeviceError)?;
        self.volume = Some(FatVolume::mount(&mut self.device)?);
        Ok(())
    }

    /// Open `name` in the root directory, creating it if needed. An existing
    /// file is appended to.
    fn open_append(&mut self, name: &str) -> Result<(), Self::Error> {
        let volume = self.volume.as_ref().ok_or(FatError::NoVolume)?;
        let short_name = ShortName::parse(name)?;
        let entry = volume
            .find_entry(&mut self.device, &short_name, true)?
            .ok_or(FatError::DirectoryFull)?;
        let file = AppendFile::open(volume, &mut self.device, entry)?;
        info!("Opened {:?} at {} bytes", short_name, file.size());
        self.file = Some(file);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Self::Error> {
        let volume = self.volume.as_mut().ok_or(FatError::NoVolume)?;
        let file = self.file.as_mut().ok_or(FatError::NotOpen)?;
        file.append(volume, &mut self.device, data)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        let result = match (self.file.take(), self.volume.as_ref()) {
            (Some(file), Some(volume)) => file.sync(volume, &mut self.device),
            _ => Ok(()),
        };
        self.volume = None;
        result
    }
}
