use embedded_hal::{blocking::spi::Transfer, digital::v2::OutputPin};

use crate::clock::{Clock, Deadline};
use crate::sdmmc_proto::*;

use super::Error;

#[cfg(feature = "log")]
use log::trace;

#[cfg(feature = "defmt-log")]
use defmt::trace;

/// A struct used to ensure that communication only occurs
/// when CS is low.
///
/// Dropping it deselects the card and clocks one more byte so the card
/// releases the data line. A write that spans several calls asks to stay
/// selected with [`Transaction::keep_selected`].
pub struct Transaction<'a, SPI, CS, CLK>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    CLK: Clock,
{
    spi: &'a mut SPI,
    cs: &'a mut CS,
    clock: &'a CLK,
    keep_selected: bool,
}

impl<'a, SPI, CS, CLK> Drop for Transaction<'a, SPI, CS, CLK>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    CLK: Clock,
{
    fn drop(&mut self) {
        if !self.keep_selected {
            self.cs_high().ok();
            self.receive().ok();
        }
    }
}

impl<'a, SPI, CS, CLK> Transaction<'a, SPI, CS, CLK>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    CLK: Clock,
{
    pub fn new(spi: &'a mut SPI, cs: &'a mut CS, clock: &'a CLK) -> Result<Self, Error> {
        let mut me = Self {
            spi,
            cs,
            clock,
            keep_selected: false,
        };
        me.cs_low()?;
        Ok(me)
    }

    /// Leave chip select asserted when this transaction ends.
    pub fn keep_selected(&mut self) {
        self.keep_selected = true;
    }

    pub fn clock(&self) -> &'a CLK {
        self.clock
    }

    fn cs_high(&mut self) -> Result<(), Error> {
        self.cs.set_high().map_err(|_| Error::GpioError)
    }

    fn cs_low(&mut self) -> Result<(), Error> {
        self.cs.set_low().map_err(|_| Error::GpioError)
    }

    /// Send one byte and receive one byte.
    fn transfer(&mut self, out: u8) -> Result<u8, Error> {
        self.spi
            .transfer(&mut [out])
            .map(|b| b[0])
            .map_err(|_e| Error::Transport)
    }

    /// Receive a byte from the SD card by clocking in an 0xFF byte.
    pub fn receive(&mut self) -> Result<u8, Error> {
        self.transfer(IDLE_BYTE)
    }

    /// Send a byte to the SD card.
    pub fn send(&mut self, out: u8) -> Result<(), Error> {
        let _ = self.transfer(out)?;
        Ok(())
    }

    /// Fill `buffer` with bytes from the card.
    pub fn receive_into(&mut self, buffer: &mut [u8]) -> Result<(), Error> {
        for b in buffer.iter_mut() {
            *b = self.receive()?;
        }
        Ok(())
    }

    /// Clock `count` bytes in and throw them away.
    pub fn skip(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.receive()?;
        }
        Ok(())
    }

    /// Spin until the card sends something other than 0xFF. Returns that
    /// byte, which should be a data token.
    pub fn wait_token(&mut self, timeout_ms: u32, max_polls: u32) -> Result<u8, Error> {
        let mut deadline = Deadline::start(self.clock, timeout_ms, max_polls);
        loop {
            let s = self.receive()?;
            if s != IDLE_BYTE {
                return Ok(s);
            }
            deadline.check(self.clock, Error::DataTokenTimeout)?;
        }
    }

    /// Spin until the card returns 0xFF, or the deadline passes.
    pub fn wait_not_busy(&mut self, timeout_ms: u32, max_polls: u32) -> Result<(), Error> {
        let mut deadline = Deadline::start(self.clock, timeout_ms, max_polls);
        loop {
            if self.receive()? == IDLE_BYTE {
                return Ok(());
            }
            deadline.check(self.clock, Error::BusyTimeout)?;
        }
    }

    /// Perform a command and return the R1 response.
    ///
    /// Application commands get their APP_CMD prefix here. The card's answer
    /// is returned as-is; only link faults are errors. A response of 0xFF
    /// means the card never answered.
    pub fn card_command(&mut self, index: u8, arg: u32) -> Result<u8, Error> {
        if (index & ACMD_FLAG) != 0 {
            let r = self.card_command(CMD55, 0)?;
            if r > R1_IDLE_STATE {
                return Ok(r);
            }
        }

        self.cs_high()?;
        self.receive()?;
        self.cs_low()?;
        self.receive()?;

        let frame = CommandFrame::new(index, arg);
        for b in frame.to_bytes().iter() {
            self.send(*b)?;
        }

        // skip stuff byte for stop read
        if frame.index == CMD12 {
            let _result = self.receive()?;
        }

        let mut result = IDLE_BYTE;
        for _ in 0..RESPONSE_POLLS {
            result = self.receive()?;
            if is_valid_response(result) {
                break;
            }
        }
        trace!("CMD{} ({:x}) -> {:x}", frame.index, arg, result);
        Ok(result)
    }
}
