//! Striping one sequential stream over several chips.
//!
//! Whole pages are dealt out round-robin: the first page of the stream goes to
//! page 0 of chip 0, the second to page 0 of chip 1, and so on. While one chip
//! is busy programming a page, the next chips are already being filled.

use crate::dataflash::DataFlash;
use crate::transport::{Bus, WaitPolicy};
use crate::{Config, Error};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// `N` DataFlash chips on one SPI bus, presented as a single sequential stream.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master all chips are attached to.
/// * **`CS`**: The chip-select pin type, one pin per chip.
/// * **`W`**: The [`WaitPolicy`] bounding ready-polls.
/// * **`N`**: The number of chips.
#[derive(Debug)]
pub struct Stripe<SPI, CS, W, const N: usize> {
    bus: Bus<SPI, W>,
    chips: [DataFlash<SPI, CS>; N],
    page_size: u16,
    write_chip: usize,
    write_offset: u16,
    read_chip: usize,
    read_offset: u16,
}

impl<SPI, CS, W, const N: usize> Stripe<SPI, CS, W, N>
where
    SPI: Transfer<u8>,
    CS: OutputPin,
    W: WaitPolicy,
{
    /// Takes over the bus and initialises every chip.
    ///
    /// # Parameters
    ///
    /// * **`spi`**: An SPI master. Must be configured to operate in the correct
    ///   mode for the chips.
    /// * **`wait`**: How long to poll a busy chip before giving up.
    /// * **`cs`**: The chip-select pins, in stripe order.
    /// * **`config`**: The chip variant, shared by all chips.
    ///
    /// # Panics
    ///
    /// This function will panic when `N` is 0.
    pub fn init(spi: SPI, wait: W, cs: [CS; N], config: Config) -> Result<Self, Error<SPI, CS>> {
        assert!(N > 0, "a stripe needs at least one chip");

        let mut this = Stripe {
            bus: Bus::new(spi, wait),
            chips: cs.map(|cs| DataFlash::new(cs, config)),
            page_size: config.page_size(),
            write_chip: 0,
            write_offset: 0,
            read_chip: 0,
            read_offset: 0,
        };
        for chip in this.chips.iter_mut() {
            chip.init(&mut this.bus)?;
        }
        info!(
            "Stripe::init: {} chips, {} byte pages, {} pages per chip",
            N,
            config.page_size(),
            config.page_count()
        );
        Ok(this)
    }

    /// Releases the SPI master, the wait policy and the chip-select pins.
    pub fn free(self) -> (SPI, W, [CS; N]) {
        let (spi, wait) = self.bus.free();
        (spi, wait, self.chips.map(DataFlash::free))
    }

    pub fn config(&self) -> &Config {
        self.chips[0].config()
    }

    /// The chip at position `index`, for inspecting its cursors.
    pub fn chip(&self, index: usize) -> Option<&DataFlash<SPI, CS>> {
        self.chips.get(index)
    }

    /// The bus together with the chip at position `index`, for using the
    /// chip's random-access commands.
    pub fn bus_and_chip(&mut self, index: usize) -> Option<(&mut Bus<SPI, W>, &mut DataFlash<SPI, CS>)> {
        let bus = &mut self.bus;
        self.chips.get_mut(index).map(|chip| (bus, chip))
    }

    /// The chip the next written byte goes to.
    pub fn write_chip(&self) -> usize {
        self.write_chip
    }

    /// The chip the next page or byte is read from.
    pub fn read_chip(&self) -> usize {
        self.read_chip
    }

    /// Starts a sequential write at page 0 of every chip.
    pub fn start_sequential_write(&mut self) -> Result<(), Error<SPI, CS>> {
        if self.chips.iter().any(|chip| chip.is_writing()) {
            return Err(Error::SequenceMisuse);
        }
        for chip in self.chips.iter_mut() {
            chip.prepare_sequential_write(0)?;
        }
        self.write_chip = 0;
        self.write_offset = 0;
        Ok(())
    }

    /// Appends one byte to the stream.
    ///
    /// After every full page, writing moves on to the next chip.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), Error<SPI, CS>> {
        self.chips[self.write_chip].feed_byte(&mut self.bus, byte)?;
        self.write_offset += 1;
        if self.write_offset == self.page_size {
            self.write_offset = 0;
            self.write_chip = (self.write_chip + 1) % N;
        }
        Ok(())
    }

    /// Appends `data` to the stream.
    pub fn write(&mut self, data: &[u8]) -> Result<(), Error<SPI, CS>> {
        for &byte in data {
            self.write_byte(byte)?;
        }
        Ok(())
    }

    /// Ends the sequential write on all chips.
    ///
    /// A partially written page is padded with `0xFF`. Waits until every chip
    /// finished its last commit.
    pub fn finish_sequential_write(&mut self) -> Result<(), Error<SPI, CS>> {
        // The chip being fed may hold chip-select; close it before polling the others.
        self.chips[self.write_chip].finish_sequential_write(&mut self.bus)?;
        for chip in self.chips.iter_mut() {
            chip.finish_sequential_write(&mut self.bus)?;
        }
        self.write_chip = 0;
        self.write_offset = 0;
        Ok(())
    }

    /// Deselects every chip and drops all running sessions.
    ///
    /// Partially written pages are lost. A byte-wise read restarts at the
    /// beginning of the page it was in.
    pub fn abort(&mut self) -> Result<(), Error<SPI, CS>> {
        for chip in self.chips.iter_mut() {
            chip.abort_sequential_write(&mut self.bus)?;
            chip.abort_sequential_read(&mut self.bus)?;
        }
        self.write_chip = 0;
        self.write_offset = 0;
        self.read_offset = 0;
        Ok(())
    }

    /// Reads the next page of the stream into `buf` (exactly one page long).
    pub fn read_sequential_page(&mut self, buf: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        if self.read_offset != 0 {
            return Err(Error::SequenceMisuse);
        }
        self.chips[self.read_chip].read_sequential_page(&mut self.bus, buf)?;
        self.read_chip = (self.read_chip + 1) % N;
        Ok(())
    }

    /// Reads the next byte of the stream.
    pub fn read_byte(&mut self) -> Result<u8, Error<SPI, CS>> {
        let byte = self.chips[self.read_chip].read_sequential_byte(&mut self.bus)?;
        self.read_offset += 1;
        if self.read_offset == self.page_size {
            self.read_offset = 0;
            self.read_chip = (self.read_chip + 1) % N;
        }
        Ok(byte)
    }

    /// Fills `buf` with the next bytes of the stream.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<SPI, CS>> {
        for byte in buf.iter_mut() {
            *byte = self.read_byte()?;
        }
        Ok(())
    }

    /// Moves reading back to the start of the stream.
    pub fn rewind_read(&mut self) -> Result<(), Error<SPI, CS>> {
        for chip in self.chips.iter_mut() {
            chip.abort_sequential_read(&mut self.bus)?;
            chip.seek_read(0)?;
        }
        self.read_chip = 0;
        self.read_offset = 0;
        Ok(())
    }

    /// Erases the first `page_count` pages of the stream.
    ///
    /// Exactly `page_count` page erases are issued in total: the `i`-th one
    /// goes to chip `i % N`, page `i / N`.
    pub fn erase_pages(&mut self, page_count: u32) -> Result<(), Error<SPI, CS>> {
        let needed = per_chip(page_count, N);
        if needed > self.config().page_count() {
            return Err(Error::InvalidAddress);
        }
        debug!("Stripe: erasing {} pages, {} per chip", page_count, needed);

        for i in 0..page_count {
            let page = (i / N as u32) as u16;
            self.chips[i as usize % N].page_erase(&mut self.bus, page)?;
        }
        Ok(())
    }

    /// Erases the first `sector_count` sectors of the stream, dealt out over
    /// the chips the same way as [`erase_pages`](Self::erase_pages).
    pub fn erase_sectors(&mut self, sector_count: u32) -> Result<(), Error<SPI, CS>> {
        let needed = per_chip(sector_count, N);
        if needed > self.config().sector_count() {
            return Err(Error::InvalidAddress);
        }
        debug!("Stripe: erasing {} sectors, {} per chip", sector_count, needed);

        for i in 0..sector_count {
            let sector = (i / N as u32) as u16;
            self.chips[i as usize % N].sector_erase(&mut self.bus, sector)?;
        }
        Ok(())
    }

    /// Erases every chip completely.
    pub fn chip_erase_all(&mut self) -> Result<(), Error<SPI, CS>> {
        for chip in self.chips.iter_mut() {
            chip.chip_erase(&mut self.bus)?;
        }
        Ok(())
    }

    /// Waits until every chip is idle.
    pub fn wait_ready_all(&mut self) -> Result<(), Error<SPI, CS>> {
        for chip in self.chips.iter_mut() {
            chip.wait_ready(&mut self.bus)?;
        }
        Ok(())
    }
}

/// How many of `count` round-robin units land on the busiest of `chips` chips.
fn per_chip(count: u32, chips: usize) -> u32 {
    let chips = chips as u32;
    count / chips + (count % chips != 0) as u32
}
