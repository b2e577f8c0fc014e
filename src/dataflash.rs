//! Driver for a single AT45 DataFlash chip.
//!
//! Besides the random-access buffer and page commands, [`DataFlash`] runs a
//! sequential write session that ping-pongs between the two SRAM buffers:
//! while buffer 1 is being programmed into page `n`, bytes for page `n + 1`
//! stream into buffer 2, and the other way round.

use crate::command::{Identification, Opcode, Status, CHIP_ERASE};
use crate::transport::{Bus, WaitPolicy};
use crate::{address, Commit, Config, Error};
use core::marker::PhantomData;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// One of the two on-chip SRAM buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Buffer {
    One,
    Two,
}

impl Buffer {
    /// The buffer used to read `page` sequentially: even pages go through
    /// buffer 1, odd pages through buffer 2.
    pub fn for_page(page: u16) -> Buffer {
        if page % 2 == 0 {
            Buffer::One
        } else {
            Buffer::Two
        }
    }

    pub fn other(self) -> Buffer {
        match self {
            Buffer::One => Buffer::Two,
            Buffer::Two => Buffer::One,
        }
    }

    fn write_opcode(self) -> u8 {
        match self {
            Buffer::One => Opcode::Buf1Write as u8,
            Buffer::Two => Opcode::Buf2Write as u8,
        }
    }

    fn read_opcode(self) -> u8 {
        match self {
            Buffer::One => Opcode::Buf1Read as u8,
            Buffer::Two => Opcode::Buf2Read as u8,
        }
    }

    fn load_opcode(self) -> u8 {
        match self {
            Buffer::One => Opcode::PageToBuf1 as u8,
            Buffer::Two => Opcode::PageToBuf2 as u8,
        }
    }

    fn program_opcode(self, commit: Commit) -> u8 {
        match (self, commit) {
            (Buffer::One, Commit::WithErase) => Opcode::Buf1ToPageErase as u8,
            (Buffer::Two, Commit::WithErase) => Opcode::Buf2ToPageErase as u8,
            (Buffer::One, Commit::PreErased) => Opcode::Buf1ToPage as u8,
            (Buffer::Two, Commit::PreErased) => Opcode::Buf2ToPage as u8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    Idle,
    /// Bytes go into `buffer` at `offset`. `open` is set while chip-select is
    /// held with a buffer write header already sent.
    Filling {
        buffer: Buffer,
        offset: u16,
        open: bool,
    },
    /// `buffer` is full and about to be programmed. Only observable after the
    /// commit failed.
    Committing { buffer: Buffer },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    Idle,
    /// A buffer read is open on `buffer` and `offset` bytes were streamed.
    Streaming { buffer: Buffer, offset: u16 },
}

/// Driver for one AT45 DataFlash chip on a shared [`Bus`].
///
/// The chip owns its chip-select pin; every operation borrows the bus.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master of the [`Bus`] the chip is attached to.
/// * **`CS`**: The **C**hip-**S**elect line attached to the `\CS` pin of the
///   chip.
#[derive(Debug)]
pub struct DataFlash<SPI, CS> {
    cs: CS,
    config: Config,
    write: WriteState,
    write_page: u16,
    /// Committed, but not yet seen to complete.
    pending: Option<u16>,
    confirmed: Option<u16>,
    read: ReadState,
    read_page: u16,
    _spi: PhantomData<fn() -> SPI>,
}

impl<SPI: Transfer<u8>, CS: OutputPin> DataFlash<SPI, CS> {
    /// Creates a driver without touching the bus. Call [`init`](Self::init)
    /// before using it.
    ///
    /// # Parameters
    ///
    /// * **`cs`**: The **C**hip-**S**elect Pin connected to the `\CS` pin of
    ///   the chip. Will be driven low when accessing the device.
    /// * **`config`**: The chip variant.
    pub fn new(cs: CS, config: Config) -> Self {
        DataFlash {
            cs,
            config,
            write: WriteState::Idle,
            write_page: 0,
            pending: None,
            confirmed: None,
            read: ReadState::Idle,
            read_page: 0,
            _spi: PhantomData,
        }
    }

    /// Deselects the chip, checks that it answers and waits until it is idle.
    pub fn init<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<Status, Error<SPI, CS>> {
        self.cs.set_high().map_err(Error::Gpio)?;

        let status = bus.read_status(&mut self.cs)?;
        info!("DataFlash::init: status = {:?}", status);

        // A floating MISO line reads as all ones.
        if status.bits() == 0xFF {
            return Err(Error::UnexpectedStatus);
        }
        if status.contains(Status::BINARY_PAGE) != self.config.page_size().is_power_of_two() {
            warn!(
                "DataFlash::init: page size {} does not match the chip's page size setting",
                self.config.page_size()
            );
        }

        bus.wait_ready(&mut self.cs)?;
        Ok(status)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the chip-select pin.
    pub fn free(self) -> CS {
        self.cs
    }

    fn encode_page(&self, page: u16) -> Result<[u8; 3], Error<SPI, CS>> {
        self.config.encode_page(page).ok_or(Error::InvalidAddress)
    }

    fn page_command<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        opcode: u8,
        page: u16,
    ) -> Result<(), Error<SPI, CS>> {
        let [a0, a1, a2] = self.encode_page(page)?;
        bus.command(&mut self.cs, &mut [opcode, a0, a1, a2])
    }

    /// Reads the status register.
    pub fn read_status<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<Status, Error<SPI, CS>> {
        bus.read_status(&mut self.cs)
    }

    /// Waits until the chip finished its current program or erase operation.
    pub fn wait_ready<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<(), Error<SPI, CS>> {
        bus.wait_ready(&mut self.cs)
    }

    /// Reads the manufacturer and device ID.
    pub fn read_id<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
    ) -> Result<Identification, Error<SPI, CS>> {
        // Optimistically read 8 bytes: 4 ID bytes plus room for continuation codes
        let mut buf = [0; 9];
        buf[0] = Opcode::ReadId as u8;
        bus.command(&mut self.cs, &mut buf)?;

        // Skip buf[0] (SPI read response byte)
        Identification::from_bytes(&buf[1..]).ok_or(Error::UnexpectedStatus)
    }

    /// Reads the start of the 128-byte security register into `buf`.
    pub fn read_security_register<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        buf: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        if buf.len() > 128 {
            return Err(Error::BufferLength);
        }
        for byte in buf.iter_mut() {
            *byte = 0;
        }
        let mut header = [Opcode::ReadSecurity as u8, 0, 0, 0];
        bus.command_with_data(&mut self.cs, &mut header, buf)
    }

    /// Transfers main memory `page` into `buffer`. Doesn't wait for completion.
    pub fn page_to_buffer<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        buffer: Buffer,
        page: u16,
    ) -> Result<(), Error<SPI, CS>> {
        self.page_command(bus, buffer.load_opcode(), page)
    }

    /// Programs `buffer` into main memory `page`, using the configured
    /// [`Commit`] mode. Doesn't wait for completion.
    pub fn buffer_to_page<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        buffer: Buffer,
        page: u16,
    ) -> Result<(), Error<SPI, CS>> {
        let opcode = buffer.program_opcode(self.config.commit());
        self.page_command(bus, opcode, page)
    }

    fn check_buffer_range(&self, offset: u16, len: usize) -> Result<(), Error<SPI, CS>> {
        if usize::from(offset) + len > usize::from(self.config.page_size()) {
            return Err(Error::BufferLength);
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes from `buffer`, starting at `offset`.
    pub fn read_buffer<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        buffer: Buffer,
        offset: u16,
        buf: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        self.check_buffer_range(offset, buf.len())?;
        for byte in buf.iter_mut() {
            *byte = 0;
        }
        let [a0, a1, a2] = address::buffer_offset(offset);
        // The high frequency read needs one dummy byte after the address.
        let mut header = [buffer.read_opcode(), a0, a1, a2, 0];
        bus.command_with_data(&mut self.cs, &mut header, buf)
    }

    /// Writes `data` into `buffer`, starting at `offset`.
    ///
    /// `data` is overwritten with whatever the chip clocks out during the
    /// transfer.
    pub fn write_buffer<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        buffer: Buffer,
        offset: u16,
        data: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        self.check_buffer_range(offset, data.len())?;
        let [a0, a1, a2] = address::buffer_offset(offset);
        let mut header = [buffer.write_opcode(), a0, a1, a2];
        bus.command_with_data(&mut self.cs, &mut header, data)
    }

    /// Erases `page` and waits for completion.
    pub fn page_erase<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>, page: u16) -> Result<(), Error<SPI, CS>> {
        self.page_command(bus, Opcode::PageErase as u8, page)?;
        bus.wait_ready(&mut self.cs)
    }

    /// Erases sector number `sector` and waits for completion.
    ///
    /// The sector is addressed through its first page. On parts where sector 0
    /// is split into 0a and 0b this only erases 0a.
    pub fn sector_erase<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        sector: u16,
    ) -> Result<(), Error<SPI, CS>> {
        let page = u32::from(sector) * u32::from(self.config.pages_per_sector());
        if page >= self.config.page_count() {
            return Err(Error::InvalidAddress);
        }
        self.page_command(bus, Opcode::SectorErase as u8, page as u16)?;
        bus.wait_ready(&mut self.cs)
    }

    /// Erases the whole chip and waits for completion.
    ///
    /// Warning: Full erase operations can take several seconds. Make sure the
    /// bus [`WaitPolicy`] allows for that.
    pub fn chip_erase<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<(), Error<SPI, CS>> {
        let mut cmd_buf = CHIP_ERASE;
        bus.command(&mut self.cs, &mut cmd_buf)?;
        bus.wait_ready(&mut self.cs)
    }

    /// Starts a sequential write at page 0.
    pub fn start_sequential_write<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
    ) -> Result<(), Error<SPI, CS>> {
        self.start_sequential_write_at(bus, 0)
    }

    /// Starts a sequential write whose first page is `page`.
    ///
    /// Selects the chip and opens buffer 1 at offset 0. Chip-select stays
    /// asserted while bytes are fed, until the page is full.
    pub fn start_sequential_write_at<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        page: u16,
    ) -> Result<(), Error<SPI, CS>> {
        self.prepare_sequential_write(page)?;
        let result = self.open_write_buffer(bus);
        if result.is_err() {
            self.write = WriteState::Idle;
        }
        result
    }

    /// Starts a sequential write at `page` without touching the bus.
    ///
    /// The buffer write header is sent by the first [`feed_byte`]. This lets
    /// several chips on one bus have a session each, while only the chip
    /// currently being fed holds its chip-select.
    ///
    /// [`feed_byte`]: Self::feed_byte
    pub fn prepare_sequential_write(&mut self, page: u16) -> Result<(), Error<SPI, CS>> {
        if self.write != WriteState::Idle {
            return Err(Error::SequenceMisuse);
        }
        if !self.config.contains(page) {
            return Err(Error::InvalidAddress);
        }
        self.write_page = page;
        self.pending = None;
        self.confirmed = None;
        self.write = WriteState::Filling {
            buffer: Buffer::One,
            offset: 0,
            open: false,
        };
        Ok(())
    }

    fn open_write_buffer<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<(), Error<SPI, CS>> {
        let (buffer, offset) = match self.write {
            WriteState::Filling {
                buffer,
                offset,
                open: false,
            } => (buffer, offset),
            _ => return Err(Error::SequenceMisuse),
        };
        if !self.config.contains(self.write_page) {
            return Err(Error::InvalidAddress);
        }

        let [a0, a1, a2] = address::buffer_offset(offset);
        let mut header = [buffer.write_opcode(), a0, a1, a2];
        bus.select(&mut self.cs)?;
        if let Err(e) = bus.transfer(&mut header) {
            bus.deselect(&mut self.cs)?;
            return Err(e);
        }
        self.write = WriteState::Filling {
            buffer,
            offset,
            open: true,
        };
        Ok(())
    }

    /// Feeds the next byte of a sequential write.
    ///
    /// When this byte fills the page, the chip is deselected, the previous
    /// commit is waited for, and the full buffer is programmed into the next
    /// page. The following bytes go into the other buffer.
    pub fn feed_byte<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>, byte: u8) -> Result<(), Error<SPI, CS>> {
        let (buffer, offset, open) = match self.write {
            WriteState::Filling {
                buffer,
                offset,
                open,
            } => (buffer, offset, open),
            _ => return Err(Error::SequenceMisuse),
        };
        if !open {
            self.open_write_buffer(bus)?;
        }

        bus.transfer_byte::<CS>(byte)?;
        let offset = offset + 1;
        if offset < self.config.page_size() {
            self.write = WriteState::Filling {
                buffer,
                offset,
                open: true,
            };
            return Ok(());
        }

        self.commit(bus, buffer)
    }

    fn commit<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>, buffer: Buffer) -> Result<(), Error<SPI, CS>> {
        self.write = WriteState::Committing { buffer };
        bus.deselect(&mut self.cs)?;

        // The chip can't take a new program command before the last one is done.
        bus.wait_ready(&mut self.cs)?;
        self.confirm();

        let page = self.write_page;
        self.buffer_to_page(bus, buffer, page)?;
        trace!("DataFlash: buffer {:?} -> page {}", buffer, page);

        self.pending = Some(page);
        self.write_page = page + 1;
        self.write = WriteState::Filling {
            buffer: buffer.other(),
            offset: 0,
            open: false,
        };
        Ok(())
    }

    fn confirm(&mut self) {
        if let Some(page) = self.pending.take() {
            self.confirmed = Some(page);
        }
    }

    /// Ends the sequential write.
    ///
    /// A partially filled page is padded with `0xFF` and committed. Waits until
    /// the last commit completed.
    pub fn finish_sequential_write<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
    ) -> Result<(), Error<SPI, CS>> {
        match self.write {
            WriteState::Idle => return Ok(()),
            WriteState::Committing { .. } => return Err(Error::SequenceMisuse),
            WriteState::Filling { offset, open, .. } => {
                if offset > 0 {
                    for _ in offset..self.config.page_size() {
                        self.feed_byte(bus, 0xFF)?;
                    }
                } else if open {
                    bus.deselect(&mut self.cs)?;
                }
            }
        }

        bus.wait_ready(&mut self.cs)?;
        self.confirm();
        self.write = WriteState::Idle;
        debug!("DataFlash: sequential write finished at page {}", self.write_page);
        Ok(())
    }

    /// Abandons the sequential write, dropping any partially filled page.
    ///
    /// This is the way out after a failed [`feed_byte`](Self::feed_byte). A
    /// new session can be started from the page after
    /// [`last_confirmed_page`](Self::last_confirmed_page).
    pub fn abort_sequential_write<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
    ) -> Result<(), Error<SPI, CS>> {
        let open = matches!(self.write, WriteState::Filling { open: true, .. });
        self.write = WriteState::Idle;
        self.pending = None;
        if open {
            bus.deselect(&mut self.cs)?;
        }
        Ok(())
    }

    /// Whether a sequential write session is running.
    pub fn is_writing(&self) -> bool {
        self.write != WriteState::Idle
    }

    /// The page the next full buffer will be programmed into.
    pub fn write_page_cursor(&self) -> u16 {
        self.write_page
    }

    /// Bytes already fed into the current page.
    pub fn write_offset(&self) -> u16 {
        match self.write {
            WriteState::Filling { offset, .. } => offset,
            _ => 0,
        }
    }

    /// The last page of this session whose commit was seen to complete.
    pub fn last_confirmed_page(&self) -> Option<u16> {
        self.confirmed
    }

    /// Loads the page under the read cursor into its buffer and waits for it.
    fn load_read_page<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<Buffer, Error<SPI, CS>> {
        let page = self.read_page;
        if !self.config.contains(page) {
            return Err(Error::InvalidAddress);
        }
        let buffer = Buffer::for_page(page);

        // A transfer is ignored while a program is still running.
        bus.wait_ready(&mut self.cs)?;
        self.page_to_buffer(bus, buffer, page)?;
        bus.wait_ready(&mut self.cs)?;
        Ok(buffer)
    }

    /// Reads the page under the read cursor into `buf` and advances the cursor.
    ///
    /// `buf` must be exactly one page long.
    pub fn read_sequential_page<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
        buf: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        if buf.len() != usize::from(self.config.page_size()) {
            return Err(Error::BufferLength);
        }
        if self.read != ReadState::Idle {
            return Err(Error::SequenceMisuse);
        }

        let buffer = self.load_read_page(bus)?;
        self.read_buffer(bus, buffer, 0, buf)?;
        self.read_page += 1;
        Ok(())
    }

    /// Reads the next byte under the read cursor.
    ///
    /// The first byte of a page loads it into a buffer and opens a buffer read
    /// that keeps the chip selected until the last byte of the page.
    pub fn read_sequential_byte<W: WaitPolicy>(&mut self, bus: &mut Bus<SPI, W>) -> Result<u8, Error<SPI, CS>> {
        let (buffer, offset) = match self.read {
            ReadState::Streaming { buffer, offset } => (buffer, offset),
            ReadState::Idle => {
                let buffer = self.load_read_page(bus)?;
                let mut header = [buffer.read_opcode(), 0, 0, 0, 0];
                bus.select(&mut self.cs)?;
                if let Err(e) = bus.transfer(&mut header) {
                    bus.deselect(&mut self.cs)?;
                    return Err(e);
                }
                self.read = ReadState::Streaming { buffer, offset: 0 };
                (buffer, 0)
            }
        };

        let byte = bus.transfer_byte::<CS>(0)?;
        let offset = offset + 1;
        if offset < self.config.page_size() {
            self.read = ReadState::Streaming { buffer, offset };
        } else {
            self.read = ReadState::Idle;
            self.read_page += 1;
            bus.deselect(&mut self.cs)?;
        }
        Ok(byte)
    }

    /// Moves the read cursor to `page`.
    pub fn seek_read(&mut self, page: u16) -> Result<(), Error<SPI, CS>> {
        if self.read != ReadState::Idle {
            return Err(Error::SequenceMisuse);
        }
        if !self.config.contains(page) {
            return Err(Error::InvalidAddress);
        }
        self.read_page = page;
        Ok(())
    }

    /// Abandons a byte-wise read in the middle of a page. The read cursor stays
    /// on that page.
    pub fn abort_sequential_read<W: WaitPolicy>(
        &mut self,
        bus: &mut Bus<SPI, W>,
    ) -> Result<(), Error<SPI, CS>> {
        if let ReadState::Streaming { .. } = self.read {
            self.read = ReadState::Idle;
            bus.deselect(&mut self.cs)?;
        }
        Ok(())
    }

    /// The page the next sequential read starts at.
    pub fn read_page_cursor(&self) -> u16 {
        self.read_page
    }

    /// Bytes already streamed from the current page.
    pub fn read_offset(&self) -> u16 {
        match self.read {
            ReadState::Streaming { offset, .. } => offset,
            ReadState::Idle => 0,
        }
    }
}
