//! Command framing on the shared SPI bus and bounded ready-polling.

use crate::command::{Opcode, Status};
use crate::Error;
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

/// What to do after a status poll found the chip still busy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Read the status register again.
    Retry,
    /// Give up with [`Error::DeviceTimeout`].
    Timeout,
    /// Give up with [`Error::Cancelled`].
    Cancel,
}

/// Decides how long [`Bus::wait_ready`] keeps polling a busy chip.
pub trait WaitPolicy {
    /// Called after the `attempt`-th (0-based) status read found the chip busy.
    ///
    /// Implementations may block here (e.g. sleep) before returning
    /// [`PollAction::Retry`].
    fn pause(&mut self, attempt: u32) -> PollAction;
}

/// Polls back-to-back, giving up after a fixed number of status reads.
#[derive(Debug, Clone, Copy)]
pub struct Spin {
    max_polls: u32,
}

impl Spin {
    /// Gives up after `max_polls` status reads (at least one is always made).
    pub fn new(max_polls: u32) -> Self {
        Spin { max_polls }
    }
}

impl WaitPolicy for Spin {
    fn pause(&mut self, attempt: u32) -> PollAction {
        if attempt.saturating_add(1) >= self.max_polls {
            PollAction::Timeout
        } else {
            PollAction::Retry
        }
    }
}

/// Sleeps for a fixed interval between polls.
#[derive(Debug)]
pub struct Delayed<D> {
    delay: D,
    interval_us: u32,
    max_polls: u32,
}

impl<D: DelayUs<u32>> Delayed<D> {
    /// Waits `interval_us` between polls and gives up after `max_polls` reads.
    pub fn new(delay: D, interval_us: u32, max_polls: u32) -> Self {
        Delayed {
            delay,
            interval_us,
            max_polls,
        }
    }

    /// Waits `interval_us` between polls and gives up after roughly
    /// `timeout_us` microseconds.
    pub fn with_timeout(delay: D, interval_us: u32, timeout_us: u32) -> Self {
        let max_polls = if interval_us > 0 {
            timeout_us / interval_us + (timeout_us % interval_us != 0) as u32
        } else {
            timeout_us
        };
        Self::new(delay, interval_us, max_polls)
    }

    /// Returns the delay provider.
    pub fn free(self) -> D {
        self.delay
    }
}

impl<D: DelayUs<u32>> WaitPolicy for Delayed<D> {
    fn pause(&mut self, attempt: u32) -> PollAction {
        if attempt.saturating_add(1) >= self.max_polls {
            return PollAction::Timeout;
        }
        self.delay.delay_us(self.interval_us);
        PollAction::Retry
    }
}

/// Wraps another policy with a cancellation check.
///
/// `is_cancelled` is consulted before every pause, so a cooperative scheduler
/// can abandon a wait on a stuck chip.
#[derive(Debug)]
pub struct Cancellable<W, F> {
    inner: W,
    is_cancelled: F,
}

impl<W: WaitPolicy, F: FnMut() -> bool> Cancellable<W, F> {
    pub fn new(inner: W, is_cancelled: F) -> Self {
        Cancellable {
            inner,
            is_cancelled,
        }
    }
}

impl<W: WaitPolicy, F: FnMut() -> bool> WaitPolicy for Cancellable<W, F> {
    fn pause(&mut self, attempt: u32) -> PollAction {
        if (self.is_cancelled)() {
            PollAction::Cancel
        } else {
            self.inner.pause(attempt)
        }
    }
}

/// An SPI bus shared by one or more DataFlash chips.
///
/// The bus owns the SPI master. Chip-select pins stay with their chips and are
/// passed in per command; the bus only remembers whether one of them is
/// currently asserted and refuses to assert a second one.
///
/// # Type Parameters
///
/// * **`SPI`**: The SPI master. Must be configured for SPI mode 0 or 3, MSB
///   first, before it is handed over.
/// * **`W`**: The [`WaitPolicy`] bounding ready-polls.
#[derive(Debug)]
pub struct Bus<SPI, W> {
    spi: SPI,
    wait: W,
    selected: bool,
}

impl<SPI: Transfer<u8>, W: WaitPolicy> Bus<SPI, W> {
    pub fn new(spi: SPI, wait: W) -> Self {
        Bus {
            spi,
            wait,
            selected: false,
        }
    }

    /// Releases the SPI master and the wait policy.
    pub fn free(self) -> (SPI, W) {
        (self.spi, self.wait)
    }

    /// Whether a chip-select is currently asserted through this bus.
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Drives `cs` low, unless another chip is already selected.
    pub(crate) fn select<CS: OutputPin>(&mut self, cs: &mut CS) -> Result<(), Error<SPI, CS>> {
        if self.selected {
            return Err(Error::SequenceMisuse);
        }
        cs.set_low().map_err(Error::Gpio)?;
        self.selected = true;
        Ok(())
    }

    /// Drives `cs` high.
    pub(crate) fn deselect<CS: OutputPin>(&mut self, cs: &mut CS) -> Result<(), Error<SPI, CS>> {
        self.selected = false;
        cs.set_high().map_err(Error::Gpio)
    }

    /// Full-duplex transfer inside an already open frame; `words` is
    /// overwritten with what the chip clocked out.
    pub(crate) fn transfer<CS: OutputPin>(
        &mut self,
        words: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        self.spi.transfer(words).map(|_| ()).map_err(Error::Spi)
    }

    pub(crate) fn transfer_byte<CS: OutputPin>(&mut self, out: u8) -> Result<u8, Error<SPI, CS>> {
        let mut buf = [out];
        self.transfer::<CS>(&mut buf)?;
        Ok(buf[0])
    }

    /// Sends a complete command in a single chip-select frame.
    pub(crate) fn command<CS: OutputPin>(
        &mut self,
        cs: &mut CS,
        bytes: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        self.select(cs)?;
        // If the SPI transfer fails, make sure to disable CS anyways
        let spi_result = self.transfer(bytes);
        self.deselect(cs)?;
        spi_result
    }

    /// Sends `header` followed by `data` in the same chip-select frame.
    pub(crate) fn command_with_data<CS: OutputPin>(
        &mut self,
        cs: &mut CS,
        header: &mut [u8],
        data: &mut [u8],
    ) -> Result<(), Error<SPI, CS>> {
        self.select(cs)?;
        let mut spi_result = self.transfer(header);
        if spi_result.is_ok() {
            spi_result = self.transfer(data);
        }
        self.deselect(cs)?;
        spi_result
    }

    /// Reads the status register of the chip behind `cs`.
    pub fn read_status<CS: OutputPin>(&mut self, cs: &mut CS) -> Result<Status, Error<SPI, CS>> {
        let mut buf = [Opcode::ReadStatus as u8, 0];
        self.command(cs, &mut buf)?;
        Ok(Status::from_bits_truncate(buf[1]))
    }

    /// Polls the status register of the chip behind `cs` until it reports
    /// ready, or the wait policy gives up.
    pub fn wait_ready<CS: OutputPin>(&mut self, cs: &mut CS) -> Result<(), Error<SPI, CS>> {
        let mut attempt = 0;
        loop {
            if self.read_status(cs)?.contains(Status::READY) {
                return Ok(());
            }
            match self.wait.pause(attempt) {
                PollAction::Retry => attempt += 1,
                PollAction::Timeout => {
                    warn!("chip still busy after {} status polls", attempt + 1);
                    return Err(Error::DeviceTimeout);
                }
                PollAction::Cancel => return Err(Error::Cancelled),
            }
        }
    }
}
