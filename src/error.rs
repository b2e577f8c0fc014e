use core::fmt::{self, Debug, Display};
use embedded_hal::blocking::spi::Transfer;
use embedded_hal::digital::v2::OutputPin;

mod private {
    #[derive(Debug)]
    pub enum Private {}
}

/// The error type used by this library.
///
/// This can encapsulate an SPI or GPIO error (a fault on the bus itself), and
/// adds the DataFlash protocol errors on top of that. None of these are
/// retried internally: after a [`DeviceTimeout`](Error::DeviceTimeout) the
/// content of the chip's SRAM buffers is unknown, and it is up to the caller
/// to abort the session or restart it from the last confirmed page.
pub enum Error<SPI: Transfer<u8>, CS: OutputPin> {
    /// An SPI transfer failed.
    Spi(SPI::Error),

    /// A GPIO could not be set.
    Gpio(CS::Error),

    /// The chip did not report ready before the wait policy gave up.
    DeviceTimeout,

    /// The wait policy was cancelled while waiting for the chip.
    Cancelled,

    /// A page index outside of the configured chip's page array.
    InvalidAddress,

    /// An operation was issued in a state that doesn't allow it.
    ///
    /// This happens when feeding bytes without an open sequential write, when
    /// mixing page-wise and byte-wise sequential reads, or when a command
    /// would assert a chip-select while another one is still asserted.
    SequenceMisuse,

    /// A caller supplied buffer doesn't match the page size.
    BufferLength,

    /// Status register contained unexpected flags.
    ///
    /// The driver reads `0xFF` from a floating MISO line, which is what
    /// happens when no chip is connected.
    UnexpectedStatus,

    #[doc(hidden)]
    __NonExhaustive(private::Private),
}

impl<SPI: Transfer<u8>, CS: OutputPin> Debug for Error<SPI, CS>
where
    SPI::Error: Debug,
    CS::Error: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "Error::Spi({:?})", spi),
            Error::Gpio(gpio) => write!(f, "Error::Gpio({:?})", gpio),
            Error::DeviceTimeout => f.write_str("Error::DeviceTimeout"),
            Error::Cancelled => f.write_str("Error::Cancelled"),
            Error::InvalidAddress => f.write_str("Error::InvalidAddress"),
            Error::SequenceMisuse => f.write_str("Error::SequenceMisuse"),
            Error::BufferLength => f.write_str("Error::BufferLength"),
            Error::UnexpectedStatus => f.write_str("Error::UnexpectedStatus"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}

impl<SPI: Transfer<u8>, CS: OutputPin> Display for Error<SPI, CS>
where
    SPI::Error: Display,
    CS::Error: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spi(spi) => write!(f, "SPI error: {}", spi),
            Error::Gpio(gpio) => write!(f, "GPIO error: {}", gpio),
            Error::DeviceTimeout => f.write_str("timed out waiting for the chip to become ready"),
            Error::Cancelled => f.write_str("wait for the chip was cancelled"),
            Error::InvalidAddress => f.write_str("page address out of range"),
            Error::SequenceMisuse => f.write_str("operation not allowed in the current state"),
            Error::BufferLength => f.write_str("buffer length does not match the page size"),
            Error::UnexpectedStatus => f.write_str("unexpected value in status register"),
            Error::__NonExhaustive(_) => unreachable!(),
        }
    }
}
