//! DataFlash opcodes, the status register and the device ID.

use bitflags::bitflags;
use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Opcode {
    /// Read the status register.
    ReadStatus = 0xD7,
    /// Read the manufacturer and device ID.
    ReadId = 0x9F,
    /// Read the 128-byte security register.
    ReadSecurity = 0x77,
    /// Main memory page to buffer 1 transfer.
    PageToBuf1 = 0x53,
    /// Main memory page to buffer 2 transfer.
    PageToBuf2 = 0x55,
    /// Buffer 1 read (high frequency, one dummy byte).
    Buf1Read = 0xD4,
    /// Buffer 2 read (high frequency, one dummy byte).
    Buf2Read = 0xD6,
    Buf1Write = 0x84,
    Buf2Write = 0x87,
    /// Buffer 1 to main memory page program with built-in erase.
    Buf1ToPageErase = 0x83,
    /// Buffer 2 to main memory page program with built-in erase.
    Buf2ToPageErase = 0x86,
    /// Buffer 1 to main memory page program without built-in erase.
    Buf1ToPage = 0x88,
    /// Buffer 2 to main memory page program without built-in erase.
    Buf2ToPage = 0x89,
    PageErase = 0x81,
    SectorErase = 0x7C,
}

/// The 4-byte chip erase sequence.
pub(crate) const CHIP_ERASE: [u8; 4] = [0xC7, 0x94, 0x80, 0x9A];

bitflags! {
    /// Status register bits.
    pub struct Status: u8 {
        /// The device is idle. Cleared while a program or erase runs.
        const READY = 1 << 7;
        /// Result of the last page compare; set on mismatch.
        const COMP = 1 << 6;
        /// The 4 density bits identifying the part size.
        const DENSITY = 0b0011_1100;
        /// Sector protection is enabled.
        const PROTECT = 1 << 1;
        /// The device is configured for power-of-two ("binary") page sizes.
        const BINARY_PAGE = 1 << 0;
    }
}

impl Status {
    /// The raw 4-bit density code, e.g. `0b1011` for a 16 Mbit part.
    pub fn density(self) -> u8 {
        (self & Status::DENSITY).bits() >> 2
    }
}

/// Manufacturer and device identification read with opcode `0x9F`.
pub struct Identification {
    /// Manufacturer ID followed by the two device ID bytes.
    bytes: [u8; 3],

    /// Length of the extended device information that follows.
    extended_len: u8,

    /// The number of continuation codes (`0x7F`) that preceded the ID.
    continuations: u8,
}

impl Identification {
    /// The JEDEC manufacturer code of Atmel/Adesto DataFlash parts.
    pub const ATMEL: u8 = 0x1F;

    /// Builds an `Identification` from the bytes clocked out after the opcode.
    ///
    /// Leading `0x7F` continuation codes are skipped. Returns `None` when fewer
    /// than four bytes remain after them.
    pub fn from_bytes(buf: &[u8]) -> Option<Identification> {
        let start = buf.iter().position(|&b| b != 0x7F)?;
        match &buf[start..] {
            [mfr, dev1, dev2, ext, ..] => Some(Self {
                bytes: [*mfr, *dev1, *dev2],
                extended_len: *ext,
                continuations: start as u8,
            }),
            _ => None,
        }
    }

    /// The JEDEC manufacturer code for this chip.
    pub fn mfr_code(&self) -> u8 {
        self.bytes[0]
    }

    /// The two device ID bytes.
    pub fn device_id(&self) -> &[u8] {
        &self.bytes[1..]
    }

    /// Family code from the top 3 bits of device ID byte 1 (`0b001` = DataFlash).
    pub fn family_code(&self) -> u8 {
        self.bytes[1] >> 5
    }

    /// Density code from the low 5 bits of device ID byte 1.
    pub fn density_code(&self) -> u8 {
        self.bytes[1] & 0x1F
    }

    pub fn extended_len(&self) -> u8 {
        self.extended_len
    }

    pub fn continuation_count(&self) -> u8 {
        self.continuations
    }
}

impl fmt::Debug for Identification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Identification")
            .field(&HexSlice(&self.bytes))
            .field(&self.extended_len)
            .finish()
    }
}

/// Formats a byte slice as `[1f, 26, 00]`.
pub(crate) struct HexSlice<'a>(pub &'a [u8]);

impl fmt::Debug for HexSlice<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for byte in self.0 {
            list.entry(&format_args!("{:02x}", byte));
        }
        list.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_id() {
        let ident = Identification::from_bytes(&[0x1F, 0x26, 0x00, 0x01, 0x00]).unwrap();
        assert_eq!(ident.mfr_code(), Identification::ATMEL);
        assert_eq!(ident.device_id(), &[0x26, 0x00]);
        assert_eq!(ident.family_code(), 0b001);
        assert_eq!(ident.density_code(), 0b00110);
        assert_eq!(ident.extended_len(), 1);
        assert_eq!(ident.continuation_count(), 0);
        assert_eq!(format!("{:?}", ident), "Identification([1f, 26, 00], 1)");
    }

    #[test]
    fn skips_continuation_codes() {
        let ident = Identification::from_bytes(&[0x7F, 0x7F, 0x1F, 0x25, 0x00, 0x00]).unwrap();
        assert_eq!(ident.continuation_count(), 2);
        assert_eq!(ident.mfr_code(), 0x1F);
        assert!(Identification::from_bytes(&[0x7F, 0x1F, 0x25]).is_none());
        assert!(Identification::from_bytes(&[0x7F; 4]).is_none());
    }

    #[test]
    fn status_bits() {
        let status = Status::from_bits_truncate(0b1010_1101);
        assert!(status.contains(Status::READY));
        assert!(status.contains(Status::BINARY_PAGE));
        assert!(!status.contains(Status::PROTECT));
        assert_eq!(status.density(), 0b1011);
    }
}
