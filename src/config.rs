//! Chip variant parameters.

use crate::address;
use core::fmt;

/// Which buffer-to-page program opcodes to use.
///
/// AT45 parts offer two ways to commit an SRAM buffer to a main memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// Buffer to page program with built-in erase (`0x83` / `0x86`).
    WithErase,
    /// Buffer to page program without built-in erase (`0x88` / `0x89`).
    ///
    /// Faster, but the target pages must have been erased beforehand, e.g.
    /// with [`Stripe::erase_pages`](crate::Stripe::erase_pages).
    PreErased,
}

/// Invalid chip variant parameters passed to [`Config::new`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The page size is zero or does not fit below the address shift.
    PageSize,
    /// The shift is below 8, or the page index does not fit in 24 address bits.
    AddressWidth,
    /// A sector must contain at least one page.
    SectorSize,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConfigError::PageSize => "page size does not fit the address layout",
            ConfigError::AddressWidth => "page address does not fit in 24 bits",
            ConfigError::SectorSize => "sector size must be at least one page",
        })
    }
}

/// Geometry and command set of one DataFlash variant.
///
/// A `Config` is validated once when it is built and cannot be changed
/// afterwards, so the page size can't change in the middle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    page_size: u16,
    page_shift: u8,
    address_bits: u8,
    pages_per_sector: u16,
    commit: Commit,
}

impl Config {
    /// AT45DB041D, standard 264-byte pages.
    pub const AT45DB041D: Config = Config {
        page_size: 264,
        page_shift: 9,
        address_bits: 11,
        pages_per_sector: 256,
        commit: Commit::WithErase,
    };

    /// AT45DB081D, standard 264-byte pages.
    pub const AT45DB081D: Config = Config {
        page_size: 264,
        page_shift: 9,
        address_bits: 12,
        pages_per_sector: 256,
        commit: Commit::WithErase,
    };

    /// AT45DB161D, standard 528-byte pages.
    pub const AT45DB161D: Config = Config {
        page_size: 528,
        page_shift: 10,
        address_bits: 12,
        pages_per_sector: 256,
        commit: Commit::WithErase,
    };

    /// 512-byte pages behind a 10 bit shift and 4096 pages, committed to
    /// pre-erased pages.
    ///
    /// This is the layout used by the usual AT45DB161 data logger setups that
    /// erase the log area up front and then stream into it.
    pub const AT45DB161D_BINARY: Config = Config {
        page_size: 512,
        page_shift: 10,
        address_bits: 12,
        pages_per_sector: 256,
        commit: Commit::PreErased,
    };

    /// Builds a custom configuration.
    ///
    /// # Parameters
    ///
    /// * `page_size`: Bytes per page (and per SRAM buffer).
    /// * `page_shift`: Number of don't-care bits below the page index in the
    ///   24-bit address. Must be at least 8.
    /// * `address_bits`: Width of the page index; the chip has
    ///   `1 << address_bits` pages.
    /// * `pages_per_sector`: Pages erased by one sector erase.
    /// * `commit`: Which buffer-to-page opcodes to use.
    pub fn new(
        page_size: u16,
        page_shift: u8,
        address_bits: u8,
        pages_per_sector: u16,
        commit: Commit,
    ) -> Result<Self, ConfigError> {
        if page_shift < 8 || address_bits == 0 || address_bits > 15 {
            return Err(ConfigError::AddressWidth);
        }
        if u32::from(page_shift) + u32::from(address_bits) > 24 {
            return Err(ConfigError::AddressWidth);
        }
        if page_size == 0 || u32::from(page_size) > 1 << page_shift {
            return Err(ConfigError::PageSize);
        }
        if pages_per_sector == 0 || u32::from(pages_per_sector) > 1 << address_bits {
            return Err(ConfigError::SectorSize);
        }

        Ok(Config {
            page_size,
            page_shift,
            address_bits,
            pages_per_sector,
            commit,
        })
    }

    /// Returns this configuration with a different commit mode.
    pub fn with_commit(mut self, commit: Commit) -> Self {
        self.commit = commit;
        self
    }

    /// Bytes per page.
    pub fn page_size(&self) -> u16 {
        self.page_size
    }

    /// Number of don't-care bits below the page index.
    pub fn page_shift(&self) -> u8 {
        self.page_shift
    }

    /// Number of pages in the main memory array.
    pub fn page_count(&self) -> u32 {
        1 << self.address_bits
    }

    /// Pages per erase sector.
    pub fn pages_per_sector(&self) -> u16 {
        self.pages_per_sector
    }

    /// Number of erase sectors.
    pub fn sector_count(&self) -> u32 {
        let per_sector = u32::from(self.pages_per_sector);
        self.page_count() / per_sector + (self.page_count() % per_sector != 0) as u32
    }

    pub fn commit(&self) -> Commit {
        self.commit
    }

    /// Whether `page` is inside the main memory array.
    pub fn contains(&self, page: u16) -> bool {
        u32::from(page) < self.page_count()
    }

    /// Encodes `page` for a page command, or `None` if it's out of range.
    pub fn encode_page(&self, page: u16) -> Option<[u8; 3]> {
        if self.contains(page) {
            Some(address::encode(page, self.page_shift))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        for preset in &[
            Config::AT45DB041D,
            Config::AT45DB081D,
            Config::AT45DB161D,
            Config::AT45DB161D_BINARY,
        ] {
            let rebuilt = Config::new(
                preset.page_size,
                preset.page_shift,
                preset.address_bits,
                preset.pages_per_sector,
                preset.commit,
            );
            assert_eq!(rebuilt, Ok(*preset));
        }
    }

    #[test]
    fn rejects_bad_geometry() {
        assert_eq!(
            Config::new(512, 7, 12, 256, Commit::WithErase),
            Err(ConfigError::AddressWidth)
        );
        assert_eq!(
            Config::new(512, 10, 15, 256, Commit::WithErase),
            Err(ConfigError::AddressWidth)
        );
        assert_eq!(
            Config::new(0, 10, 12, 256, Commit::WithErase),
            Err(ConfigError::PageSize)
        );
        assert_eq!(
            Config::new(528, 9, 12, 256, Commit::WithErase),
            Err(ConfigError::PageSize)
        );
        assert_eq!(
            Config::new(264, 9, 4, 0, Commit::WithErase),
            Err(ConfigError::SectorSize)
        );
    }

    #[test]
    fn page_range() {
        let config = Config::AT45DB041D;
        assert_eq!(config.page_count(), 2048);
        assert_eq!(config.sector_count(), 8);
        assert!(config.contains(2047));
        assert!(!config.contains(2048));
        assert_eq!(config.encode_page(2048), None);
        assert_eq!(config.encode_page(1), Some([0x00, 0x02, 0x00]));
    }
}
