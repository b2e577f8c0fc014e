//! Page and buffer address encoding.
//!
//! Every DataFlash page command takes a 24-bit address made of a few
//! don't-care bits, the page index and then `shift` more don't-care bits
//! (where the byte offset would go for main-memory reads). How many bits are
//! reserved depends on the part, e.g. the AT45DB081D uses 3 + 12 + 9 and the
//! AT45DB161D 2 + 12 + 10, so the shift is part of the chip [`Config`].
//!
//! [`Config`]: crate::Config

/// Encodes `page` into the three address bytes following a page opcode.
///
/// The page index is shifted left by `shift` inside a 24-bit big-endian
/// address. Bits shifted past bit 23 are dropped, so callers need to range
/// check `page` first (see [`Config::encode_page`]).
///
/// [`Config::encode_page`]: crate::Config::encode_page
pub fn encode(page: u16, shift: u8) -> [u8; 3] {
    let addr = u32::from(page) << shift;
    [(addr >> 16) as u8, (addr >> 8) as u8, addr as u8]
}

/// Recovers the page index from three address bytes produced by [`encode`].
pub fn decode(bytes: [u8; 3], shift: u8) -> u16 {
    let addr = u32::from(bytes[0]) << 16 | u32::from(bytes[1]) << 8 | u32::from(bytes[2]);
    (addr >> shift) as u16
}

/// Encodes a byte offset inside one of the SRAM buffers.
///
/// One don't-care byte followed by the offset, big-endian.
pub fn buffer_offset(offset: u16) -> [u8; 3] {
    [0x00, (offset >> 8) as u8, offset as u8]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_matches_shifted_page_bits() {
        // 512-byte binary pages, 10 don't-care bits: page 0x123 -> 0x048C00
        assert_eq!(encode(0x123, 10), [0x04, 0x8C, 0x00]);
        // 264-byte pages on an AT45DB081D, 9 don't-care bits
        assert_eq!(encode(0xFFF, 9), [0x1F, 0xFE, 0x00]);
        assert_eq!(encode(1, 9), [0x00, 0x02, 0x00]);
        assert_eq!(encode(0, 10), [0, 0, 0]);
    }

    #[test]
    fn encode_is_reversible_and_leaves_last_byte_clear() {
        for &(shift, bits) in &[(9u8, 11u8), (9, 12), (10, 12), (10, 13), (11, 13)] {
            for page in 0..(1u32 << bits) {
                let page = page as u16;
                let bytes = encode(page, shift);
                assert_eq!(bytes[2], 0, "page {} shift {}", page, shift);
                assert_eq!(decode(bytes, shift), page);
                // encoding the same page twice gives the same bytes
                assert_eq!(encode(page, shift), bytes);
            }
        }
    }

    #[test]
    fn byte_layout_follows_dropped_low_byte() {
        let shift = 10;
        for page in [0u16, 1, 0x3F, 0x40, 0x7FF, 0xFFF].iter().copied() {
            let bytes = encode(page, shift);
            assert_eq!(bytes[0], ((page << (shift - 8)) >> 8) as u8);
            assert_eq!(bytes[1], (page << (shift - 8)) as u8);
        }
    }

    #[test]
    fn buffer_offsets() {
        assert_eq!(buffer_offset(0), [0, 0, 0]);
        assert_eq!(buffer_offset(263), [0, 0x01, 0x07]);
        assert_eq!(buffer_offset(0x1FF), [0, 0x01, 0xFF]);
    }
}
