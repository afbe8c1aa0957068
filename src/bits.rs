//! Bit cursor over a borrowed byte buffer.
//!
//! Bits are numbered big-endian: bit 0 of the stream is the most significant
//! bit of the first byte. The cursor carries an absolute bit offset and a signed
//! bit budget; every successful read advances the offset and decrements the
//! budget by exactly the number of bits read.
//!
//! Nested decodes work on a *child* cursor ([`BitCursor::child`] or
//! [`BitCursor::bounded`]) and, on success, the parent adopts the child's final
//! position with [`BitCursor::splice`].

use crate::error::ErrorKind;
use byteorder::{BigEndian, ByteOrder};

/// Dither byte XORed over the underlying octet(s) by the LH ("masked") field encodings.
pub const LH_DITHER: u8 = 0x2B;

/// Apply (or remove) the LH dither on one octet. Masking is its own inverse.
pub fn mask_byte(b: u8) -> u8 {
    b ^ LH_DITHER
}

#[derive(Debug, Clone, Copy)]
pub struct BitCursor<'a> {
    data: &'a [u8],
    offset: usize,
    remaining: i64,
}

impl<'a> BitCursor<'a> {
    pub fn new(data: &'a [u8], offset: usize, remaining: i64) -> Self {
        BitCursor { data, offset, remaining }
    }

    /// Cursor covering the whole buffer from bit 0.
    pub fn whole(data: &'a [u8]) -> Self {
        BitCursor { data, offset: 0, remaining: (data.len() * 8) as i64 }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    /// Child cursor starting at this cursor's current position and budget.
    pub fn child(&self) -> Self {
        *self
    }

    /// Child cursor starting here but limited to `budget` bits.
    pub fn bounded(&self, budget: i64) -> Self {
        BitCursor { data: self.data, offset: self.offset, remaining: budget }
    }

    /// Adopt the final position of a child cursor created from this one.
    pub fn splice(&mut self, child: &BitCursor<'a>) {
        self.remaining -= (child.offset - self.offset) as i64;
        self.offset = child.offset;
    }

    fn check(&self, width: usize) -> Result<(), ErrorKind> {
        if self.remaining < width as i64 || self.offset + width > self.data.len() * 8 {
            return Err(ErrorKind::NeedMoreBits);
        }
        Ok(())
    }

    /// Advance over `width` bits without interpreting them.
    pub fn skip(&mut self, width: usize) -> Result<(), ErrorKind> {
        self.check(width)?;
        self.offset += width;
        self.remaining -= width as i64;
        Ok(())
    }

    /// Read `width` (0..=64) bits as an unsigned integer, MSB first.
    pub fn read_bits(&mut self, width: u8) -> Result<u64, ErrorKind> {
        let v = self.peek_bits(width)?;
        self.offset += width as usize;
        self.remaining -= width as i64;
        Ok(v)
    }

    /// Same as [`read_bits`](Self::read_bits) without moving the cursor.
    pub fn peek_bits(&self, width: u8) -> Result<u64, ErrorKind> {
        if width > 64 {
            return Err(ErrorKind::GeneralError);
        }
        if width == 0 {
            return Ok(0);
        }
        self.check(width as usize)?;
        Ok(extract(self.data, self.offset, width))
    }

    /// Look at the bit `ahead` positions past the current offset.
    pub fn peek_bit(&self, ahead: usize) -> Result<bool, ErrorKind> {
        self.check(ahead + 1)?;
        let pos = self.offset + ahead;
        Ok(self.data[pos >> 3] & (0x80 >> (pos & 7)) != 0)
    }

    /// Read `width` (1..=8) bits after XORing the covered octet(s) with [`LH_DITHER`].
    pub fn read_masked_bits(&mut self, width: u8) -> Result<u8, ErrorKind> {
        if !(1..=8).contains(&width) {
            return Err(ErrorKind::GeneralError);
        }
        self.check(width as usize)?;
        let byte_offset = self.offset >> 3;
        let rel = (self.offset & 7) as i32;
        let shift = 8 - rel - width as i32;
        let value_mask = (0xFFu16 >> (8 - width)) as u8;
        let v = if shift >= 0 {
            (mask_byte(self.data[byte_offset]) >> shift) & value_mask
        } else {
            let high = mask_byte(self.data[byte_offset]) & (0xFF >> rel);
            let high = high << (-shift);
            let low = mask_byte(self.data[byte_offset + 1]) >> (8 + shift);
            (high | low) & value_mask
        };
        self.offset += width as usize;
        self.remaining -= width as i64;
        Ok(v)
    }
}

fn extract(data: &[u8], offset: usize, width: u8) -> u64 {
    let first = offset >> 3;
    let shift = (offset & 7) as u32;
    let span = (shift as usize + width as usize + 7) / 8;
    let mut window = [0u8; 16];
    window[..span].copy_from_slice(&data[first..first + span]);
    let wide = BigEndian::read_u128(&window) << shift;
    (wide >> (128 - width as u32)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_across_byte_boundary() {
        let data = [0b0101_1010, 0b1100_0000];
        let mut c = BitCursor::new(&data, 3, 13);
        assert_eq!(c.read_bits(5), Ok(0b11010));
        assert_eq!(c.read_bits(2), Ok(0b11));
        assert_eq!(c.offset(), 10);
        assert_eq!(c.remaining(), 6);
    }

    #[test]
    fn reads_full_64_bits_unaligned() {
        let data = [0xFFu8; 9];
        let mut c = BitCursor::new(&data, 4, 68);
        assert_eq!(c.read_bits(64), Ok(u64::MAX));
        assert_eq!(c.remaining(), 4);
    }

    #[test]
    fn budget_is_enforced() {
        let data = [0xFF, 0xFF];
        let mut c = BitCursor::new(&data, 0, 4);
        assert_eq!(c.read_bits(5), Err(ErrorKind::NeedMoreBits));
        assert_eq!(c.offset(), 0);
        assert_eq!(c.remaining(), 4);
    }

    #[test]
    fn buffer_end_is_enforced_even_with_large_budget() {
        let data = [0xFF];
        let c = BitCursor::new(&data, 4, 100);
        assert_eq!(c.peek_bits(5), Err(ErrorKind::NeedMoreBits));
    }

    #[test]
    fn masked_read_within_one_byte() {
        let data = [0x2B];
        let mut c = BitCursor::whole(&data);
        assert_eq!(c.read_masked_bits(4), Ok(0));
        assert_eq!(c.read_masked_bits(4), Ok(0));
    }

    #[test]
    fn masked_read_straddling_two_bytes() {
        // unmasked stream: 0xFF 0x00 -> bits 6..10 are 1,1,0,0
        let data = [mask_byte(0xFF), mask_byte(0x00)];
        let mut c = BitCursor::new(&data, 6, 10);
        assert_eq!(c.read_masked_bits(4), Ok(0b1100));
    }

    #[test]
    fn masked_width_over_eight_is_general_error() {
        let data = [0, 0];
        let mut c = BitCursor::whole(&data);
        assert_eq!(c.read_masked_bits(9), Err(ErrorKind::GeneralError));
    }

    #[test]
    fn peek_does_not_move() {
        let data = [0b0100_0000];
        let c = BitCursor::whole(&data);
        assert_eq!(c.peek_bit(0), Ok(false));
        assert_eq!(c.peek_bit(1), Ok(true));
        assert_eq!(c.offset(), 0);
    }

    #[test]
    fn splice_adopts_child_position() {
        let data = [0u8; 4];
        let mut parent = BitCursor::new(&data, 2, 30);
        let mut child = parent.child();
        child.skip(7).unwrap();
        parent.splice(&child);
        assert_eq!(parent.offset(), 9);
        assert_eq!(parent.remaining(), 23);
    }
}
