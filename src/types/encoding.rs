//! Wire encoding for the transaction fields the VM commits to.
//!
//! Only encoding is provided: the VM never parses transactions, it only
//! serializes the parts it hashes for signing serialization and measures
//! input sizes for density control.
//!
//! # Binary Format
//!
//! - Integers: little-endian, fixed-width
//! - Byte strings: compact-size length prefix followed by the bytes
//! - Compact size: 1 byte below `0xfd`, else a marker byte (`0xfd`, `0xfe`,
//!   `0xff`) followed by a 2, 4 or 8 byte little-endian integer

/// Sink for writing encoded bytes.
///
/// Implemented by byte buffers and hashers so callers can encode directly
/// into a digest without an intermediate allocation.
pub trait EncodeSink {
    /// Writes the given bytes to the sink.
    fn write(&mut self, bytes: &[u8]);
}

/// Counter for computing encoded size without allocating.
#[derive(Default)]
pub struct SizeCounter {
    len: usize,
}

impl SizeCounter {
    pub fn new() -> Self {
        Self { len: 0 }
    }

    /// Returns the total number of bytes counted.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl EncodeSink for SizeCounter {
    fn write(&mut self, bytes: &[u8]) {
        self.len += bytes.len();
    }
}

impl EncodeSink for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }
}

/// Types with a canonical wire encoding.
pub trait Encode {
    /// Writes the binary representation to the given sink.
    fn encode<S: EncodeSink>(&self, out: &mut S);

    /// Serializes to a new buffer with exact capacity.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode(&mut out);
        out
    }

    /// Returns the number of bytes [`Encode::encode`] writes.
    fn encoded_len(&self) -> usize {
        let mut counter = SizeCounter::new();
        self.encode(&mut counter);
        counter.len()
    }
}

impl Encode for u8 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&[*self]);
    }
}

impl Encode for u32 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_le_bytes());
    }
}

impl Encode for u64 {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_le_bytes());
    }
}

impl<const N: usize> Encode for [u8; N] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(self);
    }
}

/// Length-prefixed byte string.
impl Encode for [u8] {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        CompactSize(self.len() as u64).encode(out);
        out.write(self);
    }
}

impl Encode for Vec<u8> {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.as_slice().encode(out);
    }
}

/// Variable-length unsigned integer used for lengths and counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompactSize(pub u64);

impl Encode for CompactSize {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        let value = self.0;
        if value < 0xfd {
            out.write(&[value as u8]);
        } else if value <= u64::from(u16::MAX) {
            out.write(&[0xfd]);
            out.write(&(value as u16).to_le_bytes());
        } else if value <= u64::from(u32::MAX) {
            out.write(&[0xfe]);
            out.write(&(value as u32).to_le_bytes());
        } else {
            out.write(&[0xff]);
            out.write(&value.to_le_bytes());
        }
    }
}

/// Number of bytes a compact-size encoding of `value` occupies.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..0xfd => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_boundaries() {
        assert_eq!(CompactSize(0).to_bytes(), vec![0x00]);
        assert_eq!(CompactSize(0xfc).to_bytes(), vec![0xfc]);
        assert_eq!(CompactSize(0xfd).to_bytes(), vec![0xfd, 0xfd, 0x00]);
        assert_eq!(CompactSize(0x1_0000).to_bytes(), vec![0xfe, 0x00, 0x00, 0x01, 0x00]);
        assert_eq!(CompactSize(u64::MAX).to_bytes().len(), 9);
    }

    #[test]
    fn compact_size_len_matches_encoding() {
        for value in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x1_0000, 0xffff_ffff, 0x1_0000_0000] {
            assert_eq!(compact_size_len(value), CompactSize(value).to_bytes().len());
        }
    }

    #[test]
    fn byte_strings_are_length_prefixed() {
        assert_eq!(vec![0xaau8, 0xbb].to_bytes(), vec![0x02, 0xaa, 0xbb]);
        assert_eq!(Vec::<u8>::new().to_bytes(), vec![0x00]);
    }

    #[test]
    fn integers_are_little_endian() {
        assert_eq!(0x0102_0304u32.to_bytes(), vec![0x04, 0x03, 0x02, 0x01]);
        assert_eq!(1u64.to_bytes(), vec![1, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn size_counter_matches_buffer() {
        let data = vec![7u8; 300];
        assert_eq!(data.encoded_len(), 303);
    }
}
