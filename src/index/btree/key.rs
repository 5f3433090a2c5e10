use std::fmt::Debug;

use byteorder::{ByteOrder, LittleEndian};

/// A fixed-width, totally ordered index key.
///
/// The page layouts derive their fan-out from `ENCODED_LEN`, so the width
/// must be the same for every value of the type. Comparison uses the type's
/// `Ord`; the encoding only has to round-trip, not to preserve order.
pub trait IndexKey: Copy + Ord + Debug + Send + Sync + 'static {
    const ENCODED_LEN: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl IndexKey for i32 {
    const ENCODED_LEN: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl IndexKey for i64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl IndexKey for u64 {
    const ENCODED_LEN: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut buf = [0u8; 8];

        (-5i32).encode(&mut buf[..4]);
        assert_eq!(i32::decode(&buf[..4]), -5);

        (1i64 << 40).encode(&mut buf);
        assert_eq!(i64::decode(&buf), 1i64 << 40);

        u64::MAX.encode(&mut buf);
        assert_eq!(u64::decode(&buf), u64::MAX);
    }
}
