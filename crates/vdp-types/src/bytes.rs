//! Canonical byte helpers.
//!
//! Table keys are built from big-endian values left-padded with zeroes to a
//! fixed width. These helpers do the padding, masking and integer
//! conversion in one place.

/// Left-pads (or left-truncates) `value` to exactly `width` bytes.
pub fn pad_left(value: &[u8], width: usize) -> Vec<u8> {
    let mut out = vec![0u8; width];
    if value.len() >= width {
        out.copy_from_slice(&value[value.len() - width..]);
    } else {
        out[width - value.len()..].copy_from_slice(value);
    }
    out
}

/// A `width`-byte mask with the leading `bits` bits set.
pub fn prefix_mask(width: usize, bits: usize) -> Vec<u8> {
    let bits = bits.min(width * 8);
    let mut out = vec![0u8; width];
    for (i, byte) in out.iter_mut().enumerate() {
        let start = i * 8;
        if bits >= start + 8 {
            *byte = 0xff;
        } else if bits > start {
            *byte = 0xffu8 << (8 - (bits - start));
        }
    }
    out
}

/// Number of leading one bits in `mask`, or `None` if the mask is not
/// contiguous.
pub fn mask_len(mask: &[u8]) -> Option<usize> {
    let len: usize = mask.iter().map(|b| b.count_ones() as usize).sum();
    (prefix_mask(mask.len(), len) == mask).then_some(len)
}

/// Bytewise AND; the result has the length of `value`.
pub fn apply_mask(value: &[u8], mask: &[u8]) -> Vec<u8> {
    value
        .iter()
        .zip(mask.iter().chain(std::iter::repeat(&0xff)))
        .map(|(v, m)| v & m)
        .collect()
}

/// Big-endian bytes to an integer, keeping the low 16 bytes.
pub fn to_u128(value: &[u8]) -> u128 {
    value.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

/// An integer as `width` big-endian bytes (high bytes truncated).
pub fn from_u128(value: u128, width: usize) -> Vec<u8> {
    pad_left(&value.to_be_bytes(), width)
}

/// Encodes an integer in its minimal big-endian form, as field values are
/// commonly supplied by callers.
pub fn from_u64(value: u64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_pad_left() {
        assert_eq!(pad_left(&[1, 2], 4), vec![0, 0, 1, 2]);
        assert_eq!(pad_left(&[1, 2, 3, 4, 5], 2), vec![4, 5]);
        assert_eq!(pad_left(&[], 2), vec![0, 0]);
    }

    #[test]
    fn test_prefix_mask() {
        assert_eq!(prefix_mask(4, 0), vec![0, 0, 0, 0]);
        assert_eq!(prefix_mask(4, 12), vec![0xff, 0xf0, 0, 0]);
        assert_eq!(prefix_mask(2, 40), vec![0xff, 0xff]);
    }

    #[test]
    fn test_mask_len() {
        assert_eq!(mask_len(&[0xff, 0xc0]), Some(10));
        assert_eq!(mask_len(&[0xf0, 0x0f]), None);
    }

    #[test]
    fn test_integer_conversion() {
        assert_eq!(to_u128(&[0x01, 0x00]), 256);
        assert_eq!(from_u128(256, 3), vec![0, 1, 0]);
        assert_eq!(apply_mask(&[0xab, 0xcd], &[0xf0]), vec![0xa0, 0xcd]);
    }
}
