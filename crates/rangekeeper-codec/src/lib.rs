//! Packed binary codec and in-file search for password-range records.
//!
//! A [`RecordCodec`] is parameterised by a dropped-prefix length `D` and an
//! occasion numeric width `W`. In the storage engine, `D` is always the
//! binary layout's file-code length (see `rangekeeper-dataset`): the leading
//! `D` hex digits of a record's full hash are implied by which file it lives
//! in, so they never need to be stored. The codec itself is agnostic to that
//! — it only knows `D` and `W` — which keeps it independently testable.

use std::cmp::Ordering;

use rangekeeper_types::{NumericWidth, PREFIX_LENGTH, SHA1_HASH_LENGTH};

mod search;

pub use search::search;

/// Encodes and decodes password-range records between their textual form
/// (`SUFFIX:COUNT`) and a fixed-size packed byte form.
#[derive(Debug, Clone, Copy)]
pub struct RecordCodec {
    dropped_prefix_length: usize,
    numeric_width: NumericWidth,
    stored_suffix_size: usize,
    has_odd_suffix: bool,
}

impl RecordCodec {
    /// # Panics
    /// Panics if `dropped_prefix_length` is greater than [`SHA1_HASH_LENGTH`].
    #[must_use]
    pub fn new(dropped_prefix_length: usize, numeric_width: NumericWidth) -> Self {
        assert!(
            dropped_prefix_length <= SHA1_HASH_LENGTH,
            "dropped prefix length must not exceed the hash length"
        );
        let remaining = SHA1_HASH_LENGTH - dropped_prefix_length;
        Self {
            dropped_prefix_length,
            numeric_width,
            stored_suffix_size: remaining.div_ceil(2),
            has_odd_suffix: remaining % 2 != 0,
        }
    }

    #[must_use]
    pub const fn dropped_prefix_length(&self) -> usize {
        self.dropped_prefix_length
    }

    /// Fixed size in bytes of one packed record.
    #[must_use]
    pub const fn record_size(&self) -> usize {
        self.stored_suffix_size + self.numeric_width.byte_length()
    }

    /// Encode one textual record (`SUFFIX:COUNT`) queried under
    /// `query_prefix` (5 or 6 hex digits) into its packed form.
    ///
    /// # Panics
    /// Panics if `text_record` has no `:` separator or either half is not
    /// valid hex/decimal.
    #[must_use]
    pub fn encode(&self, text_record: &str, query_prefix: &str) -> Vec<u8> {
        let (suffix_hex, occasions_str) = text_record
            .split_once(':')
            .expect("record must contain a ':' separator");
        let full_hash = format!("{}{}", query_prefix.to_ascii_uppercase(), suffix_hex);
        let mut remaining_hex = full_hash[self.dropped_prefix_length..].to_string();
        if remaining_hex.len() % 2 != 0 {
            remaining_hex.push('0');
        }
        let hash_bytes = hex::decode(&remaining_hex).expect("record suffix must be valid hex");

        let occasions: u64 = occasions_str
            .trim()
            .parse()
            .expect("occasion count must be a non-negative integer");
        let occasions = occasions.min(self.numeric_width.max_unsigned_value());
        let width = self.numeric_width.byte_length();
        let number_bytes = &occasions.to_be_bytes()[8 - width..];

        let mut out = Vec::with_capacity(self.record_size());
        out.extend_from_slice(&hash_bytes);
        out.extend_from_slice(number_bytes);
        out
    }

    /// Decode a packed record back to its textual, 5-hex-relative form
    /// (i.e. with the leading 5 hex digits of the reconstructed hash
    /// stripped, matching what the upstream range API would return).
    ///
    /// `dropped_prefix` must be exactly the `dropped_prefix_length()` hex
    /// digits that were dropped when this record was encoded (in the
    /// binary storage engine, the owning file's code).
    ///
    /// # Panics
    /// Panics if `record_bytes` is not exactly [`Self::record_size`] bytes
    /// long, or if `dropped_prefix` has the wrong length.
    #[must_use]
    pub fn decode(&self, record_bytes: &[u8], dropped_prefix: &str) -> String {
        assert_eq!(record_bytes.len(), self.record_size(), "record size mismatch");
        assert_eq!(
            dropped_prefix.len(),
            self.dropped_prefix_length,
            "dropped prefix length mismatch"
        );
        let hash_bytes = &record_bytes[..self.stored_suffix_size];
        let number_bytes = &record_bytes[self.stored_suffix_size..];

        let mut hex_hash = hex::encode_upper(hash_bytes);
        if self.has_odd_suffix {
            hex_hash.pop();
        }
        let mut occasions: u64 = 0;
        for &byte in number_bytes {
            occasions = (occasions << 8) | u64::from(byte);
        }

        let full = format!("{dropped_prefix}{hex_hash}:{occasions}");
        full[PREFIX_LENGTH..].to_string()
    }

    /// Whether `full_prefix`'s stored form occupies only the high nibble of
    /// its last byte (i.e. has an odd number of hex digits after dropping).
    #[must_use]
    pub const fn has_odd_stored_prefix(&self, full_prefix_len: usize) -> bool {
        (full_prefix_len - self.dropped_prefix_length) % 2 != 0
    }

    /// Encode a 5- or 6-hex query prefix into the bytes it would occupy in
    /// storage, for use as a search key. The boolean flag reports whether
    /// the last byte only has its high nibble significant.
    ///
    /// # Panics
    /// Panics if `full_desired_prefix` is shorter than `dropped_prefix_length`.
    #[must_use]
    pub fn stored_query_bytes(&self, full_desired_prefix: &str) -> (Vec<u8>, bool) {
        let odd = self.has_odd_stored_prefix(full_desired_prefix.len());
        let mut desired = full_desired_prefix[self.dropped_prefix_length..].to_ascii_uppercase();
        if desired.len() % 2 != 0 {
            desired.push('0');
        }
        let bytes = hex::decode(&desired).expect("query prefix must be valid hex");
        (bytes, odd)
    }
}

/// Compares the first `desired.len()` bytes of `record` against `desired`,
/// masking the low nibble of the last byte on both sides when `odd_nibble`.
#[must_use]
pub(crate) fn compare_stored_prefix(record: &[u8], desired: &[u8], odd_nibble: bool) -> Ordering {
    let last = desired.len() - 1;
    for (index, (&record_byte, &desired_byte)) in record.iter().zip(desired).enumerate() {
        let (record_byte, desired_byte) = if odd_nibble && index == last {
            (record_byte & 0xF0, desired_byte & 0xF0)
        } else {
            (record_byte, desired_byte)
        };
        match record_byte.cmp(&desired_byte) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn numeric_widths() -> [NumericWidth; 3] {
        [NumericWidth::Byte, NumericWidth::Short, NumericWidth::Integer]
    }

    /// S1: D = 10, W = 1.
    #[test]
    fn scenario_s1_round_trip_with_dropped_prefix() {
        let codec = RecordCodec::new(10, NumericWidth::Byte);
        let record = "0123456789ABCDEF0123456789ABCDEF012:345";
        let query_prefix = "01234";
        let encoded = codec.encode(record, query_prefix);
        assert_eq!(encoded.len(), 16);
        let dropped_prefix = "0123456789";
        let decoded = codec.decode(&encoded, dropped_prefix);
        assert_eq!(decoded, "56789ABCDEF0123456789ABCDEF012:255");
    }

    /// S2: D = 0, W = 2, saturating occasion count.
    #[test]
    fn scenario_s2_saturation() {
        let codec = RecordCodec::new(0, NumericWidth::Short);
        let record = format!("{}:999999", "A".repeat(35));
        let query_prefix = "00000";
        let encoded = codec.encode(&record, query_prefix);
        let number_bytes = &encoded[encoded.len() - 2..];
        assert_eq!(number_bytes, &[0xFF, 0xFF]);
        let decoded = codec.decode(&encoded, "");
        assert!(decoded.ends_with(":65535"));
    }

    /// P1: decode(encode(r, prefix5), dropped) == r with count saturated.
    proptest! {
        #[test]
        fn prop_round_trip(
            suffix in "[0-9A-F]{35}",
            prefix in "[0-9A-F]{5}",
            occasions in 0_u64..10_000_000,
            dropped_prefix_length in 0_usize..=40,
        ) {
            for numeric_width in numeric_widths() {
                let codec = RecordCodec::new(dropped_prefix_length, numeric_width);
                let record = format!("{suffix}:{occasions}");
                let encoded = codec.encode(&record, &prefix);
                prop_assert_eq!(encoded.len(), codec.record_size());

                let full_hash = format!("{prefix}{suffix}");
                let dropped_prefix = &full_hash[..dropped_prefix_length];
                let decoded = codec.decode(&encoded, dropped_prefix);

                let expected_occasions = occasions.min(numeric_width.max_unsigned_value());
                let expected_full = format!("{full_hash}:{expected_occasions}");
                let expected = &expected_full[PREFIX_LENGTH..];
                prop_assert_eq!(decoded, expected);
            }
        }
    }
}
