//! Binary search for records sharing a query prefix inside a packed file.

use crate::{RecordCodec, compare_stored_prefix};

/// Find all records in `data` whose reconstructed full hash starts with
/// `query_prefix` (5 or 6 hex digits), returning them newline-joined in
/// stored order. `dropped_prefix` is the `codec.dropped_prefix_length()`
/// hex digits that were dropped from every record in this file (the file's
/// own code in the binary storage layout). Returns an empty string if
/// nothing matches.
///
/// `data.len()` must be a multiple of `codec.record_size()`.
#[must_use]
pub fn search(data: &[u8], query_prefix: &str, codec: &RecordCodec, dropped_prefix: &str) -> String {
    let record_size = codec.record_size();
    debug_assert_eq!(data.len() % record_size, 0, "file length must be a whole number of records");
    let record_count = data.len() / record_size;

    let (desired_bytes, odd_nibble) = codec.stored_query_bytes(query_prefix);
    let record_at = |index: usize| &data[index * record_size..index * record_size + record_size];

    let lower = partition_point(record_count, |index| {
        compare_stored_prefix(record_at(index), &desired_bytes, odd_nibble).is_lt()
    });

    let mut matches = Vec::new();
    let mut index = lower;
    while index < record_count
        && compare_stored_prefix(record_at(index), &desired_bytes, odd_nibble).is_eq()
    {
        matches.push(codec.decode(record_at(index), dropped_prefix));
        index += 1;
    }
    matches.join("\n")
}

/// The index of the first element for which `predicate` is false, assuming
/// `predicate` holds for a prefix of `0..len` and then never again
/// (standard binary-search partition point, avoiding a slice allocation).
fn partition_point(len: usize, predicate: impl Fn(usize) -> bool) -> usize {
    let mut low = 0;
    let mut high = len;
    while low < high {
        let mid = low + (high - low) / 2;
        if predicate(mid) {
            low = mid + 1;
        } else {
            high = mid;
        }
    }
    low
}

#[cfg(test)]
mod tests {
    use super::*;
    use rangekeeper_types::NumericWidth;

    fn build_file(codec: &RecordCodec, prefix: &str, records: &[&str]) -> Vec<u8> {
        let mut out = Vec::new();
        for record in records {
            out.extend(codec.encode(record, prefix));
        }
        out
    }

    #[test]
    fn finds_exact_and_empty_ranges() {
        let codec = RecordCodec::new(0, NumericWidth::Integer);
        let prefix = "ABCDE";
        let records = [
            "0000000000000000000000000000000:1",
            "1000000000000000000000000000000:2",
            "1000000000000000000000000000001:3",
            "F000000000000000000000000000000:4",
        ];
        let data = build_file(&codec, prefix, &records);

        let found = search(&data, "ABCDE1", &codec, "");
        assert_eq!(
            found,
            "1000000000000000000000000000000:2\n1000000000000000000000000000001:3"
        );

        let empty = search(&data, "ABCDE2", &codec, "");
        assert_eq!(empty, "");

        let all = search(&data, "ABCDE", &codec, "");
        assert_eq!(all.lines().count(), 4);
    }

    #[test]
    fn six_hex_query_narrows_to_matching_suffix_nibble() {
        let codec = RecordCodec::new(0, NumericWidth::Integer);
        let prefix = "00000";
        let records = ["A000000000000000000000000000000:1", "B000000000000000000000000000000:2"];
        let data = build_file(&codec, prefix, &records);

        assert_eq!(search(&data, "00000A", &codec, ""), "A000000000000000000000000000000:1");
        assert_eq!(search(&data, "00000B", &codec, ""), "B000000000000000000000000000000:2");
        assert_eq!(search(&data, "00000C", &codec, ""), "");
    }
}
