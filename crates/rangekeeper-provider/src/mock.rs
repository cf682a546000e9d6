//! A deterministic fake [`RangeProvider`], used by tests across the
//! workspace instead of hitting the real upstream API.
//!
//! The record set is generated once at construction time with the same
//! formulas as the reference fixture this crate mirrors: a large synthetic
//! pool keyed by `index * 397 + 124` / `index * 82 + 59`, plus a handful of
//! real-looking included passwords layered on top so lookups have something
//! meaningful to find.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rangekeeper_error::ProviderError;
use rangekeeper_types::PREFIX_LENGTH;
use sha1::{Digest, Sha1};

use crate::RangeProvider;

fn sha1_hex_upper(text: &str) -> String {
    let digest = Sha1::digest(text.as_bytes());
    hex::encode_upper(digest)
}

/// Passwords that are guaranteed to show up under their real prefix,
/// alongside a fixed occasion count, for tests that look up a known value.
pub const INCLUDED_PASSWORDS: [(&str, u32); 4] =
    [("hello", 273_646), ("hello1234567890", 10), ("superstronger", 1), ("123_56789", 3)];

const RECORD_QUANTITY: usize = 1009;

/// Deterministic stand-in for the real range API.
pub struct MockRangeProvider {
    records: Vec<String>,
    extra_records: HashMap<String, Vec<String>>,
    request_counts: Mutex<HashMap<String, u32>>,
}

impl MockRangeProvider {
    #[must_use]
    pub fn new() -> Self {
        let mut records: Vec<String> = (0..RECORD_QUANTITY)
            .map(|index| {
                let suffix_hash = sha1_hex_upper(&(index * 397 + 124).to_string());
                let occasion_seed = sha1_hex_upper(&(index * 82 + 59).to_string());
                let occasion_digit = occasion_seed.chars().next().expect("sha1 hex is non-empty");
                let occasion = u32::from_str_radix(&occasion_digit.to_string(), 16)
                    .expect("hex digit parses")
                    + 1;
                format!("{}:{occasion}", &suffix_hash[PREFIX_LENGTH..])
            })
            .collect();
        records.sort();

        let mut extra_records: HashMap<String, Vec<String>> = HashMap::new();
        for (password, occasion) in INCLUDED_PASSWORDS {
            let password_hash = sha1_hex_upper(password);
            let (prefix, suffix) = password_hash.split_at(PREFIX_LENGTH);
            let record = format!("{suffix}:{occasion}");
            extra_records.entry(prefix.to_string()).or_default().push(record);
        }

        Self { records, extra_records, request_counts: Mutex::new(HashMap::new()) }
    }

    /// Number of times `prefix` has been requested so far. Used to assert
    /// exactly-once delivery across a pause/resume cycle.
    #[must_use]
    pub fn request_count(&self, prefix: &str) -> u32 {
        self.request_counts.lock().expect("mutex not poisoned").get(&prefix.to_uppercase()).copied().unwrap_or(0)
    }
}

impl Default for MockRangeProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RangeProvider for MockRangeProvider {
    async fn fetch(&self, prefix: &str) -> Result<String, ProviderError> {
        let prefix = prefix.to_uppercase();
        *self.request_counts.lock().expect("mutex not poisoned").entry(prefix.clone()).or_insert(0) += 1;

        let numeric_value = u32::from_str_radix(&prefix, 16)
            .map_err(|_| ProviderError::Status { prefix: prefix.clone(), status: 400 })?;
        let offset = usize::try_from((numeric_value + 3234) % 54347).unwrap() % (RECORD_QUANTITY * 9 / 11 + 1) + 1;
        let amount = usize::try_from((numeric_value + 2832) % 71203 % 8235 % 4).unwrap() + 1;

        let end = (offset + amount).min(self.records.len());
        let mut records: Vec<String> = if offset < self.records.len() {
            self.records[offset..end].to_vec()
        } else {
            Vec::new()
        };

        if let Some(extra) = self.extra_records.get(&prefix) {
            records.extend(extra.iter().cloned());
            records.sort();
        }

        Ok(records.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_is_sorted_and_stable() {
        let provider = MockRangeProvider::new();
        let first = provider.fetch("ABCDE").await.unwrap();
        let second = provider.fetch("ABCDE").await.unwrap();
        assert_eq!(first, second);
        let mut lines: Vec<&str> = first.lines().collect();
        let mut sorted = lines.clone();
        sorted.sort_unstable();
        assert_eq!(lines, sorted);
        lines.sort_unstable();
    }

    #[tokio::test]
    async fn included_password_is_present_under_its_real_prefix() {
        let provider = MockRangeProvider::new();
        let password_hash = sha1_hex_upper("hello");
        let (prefix, suffix) = password_hash.split_at(PREFIX_LENGTH);
        let body = provider.fetch(prefix).await.unwrap();
        assert!(body.lines().any(|line| line == format!("{suffix}:273646")));
    }

    #[tokio::test]
    async fn request_count_tracks_repeated_fetches() {
        let provider = MockRangeProvider::new();
        assert_eq!(provider.request_count("ABCDE"), 0);
        provider.fetch("abcde").await.unwrap();
        assert_eq!(provider.request_count("ABCDE"), 1);
        provider.fetch("ABCDE").await.unwrap();
        assert_eq!(provider.request_count("ABCDE"), 2);
    }
}
