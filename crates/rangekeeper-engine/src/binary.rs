//! The binary storage layout: many prefixes packed per file, using the
//! `(D, W)`-parameterised record codec.

use std::path::Path;

use async_trait::async_trait;
use rangekeeper_codec::RecordCodec;
use rangekeeper_error::{DatasetError, EngineError};
use rangekeeper_provider::RangeProvider;
use rangekeeper_types::{FileQuantity, NumericWidth, PREFIX_CAPACITY, number_to_hex_code};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

use crate::layout::{Layout, WorkerControl, validate_hex_prefix};

/// Many prefixes packed per `.dat` file; file count, boundaries, and
/// record encoding are governed by `file_quantity` and `numeric_width`.
pub struct BinaryLayout {
    file_quantity: FileQuantity,
    numeric_width: NumericWidth,
    worker_count: usize,
    codec: RecordCodec,
}

impl BinaryLayout {
    #[must_use]
    pub fn new(file_quantity: FileQuantity, numeric_width: NumericWidth, worker_count: usize) -> Self {
        let codec = RecordCodec::new(file_quantity.file_code_length(), numeric_width);
        Self { file_quantity, numeric_width, worker_count, codec }
    }

    fn prefix_group_size(&self) -> u32 {
        PREFIX_CAPACITY / self.file_quantity.value()
    }

    fn file_path(&self, dataset_dir: &Path, file_index: u32) -> std::path::PathBuf {
        let code = number_to_hex_code(file_index, self.file_quantity.value());
        dataset_dir.join(format!("{code}.dat"))
    }
}

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Persistence(DatasetError::Io { path: path.display().to_string(), source })
}

#[async_trait]
impl Layout for BinaryLayout {
    fn implementation_name(&self) -> &'static str {
        "BinaryStorageEngine"
    }

    fn settings_fingerprint(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("file_quantity".to_string(), Value::from(self.file_quantity.value()));
        map.insert("numeric_bytes".to_string(), Value::from(self.numeric_width.byte_length() as u64));
        map
    }

    fn validate_prefix(&self, prefix: &str) -> Result<String, EngineError> {
        validate_hex_prefix(prefix, &[5, 6])
    }

    async fn prepare_batch(
        &self,
        dataset_dir: &Path,
        provider: &dyn RangeProvider,
        batch_index: usize,
        start_offset: u64,
        control: &WorkerControl,
    ) -> Result<(), EngineError> {
        let file_quantity = u64::from(self.file_quantity.value());
        let worker_count = u64::try_from(self.worker_count).expect("worker count fits u64");
        let batch_index_u64 = u64::try_from(batch_index).expect("batch index fits u64");
        let prefix_group_size = u64::from(self.prefix_group_size());

        let first_batch_file_index = file_quantity * batch_index_u64 / worker_count;
        let last_file_index_exclusive = file_quantity * (batch_index_u64 + 1) / worker_count;
        let file_offset = start_offset / prefix_group_size;
        let first_prefix_index = first_batch_file_index * prefix_group_size + start_offset;

        for file_index in (first_batch_file_index + file_offset)..last_file_index_exclusive {
            let file_index_u32 = u32::try_from(file_index).expect("file index fits u32");
            let file_path = self.file_path(dataset_dir, file_index_u32);
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&file_path)
                .await
                .map_err(|error| io_err(&file_path, error))?;

            let batch_lower = file_index * prefix_group_size;
            let batch_upper = (file_index + 1) * prefix_group_size;
            let range_start = batch_lower.max(first_prefix_index);

            for prefix_index in range_start..batch_upper {
                if control.should_stop() {
                    return Ok(());
                }
                let prefix_index_u32 = u32::try_from(prefix_index).expect("prefix index fits u32");
                let hash_prefix = number_to_hex_code(prefix_index_u32, PREFIX_CAPACITY);

                let body = provider
                    .fetch_with_retries(&hash_prefix)
                    .await
                    .map_err(EngineError::UpstreamFatal)?;
                debug_assert!(
                    body.lines().collect::<Vec<_>>().windows(2).all(|pair| pair[0] <= pair[1]),
                    "upstream response for {hash_prefix} is not sorted ascending"
                );

                let mut packed = Vec::new();
                for line in body.lines().filter(|line| !line.is_empty()) {
                    packed.extend(self.codec.encode(line, &hash_prefix));
                }
                file.write_all(&packed).await.map_err(|error| io_err(&file_path, error))?;

                control.record_prefix_prepared().await;
            }
            file.flush().await.map_err(|error| io_err(&file_path, error))?;
        }
        Ok(())
    }

    fn read_range(&self, dataset_dir: &Path, prefix: &str) -> Result<String, EngineError> {
        let prefix5 = &prefix[..5];
        let prefix_number = u32::from_str_radix(prefix5, 16).map_err(|_| EngineError::InvalidPrefix {
            prefix: prefix.to_string(),
            reason: "the hash prefix must be a hex string",
        })?;
        let file_index = prefix_number / self.prefix_group_size();
        let file_path = self.file_path(dataset_dir, file_index);
        let dropped_prefix = number_to_hex_code(file_index, self.file_quantity.value());

        let data = match std::fs::read(&file_path) {
            Ok(data) => data,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(error) => return Err(io_err(&file_path, error)),
        };
        Ok(rangekeeper_codec::search(&data, prefix, &self.codec, &dropped_prefix))
    }
}
