//! The text storage layout: one file per prefix, verbatim provider output.

use std::path::Path;

use async_trait::async_trait;
use rangekeeper_error::{DatasetError, EngineError};
use rangekeeper_provider::RangeProvider;
use rangekeeper_types::PREFIX_CAPACITY;
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

use crate::layout::{Layout, WorkerControl, validate_hex_prefix};

/// One `.txt` file per 5-hex prefix, containing the provider's response
/// with line endings normalised to `\n`.
pub struct TextLayout {
    worker_count: usize,
}

impl TextLayout {
    #[must_use]
    pub const fn new(worker_count: usize) -> Self {
        Self { worker_count }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> EngineError {
    EngineError::Persistence(DatasetError::Io { path: path.display().to_string(), source })
}

#[async_trait]
impl Layout for TextLayout {
    fn implementation_name(&self) -> &'static str {
        "TextStorageEngine"
    }

    fn settings_fingerprint(&self) -> Map<String, Value> {
        Map::new()
    }

    fn validate_prefix(&self, prefix: &str) -> Result<String, EngineError> {
        validate_hex_prefix(prefix, &[5])
    }

    async fn prepare_batch(
        &self,
        dataset_dir: &Path,
        provider: &dyn RangeProvider,
        batch_index: usize,
        start_offset: u64,
        control: &WorkerControl,
    ) -> Result<(), EngineError> {
        let worker_count = u64::try_from(self.worker_count).expect("worker count fits u64");
        let batch_index = u64::try_from(batch_index).expect("batch index fits u64");
        let capacity = u64::from(PREFIX_CAPACITY);

        let first_prefix = batch_index * capacity / worker_count + start_offset;
        let last_prefix = (batch_index + 1) * capacity / worker_count;

        for prefix_number in first_prefix..last_prefix {
            if control.should_stop() {
                return Ok(());
            }
            let prefix_number_u32 = u32::try_from(prefix_number).expect("prefix number fits u32");
            let hash_prefix = rangekeeper_types::number_to_hex_code(prefix_number_u32, PREFIX_CAPACITY);

            let body = provider
                .fetch_with_retries(&hash_prefix)
                .await
                .map_err(EngineError::UpstreamFatal)?;

            let file_path = dataset_dir.join(format!("{hash_prefix}.txt"));
            let mut file = tokio::fs::File::create(&file_path).await.map_err(|error| io_err(&file_path, error))?;
            file.write_all(body.as_bytes()).await.map_err(|error| io_err(&file_path, error))?;
            file.flush().await.map_err(|error| io_err(&file_path, error))?;

            control.record_prefix_prepared().await;
        }
        Ok(())
    }

    fn read_range(&self, dataset_dir: &Path, prefix: &str) -> Result<String, EngineError> {
        let file_path = dataset_dir.join(format!("{prefix}.txt"));
        std::fs::read_to_string(&file_path).map_err(|error| io_err(&file_path, error))
    }
}
