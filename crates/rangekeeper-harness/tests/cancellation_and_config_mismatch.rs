//! Mid-flight cancellation, and a settings change invalidating persisted
//! state on restart.

use std::sync::Arc;
use std::time::Duration;

use rangekeeper_config::EngineConfig;
use rangekeeper_engine::{BinaryLayout, StorageEngine, TextLayout, UpdateCancellationResponse, UpdateResponse, UpdateResult};
use rangekeeper_provider::RangeProvider;
use rangekeeper_provider::mock::MockRangeProvider;
use rangekeeper_revision::RevisionStatus;
use rangekeeper_types::{FileQuantity, NumericWidth};

fn config(resource_dir: &std::path::Path, worker_count: usize) -> EngineConfig {
    EngineConfig {
        resource_dir: resource_dir.to_string_lossy().into_owned(),
        user_agent: "rangekeeper-tests/0.1".to_string(),
        file_quantity: FileQuantity::default(),
        numeric_width: NumericWidth::default(),
        worker_count,
        state_wait_time: Duration::from_millis(5),
    }
}

#[tokio::test]
async fn cancellation_mid_flight_then_rerun_completes() {
    let temp = tempfile::tempdir().unwrap();
    let provider: Arc<dyn RangeProvider> = Arc::new(MockRangeProvider::new());
    let engine = Arc::new(StorageEngine::open(&config(temp.path(), 16), TextLayout::new(16), provider).await.unwrap());

    let started = engine.request_update().await;
    assert_eq!(started, UpdateResponse::Started);

    let cancelled = engine.request_update_cancellation().await;
    assert_eq!(cancelled, UpdateCancellationResponse::Accepted);

    for _ in 0..2000 {
        if engine.revision().await.status == RevisionStatus::Cancelled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(engine.revision().await.status, RevisionStatus::Cancelled);

    // The slot the cancelled run was building (old active slot was unset,
    // so the new slot was `A`) must not have survived.
    assert!(!temp.path().join("A").exists());

    let result = engine.update().await;
    assert_eq!(result, UpdateResult::Done);
}

#[tokio::test]
async fn config_change_invalidates_persisted_revision_and_state() {
    let temp = tempfile::tempdir().unwrap();
    let provider: Arc<dyn RangeProvider> = Arc::new(MockRangeProvider::new());

    {
        let mut cfg = config(temp.path(), 16);
        cfg.file_quantity = FileQuantity::N256;
        let layout = BinaryLayout::new(FileQuantity::N256, NumericWidth::Integer, 16);
        let engine = StorageEngine::open(&cfg, layout, Arc::clone(&provider)).await.unwrap();
        assert_eq!(engine.update().await, UpdateResult::Done);
    }

    let mut cfg = config(temp.path(), 16);
    cfg.file_quantity = FileQuantity::N4096;
    let layout = BinaryLayout::new(FileQuantity::N4096, NumericWidth::Integer, 16);
    let engine = StorageEngine::open(&cfg, layout, provider).await.unwrap();

    assert_eq!(engine.revision().await.status, RevisionStatus::New);
}
