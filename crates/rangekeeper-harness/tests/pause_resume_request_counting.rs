//! Pause across two restarts, then a final run to completion: every prefix
//! must be requested from the provider exactly once.

use std::sync::Arc;
use std::time::Duration;

use rangekeeper_config::EngineConfig;
use rangekeeper_engine::{StorageEngine, TextLayout, UpdatePauseResponse, UpdateResponse, UpdateResult};
use rangekeeper_provider::RangeProvider;
use rangekeeper_provider::mock::MockRangeProvider;
use rangekeeper_revision::RevisionStatus;
use rangekeeper_types::{PREFIX_CAPACITY, number_to_hex_code};

const WORKER_COUNT: usize = 16;

fn config(resource_dir: &std::path::Path) -> EngineConfig {
    EngineConfig {
        resource_dir: resource_dir.to_string_lossy().into_owned(),
        user_agent: "rangekeeper-tests/0.1".to_string(),
        file_quantity: rangekeeper_types::FileQuantity::default(),
        numeric_width: rangekeeper_types::NumericWidth::default(),
        worker_count: WORKER_COUNT,
        state_wait_time: Duration::from_millis(5),
    }
}

async fn run_and_pause(
    temp_path: &std::path::Path,
    provider: Arc<dyn RangeProvider>,
) -> (RevisionStatus, Option<i64>) {
    let engine = Arc::new(StorageEngine::open(&config(temp_path), TextLayout::new(WORKER_COUNT), provider).await.unwrap());

    let started = engine.request_update().await;
    assert_eq!(started, UpdateResponse::Started);

    let paused = engine.request_update_pause().await;
    assert_eq!(paused, UpdatePauseResponse::Accepted, "pause must be accepted while PREPARATION is in flight");

    for _ in 0..2000 {
        if engine.revision().await.status == RevisionStatus::Stopped {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let snapshot = engine.revision().await;
    (snapshot.status, snapshot.start_ts)
}

#[tokio::test]
async fn pause_resume_delivers_every_prefix_exactly_once() {
    let temp = tempfile::tempdir().unwrap();
    let provider = Arc::new(MockRangeProvider::new());

    let (status1, start_ts1) =
        run_and_pause(temp.path(), provider.clone() as Arc<dyn RangeProvider>).await;
    assert_eq!(status1, RevisionStatus::Stopped);

    let (status2, start_ts2) =
        run_and_pause(temp.path(), provider.clone() as Arc<dyn RangeProvider>).await;
    assert_eq!(status2, RevisionStatus::Stopped);
    assert_eq!(start_ts2, start_ts1, "start_ts must be preserved across a pause/resume cycle");

    let engine = StorageEngine::open(
        &config(temp.path()),
        TextLayout::new(WORKER_COUNT),
        provider.clone() as Arc<dyn RangeProvider>,
    )
    .await
    .unwrap();
    assert_eq!(engine.revision().await.start_ts, start_ts1);
    let result = engine.update().await;
    assert_eq!(result, UpdateResult::Done);

    for prefix_number in 0..PREFIX_CAPACITY {
        let prefix = number_to_hex_code(prefix_number, PREFIX_CAPACITY);
        assert_eq!(provider.request_count(&prefix), 1, "prefix {prefix} must be requested exactly once overall");
    }
}
