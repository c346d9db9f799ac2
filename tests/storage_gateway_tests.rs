use acqlab::analysis::SpectralEngine;
use acqlab::buffers::SampleBuffer;
use acqlab::core::Sample;
use acqlab::error::StorageError;
use acqlab::storage::{
    persist_capture, JsonExporter, JsonFileStore, MemoryStore, PersistenceGateway, TaskInfo,
};
use std::collections::BTreeMap;
use tempfile::tempdir;

fn series(start: usize, count: usize) -> Vec<Sample> {
    (start..start + count)
        .map(|i| Sample::new(i as f64 * 0.001, (i % 17) as f64))
        .collect()
}

async fn check_task_lifecycle(store: &dyn PersistenceGateway) {
    let mut first = TaskInfo::new("Vibration baseline", 1000.0, vec![0, 1]);
    first.description = "motor mount".to_string();
    let first_id = store.create_task(&first).await.unwrap();
    let second_id = store
        .create_task(&TaskInfo::new("Thermal soak", 500.0, vec![2]))
        .await
        .unwrap();
    assert!(second_id > first_id);

    let ids: Vec<i64> = store.list_tasks().await.unwrap().iter().map(|t| t.task_id).collect();
    assert_eq!(ids, vec![second_id, first_id]);

    let found = store.search_tasks("MOTOR").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].task_id, first_id);
    assert!(store.search_tasks("acoustic").await.unwrap().is_empty());

    let mut updated = store.get_task(first_id).await.unwrap();
    updated.duration = 12.5;
    store.update_task(&updated).await.unwrap();
    assert_eq!(store.get_task(first_id).await.unwrap().duration, 12.5);

    let mut missing = updated.clone();
    missing.task_id = 999;
    assert!(matches!(
        store.update_task(&missing).await,
        Err(StorageError::TaskNotFound(999))
    ));

    store.save_samples(first_id, 0, &series(0, 10)).await.unwrap();
    let result = SpectralEngine::new().analyze(&series(0, 10), first_id, 0, 1000.0);
    store.save_analysis_result(&result).await.unwrap();

    store.delete_task(first_id).await.unwrap();
    assert!(matches!(
        store.get_task(first_id).await,
        Err(StorageError::TaskNotFound(_))
    ));
    assert!(matches!(
        store.load_samples(first_id, 0).await,
        Err(StorageError::TaskNotFound(_))
    ));
    assert!(matches!(
        store.analysis_results(first_id, None).await,
        Err(StorageError::TaskNotFound(_))
    ));
    assert_eq!(store.list_tasks().await.unwrap().len(), 1);
}

async fn check_chunked_save(store: &dyn PersistenceGateway) {
    let task_id = store
        .create_task(&TaskInfo::new("long capture", 1000.0, vec![3]))
        .await
        .unwrap();

    store.save_samples(task_id, 3, &series(0, 2500)).await.unwrap();
    store.save_samples(task_id, 3, &series(2500, 500)).await.unwrap();
    assert_eq!(store.load_samples(task_id, 3).await.unwrap(), series(0, 3000));

    // Empty channels load as empty
    assert!(store.load_samples(task_id, 4).await.unwrap().is_empty());
}

async fn check_failed_save_is_atomic(store: &dyn PersistenceGateway) {
    let task_id = store
        .create_task(&TaskInfo::new("atomic", 1000.0, vec![0]))
        .await
        .unwrap();
    store.save_samples(task_id, 0, &series(0, 1500)).await.unwrap();

    let mut bad = series(1500, 2500);
    bad[1500].amplitude = f64::NAN;
    assert!(matches!(
        store.save_samples(task_id, 0, &bad).await,
        Err(StorageError::InvalidSample { index: 1500 })
    ));
    assert_eq!(store.load_samples(task_id, 0).await.unwrap(), series(0, 1500));

    assert!(matches!(
        store.save_samples(task_id, 13, &series(0, 5)).await,
        Err(StorageError::InvalidChannel(13))
    ));
}

async fn check_multi_channel(store: &dyn PersistenceGateway) {
    let task_id = store
        .create_task(&TaskInfo::new("multi", 1000.0, vec![0, 1, 2]))
        .await
        .unwrap();

    let mut data = BTreeMap::new();
    data.insert(0, series(0, 20));
    data.insert(1, series(0, 30));
    data.insert(2, Vec::new());
    store.save_multi_channel(task_id, &data).await.unwrap();

    let loaded = store.load_multi_channel(task_id, &[0, 1, 2]).await.unwrap();
    assert_eq!(loaded[&0].len(), 20);
    assert_eq!(loaded[&1].len(), 30);
    assert!(loaded[&2].is_empty());

    // One bad channel rejects the whole write
    let mut bad = BTreeMap::new();
    bad.insert(0, series(20, 5));
    let mut poisoned = series(30, 5);
    poisoned[2].time = f64::INFINITY;
    bad.insert(1, poisoned);
    assert!(store.save_multi_channel(task_id, &bad).await.is_err());

    assert_eq!(store.load_samples(task_id, 0).await.unwrap().len(), 20);
    assert_eq!(store.load_samples(task_id, 1).await.unwrap().len(), 30);
}

async fn check_load_is_time_ordered(store: &dyn PersistenceGateway) {
    let task_id = store
        .create_task(&TaskInfo::new("ordering", 10.0, vec![5]))
        .await
        .unwrap();
    store
        .save_samples(task_id, 5, &[Sample::new(2.0, 20.0), Sample::new(0.0, 0.0)])
        .await
        .unwrap();
    store.save_samples(task_id, 5, &[Sample::new(1.0, 10.0)]).await.unwrap();

    let times: Vec<f64> = store
        .load_samples(task_id, 5)
        .await
        .unwrap()
        .iter()
        .map(|s| s.time)
        .collect();
    assert_eq!(times, vec![0.0, 1.0, 2.0]);
}

async fn check_analysis_results(store: &dyn PersistenceGateway) {
    let task_id = store
        .create_task(&TaskInfo::new("analysis", 1000.0, vec![0, 1]))
        .await
        .unwrap();
    let engine = SpectralEngine::new();

    let first = store
        .save_analysis_result(&engine.analyze(&series(0, 64), task_id, 0, 1000.0))
        .await
        .unwrap();
    let second = store
        .save_analysis_result(&engine.analyze(&series(0, 64), task_id, 1, 1000.0))
        .await
        .unwrap();
    assert!(second > first);

    let all = store.analysis_results(task_id, None).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|r| r.analysis_id.is_some()));

    let channel_one = store.analysis_results(task_id, Some(1)).await.unwrap();
    assert_eq!(channel_one.len(), 1);
    assert_eq!(channel_one[0].analysis_id, Some(second));

    let orphan = engine.analyze(&series(0, 8), 12345, 0, 1000.0);
    assert!(matches!(
        store.save_analysis_result(&orphan).await,
        Err(StorageError::TaskNotFound(12345))
    ));
}

async fn check_all(store: &dyn PersistenceGateway) {
    check_task_lifecycle(store).await;
    check_chunked_save(store).await;
    check_failed_save_is_atomic(store).await;
    check_multi_channel(store).await;
    check_load_is_time_ordered(store).await;
    check_analysis_results(store).await;
}

#[tokio::test]
async fn test_memory_store() {
    check_all(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_json_file_store() {
    let temp_dir = tempdir().unwrap();
    let store = JsonFileStore::open(temp_dir.path().join("data")).await.unwrap();
    check_all(&store).await;
}

#[tokio::test]
async fn test_json_file_store_survives_reopen() {
    let temp_dir = tempdir().unwrap();
    let root = temp_dir.path().join("data");

    let task_id = {
        let store = JsonFileStore::open(&root).await.unwrap();
        let task_id = store
            .create_task(&TaskInfo::new("persisted", 250.0, vec![7]))
            .await
            .unwrap();
        store.save_samples(task_id, 7, &series(0, 40)).await.unwrap();
        task_id
    };

    let store = JsonFileStore::open(&root).await.unwrap();
    assert_eq!(store.get_task(task_id).await.unwrap().task_name, "persisted");
    assert_eq!(store.load_samples(task_id, 7).await.unwrap(), series(0, 40));

    // Ids keep counting after a reopen
    let next = store
        .create_task(&TaskInfo::new("next", 250.0, vec![7]))
        .await
        .unwrap();
    assert_eq!(next, task_id + 1);
}

#[tokio::test]
async fn test_export_task_layout() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("exports").join("task.json");

    let task = TaskInfo::new("export", 10.0, vec![1, 3]);
    let mut data = BTreeMap::new();
    data.insert(1, vec![Sample::new(0.0, 0.5), Sample::new(0.1, 1.5)]);
    data.insert(2, vec![Sample::new(0.0, 9.0)]);
    data.insert(3, vec![Sample::new(0.0, -2.0)]);

    JsonExporter::compact().export_task(&path, &task, &data).await.unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&content).unwrap();
    assert_eq!(doc, serde_json::json!({ "1": [0.5, 1.5], "3": [-2.0] }));
}

#[tokio::test]
async fn test_export_nothing() {
    let temp_dir = tempdir().unwrap();
    let path = temp_dir.path().join("empty.json");

    assert!(matches!(
        JsonExporter::new().export_channel(&path, 0, &[]).await,
        Err(StorageError::NothingToExport)
    ));
    assert!(!path.exists());
}

async fn check_persist_capture(store: &dyn PersistenceGateway) {
    let buffer = SampleBuffer::with_capacity(1000);
    let tone: Vec<Sample> = (0..100)
        .map(|i| {
            let t = i as f64 / 100.0;
            Sample::new(t, (2.0 * std::f64::consts::PI * 5.0 * t).sin())
        })
        .collect();
    buffer.append_batch(1, &tone);
    buffer.append_batch(2, &series(0, 10));

    let task = TaskInfo::new("tcp capture", 100.0, vec![1, 2, 3]);
    let (task, snapshot) = persist_capture(store, &SpectralEngine::new(), task, &buffer)
        .await
        .unwrap();

    assert!(task.task_id > 0);
    assert!((task.duration - 0.99).abs() < 1e-9);
    assert_eq!(store.get_task(task.task_id).await.unwrap().duration, task.duration);

    assert_eq!(snapshot[&1], tone);
    assert!(snapshot[&3].is_empty());
    let loaded = store.load_multi_channel(task.task_id, &[1, 2, 3]).await.unwrap();
    assert_eq!(loaded, snapshot);

    let results = store.analysis_results(task.task_id, None).await.unwrap();
    assert_eq!(results.len(), 3);
    let tone_result = store.analysis_results(task.task_id, Some(1)).await.unwrap();
    assert!((tone_result[0].frequency - 5.0).abs() < 1.0);
}

#[tokio::test]
async fn test_persist_capture_memory_store() {
    check_persist_capture(&MemoryStore::new()).await;
}

#[tokio::test]
async fn test_persist_capture_json_file_store() {
    let temp_dir = tempdir().unwrap();
    let store = JsonFileStore::open(temp_dir.path().join("data")).await.unwrap();
    check_persist_capture(&store).await;
}
