use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::RwLock;

use super::gateway::{sort_by_time, sort_results, sort_tasks, stage_samples, PersistenceGateway, TaskInfo};
use crate::analysis::AnalysisResult;
use crate::core::{ChannelId, Sample};
use crate::error::{StorageError, StorageResult};

const TASKS_DIR: &str = "tasks";
const TASK_FILE: &str = "task.json";
const ANALYSIS_FILE: &str = "analysis.json";
const COUNTERS_FILE: &str = "counters.json";

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct Counters {
    last_task_id: i64,
    last_analysis_id: i64,
}

/// File-backed store with one directory per task.
///
/// ```text
/// <root>/counters.json
/// <root>/tasks/<task_id>/task.json
/// <root>/tasks/<task_id>/channel_<n>.json
/// <root>/tasks/<task_id>/analysis.json
/// ```
///
/// Every file is replaced through a temporary file and a rename, so a failed
/// write leaves the previous contents in place. Writers are serialised by an
/// in-process lock; the store does not coordinate with other processes.
pub struct JsonFileStore {
    root: PathBuf,
    lock: RwLock<()>,
}

impl JsonFileStore {
    /// Open (creating if needed) a store rooted at `root`
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TASKS_DIR)).await?;
        info!("JSON store opened at {}", root.display());
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn task_dir(&self, task_id: i64) -> PathBuf {
        self.root.join(TASKS_DIR).join(task_id.to_string())
    }

    fn channel_path(&self, task_id: i64, channel: ChannelId) -> PathBuf {
        self.task_dir(task_id).join(format!("channel_{}.json", channel))
    }

    async fn require_task(&self, task_id: i64) -> StorageResult<()> {
        if fs::try_exists(self.task_dir(task_id).join(TASK_FILE)).await? {
            Ok(())
        } else {
            Err(StorageError::TaskNotFound(task_id))
        }
    }

    async fn read_counters(&self) -> StorageResult<Counters> {
        read_json_or_default(&self.root.join(COUNTERS_FILE)).await
    }

    async fn read_channel(&self, task_id: i64, channel: ChannelId) -> StorageResult<Vec<Sample>> {
        read_json_or_default(&self.channel_path(task_id, channel)).await
    }

    async fn read_results(&self, task_id: i64) -> StorageResult<Vec<AnalysisResult>> {
        read_json_or_default(&self.task_dir(task_id).join(ANALYSIS_FILE)).await
    }
}

async fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> StorageResult<T> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    path.with_extension("json.tmp")
}

/// Replace `path` with the JSON encoding of `value` via a temporary file
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    write_bytes_atomic(path, &serde_json::to_vec(value)?).await
}

async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> StorageResult<()> {
    let temp = temp_path(path);
    fs::write(&temp, bytes).await?;
    fs::rename(&temp, path).await?;
    Ok(())
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn create_task(&self, info: &TaskInfo) -> StorageResult<i64> {
        let _guard = self.lock.write().await;

        let mut counters = self.read_counters().await?;
        counters.last_task_id += 1;
        let task_id = counters.last_task_id;

        let mut task = info.clone();
        task.task_id = task_id;

        let dir = self.task_dir(task_id);
        fs::create_dir_all(&dir).await?;
        write_json_atomic(&dir.join(TASK_FILE), &task).await?;
        write_json_atomic(&self.root.join(COUNTERS_FILE), &counters).await?;

        debug!("Created task {} in {}", task_id, dir.display());
        Ok(task_id)
    }

    async fn update_task(&self, info: &TaskInfo) -> StorageResult<()> {
        let _guard = self.lock.write().await;
        self.require_task(info.task_id).await?;
        write_json_atomic(&self.task_dir(info.task_id).join(TASK_FILE), info).await
    }

    async fn get_task(&self, task_id: i64) -> StorageResult<TaskInfo> {
        let _guard = self.lock.read().await;
        match fs::read_to_string(self.task_dir(task_id).join(TASK_FILE)).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::TaskNotFound(task_id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_tasks(&self) -> StorageResult<Vec<TaskInfo>> {
        let _guard = self.lock.read().await;

        let mut tasks = Vec::new();
        let mut entries = fs::read_dir(self.root.join(TASKS_DIR)).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path().join(TASK_FILE);
            match fs::read_to_string(&path).await {
                Ok(content) => tasks.push(serde_json::from_str(&content)?),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Skipping {} without task metadata", entry.path().display());
                }
                Err(e) => return Err(e.into()),
            }
        }

        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn delete_task(&self, task_id: i64) -> StorageResult<()> {
        let _guard = self.lock.write().await;
        self.require_task(task_id).await?;
        fs::remove_dir_all(self.task_dir(task_id)).await?;
        debug!("Deleted task {}", task_id);
        Ok(())
    }

    async fn save_samples(&self, task_id: i64, channel: ChannelId, samples: &[Sample]) -> StorageResult<()> {
        let _guard = self.lock.write().await;
        self.require_task(task_id).await?;
        if samples.is_empty() {
            return Ok(());
        }

        let existing = self.read_channel(task_id, channel).await?;
        let staged = stage_samples(&existing, channel, samples)?;
        write_json_atomic(&self.channel_path(task_id, channel), &staged).await
    }

    async fn load_samples(&self, task_id: i64, channel: ChannelId) -> StorageResult<Vec<Sample>> {
        let _guard = self.lock.read().await;
        self.require_task(task_id).await?;

        let mut samples = self.read_channel(task_id, channel).await?;
        sort_by_time(&mut samples);
        Ok(samples)
    }

    async fn save_analysis_result(&self, result: &AnalysisResult) -> StorageResult<i64> {
        let _guard = self.lock.write().await;
        self.require_task(result.task_id).await?;

        let mut counters = self.read_counters().await?;
        counters.last_analysis_id += 1;
        let analysis_id = counters.last_analysis_id;

        let mut results = self.read_results(result.task_id).await?;
        let mut stored = result.clone();
        stored.analysis_id = Some(analysis_id);
        results.push(stored);

        write_json_atomic(&self.task_dir(result.task_id).join(ANALYSIS_FILE), &results).await?;
        write_json_atomic(&self.root.join(COUNTERS_FILE), &counters).await?;
        Ok(analysis_id)
    }

    async fn analysis_results(
        &self,
        task_id: i64,
        channel: Option<ChannelId>,
    ) -> StorageResult<Vec<AnalysisResult>> {
        let _guard = self.lock.read().await;
        self.require_task(task_id).await?;

        let mut results: Vec<AnalysisResult> = self
            .read_results(task_id)
            .await?
            .into_iter()
            .filter(|r| channel.map_or(true, |ch| r.channel == ch))
            .collect();
        sort_results(&mut results);
        Ok(results)
    }

    async fn save_multi_channel(
        &self,
        task_id: i64,
        data: &BTreeMap<ChannelId, Vec<Sample>>,
    ) -> StorageResult<()> {
        let _guard = self.lock.write().await;
        self.require_task(task_id).await?;

        let mut staged = Vec::with_capacity(data.len());
        for (&channel, samples) in data {
            if samples.is_empty() {
                continue;
            }
            let path = self.channel_path(task_id, channel);
            let previous = read_bytes(&path).await?;
            let existing: Vec<Sample> = match &previous {
                Some(bytes) => serde_json::from_slice(bytes)?,
                None => Vec::new(),
            };
            let contents = serde_json::to_vec(&stage_samples(&existing, channel, samples)?)?;
            staged.push(StagedFile {
                path,
                contents,
                previous,
            });
        }

        commit_files(&staged).await
    }
}

/// One file of a multi-file commit and what it held before
struct StagedFile {
    path: PathBuf,
    contents: Vec<u8>,
    /// `None` when the file did not exist
    previous: Option<Vec<u8>>,
}

async fn read_bytes(path: &Path) -> StorageResult<Option<Vec<u8>>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Replace every file or none of them.
///
/// All temp files are written before the first rename. If a rename fails, the
/// files already replaced get their previous contents back and the remaining
/// temp files are removed.
async fn commit_files(files: &[StagedFile]) -> StorageResult<()> {
    for (index, file) in files.iter().enumerate() {
        if let Err(e) = fs::write(temp_path(&file.path), &file.contents).await {
            remove_temp_files(&files[..index]).await;
            return Err(e.into());
        }
    }

    for (index, file) in files.iter().enumerate() {
        if let Err(e) = fs::rename(temp_path(&file.path), &file.path).await {
            warn!("Commit failed at {}, rolling back: {}", file.path.display(), e);
            remove_temp_files(&files[index..]).await;
            restore_previous(&files[..index]).await;
            return Err(e.into());
        }
    }

    Ok(())
}

async fn remove_temp_files(files: &[StagedFile]) {
    for file in files {
        let _ = fs::remove_file(temp_path(&file.path)).await;
    }
}

async fn restore_previous(files: &[StagedFile]) {
    for file in files {
        let restored = match &file.previous {
            Some(bytes) => write_bytes_atomic(&file.path, bytes).await,
            None => fs::remove_file(&file.path).await.map_err(Into::into),
        };
        if let Err(e) = restored {
            error!("Failed to restore {}: {}", file.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_failed_rename_restores_committed_files() {
        let temp_dir = tempdir().unwrap();
        let kept = temp_dir.path().join("channel_0.json");
        let fresh = temp_dir.path().join("channel_1.json");
        let blocked = temp_dir.path().join("channel_2.json");

        fs::write(&kept, b"[old]").await.unwrap();
        // A non-empty directory cannot be replaced by a file
        fs::create_dir_all(blocked.join("inner")).await.unwrap();

        let files = vec![
            StagedFile {
                path: kept.clone(),
                contents: b"[new]".to_vec(),
                previous: Some(b"[old]".to_vec()),
            },
            StagedFile {
                path: fresh.clone(),
                contents: b"[new]".to_vec(),
                previous: None,
            },
            StagedFile {
                path: blocked.clone(),
                contents: b"[new]".to_vec(),
                previous: None,
            },
        ];

        assert!(commit_files(&files).await.is_err());
        assert_eq!(fs::read(&kept).await.unwrap(), b"[old]");
        assert!(!fresh.exists());
        assert!(blocked.is_dir());
        for file in &files {
            assert!(!temp_path(&file.path).exists());
        }
    }
}
