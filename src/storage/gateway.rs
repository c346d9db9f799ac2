use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::analysis::AnalysisResult;
use crate::core::{is_valid_channel, ChannelId, Sample};
use crate::error::{StorageError, StorageResult};

/// Samples are staged in chunks of this many points
pub const SAVE_CHUNK_SIZE: usize = 1000;

/// Metadata describing one recorded acquisition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    /// Zero until the task has been created by a store
    pub task_id: i64,
    pub task_name: String,
    pub sample_rate: f64,
    /// Recorded length in seconds
    pub duration: f64,
    pub channel_count: usize,
    pub create_time: DateTime<Local>,
    pub description: String,
    pub enabled_channels: Vec<ChannelId>,
}

impl TaskInfo {
    pub fn new(task_name: impl Into<String>, sample_rate: f64, enabled_channels: Vec<ChannelId>) -> Self {
        Self {
            task_id: 0,
            task_name: task_name.into(),
            sample_rate,
            duration: 0.0,
            channel_count: enabled_channels.len(),
            create_time: Local::now(),
            description: String::new(),
            enabled_channels,
        }
    }

    /// Case-insensitive substring match on name or description
    pub fn matches(&self, keyword: &str) -> bool {
        let keyword = keyword.to_lowercase();
        self.task_name.to_lowercase().contains(&keyword)
            || self.description.to_lowercase().contains(&keyword)
    }
}

/// Storage for tasks, their per-channel samples and analysis results.
///
/// Every mutating call is all-or-nothing: when it fails, nothing it would
/// have written is visible afterwards.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Store a new task and return its id; `info.task_id` is ignored
    async fn create_task(&self, info: &TaskInfo) -> StorageResult<i64>;

    async fn update_task(&self, info: &TaskInfo) -> StorageResult<()>;

    async fn get_task(&self, task_id: i64) -> StorageResult<TaskInfo>;

    /// All tasks, newest first
    async fn list_tasks(&self) -> StorageResult<Vec<TaskInfo>>;

    async fn search_tasks(&self, keyword: &str) -> StorageResult<Vec<TaskInfo>> {
        let tasks = self.list_tasks().await?;
        Ok(tasks.into_iter().filter(|task| task.matches(keyword)).collect())
    }

    /// Remove a task together with its samples and analysis results
    async fn delete_task(&self, task_id: i64) -> StorageResult<()>;

    /// Append samples to a task's channel
    async fn save_samples(&self, task_id: i64, channel: ChannelId, samples: &[Sample]) -> StorageResult<()>;

    /// Samples of one channel ordered by time
    async fn load_samples(&self, task_id: i64, channel: ChannelId) -> StorageResult<Vec<Sample>>;

    /// Persist a result and return its assigned id
    async fn save_analysis_result(&self, result: &AnalysisResult) -> StorageResult<i64>;

    /// Results for a task, optionally restricted to one channel, newest first
    async fn analysis_results(
        &self,
        task_id: i64,
        channel: Option<ChannelId>,
    ) -> StorageResult<Vec<AnalysisResult>>;

    /// Append samples to several channels at once; either all channels are saved or none
    async fn save_multi_channel(
        &self,
        task_id: i64,
        data: &BTreeMap<ChannelId, Vec<Sample>>,
    ) -> StorageResult<()>;

    async fn load_multi_channel(
        &self,
        task_id: i64,
        channels: &[ChannelId],
    ) -> StorageResult<BTreeMap<ChannelId, Vec<Sample>>> {
        let mut data = BTreeMap::new();
        for &channel in channels {
            data.insert(channel, self.load_samples(task_id, channel).await?);
        }
        Ok(data)
    }
}

/// Build the post-commit contents of a channel without touching `existing`.
///
/// The new samples are validated and appended chunk by chunk; the caller swaps
/// the result in only if this returns `Ok`.
pub(crate) fn stage_samples(
    existing: &[Sample],
    channel: ChannelId,
    samples: &[Sample],
) -> StorageResult<Vec<Sample>> {
    if !is_valid_channel(channel) {
        return Err(StorageError::InvalidChannel(channel));
    }

    let mut staged = Vec::with_capacity(existing.len() + samples.len());
    staged.extend_from_slice(existing);

    let total = samples.len();
    for (chunk_index, chunk) in samples.chunks(SAVE_CHUNK_SIZE).enumerate() {
        let offset = chunk_index * SAVE_CHUNK_SIZE;
        if let Some(bad) = chunk
            .iter()
            .position(|s| !(s.time.is_finite() && s.amplitude.is_finite()))
        {
            return Err(StorageError::InvalidSample { index: offset + bad });
        }
        staged.extend_from_slice(chunk);
        debug!(
            "Staged channel {} samples {}/{}",
            channel,
            offset + chunk.len(),
            total
        );
    }

    Ok(staged)
}

/// Stable sort by timestamp
pub(crate) fn sort_by_time(samples: &mut [Sample]) {
    samples.sort_by(|a, b| a.time.total_cmp(&b.time));
}

/// Newest first, ties broken by the larger id
pub(crate) fn sort_tasks(tasks: &mut [TaskInfo]) {
    tasks.sort_by(|a, b| {
        b.create_time
            .cmp(&a.create_time)
            .then(b.task_id.cmp(&a.task_id))
    });
}

pub(crate) fn sort_results(results: &mut [AnalysisResult]) {
    results.sort_by(|a, b| {
        b.analysis_time
            .cmp(&a.analysis_time)
            .then(b.analysis_id.cmp(&a.analysis_id))
    });
}
