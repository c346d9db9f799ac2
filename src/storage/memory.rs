use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::gateway::{sort_by_time, sort_results, sort_tasks, stage_samples, PersistenceGateway, TaskInfo};
use crate::analysis::AnalysisResult;
use crate::core::{ChannelId, Sample};
use crate::error::{StorageError, StorageResult};

#[derive(Default)]
struct MemoryState {
    last_task_id: i64,
    last_analysis_id: i64,
    tasks: BTreeMap<i64, TaskInfo>,
    samples: HashMap<(i64, ChannelId), Vec<Sample>>,
    results: Vec<AnalysisResult>,
}

impl MemoryState {
    fn require_task(&self, task_id: i64) -> StorageResult<()> {
        if self.tasks.contains_key(&task_id) {
            Ok(())
        } else {
            Err(StorageError::TaskNotFound(task_id))
        }
    }

    fn channel(&self, task_id: i64, channel: ChannelId) -> &[Sample] {
        self.samples
            .get(&(task_id, channel))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Process-local store, mainly for tests and short-lived sessions
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersistenceGateway for MemoryStore {
    async fn create_task(&self, info: &TaskInfo) -> StorageResult<i64> {
        let mut state = self.state.write().await;
        state.last_task_id += 1;
        let task_id = state.last_task_id;

        let mut task = info.clone();
        task.task_id = task_id;
        state.tasks.insert(task_id, task);

        debug!("Created task {}", task_id);
        Ok(task_id)
    }

    async fn update_task(&self, info: &TaskInfo) -> StorageResult<()> {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .get_mut(&info.task_id)
            .ok_or(StorageError::TaskNotFound(info.task_id))?;
        *task = info.clone();
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> StorageResult<TaskInfo> {
        let state = self.state.read().await;
        state
            .tasks
            .get(&task_id)
            .cloned()
            .ok_or(StorageError::TaskNotFound(task_id))
    }

    async fn list_tasks(&self) -> StorageResult<Vec<TaskInfo>> {
        let state = self.state.read().await;
        let mut tasks: Vec<TaskInfo> = state.tasks.values().cloned().collect();
        sort_tasks(&mut tasks);
        Ok(tasks)
    }

    async fn delete_task(&self, task_id: i64) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state
            .tasks
            .remove(&task_id)
            .ok_or(StorageError::TaskNotFound(task_id))?;
        state.samples.retain(|(task, _), _| *task != task_id);
        state.results.retain(|result| result.task_id != task_id);

        debug!("Deleted task {}", task_id);
        Ok(())
    }

    async fn save_samples(&self, task_id: i64, channel: ChannelId, samples: &[Sample]) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.require_task(task_id)?;
        if samples.is_empty() {
            return Ok(());
        }

        let staged = stage_samples(state.channel(task_id, channel), channel, samples)?;
        state.samples.insert((task_id, channel), staged);
        Ok(())
    }

    async fn load_samples(&self, task_id: i64, channel: ChannelId) -> StorageResult<Vec<Sample>> {
        let state = self.state.read().await;
        state.require_task(task_id)?;

        let mut samples = state.channel(task_id, channel).to_vec();
        sort_by_time(&mut samples);
        Ok(samples)
    }

    async fn save_analysis_result(&self, result: &AnalysisResult) -> StorageResult<i64> {
        let mut state = self.state.write().await;
        state.require_task(result.task_id)?;

        state.last_analysis_id += 1;
        let analysis_id = state.last_analysis_id;

        let mut stored = result.clone();
        stored.analysis_id = Some(analysis_id);
        state.results.push(stored);
        Ok(analysis_id)
    }

    async fn analysis_results(
        &self,
        task_id: i64,
        channel: Option<ChannelId>,
    ) -> StorageResult<Vec<AnalysisResult>> {
        let state = self.state.read().await;
        state.require_task(task_id)?;

        let mut results: Vec<AnalysisResult> = state
            .results
            .iter()
            .filter(|r| r.task_id == task_id && channel.map_or(true, |ch| r.channel == ch))
            .cloned()
            .collect();
        sort_results(&mut results);
        Ok(results)
    }

    async fn save_multi_channel(
        &self,
        task_id: i64,
        data: &BTreeMap<ChannelId, Vec<Sample>>,
    ) -> StorageResult<()> {
        let mut state = self.state.write().await;
        state.require_task(task_id)?;

        let mut staged = Vec::with_capacity(data.len());
        for (&channel, samples) in data {
            if samples.is_empty() {
                continue;
            }
            staged.push((channel, stage_samples(state.channel(task_id, channel), channel, samples)?));
        }

        for (channel, samples) in staged {
            state.samples.insert((task_id, channel), samples);
        }
        Ok(())
    }
}
