use std::collections::BTreeMap;

use super::{PersistenceGateway, TaskInfo};
use crate::analysis::SpectralEngine;
use crate::buffers::SampleBuffer;
use crate::core::{ChannelId, Sample};
use crate::error::StorageResult;

/// Store a snapshot of `buffer` as a new task.
///
/// Every enabled channel of `task` is analysed and its result saved, the
/// samples are written in one multi-channel save, and the task's duration is
/// updated to the longest channel span. Returns the stored task and the snapshot.
pub async fn persist_capture(
    store: &dyn PersistenceGateway,
    engine: &SpectralEngine,
    mut task: TaskInfo,
    buffer: &SampleBuffer,
) -> StorageResult<(TaskInfo, BTreeMap<ChannelId, Vec<Sample>>)> {
    let task_id = store.create_task(&task).await?;
    task.task_id = task_id;

    let mut snapshot = BTreeMap::new();
    let mut duration: f64 = 0.0;
    for &channel in &task.enabled_channels {
        let samples = buffer.read(channel, None);
        if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
            duration = duration.max(last.time - first.time);
        }

        let result = engine.analyze(&samples, task_id, channel, task.sample_rate);
        store.save_analysis_result(&result).await?;
        snapshot.insert(channel, samples);
    }
    store.save_multi_channel(task_id, &snapshot).await?;

    task.duration = duration;
    store.update_task(&task).await?;

    Ok((task, snapshot))
}
