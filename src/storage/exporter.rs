use log::info;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;

use super::TaskInfo;
use crate::core::{amplitudes, ChannelId, Sample};
use crate::error::{StorageError, StorageResult};

/// Writes channel data as a JSON object keyed by channel id, each value being
/// the channel's amplitude array. Timestamps are not exported.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    pretty: bool,
}

impl Default for JsonExporter {
    fn default() -> Self {
        Self { pretty: true }
    }
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compact() -> Self {
        Self { pretty: false }
    }

    pub async fn export_channel(&self, path: &Path, channel: ChannelId, samples: &[Sample]) -> StorageResult<()> {
        if samples.is_empty() {
            return Err(StorageError::NothingToExport);
        }
        let mut data = BTreeMap::new();
        data.insert(channel, samples.to_vec());
        self.export_channels(path, &data).await
    }

    /// Export several channels into one file; empty channels are left out
    pub async fn export_channels(&self, path: &Path, data: &BTreeMap<ChannelId, Vec<Sample>>) -> StorageResult<()> {
        let root = to_document(data);
        if root.is_empty() {
            return Err(StorageError::NothingToExport);
        }

        let json = if self.pretty {
            serde_json::to_vec_pretty(&Value::Object(root))?
        } else {
            serde_json::to_vec(&Value::Object(root))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, &json).await?;

        info!("Exported {} channels ({} bytes) to {}", data.len(), json.len(), path.display());
        Ok(())
    }

    /// Export the task's enabled channels, skipping any not present in `data`
    pub async fn export_task(
        &self,
        path: &Path,
        task: &TaskInfo,
        data: &BTreeMap<ChannelId, Vec<Sample>>,
    ) -> StorageResult<()> {
        let selected: BTreeMap<ChannelId, Vec<Sample>> = task
            .enabled_channels
            .iter()
            .filter_map(|ch| data.get(ch).map(|samples| (*ch, samples.clone())))
            .collect();
        self.export_channels(path, &selected).await
    }
}

fn to_document(data: &BTreeMap<ChannelId, Vec<Sample>>) -> Map<String, Value> {
    data.iter()
        .filter(|(_, samples)| !samples.is_empty())
        .map(|(channel, samples)| (channel.to_string(), Value::from(amplitudes(samples))))
        .collect()
}
