use crate::OwnerId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Progress of a bulk export job.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStage {
    Created,
    Harvesting,
    Compressing,
    Notifying,
}

/// A request for a bulk export.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub requestor: OwnerId,
    /// `anvl`, `csv` or `xml`.
    pub format: String,
    pub compression: String,
    pub query: BTreeMap<String, String>,
    pub notify: Vec<String>,
}

/// A queued bulk export job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadEntry {
    pub seq: u64,
    pub request_time: u64,
    pub filename: String,
    pub stage: DownloadStage,
    pub request: DownloadRequest,
}
