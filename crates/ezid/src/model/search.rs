use crate::{GroupId, Identifier, OwnerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The document kept in the search index for one identifier, and its local
/// mirror row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub identifier: String,
    pub owner: Option<OwnerId>,
    pub owner_group: Option<GroupId>,
    pub status: String,
    pub target: String,
    pub export: bool,
    pub is_test: bool,
    pub link_is_broken: bool,
    pub has_issues: bool,
    pub create_time: u64,
    pub update_time: u64,
    pub metadata: BTreeMap<String, String>,
}

impl SearchDocument {
    pub fn from_identifier(record: &Identifier) -> Self {
        Self {
            identifier: record.identifier.clone(),
            owner: record.owner.clone(),
            owner_group: record.owner_group.clone(),
            status: record.status.code(),
            target: record.target.clone(),
            export: record.export,
            is_test: record.is_test,
            link_is_broken: record.link_is_broken,
            has_issues: record.has_issues,
            create_time: record.create_time,
            update_time: record.update_time,
            metadata: record.metadata.clone(),
        }
    }
}
