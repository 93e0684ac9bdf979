//! Reconciliation of API-reported facts against stored rows.

use super::{FactKey, MemoryFact};
use serde::Serialize;
use std::collections::BTreeSet;

/// Each side of the delta lists at most this many keys.
pub const MAX_DELTA_ENTRIES: usize = 20;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct FactKeyPartition {
    pub api_only: BTreeSet<FactKey>,
    pub db_only: BTreeSet<FactKey>,
    pub shared: BTreeSet<FactKey>,
}

pub fn partition_fact_keys(api_facts: &[MemoryFact], db_facts: &[MemoryFact]) -> FactKeyPartition {
    let api: BTreeSet<FactKey> = api_facts.iter().map(MemoryFact::identity_key).collect();
    let db: BTreeSet<FactKey> = db_facts.iter().map(MemoryFact::identity_key).collect();

    FactKeyPartition {
        api_only: api.difference(&db).cloned().collect(),
        db_only: db.difference(&api).cloned().collect(),
        shared: api.intersection(&db).cloned().collect(),
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FactDelta {
    pub api_only: Vec<FactKey>,
    pub db_only: Vec<FactKey>,
    pub api_only_total: usize,
    pub db_only_total: usize,
}

impl FactDelta {
    pub fn is_consistent(&self) -> bool {
        self.api_only_total == 0 && self.db_only_total == 0
    }
}

/// Symmetric difference of the two fact key sets, sorted, each side capped at
/// [`MAX_DELTA_ENTRIES`].
pub fn compare_facts(api_facts: &[MemoryFact], db_facts: &[MemoryFact]) -> FactDelta {
    let partition = partition_fact_keys(api_facts, db_facts);
    FactDelta {
        api_only_total: partition.api_only.len(),
        db_only_total: partition.db_only.len(),
        api_only: partition.api_only.into_iter().take(MAX_DELTA_ENTRIES).collect(),
        db_only: partition.db_only.into_iter().take(MAX_DELTA_ENTRIES).collect(),
    }
}
