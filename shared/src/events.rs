use serde::{Deserialize, Serialize};

use crate::stall::{Stall, StallMap, StallStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StallEvent {
    Snapshot {
        #[serde(default)]
        seq: u64,
        stalls: StallMap,
        timestamp: String,
    },
    Update {
        #[serde(default)]
        seq: u64,
        changes: Vec<StallChange>,
        timestamp: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStalls {
    pub seq: u64,
    pub timestamp: String,
    pub stalls: StallMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StallChange {
    pub stall: Stall,
    #[serde(default)]
    pub previous_status: Option<StallStatus>,
}

/// Apply incremental changes to a stall map, replacing entries by stall number.
pub fn apply_stall_changes(stalls: &mut StallMap, changes: &[StallChange]) {
    for change in changes {
        stalls.insert(change.stall.stall_number.clone(), change.stall.clone());
    }
}
