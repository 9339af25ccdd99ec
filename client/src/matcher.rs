use std::collections::HashMap;

use stallmap_shared::{Stall, normalize_key};

use crate::log;
use crate::sdk::MapSpace;

/// Normalized stall-number lookup. Rebuilt whenever the stall list changes.
#[derive(Debug, Clone, Default)]
pub struct StallIndex {
    by_key: HashMap<String, Stall>,
    duplicate_keys: usize,
}

impl StallIndex {
    /// Later stalls overwrite earlier ones that normalize to the same key.
    pub fn build(stalls: &[Stall]) -> Self {
        let mut by_key = HashMap::with_capacity(stalls.len());
        let mut duplicate_keys = 0;

        for stall in stalls {
            let key = normalize_key(Some(&stall.stall_number));
            if key.is_empty() {
                continue;
            }
            if let Some(previous) = by_key.insert(key.clone(), stall.clone()) {
                duplicate_keys += 1;
                log::warn(&format!(
                    "stall {:?} replaces {:?} under key {key:?}",
                    stall.stall_number, previous.stall_number
                ));
            }
        }

        Self {
            by_key,
            duplicate_keys,
        }
    }

    pub fn resolve(&self, space: &MapSpace) -> Option<&Stall> {
        let key = space.match_key();
        if key.is_empty() {
            return None;
        }
        self.by_key.get(&key)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn duplicate_keys(&self) -> usize {
        self.duplicate_keys
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment<'a> {
    pub space: &'a MapSpace,
    pub stall: Option<&'a Stall>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchReport<'a> {
    pub assignments: Vec<Assignment<'a>>,
    pub matched: usize,
    pub unmatched: usize,
}

/// Resolve every space against the index, preserving space order.
pub fn match_spaces<'a>(index: &'a StallIndex, spaces: &'a [MapSpace]) -> MatchReport<'a> {
    let mut matched = 0;
    let assignments: Vec<Assignment<'a>> = spaces
        .iter()
        .map(|space| {
            let stall = index.resolve(space);
            if stall.is_some() {
                matched += 1;
            }
            Assignment { space, stall }
        })
        .collect();

    MatchReport {
        unmatched: assignments.len() - matched,
        assignments,
        matched,
    }
}
