use crate::bootstrap::{AttemptRecord, StrategyKind};

/// What the last bootstrap and paint did, for the status panel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugSnapshot {
    pub attempts: Vec<AttemptRecord>,
    pub winning_strategy: Option<StrategyKind>,
    pub matched: usize,
    pub unmatched: usize,
    pub duplicate_keys: usize,
    pub painted: usize,
    pub apply_failures: usize,
}

impl DebugSnapshot {
    pub fn summary(&self) -> String {
        let strategy = self
            .winning_strategy
            .map(StrategyKind::label)
            .unwrap_or("none");
        format!(
            "strategy {strategy} after {} attempt(s); {} matched, {} unassigned, {} duplicate key(s); {} painted, {} failed",
            self.attempts.len(),
            self.matched,
            self.unmatched,
            self.duplicate_keys,
            self.painted,
            self.apply_failures,
        )
    }
}
