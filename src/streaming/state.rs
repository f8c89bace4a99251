//! Fragment cut accounting

use crate::config::{FragmentUnit, ReplicationConfig};

/// When to cut the next fragment of a streaming transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamingState {
    unit: FragmentUnit,
    threshold: u64,
    fill: u64,
}

impl StreamingState {
    /// `threshold` of 0 disables streaming.
    pub fn new(unit: FragmentUnit, threshold: u64) -> Self {
        Self {
            unit,
            threshold,
            fill: 0,
        }
    }

    pub fn disabled() -> Self {
        Self::new(FragmentUnit::Bytes, 0)
    }

    pub fn from_config(config: &ReplicationConfig) -> Self {
        Self::new(config.fragment_unit, config.fragment_size)
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    pub fn unit(&self) -> FragmentUnit {
        self.unit
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn fill(&self) -> u64 {
        self.fill
    }

    /// A row was written; `pending_bytes` is the builder size since the
    /// last cut. Returns true when a fragment is due.
    pub fn on_row(&mut self, pending_bytes: usize) -> bool {
        match self.unit {
            FragmentUnit::Bytes => self.fill = pending_bytes as u64,
            FragmentUnit::Rows => self.fill += 1,
            FragmentUnit::Statements => {}
        }
        self.is_due()
    }

    /// A statement ended. Returns true when a fragment is due.
    pub fn on_statement(&mut self) -> bool {
        if self.unit == FragmentUnit::Statements {
            self.fill += 1;
        }
        self.is_due()
    }

    pub fn is_due(&self) -> bool {
        self.is_enabled() && self.fill >= self.threshold
    }

    /// A fragment was cut.
    pub fn reset(&mut self) {
        self.fill = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_fires() {
        let mut state = StreamingState::disabled();
        assert!(!state.on_row(1 << 20));
        assert!(!state.on_statement());
    }

    #[test]
    fn test_bytes_track_pending_size() {
        let mut state = StreamingState::new(FragmentUnit::Bytes, 1024);
        assert!(!state.on_row(1000));
        assert!(state.on_row(1100));
        state.reset();
        assert!(!state.is_due());
    }

    #[test]
    fn test_rows_count_rows() {
        let mut state = StreamingState::new(FragmentUnit::Rows, 3);
        assert!(!state.on_row(10));
        assert!(!state.on_row(10));
        assert!(!state.on_statement());
        assert!(state.on_row(10));
    }

    #[test]
    fn test_statements_ignore_rows() {
        let mut state = StreamingState::new(FragmentUnit::Statements, 2);
        for _ in 0..10 {
            assert!(!state.on_row(100));
        }
        assert!(!state.on_statement());
        assert!(state.on_statement());
    }
}
