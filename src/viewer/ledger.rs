//! Failed page ledger

use std::collections::BTreeSet;

/// Pages whose escalation could not produce even the lowest tier.
///
/// Entries persist until an explicit retry clears them; while a page is
/// listed no automatic escalation is started for it.
#[derive(Debug, Default)]
pub struct FailureLedger {
    failed: BTreeSet<u32>,
}

impl FailureLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the page was not already listed
    pub fn mark_failed(&mut self, page: u32) -> bool {
        self.failed.insert(page)
    }

    #[must_use]
    pub fn is_failed(&self, page: u32) -> bool {
        self.failed.contains(&page)
    }

    /// Returns true if the page was listed
    pub fn clear(&mut self, page: u32) -> bool {
        self.failed.remove(&page)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.failed.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_clear() {
        let mut ledger = FailureLedger::new();
        assert!(ledger.mark_failed(7));
        assert!(!ledger.mark_failed(7));
        assert!(ledger.is_failed(7));
        assert!(!ledger.is_failed(8));
        assert_eq!(ledger.len(), 1);

        assert!(ledger.clear(7));
        assert!(!ledger.clear(7));
        assert!(ledger.is_empty());
    }

    #[test]
    fn iter_is_sorted() {
        let mut ledger = FailureLedger::new();
        for page in [9, 2, 5] {
            ledger.mark_failed(page);
        }
        assert_eq!(ledger.iter().collect::<Vec<_>>(), vec![2, 5, 9]);
    }
}
