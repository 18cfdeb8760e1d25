use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::Position;

/// The set of positions observed during this process's lifetime.
///
/// Entries are never evicted. [`observe`](Self::observe) is atomic, so the reconciliation path and
/// the live path may race on the same position and exactly one of them wins.
#[derive(Debug, Default)]
pub struct DedupLedger {
    seen: Arc<Mutex<HashSet<Position>>>,
}

impl DedupLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `position`. Returns `true` the first time a position is observed and `false`
    /// (without changing anything) afterwards.
    pub fn observe(&self, position: Position) -> bool {
        lock(&self.seen).insert(position)
    }

    /// Removes `position`, so it can be observed again. Used when an observed entry could not be
    /// handed to the consumer.
    pub fn forget(&self, position: &Position) -> bool {
        lock(&self.seen).remove(position)
    }

    #[must_use]
    pub fn contains(&self, position: &Position) -> bool {
        lock(&self.seen).contains(position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.seen).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A read-only handle that follows the ledger as it grows.
    #[must_use]
    pub fn view(&self) -> LedgerView {
        LedgerView { seen: Arc::clone(&self.seen) }
    }
}

/// Read-only access to a [`DedupLedger`], for audits and reporting.
#[derive(Clone, Debug)]
pub struct LedgerView {
    seen: Arc<Mutex<HashSet<Position>>>,
}

impl LedgerView {
    #[must_use]
    pub fn contains(&self, position: &Position) -> bool {
        lock(&self.seen).contains(position)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.seen).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The positions in `candidates` that were never observed, in the order given.
    #[must_use]
    pub fn missing<'a>(&self, candidates: impl IntoIterator<Item = &'a Position>) -> Vec<Position> {
        let seen = lock(&self.seen);
        candidates.into_iter().filter(|position| !seen.contains(position)).copied().collect()
    }
}

fn lock(seen: &Mutex<HashSet<Position>>) -> MutexGuard<'_, HashSet<Position>> {
    seen.lock().unwrap_or_else(PoisonError::into_inner)
}
