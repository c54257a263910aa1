//! Invalidation generations.
//!
//! Work that started before an invalidation must not publish its output after
//! it. Callers take a [`Stamp`] when the work starts and compare it against the
//! current generation before writing anything back.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    epoch: u64,
    symbol: u64,
}

/// Per-symbol counters plus an epoch that a clear-all advances.
#[derive(Debug, Default)]
pub struct Generations {
    epoch: u64,
    per_symbol: HashMap<String, u64>,
}

impl Generations {
    pub fn stamp(&self, symbol: &str) -> Stamp {
        Stamp {
            epoch: self.epoch,
            symbol: self.per_symbol.get(symbol).copied().unwrap_or(0),
        }
    }

    pub fn bump(&mut self, symbol: &str) {
        *self.per_symbol.entry(symbol.to_string()).or_insert(0) += 1;
    }

    /// Per-symbol counters restart, so the map only holds symbols
    /// invalidated since the last clear.
    pub fn bump_all(&mut self) {
        self.epoch += 1;
        self.per_symbol.clear();
    }

    pub fn is_current(&self, symbol: &str, stamp: Stamp) -> bool {
        self.stamp(symbol) == stamp
    }
}

/// [`Generations`] behind a lock, for holders without a table of their own.
#[derive(Debug, Default)]
pub struct SharedGenerations {
    inner: Mutex<Generations>,
}

impl SharedGenerations {
    fn lock(&self) -> MutexGuard<'_, Generations> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stamp(&self, symbol: &str) -> Stamp {
        self.lock().stamp(symbol)
    }

    pub fn bump(&self, symbol: &str) {
        self.lock().bump(symbol);
    }

    pub fn bump_all(&self) {
        self.lock().bump_all();
    }

    pub fn is_current(&self, symbol: &str, stamp: Stamp) -> bool {
        self.lock().is_current(symbol, stamp)
    }
}
