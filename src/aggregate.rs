//! Sliding-window percentage aggregation
//!
//! Per transaction name the aggregator batches the most recent completed
//! transactions. Once a name's window fills it computes, for every distinct
//! action observed in the window, the share of the summed transaction time
//! spent in that action, emits a report and resets the window to empty (a
//! reset window, not a walking one).

use crate::transaction::Transaction;
use chrono::{DateTime, Local};
use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// Percentage breakdown of one completed aggregation window.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    /// Name of the transactions aggregated
    pub transaction_name: String,
    /// When the window completed
    pub timestamp: DateTime<Local>,
    /// Action name -> percentage of total window time, in first-occurrence
    /// order
    pub percentages: IndexMap<String, f64>,
}

impl AggregateReport {
    fn from_window(transaction_name: String, window: &[Transaction]) -> Self {
        let mut sums: IndexMap<String, u64> = IndexMap::new();
        let mut total: u64 = 0;

        for tx in window {
            for record in &tx.actions {
                *sums.entry(record.name.clone()).or_insert(0) += record.duration_millis;
            }
            total += tx.duration_millis;
        }

        // A window of zero total duration reports 0% for every action
        // instead of dividing by zero
        let percentages = sums
            .into_iter()
            .map(|(action, millis)| {
                let pct = if total == 0 {
                    0.0
                } else {
                    millis as f64 * 100.0 / total as f64
                };
                (action, pct)
            })
            .collect();

        Self {
            transaction_name,
            timestamp: Local::now(),
            percentages,
        }
    }
}

/// Render a percentage with at most four decimals and at least one, so
/// repeating fractions stay readable and round values print as `50.0`.
fn fmt_pct(pct: f64) -> String {
    let mut s = format!("{pct:.4}");
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.push('0');
    }
    s
}

impl fmt::Display for AggregateReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        writeln!(f, "------{{{{ AGG: {}", self.transaction_name)?;
        for (action, pct) in &self.percentages {
            writeln!(f, "{}% - {}", fmt_pct(*pct), action)?;
        }
        write!(f, "------}}}}")
    }
}

/// Per-name reset windows of recently completed transactions.
///
/// Owned exclusively by the writer thread; transactions move in through
/// [`Aggregator::add`] and are released when their window completes.
pub struct Aggregator {
    window: usize,
    pending: HashMap<String, Vec<Transaction>>,
}

impl Aggregator {
    /// Create an aggregator emitting a report every `window` transactions
    /// per name.
    ///
    /// # Panics
    ///
    /// Panics if `window` is 0.
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "Aggregation window must be > 0");
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Absorb a completed transaction. Returns the report when this
    /// transaction fills its name's window; the window restarts empty.
    pub fn add(&mut self, tx: Transaction) -> Option<AggregateReport> {
        let name = tx.name.clone();
        let window = self.window;
        let pending = self
            .pending
            .entry(name.clone())
            .or_insert_with(|| Vec::with_capacity(window));
        pending.push(tx);

        if pending.len() < window {
            return None;
        }
        let batch = self.pending.remove(&name).unwrap_or_default();
        Some(AggregateReport::from_window(name, &batch))
    }

    /// Number of transactions currently pending for `name`.
    pub fn pending_len(&self, name: &str) -> usize {
        self.pending.get(name).map_or(0, Vec::len)
    }
}
