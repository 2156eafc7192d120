use std::sync::{Mutex, PoisonError};

use rustc_hash::FxHashSet;

use super::normalize_domain;
use crate::error::FlattenError;

/// Outcome of asking to walk a domain's policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// First visit; `count` is the number of chain lookups including this one.
    First { count: usize },
    /// Already walked in this run.
    Revisit,
}

/// Chain lookups spent in one run, shared by every concurrent walker.
///
/// The visited set doubles as the lookup counter: a domain is charged once,
/// the first time it is walked.
pub struct LookupBudget {
    visited: Mutex<FxHashSet<String>>,
    max_lookups: usize,
}

impl LookupBudget {
    pub fn new(max_lookups: usize) -> Self {
        Self {
            visited: Mutex::new(FxHashSet::default()),
            max_lookups,
        }
    }

    pub fn max_lookups(&self) -> usize {
        self.max_lookups
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Check the budget and record `domain` as visited, atomically.
    ///
    /// A revisit costs nothing and never fails, so whether a run exceeds the
    /// budget depends only on how many distinct domains it reaches, not on
    /// the order concurrent walks get here.
    pub fn enter(&self, domain: &str) -> Result<Visit, FlattenError> {
        let domain = normalize_domain(domain);
        let mut visited = self.lock();

        if visited.contains(&domain) {
            return Ok(Visit::Revisit);
        }
        if visited.len() >= self.max_lookups {
            return Err(FlattenError::LookupLimitExceeded {
                domain,
                count: visited.len(),
                max: self.max_lookups,
            });
        }

        visited.insert(domain);
        Ok(Visit::First {
            count: visited.len(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FxHashSet<String>> {
        // The set is never left half-updated, so a poisoned lock is still usable.
        self.visited.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn enter_counts_distinct_domains() {
        let budget = LookupBudget::new(10);

        assert_eq!(budget.enter("a.example").unwrap(), Visit::First { count: 1 });
        assert_eq!(budget.enter("b.example").unwrap(), Visit::First { count: 2 });
        assert_eq!(budget.enter("A.Example.").unwrap(), Visit::Revisit);
        assert_eq!(budget.count(), 2);
    }

    #[test]
    fn enter_fails_once_budget_is_spent() {
        let budget = LookupBudget::new(2);
        budget.enter("a.example").unwrap();
        budget.enter("b.example").unwrap();

        let err = budget.enter("c.example").unwrap_err();

        assert!(matches!(
            err,
            FlattenError::LookupLimitExceeded { ref domain, count: 2, max: 2 } if domain == "c.example"
        ));
        assert_eq!(budget.count(), 2);
    }

    #[test]
    fn revisit_after_budget_is_spent_is_free() {
        let budget = LookupBudget::new(2);
        budget.enter("a.example").unwrap();
        budget.enter("b.example").unwrap();

        assert_eq!(budget.enter("A.example").unwrap(), Visit::Revisit);
        assert!(budget.enter("c.example").is_err());
        assert_eq!(budget.enter("b.example").unwrap(), Visit::Revisit);
        assert_eq!(budget.count(), 2);
    }

    #[test]
    fn concurrent_entries_are_charged_once() {
        let budget = Arc::new(LookupBudget::new(100));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let budget = Arc::clone(&budget);
                std::thread::spawn(move || {
                    (0..20)
                        .filter(|i| {
                            matches!(
                                budget.enter(&format!("d{i}.example")),
                                Ok(Visit::First { .. })
                            )
                        })
                        .count()
                })
            })
            .collect();
        let firsts: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(firsts, 20);
        assert_eq!(budget.count(), 20);
    }
}
