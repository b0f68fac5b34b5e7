//! Verdict Aggregation
//!
//! How a collection node folds its own verdict and its children's into one:
//!
//! 1. every verdict valid: valid;
//! 2. otherwise any invalid: the first invalid in position order (own
//!    verdict first, then children in key order);
//! 3. otherwise some are pending: a pending verdict racing the pending
//!    inputs.
//!
//! The race settles with the first input that settles invalid. If every
//! input settles valid it settles valid once the last one does.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::reactive::Pending;
use crate::result::Verdict;

/// Fold `verdicts` (in position order) into one.
pub fn combine<'a, I>(verdicts: I, cache: &mut RaceCache) -> Verdict
where
    I: IntoIterator<Item = &'a Verdict>,
{
    let mut pendings = Vec::new();
    for verdict in verdicts {
        match verdict {
            Verdict::Valid => {}
            Verdict::Invalid(_) => return verdict.clone(),
            Verdict::Pending(pending) => pendings.push(pending.clone()),
        }
    }

    if pendings.is_empty() {
        Verdict::Valid
    } else {
        Verdict::Pending(cache.race(pendings))
    }
}

/// Race `inputs`: the first to settle invalid wins, otherwise valid once all
/// have settled.
pub fn race(inputs: &[Pending]) -> Pending {
    match inputs {
        [] => return Pending::ready(Verdict::Valid),
        [single] => return single.clone(),
        _ => {}
    }

    let (output, settler) = Pending::new();
    let slot = Arc::new(Mutex::new(Some(settler)));
    let remaining = Arc::new(AtomicUsize::new(inputs.len()));

    for input in inputs {
        let slot = slot.clone();
        let remaining = remaining.clone();
        input.on_settle(move |verdict| {
            let result = if verdict.is_invalid() {
                verdict.clone()
            } else if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                Verdict::Valid
            } else {
                return;
            };
            let settler = slot.lock().take();
            if let Some(settler) = settler {
                settler.settle(result);
            }
        });
    }

    output
}

/// Remembers the last race so that republishing with the same pending
/// inputs yields the same handle, and therefore an equal status.
#[derive(Debug, Default)]
pub struct RaceCache {
    inputs: Vec<Pending>,
    output: Option<Pending>,
}

impl RaceCache {
    pub fn race(&mut self, inputs: Vec<Pending>) -> Pending {
        if let Some(output) = &self.output {
            if self.inputs.len() == inputs.len()
                && self.inputs.iter().zip(&inputs).all(|(a, b)| a.ptr_eq(b))
            {
                return output.clone();
            }
        }

        let output = race(&inputs);
        self.inputs = inputs;
        self.output = Some(output.clone());
        output
    }

    pub fn clear(&mut self) {
        self.inputs.clear();
        self.output = None;
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn combined(verdicts: &[Verdict]) -> Verdict {
        combine(verdicts.iter(), &mut RaceCache::default())
    }

    #[test]
    fn all_valid_is_valid() {
        assert_eq!(combined(&[]), Verdict::Valid);
        assert_eq!(combined(&[Verdict::Valid, Verdict::Valid]), Verdict::Valid);
    }

    #[test]
    fn first_invalid_wins_over_pending() {
        let (pending, _settler) = Pending::new();
        let verdict = combined(&[
            Verdict::Valid,
            Verdict::Pending(pending),
            Verdict::invalid("first"),
            Verdict::invalid("second"),
        ]);
        assert_eq!(verdict.reason(), Some("first"));
    }

    #[test]
    fn race_settles_on_first_invalid() {
        let (a, settle_a) = Pending::new();
        let (b, settle_b) = Pending::new();
        let out = race(&[a, b]);

        settle_b.settle(Verdict::invalid("b failed"));
        assert_eq!(out.peek().unwrap().reason(), Some("b failed"));

        // A later verdict does not overwrite the first.
        settle_a.settle(Verdict::invalid("a failed"));
        assert_eq!(out.peek().unwrap().reason(), Some("b failed"));
    }

    #[test]
    fn race_waits_for_all_valid() {
        let (a, settle_a) = Pending::new();
        let (b, settle_b) = Pending::new();
        let out = race(&[a, b]);

        settle_a.settle(Verdict::Valid);
        assert!(!out.is_settled());
        settle_b.settle(Verdict::Valid);
        assert_eq!(out.peek(), Some(Verdict::Valid));
    }

    #[test]
    fn race_of_settled_inputs_settles_immediately() {
        let out = race(&[
            Pending::ready(Verdict::Valid),
            Pending::ready(Verdict::invalid("done")),
        ]);
        assert_eq!(out.peek().unwrap().reason(), Some("done"));
    }

    #[test]
    fn cache_reuses_race_for_same_inputs() {
        let (a, _sa) = Pending::new();
        let (b, _sb) = Pending::new();
        let (c, _sc) = Pending::new();
        let mut cache = RaceCache::default();

        let first = cache.race(vec![a.clone(), b.clone()]);
        let again = cache.race(vec![a.clone(), b.clone()]);
        assert!(first.ptr_eq(&again));

        let other = cache.race(vec![a, c]);
        assert!(!first.ptr_eq(&other));
    }
}
