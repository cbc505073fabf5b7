// Copyright 2025 Taskcheck project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Expected-verdict mask evaluation.
//!
//! A mask character carries two predicates: one that every verdict of the test must satisfy,
//! and one that at least one verdict must satisfy. The outcome is definitive once no further
//! verdict could flip it: either the for-all part already failed, or it cannot fail (the
//! trivial predicate) and the exists part already passed.

use crate::solution::result::Verdict;

fn always(_: Verdict) -> bool {
    true
}

fn full_points(verdict: Verdict) -> bool {
    verdict == Verdict::Ok
}

fn zero_points(verdict: Verdict) -> bool {
    verdict.is_zero_point()
}

type Predicate = fn(Verdict) -> bool;

struct MaskSpec {
    for_all: Predicate,
    exists: Predicate,
    /// Whether the for-all predicate is the trivial one (can never fail later).
    all_is_trivial: bool,
}

impl MaskSpec {
    fn new(for_all: Predicate, exists: Predicate) -> MaskSpec {
        MaskSpec {
            for_all,
            exists,
            all_is_trivial: false,
        }
    }

    fn trivial_all(exists: Predicate) -> MaskSpec {
        MaskSpec {
            for_all: always,
            exists,
            all_is_trivial: true,
        }
    }
}

/// The (for-all, exists) predicate pair of a mask character.
fn mask_predicates(mask_char: char) -> Option<MaskSpec> {
    Some(match mask_char {
        '1' => MaskSpec::new(full_points, always),
        '0' => MaskSpec::trivial_all(zero_points),
        'X' => MaskSpec::trivial_all(always),
        'P' => MaskSpec::new(|v| !zero_points(v), |v| v == Verdict::PartialOk),
        'W' => MaskSpec::trivial_all(|v| v == Verdict::WrongAnswer),
        '!' => MaskSpec::trivial_all(|v| v == Verdict::Error),
        'T' => MaskSpec::trivial_all(|v| v == Verdict::Timeout),
        _ => return None,
    })
}

/// The evaluation of a verdict multiset against one mask character.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MaskEvaluation {
    pub satisfied: bool,
    pub definitive: bool,
    /// Index of a verdict that broke the for-all part, if one did.
    pub breaker: Option<usize>,
}

pub fn evaluate_verdicts(verdicts: &[Verdict], mask_char: char) -> MaskEvaluation {
    let spec = mask_predicates(mask_char)
        .unwrap_or_else(|| panic!("invalid mask character '{mask_char}'"));

    let breaker = verdicts.iter().position(|&v| !(spec.for_all)(v));
    if let Some(breaker) = breaker {
        return MaskEvaluation {
            satisfied: false,
            definitive: true,
            breaker: Some(breaker),
        };
    }

    let exists_ok = verdicts.iter().any(|&v| (spec.exists)(v));
    MaskEvaluation {
        satisfied: exists_ok,
        definitive: spec.all_is_trivial && exists_ok,
        breaker: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solution::result::Verdict::*;

    fn eval(verdicts: &[Verdict], c: char) -> (bool, bool) {
        let evaluation = evaluate_verdicts(verdicts, c);
        (evaluation.satisfied, evaluation.definitive)
    }

    #[test]
    fn mask_one_requires_every_verdict_ok() {
        assert_eq!(eval(&[Ok, Ok], '1'), (true, false));
        assert_eq!(eval(&[Ok, WrongAnswer], '1'), (false, true));
        assert_eq!(
            evaluate_verdicts(&[Ok, WrongAnswer, Timeout], '1').breaker,
            Some(1)
        );
        // An empty test trivially satisfies, and nothing is settled yet.
        assert_eq!(eval(&[], '1'), (true, false));
    }

    #[test]
    fn mask_zero_requires_some_zero_point_verdict() {
        assert_eq!(eval(&[Ok, Ok], '0'), (false, false));
        assert_eq!(eval(&[Ok, Timeout], '0'), (true, true));
        assert_eq!(eval(&[WrongAnswer], '0'), (true, true));
        assert_eq!(eval(&[PartialOk], '0'), (false, false));
    }

    #[test]
    fn mask_x_accepts_anything() {
        assert_eq!(eval(&[Ok, Error, PartialOk], 'X'), (true, true));
        assert_eq!(eval(&[], 'X'), (false, false));
    }

    #[test]
    fn mask_p_requires_partial_and_no_zero_point() {
        assert_eq!(eval(&[PartialOk, Ok], 'P'), (true, false));
        assert_eq!(eval(&[Ok], 'P'), (false, false));
        assert_eq!(eval(&[PartialOk, WrongAnswer], 'P'), (false, true));
    }

    #[test]
    fn specific_verdict_masks() {
        assert_eq!(eval(&[Ok, WrongAnswer], 'W'), (true, true));
        assert_eq!(eval(&[Ok], 'W'), (false, false));
        assert_eq!(eval(&[Error], '!'), (true, true));
        assert_eq!(eval(&[Timeout], 'T'), (true, true));
        assert_eq!(eval(&[WrongAnswer], 'T'), (false, false));
    }

    /// The quantifier formulation of the table: `evaluate(V, c)` equals
    /// `(∀v: all_c(v)) ∧ (∃v: any_c(v))` for every character and multiset.
    #[test]
    fn matches_quantifier_semantics() {
        let verdicts = [Ok, PartialOk, Timeout, WrongAnswer, Error];
        let all_of = |c: char, v: Verdict| match c {
            '1' => v == Ok,
            'P' => !v.is_zero_point(),
            _ => true,
        };
        let any_of = |c: char, v: Verdict| match c {
            '1' | 'X' => true,
            '0' => v.is_zero_point(),
            'P' => v == PartialOk,
            'W' => v == WrongAnswer,
            '!' => v == Error,
            'T' => v == Timeout,
            _ => unreachable!(),
        };

        for c in "10XPW!T".chars() {
            // Every multiset of size <= 2 over all verdicts.
            let mut multisets: Vec<Vec<Verdict>> = vec![vec![]];
            for &a in &verdicts {
                multisets.push(vec![a]);
                for &b in &verdicts {
                    multisets.push(vec![a, b]);
                }
            }
            for multiset in multisets {
                let expected = multiset.iter().all(|&v| all_of(c, v))
                    && multiset.iter().any(|&v| any_of(c, v));
                assert_eq!(
                    evaluate_verdicts(&multiset, c).satisfied,
                    expected,
                    "mask '{c}' on {multiset:?}"
                );
            }
        }
    }
}
