//! Seen/unseen partitions and novelty rates.
//!
//! Expressions arrive bucketed: a map from simplified form to the raw
//! expressions that simplify to it. Both the generated and the training side
//! use the same shape, so set membership answers syntactic novelty (raw
//! strings) and semantic novelty (bucket keys) directly.

use std::collections::{BTreeMap, HashSet};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Simplified form -> raw expressions that simplify to it.
///
/// BTreeMap keeps bucket iteration deterministic, so partition output order
/// is stable across runs.
pub type ExpressionBuckets = BTreeMap<String, Vec<String>>;

/// Flatten all bucket values into one expression list.
pub fn combine_buckets(buckets: &ExpressionBuckets) -> Vec<String> {
    buckets.values().flatten().cloned().collect()
}

/// One seen/unseen partition of the generated expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitExpressions {
    pub seen: Vec<String>,
    pub unseen: Vec<String>,
}

/// Both partitions of one generation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeenAndUnseen {
    pub syntactic: SplitExpressions,
    pub semantic: SplitExpressions,
}

/// Counts derived from one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoveltySummary {
    pub num_seen: usize,
    pub num_unseen: usize,
    pub novelty_rate: f64,
}

/// Partition generated expressions into seen and unseen, syntactically and
/// semantically.
///
/// The first semantic pass classifies whole buckets by key membership in the
/// training buckets. A reconciliation pass follows: simplification is not
/// canonical, so the same raw expression can end up under different keys on
/// the two sides. Any semantically-unseen expression that appears verbatim
/// in the training set is reclassified as seen. (The converse failure, two
/// different raw forms of one expression simplifying differently on each
/// side, is not recoverable here.)
///
/// With `deduplicate_unseen`, unseen lists keep only first occurrences:
/// syntactic duplicates are equal strings, semantic duplicates share a
/// re-simplified form, computed by the caller-supplied `simplify`. The
/// simplifier is only invoked on the (few) semantically unseen expressions.
pub fn seen_and_unseen_expressions(
    generated: &ExpressionBuckets,
    training: &ExpressionBuckets,
    deduplicate_unseen: bool,
    simplify: impl Fn(&str) -> String,
) -> SeenAndUnseen {
    let all_generated = combine_buckets(generated);
    let training_set: HashSet<&str> = training
        .values()
        .flatten()
        .map(|e| e.as_str())
        .collect();

    let mut syntactic = SplitExpressions::default();
    for expression in &all_generated {
        if training_set.contains(expression.as_str()) {
            syntactic.seen.push(expression.clone());
        } else {
            syntactic.unseen.push(expression.clone());
        }
    }

    let mut semantic = SplitExpressions::default();
    for (simplified, expressions) in generated {
        if training.contains_key(simplified) {
            semantic.seen.extend(expressions.iter().cloned());
        } else {
            semantic.unseen.extend(expressions.iter().cloned());
        }
    }

    // Reconciliation: a raw training expression under a mismatched bucket
    // key is still seen.
    let mut reconciled_unseen = Vec::with_capacity(semantic.unseen.len());
    for expression in semantic.unseen.drain(..) {
        if training_set.contains(expression.as_str()) {
            semantic.seen.push(expression);
        } else {
            reconciled_unseen.push(expression);
        }
    }
    semantic.unseen = reconciled_unseen;

    if deduplicate_unseen {
        let mut witnessed = HashSet::new();
        syntactic.unseen.retain(|e| witnessed.insert(e.clone()));

        let mut witnessed_simplified = HashSet::new();
        semantic.unseen.retain(|e| witnessed_simplified.insert(simplify(e)));
    }

    SeenAndUnseen { syntactic, semantic }
}

/// Novelty rate of one partition: unseen over total.
///
/// Errors when both lists are empty; a rate over zero expressions is
/// undefined, not zero.
pub fn novelty_rate(seen: &[String], unseen: &[String]) -> Result<NoveltySummary> {
    let num_seen = seen.len();
    let num_unseen = unseen.len();
    let total = num_seen + num_unseen;
    if total == 0 {
        bail!("total number of expressions cannot be zero");
    }
    Ok(NoveltySummary {
        num_seen,
        num_unseen,
        novelty_rate: num_unseen as f64 / total as f64,
    })
}
