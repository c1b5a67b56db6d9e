//! Distance of true asymptotic conditions from their expected condition.
//!
//! Expressions are generated per expected condition, a (leading power at 0,
//! leading power at infinity) pair. The per-condition score is the mean L1
//! distance between the true pair and the expected pair over all expressions
//! generated for it; an ideal generator scores exactly zero everywhere.

use serde::{Deserialize, Serialize};

/// Default distance charged to a non-terminal expression, which has no true
/// condition at all.
pub const NONTERMINAL_DISTANCE: f64 = 99.0;

/// One generated expression's condition record.
///
/// True leading powers are `None` when the expression is non-terminal or
/// when asymptotic evaluation failed on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionRow {
    pub expected_leading_at_0: f64,
    pub expected_leading_at_inf: f64,
    pub true_leading_at_0: Option<f64>,
    pub true_leading_at_inf: Option<f64>,
    pub is_terminal: bool,
}

/// Mean distance for one expected condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionDistance {
    pub expected_leading_at_0: f64,
    pub expected_leading_at_inf: f64,
    pub distance_from_expected_condition: f64,
}

/// Aggregate per-expression distances into per-condition means.
///
/// Per row:
/// - non-terminal: charged `distance_for_nonterminal` unconditionally, the
///   row has no true condition to measure;
/// - terminal with both true values: L1 distance
///   `|e0 - t0| + |einf - tinf|`;
/// - terminal with a missing true value (evaluation failure): charged
///   `distance_for_failure` when given, otherwise excluded from the mean.
///
/// Output rows are sorted by expected condition. A condition whose every row
/// was excluded keeps a NaN mean rather than disappearing.
pub fn distance_from_expected_condition(
    rows: &[ConditionRow],
    distance_for_nonterminal: f64,
    distance_for_failure: Option<f64>,
) -> Vec<ConditionDistance> {
    // f64 keys via to_bits; grouping only ever compares for equality.
    let mut groups: Vec<((u64, u64), f64, usize, usize)> = Vec::new();

    for row in rows {
        let distance = if !row.is_terminal {
            Some(distance_for_nonterminal)
        } else {
            match (row.true_leading_at_0, row.true_leading_at_inf) {
                (Some(t0), Some(tinf)) => Some(
                    (row.expected_leading_at_0 - t0).abs()
                        + (row.expected_leading_at_inf - tinf).abs(),
                ),
                _ => distance_for_failure,
            }
        };

        let key = (
            row.expected_leading_at_0.to_bits(),
            row.expected_leading_at_inf.to_bits(),
        );
        let group = match groups.iter_mut().find(|(k, ..)| *k == key) {
            Some(group) => group,
            None => {
                groups.push((key, 0.0, 0, 0));
                groups.last_mut().unwrap()
            }
        };
        group.3 += 1;
        if let Some(distance) = distance {
            group.1 += distance;
            group.2 += 1;
        }
    }

    let mut out: Vec<ConditionDistance> = groups
        .into_iter()
        .map(|((k0, kinf), sum, counted, _)| ConditionDistance {
            expected_leading_at_0: f64::from_bits(k0),
            expected_leading_at_inf: f64::from_bits(kinf),
            distance_from_expected_condition: if counted > 0 {
                sum / counted as f64
            } else {
                f64::NAN
            },
        })
        .collect();
    out.sort_by(|a, b| {
        a.expected_leading_at_0
            .total_cmp(&b.expected_leading_at_0)
            .then(a.expected_leading_at_inf.total_cmp(&b.expected_leading_at_inf))
    });
    out
}
