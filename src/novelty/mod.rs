//! Expression generalization metrics.
//!
//! Generated expressions are judged against a training corpus per condition
//! (a set of symbolic properties and their values):
//!
//! - **Syntactic novelty**: the expression string itself was never seen in
//!   training. `x` and `( x )` are syntactically different.
//! - **Semantic novelty**: the expression's simplified form was never seen
//!   among the training set's simplified forms. `x` is not semantically
//!   novel if `( x )` was trained on.
//! - **Condition distance**: how far generated expressions' true asymptotic
//!   conditions land from the condition they were generated for.

pub mod condition;
pub mod expressions;

pub use condition::{distance_from_expected_condition, ConditionDistance, ConditionRow};
pub use expressions::{
    combine_buckets, novelty_rate, seen_and_unseen_expressions, ExpressionBuckets,
    NoveltySummary, SeenAndUnseen, SplitExpressions,
};
