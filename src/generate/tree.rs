//! Reified generator decision traces.
//!
//! Every draw records the decisions that produced it as a [`DrawTree`]. The
//! shrinker edits trees without knowing anything about the values they
//! materialize; generators replay edited trees back into values, rejecting
//! structurally incompatible edits.

use serde::Serialize;

/// One recorded generator decision tree.
///
/// Leaves are primitive decisions (a ranged integer, a finite float);
/// interior nodes name the composite constructor that drew their children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DrawTree {
    /// Ranged integer decision. Shrinks toward `origin`.
    Int { value: i64, min: i64, max: i64, origin: i64 },
    /// Finite float decision. Shrinks toward zero.
    Float { value: f64 },
    /// Choice of one variant out of `arity`, wrapping the chosen subtree.
    /// Shrinks toward index 0.
    Choice { index: usize, arity: usize, child: Box<DrawTree> },
    /// Present/absent decision. Shrinks toward absent.
    Maybe { child: Option<Box<DrawTree>> },
    /// Variable-length collection; `min` is the smallest legal length.
    Seq { min: usize, children: Vec<DrawTree> },
    /// Fixed product of subtrees (record fields, tuple components).
    Product { children: Vec<DrawTree> },
}

impl DrawTree {
    /// Unit product, used as the child of value-free choices.
    pub fn unit() -> DrawTree {
        DrawTree::Product { children: Vec::new() }
    }

    /// Total node count, leaves included.
    pub fn node_count(&self) -> u64 {
        match self {
            DrawTree::Int { .. } | DrawTree::Float { .. } => 1,
            DrawTree::Choice { child, .. } => 1 + child.node_count(),
            DrawTree::Maybe { child } => {
                1 + child.as_ref().map(|c| c.node_count()).unwrap_or(0)
            }
            DrawTree::Seq { children, .. } | DrawTree::Product { children } => {
                1 + children.iter().map(DrawTree::node_count).sum::<u64>()
            }
        }
    }

    /// Lexicographic shrink metric.
    ///
    /// Every adopted shrink strictly decreases this, which is what makes the
    /// shrink loop terminate: subtree deletions and length reductions drop
    /// the node count, choice lowering drops the index weight, and leaf
    /// reductions drop the magnitude.
    pub fn metric(&self) -> TreeMetric {
        let mut m = TreeMetric::default();
        self.accumulate(&mut m);
        m
    }

    fn accumulate(&self, m: &mut TreeMetric) {
        m.nodes += 1;
        match self {
            DrawTree::Int { value, origin, .. } => {
                m.magnitude += value.abs_diff(*origin) as u128;
            }
            DrawTree::Float { value } => {
                // Scaled so that halving a float registers as progress.
                m.magnitude += (value.abs() * 1000.0).min(u64::MAX as f64) as u128;
            }
            DrawTree::Choice { index, child, .. } => {
                m.index_weight += *index as u64;
                child.accumulate(m);
            }
            DrawTree::Maybe { child } => {
                if let Some(child) = child {
                    child.accumulate(m);
                }
            }
            DrawTree::Seq { children, .. } | DrawTree::Product { children } => {
                for child in children {
                    child.accumulate(m);
                }
            }
        }
    }
}

/// Ordered (node count, leaf magnitude, choice weight) triple.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TreeMetric {
    pub nodes: u64,
    pub magnitude: u128,
    pub index_weight: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(value: i64) -> DrawTree {
        DrawTree::Int { value, min: -1000, max: 1000, origin: 0 }
    }

    #[test]
    fn metric_orders_deletion_before_magnitude() {
        let bigger = DrawTree::Seq { min: 0, children: vec![int(1), int(1)] };
        let smaller = DrawTree::Seq { min: 0, children: vec![int(900)] };
        // One node fewer beats any magnitude difference.
        assert!(smaller.metric() < bigger.metric());
    }

    #[test]
    fn metric_decreases_when_leaf_moves_toward_origin() {
        let far = int(500);
        let near = int(3);
        assert!(near.metric() < far.metric());
    }

    #[test]
    fn metric_counts_choice_index() {
        let high = DrawTree::Choice { index: 3, arity: 4, child: Box::new(DrawTree::unit()) };
        let low = DrawTree::Choice { index: 0, arity: 4, child: Box::new(DrawTree::unit()) };
        assert!(low.metric() < high.metric());
    }

    #[test]
    fn node_count_ignores_absent_maybe_child() {
        let absent = DrawTree::Maybe { child: None };
        let present = DrawTree::Maybe { child: Some(Box::new(int(0))) };
        assert_eq!(absent.node_count(), 1);
        assert_eq!(present.node_count(), 2);
    }
}
