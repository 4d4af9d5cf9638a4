//! Structural minimizer over draw trees.
//!
//! The shrinker never sees values; it proposes edited [`DrawTree`]s in a
//! fixed priority order and the caller decides which candidates still fail.
//! Move priority: subtree deletion, then sequence element removal (internal
//! positions before endpoints), then length halving, then choice lowering,
//! then per-leaf reduction from the largest leaf down (origin first, then a
//! midpoint step back toward the original).

use crate::generate::DrawTree;

/// Candidate generator over draw trees.
pub struct Shrinker;

impl Shrinker {
    /// Ordered candidate batch for one shrink round.
    ///
    /// Every returned tree is guaranteed to have a strictly smaller
    /// [`metric`](DrawTree::metric) than the input, so any adoption makes
    /// progress and the loop terminates.
    pub fn candidates(tree: &DrawTree) -> Vec<DrawTree> {
        let mut out = Vec::new();
        let mut paths = Vec::new();

        // 1. Delete optional subtrees.
        collect_paths(tree, &mut Vec::new(), &mut paths, &|node| {
            matches!(node, DrawTree::Maybe { child: Some(_) })
        });
        for path in paths.drain(..) {
            out.push(replace_at(tree, &path, &|_| DrawTree::Maybe { child: None }));
        }

        // 2. Remove single sequence elements, internal positions first.
        collect_paths(tree, &mut Vec::new(), &mut paths, &|node| {
            matches!(node, DrawTree::Seq { min, children } if children.len() > *min)
        });
        for path in paths.drain(..) {
            let Some(DrawTree::Seq { children, .. }) = node_at(tree, &path) else { continue };
            for idx in internal_first_order(children.len()) {
                out.push(replace_at(tree, &path, &|node| {
                    let DrawTree::Seq { min, children } = node else { return node.clone() };
                    let mut children = children.clone();
                    children.remove(idx);
                    DrawTree::Seq { min: *min, children }
                }));
            }
        }

        // 3. Halve sequence lengths.
        collect_paths(tree, &mut Vec::new(), &mut paths, &|node| {
            matches!(node, DrawTree::Seq { min, children }
                if children.len() > *min && (children.len() / 2).max(*min) < children.len())
        });
        for path in paths.drain(..) {
            out.push(replace_at(tree, &path, &|node| {
                let DrawTree::Seq { min, children } = node else { return node.clone() };
                let keep = (children.len() / 2).max(*min);
                DrawTree::Seq { min: *min, children: children[..keep].to_vec() }
            }));
        }

        // 4. Lower variant choices toward index 0.
        collect_paths(tree, &mut Vec::new(), &mut paths, &|node| {
            matches!(node, DrawTree::Choice { index, .. } if *index > 0)
        });
        for path in paths.drain(..) {
            let Some(DrawTree::Choice { index, .. }) = node_at(tree, &path) else { continue };
            let mut targets = vec![0];
            let half = index / 2;
            if half > 0 {
                targets.push(half);
            }
            for target in targets {
                out.push(replace_at(tree, &path, &|node| {
                    let DrawTree::Choice { arity, child, .. } = node else {
                        return node.clone();
                    };
                    DrawTree::Choice { index: target, arity: *arity, child: child.clone() }
                }));
            }
        }

        // 5. Reduce leaves, largest magnitude first.
        let mut int_leaves = Vec::new();
        collect_int_leaves(tree, &mut Vec::new(), &mut int_leaves);
        int_leaves.sort_by_key(|(_, value, origin)| std::cmp::Reverse(value.abs_diff(*origin)));
        for (path, value, origin) in int_leaves {
            for target in int_shrink_ladder(value, origin) {
                out.push(replace_at(tree, &path, &|node| {
                    let DrawTree::Int { min, max, origin, .. } = node else {
                        return node.clone();
                    };
                    DrawTree::Int { value: target, min: *min, max: *max, origin: *origin }
                }));
            }
        }

        let mut float_leaves = Vec::new();
        collect_float_leaves(tree, &mut Vec::new(), &mut float_leaves);
        float_leaves
            .sort_by(|(_, a), (_, b)| b.abs().partial_cmp(&a.abs()).unwrap_or(std::cmp::Ordering::Equal));
        for (path, value) in float_leaves {
            for target in [0.0, value / 2.0, value.trunc()] {
                if target == value {
                    continue;
                }
                out.push(replace_at(tree, &path, &|_| DrawTree::Float { value: target }));
            }
        }

        // Any candidate that fails to make metric progress would loop the
        // caller forever; filter rather than trust every move class.
        let current = tree.metric();
        out.retain(|candidate| candidate.metric() < current);
        out
    }

    /// Synchronous fixpoint minimizer for pure predicates.
    ///
    /// Repeatedly adopts the first candidate that still satisfies
    /// `still_fails`, restarting enumeration after every adoption, until no
    /// candidate helps. The async trial runner implements the same loop
    /// inline around transport calls.
    pub fn minimize_with(
        tree: DrawTree,
        mut still_fails: impl FnMut(&DrawTree) -> bool,
    ) -> DrawTree {
        let mut current = tree;
        loop {
            let mut adopted = false;
            for candidate in Self::candidates(&current) {
                if still_fails(&candidate) {
                    current = candidate;
                    adopted = true;
                    break;
                }
            }
            if !adopted {
                return current;
            }
        }
    }
}

/// Binary-search ladder from the origin back toward the original value.
///
/// Ordered by distance from the origin: the origin itself, then the
/// halfway point, then three quarters of the way back, and so on. Adopting
/// any rung and re-enumerating from it converges on the exact failure
/// boundary, which is the "binary-search toward the original" move.
fn int_shrink_ladder(value: i64, origin: i64) -> Vec<i64> {
    let mut targets = vec![origin];
    let mut delta = (value - origin) / 2;
    while delta != 0 {
        let rung = value - delta;
        if rung != origin && rung != value && !targets.contains(&rung) {
            targets.push(rung);
        }
        delta /= 2;
    }
    targets
}

/// Element removal order preferring internal positions before endpoints.
fn internal_first_order(len: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..len).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(i.min(len - 1 - i)));
    order
}

fn collect_paths(
    tree: &DrawTree,
    path: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
    want: &impl Fn(&DrawTree) -> bool,
) {
    if want(tree) {
        out.push(path.clone());
    }
    for_each_child(tree, |idx, child| {
        path.push(idx);
        collect_paths(child, path, out, want);
        path.pop();
    });
}

fn collect_int_leaves(tree: &DrawTree, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, i64, i64)>) {
    if let DrawTree::Int { value, origin, .. } = tree {
        if value != origin {
            out.push((path.clone(), *value, *origin));
        }
    }
    for_each_child(tree, |idx, child| {
        path.push(idx);
        collect_int_leaves(child, path, out);
        path.pop();
    });
}

fn collect_float_leaves(tree: &DrawTree, path: &mut Vec<usize>, out: &mut Vec<(Vec<usize>, f64)>) {
    if let DrawTree::Float { value } = tree {
        if *value != 0.0 {
            out.push((path.clone(), *value));
        }
    }
    for_each_child(tree, |idx, child| {
        path.push(idx);
        collect_float_leaves(child, path, out);
        path.pop();
    });
}

fn for_each_child(tree: &DrawTree, mut f: impl FnMut(usize, &DrawTree)) {
    match tree {
        DrawTree::Int { .. } | DrawTree::Float { .. } => {}
        DrawTree::Choice { child, .. } => f(0, child),
        DrawTree::Maybe { child } => {
            if let Some(child) = child {
                f(0, child);
            }
        }
        DrawTree::Seq { children, .. } | DrawTree::Product { children } => {
            for (idx, child) in children.iter().enumerate() {
                f(idx, child);
            }
        }
    }
}

fn node_at<'a>(tree: &'a DrawTree, path: &[usize]) -> Option<&'a DrawTree> {
    let Some((&head, rest)) = path.split_first() else { return Some(tree) };
    match tree {
        DrawTree::Choice { child, .. } if head == 0 => node_at(child, rest),
        DrawTree::Maybe { child: Some(child) } if head == 0 => node_at(child, rest),
        DrawTree::Seq { children, .. } | DrawTree::Product { children } => {
            children.get(head).and_then(|c| node_at(c, rest))
        }
        _ => None,
    }
}

fn replace_at(tree: &DrawTree, path: &[usize], f: &impl Fn(&DrawTree) -> DrawTree) -> DrawTree {
    let Some((&head, rest)) = path.split_first() else { return f(tree) };
    match tree {
        DrawTree::Choice { index, arity, child } if head == 0 => DrawTree::Choice {
            index: *index,
            arity: *arity,
            child: Box::new(replace_at(child, rest, f)),
        },
        DrawTree::Maybe { child: Some(child) } if head == 0 => {
            DrawTree::Maybe { child: Some(Box::new(replace_at(child, rest, f))) }
        }
        DrawTree::Seq { min, children } => DrawTree::Seq {
            min: *min,
            children: children
                .iter()
                .enumerate()
                .map(|(idx, c)| if idx == head { replace_at(c, rest, f) } else { c.clone() })
                .collect(),
        },
        DrawTree::Product { children } => DrawTree::Product {
            children: children
                .iter()
                .enumerate()
                .map(|(idx, c)| if idx == head { replace_at(c, rest, f) } else { c.clone() })
                .collect(),
        },
        other => other.clone(),
    }
}
