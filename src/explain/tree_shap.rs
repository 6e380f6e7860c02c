//! Exact path-dependent TreeSHAP for native tree ensembles
//!
//! Polynomial-time Shapley values over a tree's decision paths, using node
//! covers to weight the branches a feature does not follow. Contributions
//! are exact: `base_value + sum(phi)` equals the ensemble's raw output.

use super::{AttributionSpace, Explainer, Explanation};
use crate::models::tree::{goes_left, EnsembleFamily, Node, SplitRule, Tree, TreeEnsemble};
use anyhow::{bail, Result};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Default)]
struct PathElement {
    feature: Option<usize>,
    zero_fraction: f64,
    one_fraction: f64,
    weight: f64,
}

/// Grow the path by one split, updating the permutation weights
fn extend_path(path: &mut [PathElement], depth: usize, zero: f64, one: f64, feature: Option<usize>) {
    path[depth] = PathElement {
        feature,
        zero_fraction: zero,
        one_fraction: one,
        weight: if depth == 0 { 1.0 } else { 0.0 },
    };
    let d = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].weight += one * path[i].weight * (i + 1) as f64 / d;
        path[i].weight = zero * path[i].weight * (depth - i) as f64 / d;
    }
}

/// Undo the extension at `index`, used when a feature is split on twice
fn unwind_path(path: &mut [PathElement], depth: usize, index: usize) {
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let d = (depth + 1) as f64;
    let mut next_one_portion = path[depth].weight;

    for i in (0..depth).rev() {
        if one != 0.0 {
            let tmp = path[i].weight;
            path[i].weight = next_one_portion * d / ((i + 1) as f64 * one);
            next_one_portion = tmp - path[i].weight * zero * (depth - i) as f64 / d;
        } else {
            path[i].weight = path[i].weight * d / (zero * (depth - i) as f64);
        }
    }

    for i in index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
}

/// Total permutation weight of the path with `index` unwound, without
/// modifying the path
fn unwound_path_sum(path: &[PathElement], depth: usize, index: usize) -> f64 {
    let one = path[index].one_fraction;
    let zero = path[index].zero_fraction;
    let mut next_one_portion = path[depth].weight;
    let mut total = 0.0;

    if one != 0.0 {
        for i in (0..depth).rev() {
            let tmp = next_one_portion / ((i + 1) as f64 * one);
            total += tmp;
            next_one_portion = path[i].weight - tmp * zero * (depth - i) as f64;
        }
    } else {
        for i in (0..depth).rev() {
            total += path[i].weight / (zero * (depth - i) as f64);
        }
    }
    total * (depth + 1) as f64
}

struct TreeWalk<'a> {
    tree: &'a Tree,
    features: &'a [f64],
    rule: SplitRule,
    phi: &'a mut [f64],
}

impl TreeWalk<'_> {
    fn recurse(
        &mut self,
        node: usize,
        parent: &[PathElement],
        zero: f64,
        one: f64,
        feature: Option<usize>,
    ) {
        // A branch with zero cover that the instance does not follow carries
        // no permutation weight, and unwinding it would divide by zero.
        if zero == 0.0 && one == 0.0 {
            return;
        }
        let depth = parent.len();
        let mut path = Vec::with_capacity(depth + 1);
        path.extend_from_slice(parent);
        path.push(PathElement::default());
        extend_path(&mut path, depth, zero, one, feature);

        let tree = self.tree;
        match &tree.nodes[node] {
            Node::Leaf { value, .. } => {
                for i in 1..=depth {
                    let w = unwound_path_sum(&path, depth, i);
                    let el = path[i];
                    if let Some(f) = el.feature {
                        self.phi[f] += w * (el.one_fraction - el.zero_fraction) * value;
                    }
                }
            }
            Node::Split {
                feature: split,
                threshold,
                left,
                right,
                cover,
            } => {
                let (hot, cold) = if goes_left(self.features[*split], *threshold, self.rule) {
                    (*left, *right)
                } else {
                    (*right, *left)
                };
                let hot_zero = tree.nodes[hot].cover() / cover;
                let cold_zero = tree.nodes[cold].cover() / cover;

                let mut depth = depth;
                let mut incoming_zero = 1.0;
                let mut incoming_one = 1.0;

                if let Some(k) = path[..=depth].iter().position(|e| e.feature == Some(*split)) {
                    incoming_zero = path[k].zero_fraction;
                    incoming_one = path[k].one_fraction;
                    unwind_path(&mut path, depth, k);
                    depth -= 1;
                }

                let path = &path[..=depth];
                self.recurse(hot, path, hot_zero * incoming_zero, incoming_one, Some(*split));
                self.recurse(cold, path, cold_zero * incoming_zero, 0.0, Some(*split));
            }
        }
    }
}

/// Cover-weighted expected output of the subtree rooted at `node`
fn expected_value(tree: &Tree, node: usize) -> f64 {
    match &tree.nodes[node] {
        Node::Leaf { value, .. } => *value,
        Node::Split {
            left, right, cover, ..
        } => {
            let l = tree.nodes[*left].cover() / cover;
            let r = tree.nodes[*right].cover() / cover;
            l * expected_value(tree, *left) + r * expected_value(tree, *right)
        }
    }
}

fn tree_shap(tree: &Tree, features: &[f64], rule: SplitRule, phi: &mut [f64]) {
    let mut walk = TreeWalk {
        tree,
        features,
        rule,
        phi,
    };
    walk.recurse(0, &[], 1.0, 1.0, None);
}

/// TreeSHAP explainer bound to one ensemble
pub struct TreeShapExplainer {
    ensemble: Arc<TreeEnsemble>,
    base_value: f64,
}

impl TreeShapExplainer {
    pub fn new(ensemble: Arc<TreeEnsemble>) -> Self {
        let trees = ensemble.trees();
        let expected: f64 = trees.iter().map(|t| expected_value(t, 0)).sum();
        let base_value = match ensemble.family() {
            EnsembleFamily::GradientBoosted => ensemble.base_score() + expected,
            EnsembleFamily::RandomForest => expected / trees.len() as f64,
        };
        Self {
            ensemble,
            base_value,
        }
    }

    pub fn base_value(&self) -> f64 {
        self.base_value
    }
}

impl Explainer for TreeShapExplainer {
    fn space(&self) -> AttributionSpace {
        match self.ensemble.family() {
            EnsembleFamily::GradientBoosted => AttributionSpace::LogOdds,
            EnsembleFamily::RandomForest => AttributionSpace::Probability,
        }
    }

    fn explain(&self, features: &[f64]) -> Result<Explanation> {
        let width = crate::models::ChurnModel::schema(self.ensemble.as_ref()).len();
        if features.len() != width {
            bail!("expected {width} features, got {}", features.len());
        }

        let mut phi = vec![0.0; width];
        for tree in self.ensemble.trees() {
            tree_shap(tree, features, self.ensemble.split_rule(), &mut phi);
        }
        if self.ensemble.family() == EnsembleFamily::RandomForest {
            let n = self.ensemble.trees().len() as f64;
            phi.iter_mut().for_each(|p| *p /= n);
        }

        Ok(Explanation {
            base_value: self.base_value,
            contributions: phi,
        })
    }
}
