//! Regression trees and the exact greedy builder that grows them.
//!
//! Split search is second order: every row contributes a gradient/hessian
//! pair and a split is scored as
//! `0.5 * [T(GL)^2/(HL+lambda) + T(GR)^2/(HR+lambda) - T(G)^2/(H+lambda)]`,
//! where `T` soft-thresholds by `alpha`. Rows whose feature value is missing
//! are sent to whichever side scores better and that side is recorded as the
//! node's default direction.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::params::TrainParam;
use crate::common::error::{BoostError, BoostResult};
use crate::data::DMatrix;

const RT_EPS: f64 = 1e-6;

/// Gradient statistics of one training row.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct GradPair {
    pub grad: f64,
    pub hess: f64,
}

impl GradPair {
    pub fn new(grad: f64, hess: f64) -> Self {
        Self { grad, hess }
    }
}

#[derive(Copy, Clone, Debug, Default)]
struct Stats {
    g: f64,
    h: f64,
}

impl Stats {
    fn add(&mut self, p: GradPair) {
        self.g += p.grad;
        self.h += p.hess;
    }

    fn minus(self, other: Stats) -> Stats {
        Stats {
            g: self.g - other.g,
            h: self.h - other.h,
        }
    }

    fn plus(self, other: Stats) -> Stats {
        Stats {
            g: self.g + other.g,
            h: self.h + other.h,
        }
    }
}

/// One node of a flat tree. Children always sit at higher indices than their parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Leaf {
        value: f32,
    },
    Split {
        feature: u32,
        threshold: f32,
        left: u32,
        right: u32,
        default_left: bool,
    },
}

/// A regression tree. Leaf values already include the learning-rate shrinkage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegTree {
    nodes: Vec<Node>,
}

impl RegTree {
    pub fn leaf(value: f32) -> Self {
        Self {
            nodes: vec![Node::Leaf { value }],
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Index of the leaf `row` falls into. Missing or absent features take the default branch.
    pub fn leaf_index(&self, row: &[f32]) -> usize {
        let mut idx = 0usize;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { .. } => return idx,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    default_left,
                } => {
                    let value = row.get(*feature as usize).copied().unwrap_or(f32::NAN);
                    let go_left = if value.is_nan() {
                        *default_left
                    } else {
                        value < *threshold
                    };
                    idx = if go_left { *left } else { *right } as usize;
                }
            }
        }
    }

    pub fn predict(&self, row: &[f32]) -> f32 {
        match &self.nodes[self.leaf_index(row)] {
            Node::Leaf { value } => *value,
            Node::Split { .. } => 0.0,
        }
    }

    /// Structural check for trees read from disk: child links must point forward and stay
    /// in bounds, and split features must exist.
    pub fn validate(&self, num_feature: usize) -> BoostResult<()> {
        if self.nodes.is_empty() {
            return Err(BoostError::invalid("tree has no nodes"));
        }
        for (idx, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                left,
                right,
                threshold,
                ..
            } = node
            {
                let (left, right) = (*left as usize, *right as usize);
                if left <= idx || right <= idx || left >= self.nodes.len() || right >= self.nodes.len() {
                    return Err(BoostError::invalid(format!("node {idx} has invalid children")));
                }
                if *feature as usize >= num_feature {
                    return Err(BoostError::invalid(format!(
                        "node {idx} splits on feature {feature} but the model has {num_feature}"
                    )));
                }
                if threshold.is_nan() {
                    return Err(BoostError::invalid(format!("node {idx} has a NaN threshold")));
                }
            }
        }
        Ok(())
    }
}

struct Candidate {
    feature: usize,
    threshold: f32,
    default_left: bool,
    gain: f64,
}

/// Grows one tree over a subset of rows and columns.
pub(crate) struct TreeBuilder<'a> {
    matrix: &'a DMatrix,
    gpairs: &'a [GradPair],
    features: &'a [usize],
    param: &'a TrainParam,
    shrinkage: f64,
    nodes: Vec<Node>,
}

impl<'a> TreeBuilder<'a> {
    pub(crate) fn new(
        matrix: &'a DMatrix,
        gpairs: &'a [GradPair],
        features: &'a [usize],
        param: &'a TrainParam,
        shrinkage: f64,
    ) -> Self {
        Self {
            matrix,
            gpairs,
            features,
            param,
            shrinkage,
            nodes: Vec::new(),
        }
    }

    pub(crate) fn build(mut self, rows: &[usize]) -> RegTree {
        if rows.is_empty() {
            return RegTree::leaf(0.0);
        }
        self.grow(rows, 0);
        RegTree { nodes: self.nodes }
    }

    fn grow(&mut self, rows: &[usize], depth: usize) -> u32 {
        let idx = self.nodes.len();
        let total = self.sum(rows);
        self.nodes.push(Node::Leaf {
            value: self.leaf_value(total),
        });

        if depth >= self.param.max_depth || rows.len() < 2 {
            return idx as u32;
        }

        let Some(best) = self.best_split(rows, total) else {
            return idx as u32;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&r| {
            let v = self.matrix.get(r, best.feature);
            if v.is_nan() {
                best.default_left
            } else {
                v < best.threshold
            }
        });
        if left_rows.is_empty() || right_rows.is_empty() {
            return idx as u32;
        }

        let left = self.grow(&left_rows, depth + 1);
        let right = self.grow(&right_rows, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature as u32,
            threshold: best.threshold,
            left,
            right,
            default_left: best.default_left,
        };
        idx as u32
    }

    fn sum(&self, rows: &[usize]) -> Stats {
        let mut s = Stats::default();
        for &r in rows {
            s.add(self.gpairs[r]);
        }
        s
    }

    fn leaf_value(&self, s: Stats) -> f32 {
        let g = threshold_l1(s.g, self.param.alpha);
        let denom = s.h + self.param.lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        (-g / denom * self.shrinkage) as f32
    }

    fn score(&self, s: Stats) -> f64 {
        let g = threshold_l1(s.g, self.param.alpha);
        let denom = s.h + self.param.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            g * g / denom
        }
    }

    fn best_split(&self, rows: &[usize], total: Stats) -> Option<Candidate> {
        let parent = self.score(total);
        let mut best: Option<Candidate> = None;

        for &feature in self.features {
            let Some(candidate) = self.best_split_for_feature(rows, feature, total, parent) else {
                continue;
            };
            let better = match &best {
                Some(current) => candidate.gain > current.gain,
                None => true,
            };
            if better {
                best = Some(candidate);
            }
        }

        best.filter(|c| c.gain > self.param.gamma && c.gain > RT_EPS)
    }

    fn best_split_for_feature(
        &self,
        rows: &[usize],
        feature: usize,
        total: Stats,
        parent: f64,
    ) -> Option<Candidate> {
        let mut present: Vec<(f32, GradPair)> = rows
            .iter()
            .filter_map(|&r| {
                let v = self.matrix.get(r, feature);
                (!v.is_nan()).then(|| (v, self.gpairs[r]))
            })
            .collect();
        if present.len() < 2 && present.len() == rows.len() {
            return None;
        }
        present.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut present_total = Stats::default();
        for (_, p) in &present {
            present_total.add(*p);
        }
        let missing = total.minus(present_total);
        let has_missing = present.len() < rows.len();
        let min_child = self.param.min_child_weight;

        let mut best: Option<Candidate> = None;
        let mut left = Stats::default();
        for i in 0..present.len() {
            left.add(present[i].1);
            let Some(next) = present.get(i + 1) else {
                break;
            };
            if next.0 == present[i].0 {
                continue;
            }
            let threshold = midpoint(present[i].0, next.0);

            let mut directions = vec![false];
            if has_missing {
                directions.push(true);
            }
            for default_left in directions {
                let l = if default_left { left.plus(missing) } else { left };
                let r = total.minus(l);
                if l.h < min_child || r.h < min_child {
                    continue;
                }
                let gain = 0.5 * (self.score(l) + self.score(r) - parent);
                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    best = Some(Candidate {
                        feature,
                        threshold,
                        default_left,
                        gain,
                    });
                }
            }
        }

        // Split present values from missing ones when every present value is identical.
        if has_missing && !present.is_empty() && present.first().map(|p| p.0) == present.last().map(|p| p.0) {
            let l = present_total;
            let r = missing;
            if l.h >= min_child && r.h >= min_child {
                let gain = 0.5 * (self.score(l) + self.score(r) - parent);
                if best.as_ref().map_or(true, |b| gain > b.gain) {
                    let value = present[0].0;
                    best = Some(Candidate {
                        feature,
                        threshold: next_up(value),
                        default_left: false,
                        gain,
                    });
                }
            }
        }

        best
    }
}

fn threshold_l1(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

fn midpoint(a: f32, b: f32) -> f32 {
    let mid = a + (b - a) / 2.0;
    // Adjacent floats can round the midpoint back onto `a`.
    if mid > a {
        mid
    } else {
        b
    }
}

fn next_up(v: f32) -> f32 {
    if v.is_infinite() && v > 0.0 {
        return v;
    }
    let bits = v.to_bits();
    let next = if v == 0.0 {
        1
    } else if v > 0.0 {
        bits + 1
    } else {
        bits - 1
    };
    f32::from_bits(next)
}
