//! Native tree-ensemble classifiers
//!
//! Artifacts are JSON documents exported by the training job. Two families
//! are supported: gradient-boosted trees (leaves hold log-odds increments)
//! and random forests (leaves hold class-1 probabilities).

use crate::error::PredictionError;
use crate::models::ChurnModel;
use crate::types::schema::FeatureSchema;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// How leaf outputs are combined into a probability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleFamily {
    /// sigmoid(base_score + sum of leaves)
    GradientBoosted,
    /// mean of leaves
    RandomForest,
}

/// Comparison used at split nodes to send a row to the left child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRule {
    /// `x < threshold` goes left (XGBoost)
    #[default]
    Less,
    /// `x <= threshold` goes left (scikit-learn)
    LessOrEqual,
}

/// Tree node. Child indices point into the owning tree's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        cover: f64,
    },
    Leaf {
        value: f64,
        cover: f64,
    },
}

impl Node {
    pub fn cover(&self) -> f64 {
        match self {
            Node::Split { cover, .. } | Node::Leaf { cover, .. } => *cover,
        }
    }
}

/// Single decision tree; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<Node>,
}

impl Tree {
    /// Follow the row's path from the root and return the leaf value
    pub fn leaf_value(&self, features: &[f64], rule: SplitRule) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value, .. } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if goes_left(features[*feature], *threshold, rule) {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn validate(&self, tree_index: usize, feature_count: usize, family: EnsembleFamily) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("tree {tree_index} has no nodes");
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    cover,
                } => {
                    if *feature >= feature_count {
                        bail!(
                            "tree {tree_index} node {i} splits on feature {feature}, schema has {feature_count}"
                        );
                    }
                    if !threshold.is_finite() {
                        bail!("tree {tree_index} node {i} has a non-finite threshold");
                    }
                    // Children after parents keeps every tree acyclic
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            bail!("tree {tree_index} node {i} has invalid child index {child}");
                        }
                    }
                    if !(*cover > 0.0) || !cover.is_finite() {
                        bail!("tree {tree_index} split node {i} needs a positive cover");
                    }
                }
                Node::Leaf { value, cover } => {
                    if !value.is_finite() {
                        bail!("tree {tree_index} leaf {i} has a non-finite value");
                    }
                    if family == EnsembleFamily::RandomForest && !(0.0..=1.0).contains(value) {
                        bail!("tree {tree_index} leaf {i} value {value} is not a probability");
                    }
                    if *cover < 0.0 || !cover.is_finite() {
                        bail!("tree {tree_index} leaf {i} has an invalid cover");
                    }
                }
            }
        }
        Ok(())
    }
}

#[inline]
pub(crate) fn goes_left(value: f64, threshold: f64, rule: SplitRule) -> bool {
    match rule {
        SplitRule::Less => value < threshold,
        SplitRule::LessOrEqual => value <= threshold,
    }
}

/// On-disk artifact layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeArtifact {
    pub family: EnsembleFamily,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub base_score: f64,
    #[serde(default)]
    pub split_rule: SplitRule,
    pub trees: Vec<Tree>,
}

/// Loaded, validated tree ensemble. Immutable and shareable across threads.
#[derive(Debug, Clone)]
pub struct TreeEnsemble {
    name: String,
    schema: Arc<FeatureSchema>,
    family: EnsembleFamily,
    base_score: f64,
    split_rule: SplitRule,
    trees: Vec<Tree>,
}

impl TreeEnsemble {
    /// Build an ensemble from a parsed artifact, validating its structure
    pub fn from_artifact(name: &str, artifact: TreeArtifact) -> Result<Self> {
        let schema = FeatureSchema::new(artifact.feature_names)
            .with_context(|| format!("model '{name}' declares an invalid schema"))?;

        if artifact.trees.is_empty() {
            bail!("model '{name}' has no trees");
        }
        if !artifact.base_score.is_finite() {
            bail!("model '{name}' has a non-finite base score");
        }
        for (i, tree) in artifact.trees.iter().enumerate() {
            tree.validate(i, schema.len(), artifact.family)
                .with_context(|| format!("model '{name}' failed validation"))?;
        }

        Ok(Self {
            name: name.to_string(),
            schema: Arc::new(schema),
            family: artifact.family,
            base_score: artifact.base_score,
            split_rule: artifact.split_rule,
            trees: artifact.trees,
        })
    }

    /// Parse an artifact from JSON text
    pub fn from_json(name: &str, json: &str) -> Result<Self> {
        let artifact: TreeArtifact = serde_json::from_str(json)
            .with_context(|| format!("model '{name}' is not a valid tree artifact"))?;
        Self::from_artifact(name, artifact)
    }

    /// Load an artifact from a file
    pub fn from_file<P: AsRef<Path>>(name: &str, path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model from {:?}", path))?;
        Self::from_json(name, &json)
    }

    pub fn family(&self) -> EnsembleFamily {
        self.family
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn split_rule(&self) -> SplitRule {
        self.split_rule
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    /// Raw ensemble output: log-odds margin for boosted trees, probability
    /// for forests. This is the space attributions are expressed in.
    pub fn raw_output(&self, features: &[f64]) -> f64 {
        let leaves = self
            .trees
            .iter()
            .map(|t| t.leaf_value(features, self.split_rule));
        match self.family {
            EnsembleFamily::GradientBoosted => self.base_score + leaves.sum::<f64>(),
            EnsembleFamily::RandomForest => leaves.sum::<f64>() / self.trees.len() as f64,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl ChurnModel for TreeEnsemble {
    fn name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &Arc<FeatureSchema> {
        &self.schema
    }

    fn predict_proba(&self, features: &[f64]) -> Result<f64, PredictionError> {
        let raw = self.raw_output(features);
        let probability = match self.family {
            EnsembleFamily::GradientBoosted => sigmoid(raw),
            EnsembleFamily::RandomForest => raw.clamp(0.0, 1.0),
        };
        if !probability.is_finite() {
            return Err(PredictionError::Inference {
                model: self.name.clone(),
                reason: format!("non-finite output {raw}"),
            });
        }
        Ok(probability)
    }
}

/// Small fixtures shared by the model, explainer and pipeline tests
#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Depth-2 boosted tree over (f0, f1) plus a stump on f2
    pub fn boosted(name: &str) -> TreeEnsemble {
        let json = r#"{
            "family": "gradient_boosted",
            "feature_names": ["f0", "f1", "f2"],
            "base_score": -0.5,
            "trees": [
                {"nodes": [
                    {"feature": 0, "threshold": 0.5, "left": 1, "right": 2, "cover": 100.0},
                    {"feature": 1, "threshold": 0.5, "left": 3, "right": 4, "cover": 50.0},
                    {"value": 2.0, "cover": 50.0},
                    {"value": -1.0, "cover": 25.0},
                    {"value": 0.5, "cover": 25.0}
                ]},
                {"nodes": [
                    {"feature": 2, "threshold": 10.0, "left": 1, "right": 2, "cover": 100.0},
                    {"value": -0.25, "cover": 70.0},
                    {"value": 0.75, "cover": 30.0}
                ]}
            ]
        }"#;
        TreeEnsemble::from_json(name, json).unwrap()
    }

    /// Two-tree forest over the same features
    pub fn forest(name: &str) -> TreeEnsemble {
        let json = r#"{
            "family": "random_forest",
            "feature_names": ["f0", "f1", "f2"],
            "split_rule": "less_or_equal",
            "trees": [
                {"nodes": [
                    {"feature": 0, "threshold": 0.5, "left": 1, "right": 2, "cover": 10.0},
                    {"value": 0.2, "cover": 6.0},
                    {"value": 0.9, "cover": 4.0}
                ]},
                {"nodes": [
                    {"feature": 1, "threshold": 0.5, "left": 1, "right": 2, "cover": 10.0},
                    {"feature": 0, "threshold": 0.5, "left": 3, "right": 4, "cover": 5.0},
                    {"value": 0.6, "cover": 5.0},
                    {"value": 0.1, "cover": 3.0},
                    {"value": 0.4, "cover": 2.0}
                ]}
            ]
        }"#;
        TreeEnsemble::from_json(name, json).unwrap()
    }
}
