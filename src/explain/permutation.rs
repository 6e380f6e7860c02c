//! Sampling Shapley explainer for models without tree structure
//!
//! Walks random feature orderings from a baseline vector to the explained
//! vector, crediting each feature with the change in output when it is
//! switched in. Every ordering telescopes, so the contributions always sum
//! to `f(x) - f(baseline)` regardless of how many orderings are sampled.

use super::{AttributionSpace, Explainer, Explanation};
use crate::models::ChurnModel;
use anyhow::{anyhow, bail, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;

pub const DEFAULT_PERMUTATIONS: usize = 64;
pub const DEFAULT_SEED: u64 = 0x5EED;

pub struct PermutationExplainer {
    model: Arc<dyn ChurnModel>,
    baseline: Vec<f64>,
    permutations: usize,
    seed: u64,
}

impl PermutationExplainer {
    /// Explainer against an all-zero baseline
    pub fn new(model: Arc<dyn ChurnModel>) -> Self {
        let width = model.schema().len();
        Self {
            model,
            baseline: vec![0.0; width],
            permutations: DEFAULT_PERMUTATIONS,
            seed: DEFAULT_SEED,
        }
    }

    pub fn with_baseline(mut self, baseline: Vec<f64>) -> Result<Self> {
        if baseline.len() != self.model.schema().len() {
            bail!(
                "baseline has {} values, model '{}' expects {}",
                baseline.len(),
                self.model.name(),
                self.model.schema().len()
            );
        }
        if baseline.iter().any(|v| !v.is_finite()) {
            bail!("baseline for model '{}' contains non-finite values", self.model.name());
        }
        self.baseline = baseline;
        Ok(self)
    }

    pub fn with_permutations(mut self, permutations: usize) -> Self {
        self.permutations = permutations.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn eval(&self, features: &[f64]) -> Result<f64> {
        self.model
            .predict_proba(features)
            .map_err(|e| anyhow!(e))
    }
}

impl Explainer for PermutationExplainer {
    fn space(&self) -> AttributionSpace {
        AttributionSpace::Probability
    }

    fn explain(&self, features: &[f64]) -> Result<Explanation> {
        let width = self.baseline.len();
        if features.len() != width {
            bail!("expected {width} features, got {}", features.len());
        }

        let base_value = self.eval(&self.baseline)?;
        let mut phi = vec![0.0; width];
        let mut order: Vec<usize> = (0..width).collect();
        // Fresh generator per call keeps repeated explanations identical
        let mut rng = StdRng::seed_from_u64(self.seed);

        for _ in 0..self.permutations {
            order.shuffle(&mut rng);
            let mut current = self.baseline.clone();
            let mut previous = base_value;
            for &i in &order {
                current[i] = features[i];
                let output = self.eval(&current)?;
                phi[i] += output - previous;
                previous = output;
            }
        }

        let n = self.permutations as f64;
        phi.iter_mut().for_each(|p| *p /= n);

        Ok(Explanation {
            base_value,
            contributions: phi,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PredictionError;
    use crate::types::schema::FeatureSchema;

    /// Logistic model with an interaction term
    struct Logistic {
        schema: Arc<FeatureSchema>,
    }

    impl ChurnModel for Logistic {
        fn name(&self) -> &str {
            "logistic"
        }

        fn schema(&self) -> &Arc<FeatureSchema> {
            &self.schema
        }

        fn predict_proba(&self, x: &[f64]) -> Result<f64, PredictionError> {
            let z = 0.8 * x[0] - 1.2 * x[1] + 0.5 * x[0] * x[2];
            Ok(1.0 / (1.0 + (-z).exp()))
        }
    }

    fn model() -> Arc<dyn ChurnModel> {
        Arc::new(Logistic {
            schema: Arc::new(FeatureSchema::new(["a", "b", "c", "unused"]).unwrap()),
        })
    }

    #[test]
    fn test_contributions_are_additive() {
        let explainer = PermutationExplainer::new(model()).with_permutations(16);
        let x = [1.5, -0.5, 2.0, 9.0];
        let e = explainer.explain(&x).unwrap();
        let fx = model().predict_proba(&x).unwrap();

        assert!((e.base_value - 0.5).abs() < 1e-12);
        assert!((e.base_value + e.contributions.iter().sum::<f64>() - fx).abs() < 1e-12);
        assert_eq!(e.contributions[3], 0.0);
    }

    #[test]
    fn test_same_seed_is_deterministic() {
        let explainer = PermutationExplainer::new(model()).with_seed(7);
        let x = [0.3, 0.1, -1.0, 0.0];
        let first = explainer.explain(&x).unwrap();
        let second = explainer.explain(&x).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_baseline_width_checked() {
        assert!(PermutationExplainer::new(model())
            .with_baseline(vec![0.0; 3])
            .is_err());
    }
}
