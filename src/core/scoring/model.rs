//! Risk model and its per-feature explanation.
//!
//! The service only needs `(probability, top factors)` from a model. The
//! shipped implementation is a logistic regression over standardized
//! features, so the explanation is exact: each feature's contribution is
//! its term in the linear predictor, measured against the training mean.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::core::alerts::model::Factor;

pub type FeatureMap = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("cannot read model file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("model feature {0:?} has a non-positive scale")]
    BadScale(String),
    #[error("feature {0:?} is not numeric")]
    NonNumeric(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RiskScore {
    pub probability: f64,
    pub top_factors: Vec<Factor>,
}

pub trait RiskModel: Send + Sync {
    fn score(&self, features: &FeatureMap, top_k: usize) -> Result<RiskScore, ScoreError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeatureWeight {
    pub name: String,
    pub weight: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinearRiskModel {
    pub intercept: f64,
    pub features: Vec<FeatureWeight>,
}

impl LinearRiskModel {
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let content = fs::read_to_string(path).map_err(|source| ScoreError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ScoreError> {
        let model: LinearRiskModel = serde_json::from_str(content)?;
        if let Some(bad) = model.features.iter().find(|f| !(f.scale > 0.0)) {
            return Err(ScoreError::BadScale(bad.name.clone()));
        }
        Ok(model)
    }
}

impl RiskModel for LinearRiskModel {
    fn score(&self, features: &FeatureMap, top_k: usize) -> Result<RiskScore, ScoreError> {
        let mut logit = self.intercept;
        let mut contributions = Vec::with_capacity(self.features.len());

        for feature in &self.features {
            // Missing inputs are imputed with the mean and contribute nothing.
            let value = match features.get(&feature.name) {
                Some(raw) => numeric(&feature.name, raw)?,
                None => feature.mean,
            };
            let term = feature.weight * (value - feature.mean) / feature.scale;
            logit += term;
            contributions.push(Factor::new(feature.name.clone(), term.abs()));
        }

        contributions.sort_by(|a, b| {
            b.impact
                .partial_cmp(&a.impact)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.feature.cmp(&b.feature))
        });
        contributions.truncate(top_k);

        Ok(RiskScore {
            probability: sigmoid(logit),
            top_factors: contributions,
        })
    }
}

fn numeric(name: &str, raw: &Value) -> Result<f64, ScoreError> {
    match raw {
        Value::Number(n) => n.as_f64().ok_or_else(|| ScoreError::NonNumeric(name.to_string())),
        Value::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| ScoreError::NonNumeric(name.to_string())),
        _ => Err(ScoreError::NonNumeric(name.to_string())),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
