// Alert records and the factors that explain them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One feature's contribution to a risk score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub feature: String,
    pub impact: f64,
}

impl Factor {
    pub fn new(feature: impl Into<String>, impact: f64) -> Self {
        Self {
            feature: feature.into(),
            impact,
        }
    }
}

/// A triggered alert. Created once, persisted, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    /// External lookup key (`alrt_` + 8 hex chars)
    pub alert_id: String,
    /// Pseudonymous subject reference, never personally identifying
    pub patient_token: String,
    /// Probability in [0, 1]
    pub risk: f64,
    /// Ordered by descending impact, passed through from the explainer
    pub top_factors: Vec<Factor>,
    pub timestamp: DateTime<Utc>,
}

impl AlertRecord {
    pub fn new(
        patient_token: impl Into<String>,
        risk: f64,
        top_factors: Vec<Factor>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            alert_id: generate_alert_id(),
            patient_token: patient_token.into(),
            risk,
            top_factors,
            timestamp,
        }
    }

    /// Last six characters of the alert id, the only reference spoken on a call.
    pub fn short_id(&self) -> &str {
        let start = self
            .alert_id
            .char_indices()
            .rev()
            .nth(5)
            .map(|(idx, _)| idx)
            .unwrap_or(0);
        &self.alert_id[start..]
    }
}

pub fn generate_alert_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("alrt_{}", &hex[..8])
}
