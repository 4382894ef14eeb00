// Decision gate - threshold plus per-patient cooldown suppression.
//
// The gate only advises. Persisting the alert and starting the cooldown on a
// `true` decision is the caller's job (see core::pipeline).

use std::sync::Arc;

use crate::core::storage::store::AlertStore;

pub struct DecisionGate {
    threshold: f64,
    store: Arc<AlertStore>,
}

impl DecisionGate {
    pub fn new(threshold: f64, store: Arc<AlertStore>) -> Self {
        Self { threshold, store }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Should an alert fire for this risk and patient?
    ///
    /// `risk == threshold` fires. A NaN risk never fires. Store read failures
    /// count as "not in cooldown".
    pub async fn decide(&self, risk: f64, patient_token: &str) -> bool {
        if !(risk >= self.threshold) {
            return false;
        }
        !self.store.in_cooldown(patient_token).await
    }
}
