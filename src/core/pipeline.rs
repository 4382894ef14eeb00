// Alert pipeline: decide -> persist -> dispatch, strictly in that order.
//
// The alert record is saved before the cooldown is set, and both land before
// dispatch starts, so a failed or abandoned call never loses the record.

use std::sync::Arc;

use dashmap::DashMap;
use log::info;
use tokio::sync::Mutex;

use super::alerts::gate::DecisionGate;
use super::alerts::model::{AlertRecord, Factor};
use super::clock::Clock;
use super::notify::Notifier;
use super::storage::store::AlertStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    NotAttempted,
    Delivered,
    Failed,
    /// Handed to a background task; the result is only logged
    Detached,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub alert: Option<AlertRecord>,
    pub dispatch: DispatchStatus,
}

impl PipelineOutcome {
    pub fn alerted(&self) -> bool {
        self.alert.is_some()
    }
}

/// Per-token async locks so check-and-set is exclusive within this process.
#[derive(Default)]
struct TokenLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TokenLocks {
    fn lock_for(&self, token: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, token: &str) {
        // Only the map still holds it: nobody is waiting, drop the entry.
        self.locks
            .remove_if(token, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct AlertPipeline {
    gate: DecisionGate,
    store: Arc<AlertStore>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    locks: Option<TokenLocks>,
    detach_dispatch: bool,
}

impl AlertPipeline {
    pub fn new(
        gate: DecisionGate,
        store: Arc<AlertStore>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gate,
            store,
            notifier,
            clock,
            locks: None,
            detach_dispatch: false,
        }
    }

    /// Hold a per-token lock across decide, save and set-cooldown.
    pub fn with_strict_cooldown(mut self, strict: bool) -> Self {
        self.locks = strict.then(TokenLocks::default);
        self
    }

    pub fn with_detached_dispatch(mut self, detach: bool) -> Self {
        self.detach_dispatch = detach;
        self
    }

    pub fn store(&self) -> &Arc<AlertStore> {
        &self.store
    }

    pub async fn process(&self, patient_token: &str, risk: f64, top_factors: Vec<Factor>) -> PipelineOutcome {
        let alert = match &self.locks {
            Some(locks) => {
                let lock = locks.lock_for(patient_token);
                let alert = {
                    let _guard = lock.lock().await;
                    self.decide_and_record(patient_token, risk, top_factors).await
                };
                drop(lock);
                locks.release(patient_token);
                alert
            }
            None => self.decide_and_record(patient_token, risk, top_factors).await,
        };

        let Some(alert) = alert else {
            info!("No alert for patient {}, risk: {:.3}", patient_token, risk);
            return PipelineOutcome {
                alert: None,
                dispatch: DispatchStatus::NotAttempted,
            };
        };
        info!("Alert triggered for patient {}, risk: {:.3}", patient_token, risk);

        let dispatch = if self.detach_dispatch {
            let notifier = self.notifier.clone();
            let record = alert.clone();
            tokio::spawn(async move {
                notifier.notify(&record).await;
            });
            DispatchStatus::Detached
        } else if self.notifier.notify(&alert).await {
            DispatchStatus::Delivered
        } else {
            DispatchStatus::Failed
        };

        PipelineOutcome {
            alert: Some(alert),
            dispatch,
        }
    }

    async fn decide_and_record(
        &self,
        patient_token: &str,
        risk: f64,
        top_factors: Vec<Factor>,
    ) -> Option<AlertRecord> {
        if !self.gate.decide(risk, patient_token).await {
            return None;
        }
        let alert = AlertRecord::new(patient_token, risk, top_factors, self.clock.now());
        self.store.save_alert(&alert).await;
        self.store.set_cooldown(patient_token).await;
        Some(alert)
    }
}
