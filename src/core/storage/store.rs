//! Alert and cooldown persistence with silent degradation.
//!
//! The store runs in one of two modes, fixed at construction:
//! - `Durable`: a backend answered the startup probe. Each call goes to the
//!   backend first; a failing call falls back to the in-process maps for that
//!   call only.
//! - `Fallback`: no backend, or the probe failed. Everything lives in the
//!   in-process maps until the process exits. There is no re-probe.
//!
//! No public operation returns an error. Writes report how they landed via
//! [`WriteOutcome`]; reads return `None`/`false` rather than failing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::{info, warn};
use serde::Serialize;

use super::backend::{KvBackend, RedisBackend, StoreError};
use crate::core::alerts::model::AlertRecord;
use crate::core::clock::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Durable,
    Fallback,
}

/// Where a write ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written to the durable backend
    Durable,
    /// Backend write failed; kept in the in-process map instead
    Degraded,
    /// Store is in fallback mode; written to the in-process map
    Local,
}

fn alert_key(alert_id: &str) -> String {
    format!("alert:{}", alert_id)
}

fn cooldown_key(patient_token: &str) -> String {
    format!("cooldown:{}", patient_token)
}

pub struct AlertStore {
    backend: Option<Arc<dyn KvBackend>>,
    alerts: DashMap<String, AlertRecord>,
    cooldowns: DashMap<String, DateTime<Utc>>,
    cooldown_window: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl AlertStore {
    /// Store with no durable backend.
    pub fn in_memory(cooldown_window: chrono::Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend: None,
            alerts: DashMap::new(),
            cooldowns: DashMap::new(),
            cooldown_window,
            clock,
        }
    }

    /// Probe `backend` once; keep it only if it answers.
    pub async fn with_backend(
        backend: Arc<dyn KvBackend>,
        cooldown_window: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut store = Self::in_memory(cooldown_window, clock);
        match backend.ping().await {
            Ok(()) => {
                info!("Durable alert store connected");
                store.backend = Some(backend);
            }
            Err(e) => warn!("Durable store probe failed, using in-memory storage: {}", e),
        }
        store
    }

    /// Connect to redis at `redis_url` if one is configured.
    pub async fn open(
        redis_url: Option<&str>,
        cooldown_window: chrono::Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let Some(url) = redis_url else {
            info!("No durable store configured, using in-memory storage");
            return Self::in_memory(cooldown_window, clock);
        };
        match RedisBackend::connect(url).await {
            Ok(backend) => Self::with_backend(Arc::new(backend), cooldown_window, clock).await,
            Err(e) => {
                warn!("Redis connection failed, using in-memory storage: {}", e);
                Self::in_memory(cooldown_window, clock)
            }
        }
    }

    pub fn mode(&self) -> BackendMode {
        if self.backend.is_some() {
            BackendMode::Durable
        } else {
            BackendMode::Fallback
        }
    }

    pub fn cooldown_window(&self) -> chrono::Duration {
        self.cooldown_window
    }

    /// True iff the patient alerted less than one cooldown window ago.
    pub async fn in_cooldown(&self, patient_token: &str) -> bool {
        let last = match &self.backend {
            Some(backend) => match load_cooldown(backend.as_ref(), patient_token).await {
                Ok(last) => last,
                Err(e) => {
                    warn!("Cooldown check for {} degraded: {}", patient_token, e);
                    self.local_cooldown(patient_token)
                }
            },
            None => self.local_cooldown(patient_token),
        };
        match last {
            Some(last) => self.clock.now() - last < self.cooldown_window,
            None => false,
        }
    }

    /// Record "now" as the patient's last alert time.
    pub async fn set_cooldown(&self, patient_token: &str) -> WriteOutcome {
        let now = self.clock.now();
        let Some(backend) = &self.backend else {
            self.cooldowns.insert(patient_token.to_string(), now);
            return WriteOutcome::Local;
        };
        match backend
            .set(&cooldown_key(patient_token), &now.to_rfc3339())
            .await
        {
            Ok(()) => WriteOutcome::Durable,
            Err(e) => {
                warn!("Cooldown write for {} degraded: {}", patient_token, e);
                self.cooldowns.insert(patient_token.to_string(), now);
                WriteOutcome::Degraded
            }
        }
    }

    /// Upsert keyed by `alert_id`.
    pub async fn save_alert(&self, record: &AlertRecord) -> WriteOutcome {
        let Some(backend) = &self.backend else {
            self.alerts.insert(record.alert_id.clone(), record.clone());
            return WriteOutcome::Local;
        };
        match store_alert(backend.as_ref(), record).await {
            Ok(()) => WriteOutcome::Durable,
            Err(e) => {
                warn!("Alert write for {} degraded: {}", record.alert_id, e);
                self.alerts.insert(record.alert_id.clone(), record.clone());
                WriteOutcome::Degraded
            }
        }
    }

    pub async fn get_alert(&self, alert_id: &str) -> Option<AlertRecord> {
        let Some(backend) = &self.backend else {
            return self.local_alert(alert_id);
        };
        match load_alert(backend.as_ref(), alert_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Alert read for {} degraded: {}", alert_id, e);
                self.local_alert(alert_id)
            }
        }
    }

    fn local_alert(&self, alert_id: &str) -> Option<AlertRecord> {
        self.alerts.get(alert_id).map(|entry| entry.value().clone())
    }

    fn local_cooldown(&self, patient_token: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.get(patient_token).map(|entry| *entry.value())
    }
}

async fn store_alert(backend: &dyn KvBackend, record: &AlertRecord) -> Result<(), StoreError> {
    let json = serde_json::to_string(record)?;
    backend.set(&alert_key(&record.alert_id), &json).await
}

async fn load_alert(backend: &dyn KvBackend, alert_id: &str) -> Result<Option<AlertRecord>, StoreError> {
    match backend.get(&alert_key(alert_id)).await? {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

async fn load_cooldown(
    backend: &dyn KvBackend,
    patient_token: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    match backend.get(&cooldown_key(patient_token)).await? {
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .map_err(|_| StoreError::Timestamp(raw)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::alerts::model::Factor;
    use crate::core::clock::ManualClock;
    use crate::core::storage::backend::testing::{DownBackend, FlakyBackend};
    use chrono::TimeZone;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
        ))
    }

    fn window() -> chrono::Duration {
        chrono::Duration::minutes(30)
    }

    fn sample_record(clock: &ManualClock) -> AlertRecord {
        AlertRecord::new(
            "pt_7f3a",
            0.91,
            vec![
                Factor::new("oldpeak", 0.4),
                Factor::new("ca", 0.3),
                Factor::new("thal", 0.1),
            ],
            clock.now(),
        )
    }

    #[tokio::test]
    async fn test_fallback_round_trip() {
        let clock = clock();
        let store = AlertStore::in_memory(window(), clock.clone());
        assert_eq!(store.mode(), BackendMode::Fallback);

        let record = sample_record(&clock);
        assert_eq!(store.save_alert(&record).await, WriteOutcome::Local);
        assert_eq!(store.get_alert(&record.alert_id).await, Some(record));
    }

    #[tokio::test]
    async fn test_unknown_alert_is_absent() {
        let store = AlertStore::in_memory(window(), clock());
        assert!(store.get_alert("alrt_missing").await.is_none());

        let backend = Arc::new(FlakyBackend::new());
        let store = AlertStore::with_backend(backend, window(), clock()).await;
        assert!(store.get_alert("alrt_missing").await.is_none());
    }

    #[tokio::test]
    async fn test_cooldown_window_expires() {
        let clock = clock();
        let store = AlertStore::in_memory(window(), clock.clone());
        assert_eq!(store.cooldown_window(), chrono::Duration::minutes(30));

        assert!(!store.in_cooldown("pt_1").await);
        store.set_cooldown("pt_1").await;
        assert!(store.in_cooldown("pt_1").await);
        assert!(!store.in_cooldown("pt_2").await, "cooldown is per patient");

        clock.advance(chrono::Duration::minutes(29));
        assert!(store.in_cooldown("pt_1").await);

        clock.advance(chrono::Duration::minutes(1));
        assert!(!store.in_cooldown("pt_1").await, "window boundary is exclusive");
    }

    #[tokio::test]
    async fn test_unreachable_backend_pins_fallback_mode() {
        let clock = clock();
        let store = AlertStore::with_backend(Arc::new(DownBackend), window(), clock.clone()).await;
        assert_eq!(store.mode(), BackendMode::Fallback);

        let record = sample_record(&clock);
        assert_eq!(store.save_alert(&record).await, WriteOutcome::Local);
        assert_eq!(store.set_cooldown("pt_7f3a").await, WriteOutcome::Local);
        assert!(store.in_cooldown("pt_7f3a").await);
        assert_eq!(store.get_alert(&record.alert_id).await, Some(record));
    }

    #[tokio::test]
    async fn test_probe_failure_is_not_retried() {
        let backend = Arc::new(FlakyBackend::new());
        backend.set_failing(true);
        let store = AlertStore::with_backend(backend.clone(), window(), clock()).await;

        backend.set_failing(false);
        store.set_cooldown("pt_1").await;
        assert_eq!(store.mode(), BackendMode::Fallback);
        assert!(backend.raw("cooldown:pt_1").is_none());
    }

    #[tokio::test]
    async fn test_durable_writes_use_key_layout() {
        let clock = clock();
        let backend = Arc::new(FlakyBackend::new());
        let store = AlertStore::with_backend(backend.clone(), window(), clock.clone()).await;
        assert_eq!(store.mode(), BackendMode::Durable);

        let record = sample_record(&clock);
        assert_eq!(store.save_alert(&record).await, WriteOutcome::Durable);
        assert_eq!(store.set_cooldown("pt_7f3a").await, WriteOutcome::Durable);

        let raw = backend.raw(&format!("alert:{}", record.alert_id)).unwrap();
        let parsed: AlertRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, record);

        let raw_ts = backend.raw("cooldown:pt_7f3a").unwrap();
        assert_eq!(
            DateTime::parse_from_rfc3339(&raw_ts).unwrap(),
            clock.now()
        );
        assert_eq!(store.get_alert(&record.alert_id).await, Some(record));
    }

    #[tokio::test]
    async fn test_failed_write_degrades_for_that_call_only() {
        let clock = clock();
        let backend = Arc::new(FlakyBackend::new());
        let store = AlertStore::with_backend(backend.clone(), window(), clock.clone()).await;

        backend.set_failing(true);
        let record = sample_record(&clock);
        assert_eq!(store.save_alert(&record).await, WriteOutcome::Degraded);
        assert_eq!(store.set_cooldown("pt_7f3a").await, WriteOutcome::Degraded);

        // Reads while the backend is down find the locally degraded values.
        assert_eq!(store.get_alert(&record.alert_id).await, Some(record.clone()));
        assert!(store.in_cooldown("pt_7f3a").await);

        // The store stays durable; the next call goes to the backend again.
        backend.set_failing(false);
        assert_eq!(store.mode(), BackendMode::Durable);
        let next = sample_record(&clock);
        assert_eq!(store.save_alert(&next).await, WriteOutcome::Durable);
        assert!(backend.raw(&format!("alert:{}", next.alert_id)).is_some());
    }

    #[tokio::test]
    async fn test_failed_cooldown_read_without_local_entry_is_open() {
        let backend = Arc::new(FlakyBackend::new());
        let store = AlertStore::with_backend(backend.clone(), window(), clock()).await;
        store.set_cooldown("pt_1").await;

        backend.set_failing(true);
        assert!(!store.in_cooldown("pt_1").await);
    }

    #[tokio::test]
    async fn test_corrupt_durable_value_falls_back() {
        let clock = clock();
        let backend = Arc::new(FlakyBackend::new());
        let store = AlertStore::with_backend(backend.clone(), window(), clock.clone()).await;

        backend.insert_raw("alert:alrt_bad00001", "{not json");
        assert!(store.get_alert("alrt_bad00001").await.is_none());

        backend.insert_raw("cooldown:pt_9", "yesterday");
        assert!(!store.in_cooldown("pt_9").await);
    }

    #[tokio::test]
    async fn test_save_alert_is_idempotent_upsert() {
        let clock = clock();
        let store = AlertStore::in_memory(window(), clock.clone());
        let record = sample_record(&clock);

        store.save_alert(&record).await;
        store.save_alert(&record).await;
        assert_eq!(store.alerts.len(), 1);
        assert_eq!(store.get_alert(&record.alert_id).await, Some(record));
    }

    #[tokio::test]
    async fn test_concurrent_fallback_writes() {
        let clock = clock();
        let store = Arc::new(AlertStore::in_memory(window(), clock.clone()));

        let mut handles = Vec::new();
        for i in 0..32 {
            let store = store.clone();
            let now = clock.now();
            handles.push(tokio::spawn(async move {
                let record = AlertRecord::new(format!("pt_{}", i), 0.9, vec![], now);
                store.save_alert(&record).await;
                store.set_cooldown(&record.patient_token).await;
                record.alert_id
            }));
        }

        for handle in handles {
            let id = handle.await.unwrap();
            assert!(store.get_alert(&id).await.is_some());
        }
        assert_eq!(store.cooldowns.len(), 32);
    }
}
