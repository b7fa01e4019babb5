use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::models::{day_of_week_index, Appointment, AvailabilityWindow};

use super::{
    AppointmentLedger, AvailabilityStore, SlotKey, SlotTransaction, StagedWrite, StoreError,
};

const ACTIVE_STATUSES: &str = "in.(confirmed,pending)";

/// Ledger backed by PostgREST. Writes are single statements; capacity and
/// duplicate safety come from the partial unique indexes in `sql/schema.sql`,
/// so a racing writer surfaces as a unique violation instead of an overbooking.
#[derive(Clone)]
pub struct SupabaseStore {
    client: Arc<SupabaseClient>,
    service_token: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct StartRow {
    start_time: DateTime<Utc>,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Arc::new(SupabaseClient::new(config)),
            service_token: Arc::from(config.supabase_service_role_key.as_str()),
        }
    }

    async fn get_rows<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, StoreError> {
        let rows: Vec<T> = self
            .client
            .request(Method::GET, path, Some(&*self.service_token), None)
            .await?;
        Ok(rows)
    }

    async fn exists(&self, table: &str, id: Uuid) -> Result<bool, StoreError> {
        let path = format!("/rest/v1/{}?id=eq.{}&select=id", table, id);
        let rows: Vec<Value> = self.get_rows(&path).await?;
        Ok(!rows.is_empty())
    }

    async fn fetch_window(&self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError> {
        let path = format!("/rest/v1/appointment_availabilities?id=eq.{}", window_id);
        let rows: Vec<AvailabilityWindow> = self.get_rows(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn fetch_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let rows: Vec<Appointment> = self.get_rows(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn write(&self, write_op: StagedWrite) -> Result<Appointment, StoreError> {
        let (method, path, body) = match &write_op {
            StagedWrite::Insert(appointment) => (
                Method::POST,
                "/rest/v1/appointments".to_string(),
                serde_json::to_value(appointment).map_err(|e| StoreError::Backend(e.to_string()))?,
            ),
            StagedWrite::Update { expected_version, appointment } => (
                Method::PATCH,
                format!(
                    "/rest/v1/appointments?id=eq.{}&version=eq.{}",
                    appointment.id, expected_version
                ),
                json!({
                    "availability_id": appointment.availability_id,
                    "start_time": appointment.start_time,
                    "end_time": appointment.end_time,
                    "status": appointment.status,
                    "seat": appointment.seat,
                    "cancellation_reason": appointment.cancellation_reason,
                    "version": appointment.version,
                    "updated_at": appointment.updated_at,
                }),
            ),
        };

        let rows: Vec<Appointment> = self
            .client
            .request_returning(method, &path, Some(&*self.service_token), body)
            .await?;

        match rows.into_iter().next() {
            Some(row) => Ok(row),
            // The version filter matched nothing: someone else updated the row first.
            None => {
                warn!("Optimistic update of appointment {} lost the race", write_op.appointment().id);
                Err(StoreError::Conflict(format!(
                    "appointment {} was modified concurrently",
                    write_op.appointment().id
                )))
            }
        }
    }
}

fn encode_instant(instant: DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339()).into_owned()
}

#[async_trait]
impl AvailabilityStore for SupabaseStore {
    async fn doctor_exists(&self, doctor_id: Uuid) -> Result<bool, StoreError> {
        self.exists("doctors", doctor_id).await
    }

    async fn windows_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        debug!("Fetching availability templates for doctor {} on {}", doctor_id, date);

        let path = format!(
            "/rest/v1/appointment_availabilities?doctor_id=eq.{}&is_available=eq.true&or=(day_of_week.eq.{},specific_date.eq.{})&order=start_time.asc",
            doctor_id,
            day_of_week_index(date),
            date
        );
        let windows: Vec<AvailabilityWindow> = self.get_rows(&path).await?;

        // A dated template on another day can still match the weekday filter.
        Ok(windows
            .into_iter()
            .filter(|w| w.is_available && w.applies_on(date))
            .collect())
    }
}

#[async_trait]
impl AppointmentLedger for SupabaseStore {
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError> {
        self.exists("patients", patient_id).await
    }

    async fn active_counts(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<DateTime<Utc>, u32>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&start_time=gte.{}&start_time=lt.{}&status={}&select=start_time",
            doctor_id,
            encode_instant(from),
            encode_instant(to),
            ACTIVE_STATUSES
        );
        let rows: Vec<StartRow> = self.get_rows(&path).await?;

        let mut counts = HashMap::new();
        for row in rows {
            *counts.entry(row.start_time).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.fetch_appointment(appointment_id).await
    }

    async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=start_time.asc",
            patient_id
        );
        self.get_rows(&path).await
    }

    async fn begin(&self, key: SlotKey) -> Result<Box<dyn SlotTransaction>, StoreError> {
        Ok(Box::new(SupabaseSlotTransaction {
            store: self.clone(),
            key,
            staged: None,
        }))
    }
}

/// Optimistic transaction: reads are plain queries, the single staged write
/// is sent at commit and rejected by the database if it would break a
/// constraint or overwrite a newer version.
struct SupabaseSlotTransaction {
    store: SupabaseStore,
    key: SlotKey,
    staged: Option<StagedWrite>,
}

#[async_trait]
impl SlotTransaction for SupabaseSlotTransaction {
    fn key(&self) -> SlotKey {
        self.key
    }

    async fn window(&mut self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError> {
        self.store.fetch_window(window_id).await
    }

    async fn active_at_slot(&mut self) -> Result<Vec<Appointment>, StoreError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&start_time=eq.{}&status={}",
            self.key.doctor_id,
            encode_instant(self.key.start_time),
            ACTIVE_STATUSES
        );
        self.store.get_rows(&path).await
    }

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        self.store.fetch_appointment(appointment_id).await
    }

    fn stage(&mut self, write_op: StagedWrite) {
        self.staged = Some(write_op);
    }

    async fn commit(mut self: Box<Self>) -> Result<Option<Appointment>, StoreError> {
        match self.staged.take() {
            Some(write_op) => self.store.write(write_op).await.map(Some),
            None => Ok(None),
        }
    }
}
