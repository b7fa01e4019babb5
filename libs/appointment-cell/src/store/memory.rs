use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::models::{Appointment, AvailabilityWindow};

use super::{
    AppointmentLedger, AvailabilityStore, Constraint, SlotKey, SlotTransaction, StagedWrite,
    StoreError,
};

/// Directory and template data loaded into an [`InMemoryStore`] at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub doctors: Vec<Uuid>,
    #[serde(default)]
    pub patients: Vec<Uuid>,
    #[serde(default)]
    pub windows: Vec<AvailabilityWindow>,
}

#[derive(Default)]
struct Inner {
    doctors: RwLock<HashSet<Uuid>>,
    patients: RwLock<HashSet<Uuid>>,
    windows: RwLock<HashMap<Uuid, AvailabilityWindow>>,
    appointments: RwLock<HashMap<Uuid, Appointment>>,
    slot_locks: Mutex<HashMap<SlotKey, Arc<AsyncMutex<()>>>>,
}

/// Process-local ledger. Check-then-write on a slot runs under a per-slot
/// async mutex, and commit re-checks the unique constraints over active rows.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: SeedData) -> Result<Self, StoreError> {
        let store = Self::new();
        for doctor_id in seed.doctors {
            store.register_doctor(doctor_id);
        }
        for patient_id in seed.patients {
            store.register_patient(patient_id);
        }
        for window in seed.windows {
            store.insert_window(window)?;
        }
        Ok(store)
    }

    pub fn register_doctor(&self, doctor_id: Uuid) {
        write(&self.inner.doctors).insert(doctor_id);
    }

    pub fn register_patient(&self, patient_id: Uuid) {
        write(&self.inner.patients).insert(patient_id);
    }

    /// Adds a template, enforcing its invariants and per-start uniqueness.
    pub fn insert_window(&self, window: AvailabilityWindow) -> Result<(), StoreError> {
        window.validate().map_err(StoreError::Backend)?;

        let mut windows = write(&self.inner.windows);
        let key = window.template_key();
        if windows.values().any(|w| w.id != window.id && w.template_key() == key) {
            return Err(StoreError::UniqueViolation(Constraint::WindowStart));
        }
        self.register_doctor(window.doctor_id);
        windows.insert(window.id, window);
        Ok(())
    }

    pub fn set_window_available(&self, window_id: Uuid, is_available: bool) -> bool {
        match write(&self.inner.windows).get_mut(&window_id) {
            Some(window) => {
                window.is_available = is_available;
                true
            }
            None => false,
        }
    }

    /// Snapshot of every ledger row, for inspection.
    pub fn appointments(&self) -> Vec<Appointment> {
        read(&self.inner.appointments).values().cloned().collect()
    }

    fn slot_lock(&self, key: SlotKey) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.slot_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key).or_default().clone()
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl AvailabilityStore for InMemoryStore {
    async fn doctor_exists(&self, doctor_id: Uuid) -> Result<bool, StoreError> {
        Ok(read(&self.inner.doctors).contains(&doctor_id))
    }

    async fn windows_for_date(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
    ) -> Result<Vec<AvailabilityWindow>, StoreError> {
        let mut windows: Vec<AvailabilityWindow> = read(&self.inner.windows)
            .values()
            .filter(|w| w.doctor_id == doctor_id && w.is_available && w.applies_on(date))
            .cloned()
            .collect();
        windows.sort_by_key(|w| w.start_time);
        Ok(windows)
    }
}

#[async_trait]
impl AppointmentLedger for InMemoryStore {
    async fn patient_exists(&self, patient_id: Uuid) -> Result<bool, StoreError> {
        Ok(read(&self.inner.patients).contains(&patient_id))
    }

    async fn active_counts(
        &self,
        doctor_id: Uuid,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<HashMap<DateTime<Utc>, u32>, StoreError> {
        let mut counts = HashMap::new();
        for appointment in read(&self.inner.appointments).values() {
            if appointment.doctor_id == doctor_id
                && appointment.is_active()
                && appointment.start_time >= from
                && appointment.start_time < to
            {
                *counts.entry(appointment.start_time).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(read(&self.inner.appointments).get(&appointment_id).cloned())
    }

    async fn patient_appointments(&self, patient_id: Uuid) -> Result<Vec<Appointment>, StoreError> {
        let mut appointments: Vec<Appointment> = read(&self.inner.appointments)
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect();
        appointments.sort_by_key(|a| a.start_time);
        Ok(appointments)
    }

    async fn begin(&self, key: SlotKey) -> Result<Box<dyn SlotTransaction>, StoreError> {
        let lock = self.slot_lock(key);
        let guard = Arc::clone(&lock).lock_owned().await;
        debug!("Acquired slot lock for doctor {} at {}", key.doctor_id, key.start_time);

        Ok(Box::new(MemorySlotTransaction {
            store: self.clone(),
            key,
            lock,
            guard: Some(guard),
            staged: None,
        }))
    }
}

struct MemorySlotTransaction {
    store: InMemoryStore,
    key: SlotKey,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    staged: Option<StagedWrite>,
}

impl MemorySlotTransaction {
    fn apply(&self, write_op: &StagedWrite) -> Result<Appointment, StoreError> {
        let mut appointments = write(&self.store.inner.appointments);
        let candidate = write_op.appointment();

        match write_op {
            StagedWrite::Insert(a) => {
                if appointments.contains_key(&a.id) {
                    return Err(StoreError::Backend(format!("appointment {} already exists", a.id)));
                }
            }
            StagedWrite::Update { expected_version, appointment } => {
                match appointments.get(&appointment.id) {
                    Some(current) if current.version == *expected_version => {}
                    Some(_) => {
                        return Err(StoreError::Conflict(format!(
                            "appointment {} was modified concurrently",
                            appointment.id
                        )))
                    }
                    None => {
                        return Err(StoreError::Backend(format!(
                            "appointment {} disappeared",
                            appointment.id
                        )))
                    }
                }
            }
        }

        if candidate.is_active() {
            for other in appointments.values() {
                if other.id == candidate.id
                    || !other.occupies(candidate.doctor_id, candidate.start_time)
                {
                    continue;
                }
                if other.patient_id == candidate.patient_id {
                    return Err(StoreError::UniqueViolation(Constraint::ActivePatientSlot));
                }
                if other.seat == candidate.seat {
                    return Err(StoreError::UniqueViolation(Constraint::ActiveSeat));
                }
            }
        }

        appointments.insert(candidate.id, candidate.clone());
        Ok(candidate.clone())
    }
}

#[async_trait]
impl SlotTransaction for MemorySlotTransaction {
    fn key(&self) -> SlotKey {
        self.key
    }

    async fn window(&mut self, window_id: Uuid) -> Result<Option<AvailabilityWindow>, StoreError> {
        Ok(read(&self.store.inner.windows).get(&window_id).cloned())
    }

    async fn active_at_slot(&mut self) -> Result<Vec<Appointment>, StoreError> {
        let key = self.key;
        Ok(read(&self.store.inner.appointments)
            .values()
            .filter(|a| a.occupies(key.doctor_id, key.start_time))
            .cloned()
            .collect())
    }

    async fn appointment(&mut self, appointment_id: Uuid) -> Result<Option<Appointment>, StoreError> {
        Ok(read(&self.store.inner.appointments).get(&appointment_id).cloned())
    }

    fn stage(&mut self, write_op: StagedWrite) {
        self.staged = Some(write_op);
    }

    async fn commit(mut self: Box<Self>) -> Result<Option<Appointment>, StoreError> {
        match self.staged.take() {
            Some(write_op) => self.apply(&write_op).map(Some),
            None => Ok(None),
        }
    }
}

impl Drop for MemorySlotTransaction {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self
            .store
            .inner
            .slot_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // Only the map and this transaction hold the lock: nobody is waiting on it.
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.key);
        }
    }
}
