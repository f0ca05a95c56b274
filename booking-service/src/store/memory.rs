use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::*;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::*;
use crate::error::{BookingError, BookingResult};

type SlotKey = (String, String);

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<SlotKey, Slot>,
    appointments: HashMap<Uuid, Appointment>,
    rates: HashMap<String, ProfessionalRate>,
    outbox: Vec<OutboxEvent>,
    fail_next_commit: bool,
    fail_expired_query: bool,
    failing_paid_lookups: HashSet<SlotKey>,
}

impl MemoryState {
    fn take_commit_failure(&mut self) -> BookingResult<()> {
        if std::mem::take(&mut self.fail_next_commit) {
            return Err(BookingError::internal("injected commit failure"));
        }
        Ok(())
    }
}

/// Map-backed store. A single async mutex around the whole state makes every
/// transaction serializable, which is the isolation the Postgres store gets
/// from row locks.
#[derive(Debug, Default)]
pub struct InMemoryBookingStore {
    state: Mutex<MemoryState>,
}

impl InMemoryBookingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A professional with a configured rate and a day of free 50 minute slots,
    /// for running the service without a database.
    pub async fn with_demo_data(now: DateTime<Utc>) -> Self {
        let store = Self::new();
        store
            .set_rate(ProfessionalRate {
                professional_id: "demo-professional".to_string(),
                amount_cents: 6000,
                currency: "EUR".to_string(),
            })
            .await;
        for hour in 0..8 {
            let start = now + Duration::hours(24 + hour);
            store
                .insert_slot(Slot::new_free(
                    "demo-professional",
                    format!("demo-slot-{}", hour + 1),
                    start,
                    50,
                    "UTC",
                    now,
                ))
                .await;
        }
        store
    }

    pub async fn insert_slot(&self, slot: Slot) {
        let mut state = self.state.lock().await;
        state
            .slots
            .insert((slot.professional_id.clone(), slot.slot_id.clone()), slot);
    }

    /// Stores a slot under an explicit professional key, even one that
    /// disagrees with the slot's own `professional_id`.
    pub async fn insert_slot_under(&self, professional_id: &str, slot: Slot) {
        let mut state = self.state.lock().await;
        state
            .slots
            .insert((professional_id.to_string(), slot.slot_id.clone()), slot);
    }

    pub async fn set_rate(&self, rate: ProfessionalRate) {
        let mut state = self.state.lock().await;
        state.rates.insert(rate.professional_id.clone(), rate);
    }

    pub async fn insert_appointment(&self, appointment: Appointment) {
        let mut state = self.state.lock().await;
        state.appointments.insert(appointment.id, appointment);
    }

    pub async fn slot(&self, professional_id: &str, slot_id: &str) -> Option<Slot> {
        let state = self.state.lock().await;
        state
            .slots
            .get(&(professional_id.to_string(), slot_id.to_string()))
            .cloned()
    }

    pub async fn appointment(&self, appointment_id: Uuid) -> Option<Appointment> {
        let state = self.state.lock().await;
        state.appointments.get(&appointment_id).cloned()
    }

    pub async fn appointments_for_slot(&self, professional_id: &str, slot_id: &str) -> Vec<Appointment> {
        let state = self.state.lock().await;
        let mut found: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|a| a.professional_id == professional_id && a.slot_id == slot_id)
            .cloned()
            .collect();
        found.sort_by_key(|a| a.created_at);
        found
    }

    pub async fn outbox(&self) -> Vec<OutboxEvent> {
        self.state.lock().await.outbox.clone()
    }

    pub async fn fail_next_commit(&self) {
        self.state.lock().await.fail_next_commit = true;
    }

    pub async fn fail_expired_query(&self, fail: bool) {
        self.state.lock().await.fail_expired_query = fail;
    }

    pub async fn fail_paid_lookup(&self, professional_id: &str, slot_id: &str) {
        self.state
            .lock()
            .await
            .failing_paid_lookups
            .insert((professional_id.to_string(), slot_id.to_string()));
    }
}

#[async_trait]
impl BookingStore for InMemoryBookingStore {
    async fn run_booking_transaction(
        &self,
        request: &BookingRequest,
        decide: BookingDecision<'_>,
    ) -> BookingResult<BookingPlan> {
        let mut state = self.state.lock().await;

        let key = (request.professional_id.clone(), request.slot_id.clone());
        let open_appointment = state
            .appointments
            .values()
            .filter(|a| a.matches(request) && !a.status.is_terminal())
            .max_by_key(|a| a.created_at)
            .cloned();
        let snapshot = BookingSnapshot {
            slot: state.slots.get(&key).cloned(),
            open_appointment,
            rate: state.rates.get(&request.professional_id).cloned(),
        };

        let plan = decide(snapshot)?;
        state.take_commit_failure()?;

        if let BookingPlan::Hold {
            slot,
            appointment,
            events,
        } = &plan
        {
            state.slots.insert(key, slot.clone());
            state.appointments.insert(appointment.id, appointment.clone());
            state.outbox.extend(events.iter().cloned());
        }

        Ok(plan)
    }

    async fn run_settlement_transaction(
        &self,
        appointment_id: Uuid,
        decide: SettlementDecision<'_>,
    ) -> BookingResult<SettlementPlan> {
        let mut state = self.state.lock().await;

        let appointment = state.appointments.get(&appointment_id).cloned();
        let slot = appointment.as_ref().and_then(|a| {
            state
                .slots
                .get(&(a.professional_id.clone(), a.slot_id.clone()))
                .cloned()
        });

        let plan = decide(SettlementSnapshot { appointment, slot })?;
        state.take_commit_failure()?;

        state
            .appointments
            .insert(plan.appointment.id, plan.appointment.clone());
        if let Some(slot) = &plan.slot {
            state
                .slots
                .insert((slot.professional_id.clone(), slot.slot_id.clone()), slot.clone());
        }
        state.outbox.extend(plan.events.iter().cloned());

        Ok(plan)
    }

    async fn find_expired_holds(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&HoldCursor>,
        limit: i64,
    ) -> BookingResult<Vec<Slot>> {
        let state = self.state.lock().await;
        if state.fail_expired_query {
            return Err(BookingError::internal("injected query failure"));
        }

        let mut expired: Vec<Slot> = state
            .slots
            .values()
            .filter(|slot| matches!(slot.state, SlotState::Held { .. }) && slot.updated_at < cutoff)
            .filter(|slot| after.map_or(true, |cursor| cursor.precedes(slot)))
            .cloned()
            .collect();
        expired.sort_by(|a, b| {
            (a.updated_at, &a.professional_id, &a.slot_id).cmp(&(b.updated_at, &b.professional_id, &b.slot_id))
        });
        expired.truncate(limit.max(0) as usize);
        Ok(expired)
    }

    async fn has_paid_appointment(&self, professional_id: &str, slot_id: &str) -> BookingResult<bool> {
        let state = self.state.lock().await;
        let key = (professional_id.to_string(), slot_id.to_string());
        if state.failing_paid_lookups.contains(&key) {
            return Err(BookingError::internal("injected lookup failure"));
        }

        Ok(state
            .appointments
            .values()
            .any(|a| a.professional_id == professional_id && a.slot_id == slot_id && a.paid))
    }

    async fn apply_releases(
        &self,
        releases: &[SlotRelease],
        now: DateTime<Utc>,
    ) -> BookingResult<ReleaseSummary> {
        if releases.is_empty() {
            return Ok(ReleaseSummary::default());
        }

        let mut state = self.state.lock().await;
        state.take_commit_failure()?;

        // Build the whole batch first so a failure leaves nothing half-applied.
        let mut slots = Vec::new();
        let mut appointments = Vec::new();
        let mut events = Vec::new();
        for release in releases {
            let key = (release.professional_id.clone(), release.slot_id.clone());
            let Some(slot) = state.slots.get(&key) else {
                continue;
            };
            if !slot.state.is_held_by(&release.held_by) || slot.updated_at != release.held_since {
                continue;
            }

            let mut slot = slot.clone();
            slot.release(now)?;
            events.push(OutboxEvent::new(
                &BookingEvent::HoldReleased {
                    professional_id: release.professional_id.clone(),
                    slot_id: release.slot_id.clone(),
                    held_by: release.held_by.clone(),
                },
                now,
            )?);
            slots.push((key, slot));

            for appointment in state.appointments.values().filter(|a| {
                a.professional_id == release.professional_id
                    && a.slot_id == release.slot_id
                    && a.status == AppointmentStatus::PendingPayment
            }) {
                let mut appointment = appointment.clone();
                appointment.cancel(now);
                events.push(OutboxEvent::new(
                    &BookingEvent::AppointmentCancelled {
                        appointment_id: appointment.id,
                        user_id: appointment.user_id.clone(),
                        slot_id: appointment.slot_id.clone(),
                        reason: "hold_expired".to_string(),
                    },
                    now,
                )?);
                appointments.push(appointment);
            }
        }

        let summary = ReleaseSummary {
            released: slots.len(),
            cancelled_appointments: appointments.len(),
        };
        state.slots.extend(slots);
        for appointment in appointments {
            state.appointments.insert(appointment.id, appointment);
        }
        state.outbox.extend(events);

        Ok(summary)
    }

    async fn pending_events(&self, limit: i64) -> BookingResult<Vec<OutboxEvent>> {
        let state = self.state.lock().await;
        let mut pending: Vec<OutboxEvent> = state.outbox.iter().filter(|e| !e.processed).cloned().collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_event_published(&self, event_id: Uuid) -> BookingResult<()> {
        let mut state = self.state.lock().await;
        if let Some(event) = state.outbox.iter_mut().find(|e| e.id == event_id) {
            event.processed = true;
        }
        Ok(())
    }
}
