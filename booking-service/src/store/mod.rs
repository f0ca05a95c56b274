//! Transactional access to slots, appointments and the event outbox.
//!
//! Every state change runs as "read a snapshot, let the caller decide, apply
//! the plan" inside a single store transaction. The caller's decision closure
//! never touches storage itself, so all reads happen before any write and the
//! rules live in one place regardless of backend.

mod memory;
mod postgres;

pub use memory::InMemoryBookingStore;
pub use postgres::PgBookingStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{Appointment, BookingRequest, OutboxEvent, ProfessionalRate, Slot};
use uuid::Uuid;

use crate::error::BookingResult;

/// Everything the booking decision needs, read under the slot's lock.
#[derive(Debug, Clone, Default)]
pub struct BookingSnapshot {
    pub slot: Option<Slot>,
    /// Most recent appointment for the same user, professional and slot that
    /// is not in a terminal status.
    pub open_appointment: Option<Appointment>,
    pub rate: Option<ProfessionalRate>,
}

#[derive(Debug, Clone)]
pub enum BookingPlan {
    Replay {
        appointment_id: Uuid,
    },
    Hold {
        slot: Slot,
        appointment: Appointment,
        events: Vec<OutboxEvent>,
    },
}

impl BookingPlan {
    pub fn appointment_id(&self) -> Uuid {
        match self {
            BookingPlan::Replay { appointment_id } => *appointment_id,
            BookingPlan::Hold { appointment, .. } => appointment.id,
        }
    }
}

pub type BookingDecision<'a> =
    &'a (dyn Fn(BookingSnapshot) -> BookingResult<BookingPlan> + Send + Sync);

#[derive(Debug, Clone, Default)]
pub struct SettlementSnapshot {
    pub appointment: Option<Appointment>,
    pub slot: Option<Slot>,
}

#[derive(Debug, Clone)]
pub struct SettlementPlan {
    pub appointment: Appointment,
    /// New slot state to write, or `None` to leave the slot untouched.
    pub slot: Option<Slot>,
    pub events: Vec<OutboxEvent>,
}

pub type SettlementDecision<'a> =
    &'a (dyn Fn(SettlementSnapshot) -> BookingResult<SettlementPlan> + Send + Sync);

/// A hold the sweeper has decided to give back. It only applies while the
/// slot is still held by `held_by` since `held_since`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRelease {
    pub professional_id: String,
    pub slot_id: String,
    pub held_by: String,
    pub held_since: DateTime<Utc>,
}

impl SlotRelease {
    pub fn for_slot(slot: &Slot) -> Option<Self> {
        slot.state.held_by().map(|held_by| Self {
            professional_id: slot.professional_id.clone(),
            slot_id: slot.slot_id.clone(),
            held_by: held_by.to_string(),
            held_since: slot.updated_at,
        })
    }
}

/// Position in the oldest-first scan of held slots, ordered by
/// `(updated_at, professional_id, slot_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldCursor {
    pub updated_at: DateTime<Utc>,
    pub professional_id: String,
    pub slot_id: String,
}

impl HoldCursor {
    pub fn after(slot: &Slot) -> Self {
        Self {
            updated_at: slot.updated_at,
            professional_id: slot.professional_id.clone(),
            slot_id: slot.slot_id.clone(),
        }
    }

    /// True when `slot` sorts strictly after this position.
    pub fn precedes(&self, slot: &Slot) -> bool {
        (slot.updated_at, slot.professional_id.as_str(), slot.slot_id.as_str())
            > (self.updated_at, self.professional_id.as_str(), self.slot_id.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseSummary {
    pub released: usize,
    pub cancelled_appointments: usize,
}

#[async_trait]
pub trait BookingStore: Send + Sync {
    async fn run_booking_transaction(
        &self,
        request: &BookingRequest,
        decide: BookingDecision<'_>,
    ) -> BookingResult<BookingPlan>;

    async fn run_settlement_transaction(
        &self,
        appointment_id: Uuid,
        decide: SettlementDecision<'_>,
    ) -> BookingResult<SettlementPlan>;

    /// Held slots last touched before `cutoff`, oldest first, starting after
    /// `after` when given.
    async fn find_expired_holds(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&HoldCursor>,
        limit: i64,
    ) -> BookingResult<Vec<Slot>>;

    async fn has_paid_appointment(&self, professional_id: &str, slot_id: &str) -> BookingResult<bool>;

    /// Frees every still-matching hold and cancels its `pending_payment`
    /// appointments, all in one write.
    async fn apply_releases(
        &self,
        releases: &[SlotRelease],
        now: DateTime<Utc>,
    ) -> BookingResult<ReleaseSummary>;

    async fn pending_events(&self, limit: i64) -> BookingResult<Vec<OutboxEvent>>;

    async fn mark_event_published(&self, event_id: Uuid) -> BookingResult<()>;
}
