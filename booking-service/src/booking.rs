use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::caller::{require_caller, Caller};
use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::store::{BookingPlan, BookingSnapshot, BookingStore};

pub const BOOKING_FAILED: &str = "Failed to book appointment";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingReceipt {
    pub appointment_id: Uuid,
    /// The call matched an existing open appointment and changed nothing.
    pub replayed: bool,
}

pub struct BookingTransactor {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
}

impl BookingTransactor {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Places a hold on the slot for the caller and opens a `pending_payment`
    /// appointment for it, or returns the caller's existing open appointment.
    /// Losing a race for the slot is reported immediately, never queued.
    pub async fn book_slot(
        &self,
        caller: Option<&Caller>,
        professional_id: &str,
        slot_id: &str,
    ) -> BookingResult<BookingReceipt> {
        let caller = require_caller(caller)?;
        let professional_id = professional_id.trim();
        let slot_id = slot_id.trim();
        if professional_id.is_empty() || slot_id.is_empty() {
            return Err(BookingError::invalid_argument(
                "professionalId and slotId are required",
            ));
        }

        let request = BookingRequest {
            user_id: caller.id.clone(),
            professional_id: professional_id.to_string(),
            slot_id: slot_id.to_string(),
        };
        let now = self.clock.now();
        let decide = |snapshot: BookingSnapshot| decide_booking(&request, snapshot, now);

        match self.store.run_booking_transaction(&request, &decide).await {
            Ok(BookingPlan::Replay { appointment_id }) => {
                info!(
                    "Replayed booking of slot {}/{} for user {} -> appointment {}",
                    request.professional_id, request.slot_id, request.user_id, appointment_id
                );
                Ok(BookingReceipt {
                    appointment_id,
                    replayed: true,
                })
            }
            Ok(BookingPlan::Hold { appointment, .. }) => {
                info!(
                    "Slot {}/{} held by user {}, appointment {} awaiting payment",
                    request.professional_id, request.slot_id, request.user_id, appointment.id
                );
                Ok(BookingReceipt {
                    appointment_id: appointment.id,
                    replayed: false,
                })
            }
            Err(e) if e.is_internal() => {
                error!(
                    "Booking transaction for slot {}/{} failed: {}",
                    request.professional_id, request.slot_id, e
                );
                Err(e.masked(BOOKING_FAILED))
            }
            Err(e) => {
                warn!(
                    "Booking of slot {}/{} by user {} rejected: {}",
                    request.professional_id, request.slot_id, request.user_id, e
                );
                Err(e)
            }
        }
    }
}

/// The booking rules, applied to a snapshot read inside the transaction.
///
/// An open appointment for the same user and slot is replayed before the
/// availability check: the first call already moved the slot to `held`, so a
/// retried call would otherwise be rejected as unavailable.
pub fn decide_booking(
    request: &BookingRequest,
    snapshot: BookingSnapshot,
    now: DateTime<Utc>,
) -> BookingResult<BookingPlan> {
    let mut slot = snapshot
        .slot
        .ok_or_else(|| BookingError::not_found("Slot not found"))?;

    if slot.professional_id != request.professional_id {
        return Err(BookingError::failed_precondition(
            "Slot does not belong to the specified professional",
        ));
    }

    if let Some(existing) = snapshot
        .open_appointment
        .filter(|a| a.matches(request) && !a.status.is_terminal())
    {
        return Ok(BookingPlan::Replay {
            appointment_id: existing.id,
        });
    }

    if !slot.is_free() {
        return Err(BookingError::failed_precondition("Slot is no longer available"));
    }

    let rate = snapshot
        .rate
        .ok_or_else(|| BookingError::failed_precondition("Professional rate not configured"))?;

    slot.hold(&request.user_id, now)?;
    let appointment = Appointment::pending_payment(&request.user_id, &slot, &rate, now);
    let event = BookingEvent::AppointmentHeld {
        appointment_id: appointment.id,
        user_id: appointment.user_id.clone(),
        professional_id: appointment.professional_id.clone(),
        slot_id: appointment.slot_id.clone(),
        amount_cents: appointment.payment.amount_cents,
        currency: appointment.payment.currency.clone(),
    };

    Ok(BookingPlan::Hold {
        slot,
        appointment,
        events: vec![OutboxEvent::new(&event, now)?],
    })
}
