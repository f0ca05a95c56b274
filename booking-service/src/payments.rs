use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::*;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::caller::{require_caller, Caller};
use crate::clock::Clock;
use crate::error::{BookingError, BookingResult};
use crate::store::{BookingStore, SettlementDecision, SettlementPlan, SettlementSnapshot};

pub const SETTLEMENT_FAILED: &str = "Failed to settle payment";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmation {
    pub appointment_id: Uuid,
    pub booking_confirmation_url: String,
}

/// Settles a held appointment once the payment outcome is known, either
/// turning the hold into a booking or handing the slot back.
pub struct PaymentConfirmationHandler {
    store: Arc<dyn BookingStore>,
    clock: Arc<dyn Clock>,
    public_base_url: String,
}

impl PaymentConfirmationHandler {
    pub fn new(store: Arc<dyn BookingStore>, clock: Arc<dyn Clock>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            clock,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn confirm_payment(
        &self,
        caller: Option<&Caller>,
        appointment_id: Uuid,
    ) -> BookingResult<PaymentConfirmation> {
        authorize(caller)?;
        let now = self.clock.now();
        let decide = |snapshot: SettlementSnapshot| decide_confirmation(appointment_id, snapshot, now);

        let plan = self.settle(appointment_id, &decide).await?;
        info!(
            "Appointment {} confirmed, slot {}/{} booked",
            appointment_id, plan.appointment.professional_id, plan.appointment.slot_id
        );

        Ok(PaymentConfirmation {
            appointment_id,
            booking_confirmation_url: format!(
                "{}/appointments/{}/confirmation",
                self.public_base_url, appointment_id
            ),
        })
    }

    pub async fn fail_payment(&self, caller: Option<&Caller>, appointment_id: Uuid) -> BookingResult<Uuid> {
        authorize(caller)?;
        let now = self.clock.now();
        let decide = |snapshot: SettlementSnapshot| decide_failure(appointment_id, snapshot, now);

        let plan = self.settle(appointment_id, &decide).await?;
        info!(
            "Payment failed for appointment {}, slot {}/{} {}",
            appointment_id,
            plan.appointment.professional_id,
            plan.appointment.slot_id,
            if plan.slot.is_some() { "released" } else { "left as is" }
        );

        Ok(appointment_id)
    }

    async fn settle(
        &self,
        appointment_id: Uuid,
        decide: SettlementDecision<'_>,
    ) -> BookingResult<SettlementPlan> {
        self.store
            .run_settlement_transaction(appointment_id, decide)
            .await
            .map_err(|e| {
                if e.is_internal() {
                    error!("Settlement of appointment {} failed: {}", appointment_id, e);
                } else {
                    warn!("Settlement of appointment {} rejected: {}", appointment_id, e);
                }
                e.masked(SETTLEMENT_FAILED)
            })
    }
}

fn authorize(caller: Option<&Caller>) -> BookingResult<()> {
    let caller = require_caller(caller)?;
    if !caller.can_settle_payments() {
        return Err(BookingError::permission_denied(
            "Only administrators or the payment provider can settle appointments",
        ));
    }
    Ok(())
}

fn settleable(appointment_id: Uuid, snapshot: &SettlementSnapshot) -> BookingResult<Appointment> {
    let appointment = snapshot
        .appointment
        .clone()
        .filter(|a| a.id == appointment_id)
        .ok_or_else(|| BookingError::not_found("Appointment not found"))?;

    if !appointment.status.is_confirmable() {
        return Err(BookingError::failed_precondition(format!(
            "Appointment status '{}' cannot be confirmed",
            appointment.status
        )));
    }

    Ok(appointment)
}

pub fn decide_confirmation(
    appointment_id: Uuid,
    snapshot: SettlementSnapshot,
    now: DateTime<Utc>,
) -> BookingResult<SettlementPlan> {
    let mut appointment = settleable(appointment_id, &snapshot)?;

    let mut slot = snapshot
        .slot
        .filter(|slot| slot.state.is_held_by(&appointment.user_id))
        .ok_or_else(|| BookingError::failed_precondition("Slot is no longer held for this appointment"))?;

    appointment.confirm(now);
    slot.book(&appointment.user_id, now)?;

    let event = BookingEvent::AppointmentConfirmed {
        appointment_id: appointment.id,
        user_id: appointment.user_id.clone(),
        professional_id: appointment.professional_id.clone(),
        slot_id: appointment.slot_id.clone(),
    };

    Ok(SettlementPlan {
        appointment,
        slot: Some(slot),
        events: vec![OutboxEvent::new(&event, now)?],
    })
}

pub fn decide_failure(
    appointment_id: Uuid,
    snapshot: SettlementSnapshot,
    now: DateTime<Utc>,
) -> BookingResult<SettlementPlan> {
    let mut appointment = settleable(appointment_id, &snapshot)?;
    appointment.fail_payment(now);

    // Only give the slot back if this appointment's user still holds it.
    let slot = match snapshot.slot {
        Some(mut slot) if slot.state.is_held_by(&appointment.user_id) => {
            slot.release(now)?;
            Some(slot)
        }
        _ => None,
    };

    let event = BookingEvent::PaymentFailed {
        appointment_id: appointment.id,
        user_id: appointment.user_id.clone(),
        slot_id: appointment.slot_id.clone(),
    };

    Ok(SettlementPlan {
        appointment,
        slot,
        events: vec![OutboxEvent::new(&event, now)?],
    })
}
