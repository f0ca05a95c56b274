use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use shared::*;
use uuid::Uuid;

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::slots)]
pub struct DbSlot {
    pub professional_id: String,
    pub slot_id: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    pub status: String,
    pub held_by: Option<String>,
    pub booked_by: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::appointments)]
pub struct DbAppointment {
    pub id: Uuid,
    pub user_id: String,
    pub professional_id: String,
    pub slot_id: String,
    pub status: String,
    pub paid: bool,
    pub payment_provider: String,
    pub payment_amount_cents: i64,
    pub payment_currency: String,
    pub payment_status: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = crate::schema::professionals)]
pub struct DbProfessional {
    pub professional_id: String,
    pub rate_amount_cents: Option<i64>,
    pub rate_currency: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Insertable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::outbox_events)]
pub struct DbOutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Slot> for DbSlot {
    fn from(slot: &Slot) -> Self {
        Self {
            professional_id: slot.professional_id.clone(),
            slot_id: slot.slot_id.clone(),
            start_at: slot.start,
            end_at: slot.end,
            duration_minutes: slot.duration_minutes,
            timezone: slot.timezone.clone(),
            status: slot.state.as_str().to_string(),
            held_by: slot.state.held_by().map(str::to_string),
            booked_by: slot.state.booked_by().map(str::to_string),
            updated_at: slot.updated_at,
        }
    }
}

impl TryFrom<DbSlot> for Slot {
    type Error = SlotStateError;

    fn try_from(db_slot: DbSlot) -> Result<Self, Self::Error> {
        let state = SlotState::from_columns(&db_slot.status, db_slot.held_by, db_slot.booked_by)?;
        Ok(Self {
            professional_id: db_slot.professional_id,
            slot_id: db_slot.slot_id,
            start: db_slot.start_at,
            end: db_slot.end_at,
            duration_minutes: db_slot.duration_minutes,
            timezone: db_slot.timezone,
            state,
            updated_at: db_slot.updated_at,
        })
    }
}

impl From<&Appointment> for DbAppointment {
    fn from(appointment: &Appointment) -> Self {
        Self {
            id: appointment.id,
            user_id: appointment.user_id.clone(),
            professional_id: appointment.professional_id.clone(),
            slot_id: appointment.slot_id.clone(),
            status: appointment.status.as_str().to_string(),
            paid: appointment.paid,
            payment_provider: appointment.payment.provider.clone(),
            payment_amount_cents: appointment.payment.amount_cents,
            payment_currency: appointment.payment.currency.clone(),
            payment_status: appointment.payment.status.as_str().to_string(),
            start_at: appointment.start,
            end_at: appointment.end,
            created_at: appointment.created_at,
            updated_at: appointment.updated_at,
        }
    }
}

impl TryFrom<DbAppointment> for Appointment {
    type Error = ParseStatusError;

    fn try_from(db_appointment: DbAppointment) -> Result<Self, Self::Error> {
        Ok(Self {
            id: db_appointment.id,
            user_id: db_appointment.user_id,
            professional_id: db_appointment.professional_id,
            slot_id: db_appointment.slot_id,
            status: db_appointment.status.parse()?,
            paid: db_appointment.paid,
            payment: PaymentInfo {
                provider: db_appointment.payment_provider,
                amount_cents: db_appointment.payment_amount_cents,
                currency: db_appointment.payment_currency,
                status: db_appointment.payment_status.parse()?,
            },
            start: db_appointment.start_at,
            end: db_appointment.end_at,
            created_at: db_appointment.created_at,
            updated_at: db_appointment.updated_at,
        })
    }
}

impl DbProfessional {
    /// A professional without both rate columns has no bookable price yet.
    pub fn rate(&self) -> Option<ProfessionalRate> {
        match (self.rate_amount_cents, &self.rate_currency) {
            (Some(amount_cents), Some(currency)) if amount_cents >= 0 && !currency.is_empty() => {
                Some(ProfessionalRate {
                    professional_id: self.professional_id.clone(),
                    amount_cents,
                    currency: currency.clone(),
                })
            }
            _ => None,
        }
    }
}

impl From<OutboxEvent> for DbOutboxEvent {
    fn from(event: OutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}

impl From<DbOutboxEvent> for OutboxEvent {
    fn from(event: DbOutboxEvent) -> Self {
        Self {
            id: event.id,
            aggregate_id: event.aggregate_id,
            event_type: event.event_type,
            event_data: event.event_data,
            processed: event.processed,
            created_at: event.created_at,
        }
    }
}
