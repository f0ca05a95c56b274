use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_HOLD_TIMEOUT_MINUTES: i64 = 15;
pub const MOCK_PAYMENT_PROVIDER: &str = "mock";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SlotStateError {
    #[error("slot status '{0}' is not recognised")]
    UnknownStatus(String),
    #[error("slot in status '{status}' has inconsistent holder columns")]
    InconsistentHolder { status: String },
    #[error("slot cannot move from '{from}' to '{to}'")]
    IllegalTransition { from: &'static str, to: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status '{value}'")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Occupancy of a slot. The holder id only exists in the variant that owns it,
/// so a free slot can never carry a `held_by` or `booked_by`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SlotState {
    Free,
    Held {
        #[serde(rename = "heldBy")]
        held_by: String,
    },
    Booked {
        #[serde(rename = "bookedBy")]
        booked_by: String,
    },
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Free => "free",
            SlotState::Held { .. } => "held",
            SlotState::Booked { .. } => "booked",
        }
    }

    pub fn held_by(&self) -> Option<&str> {
        match self {
            SlotState::Held { held_by } => Some(held_by),
            _ => None,
        }
    }

    pub fn booked_by(&self) -> Option<&str> {
        match self {
            SlotState::Booked { booked_by } => Some(booked_by),
            _ => None,
        }
    }

    pub fn is_held_by(&self, user_id: &str) -> bool {
        self.held_by() == Some(user_id)
    }

    /// Rebuilds the state from its persisted columns, rejecting any row where
    /// the holder columns disagree with the status.
    pub fn from_columns(
        status: &str,
        held_by: Option<String>,
        booked_by: Option<String>,
    ) -> Result<Self, SlotStateError> {
        let inconsistent = || SlotStateError::InconsistentHolder {
            status: status.to_string(),
        };
        match (status, held_by, booked_by) {
            ("free", None, None) => Ok(SlotState::Free),
            ("held", Some(held_by), None) if !held_by.is_empty() => Ok(SlotState::Held { held_by }),
            ("booked", None, Some(booked_by)) if !booked_by.is_empty() => {
                Ok(SlotState::Booked { booked_by })
            }
            ("free" | "held" | "booked", _, _) => Err(inconsistent()),
            (other, _, _) => Err(SlotStateError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub professional_id: String,
    pub slot_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: i32,
    pub timezone: String,
    #[serde(flatten)]
    pub state: SlotState,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    pub fn new_free(
        professional_id: impl Into<String>,
        slot_id: impl Into<String>,
        start: DateTime<Utc>,
        duration_minutes: i32,
        timezone: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            professional_id: professional_id.into(),
            slot_id: slot_id.into(),
            start,
            end: start + chrono::Duration::minutes(duration_minutes as i64),
            duration_minutes,
            timezone: timezone.into(),
            state: SlotState::Free,
            updated_at: now,
        }
    }

    pub fn is_free(&self) -> bool {
        self.state == SlotState::Free
    }

    pub fn hold(&mut self, user_id: &str, now: DateTime<Utc>) -> Result<(), SlotStateError> {
        if !self.is_free() {
            return Err(SlotStateError::IllegalTransition {
                from: self.state.as_str(),
                to: "held",
            });
        }
        self.state = SlotState::Held {
            held_by: user_id.to_string(),
        };
        self.updated_at = now;
        Ok(())
    }

    pub fn book(&mut self, user_id: &str, now: DateTime<Utc>) -> Result<(), SlotStateError> {
        if !self.state.is_held_by(user_id) {
            return Err(SlotStateError::IllegalTransition {
                from: self.state.as_str(),
                to: "booked",
            });
        }
        self.state = SlotState::Booked {
            booked_by: user_id.to_string(),
        };
        self.updated_at = now;
        Ok(())
    }

    pub fn release(&mut self, now: DateTime<Utc>) -> Result<(), SlotStateError> {
        if !matches!(self.state, SlotState::Held { .. }) {
            return Err(SlotStateError::IllegalTransition {
                from: self.state.as_str(),
                to: "free",
            });
        }
        self.state = SlotState::Free;
        self.updated_at = now;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    PendingPayment,
    PendingConfirmation,
    Confirmed,
    Cancelled,
    PaymentFailed,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::PendingPayment => "pending_payment",
            AppointmentStatus::PendingConfirmation => "pending_confirmation",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::PaymentFailed => "payment_failed",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Cancelled | AppointmentStatus::PaymentFailed | AppointmentStatus::Completed
        )
    }

    pub fn is_confirmable(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::PendingPayment | AppointmentStatus::PendingConfirmation
        )
    }

    pub fn terminal() -> [AppointmentStatus; 3] {
        [
            AppointmentStatus::Cancelled,
            AppointmentStatus::PaymentFailed,
            AppointmentStatus::Completed,
        ]
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_payment" => Ok(AppointmentStatus::PendingPayment),
            "pending_confirmation" => Ok(AppointmentStatus::PendingConfirmation),
            "confirmed" => Ok(AppointmentStatus::Confirmed),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "payment_failed" => Ok(AppointmentStatus::PaymentFailed),
            "completed" => Ok(AppointmentStatus::Completed),
            other => Err(ParseStatusError {
                kind: "appointment",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "paid" => Ok(PaymentStatus::Paid),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(ParseStatusError {
                kind: "payment",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInfo {
    pub provider: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfessionalRate {
    pub professional_id: String,
    pub amount_cents: i64,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: Uuid,
    pub user_id: String,
    pub professional_id: String,
    pub slot_id: String,
    pub status: AppointmentStatus,
    pub paid: bool,
    pub payment: PaymentInfo,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// A fresh appointment for a slot the user has just been given a hold on.
    pub fn pending_payment(
        user_id: &str,
        slot: &Slot,
        rate: &ProfessionalRate,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            professional_id: slot.professional_id.clone(),
            slot_id: slot.slot_id.clone(),
            status: AppointmentStatus::PendingPayment,
            paid: false,
            payment: PaymentInfo {
                provider: MOCK_PAYMENT_PROVIDER.to_string(),
                amount_cents: rate.amount_cents,
                currency: rate.currency.clone(),
                status: PaymentStatus::Pending,
            },
            start: slot.start,
            end: slot.end,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn matches(&self, request: &BookingRequest) -> bool {
        self.user_id == request.user_id
            && self.professional_id == request.professional_id
            && self.slot_id == request.slot_id
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) {
        self.status = AppointmentStatus::Confirmed;
        self.paid = true;
        self.payment.status = PaymentStatus::Paid;
        self.updated_at = now;
    }

    pub fn fail_payment(&mut self, now: DateTime<Utc>) {
        self.status = AppointmentStatus::PaymentFailed;
        self.payment.status = PaymentStatus::Failed;
        self.updated_at = now;
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) {
        self.status = AppointmentStatus::Cancelled;
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub user_id: String,
    pub professional_id: String,
    pub slot_id: String,
}

/// Lifecycle notifications written to the outbox alongside the state change
/// that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BookingEvent {
    AppointmentHeld {
        appointment_id: Uuid,
        user_id: String,
        professional_id: String,
        slot_id: String,
        amount_cents: i64,
        currency: String,
    },
    AppointmentConfirmed {
        appointment_id: Uuid,
        user_id: String,
        professional_id: String,
        slot_id: String,
    },
    PaymentFailed {
        appointment_id: Uuid,
        user_id: String,
        slot_id: String,
    },
    AppointmentCancelled {
        appointment_id: Uuid,
        user_id: String,
        slot_id: String,
        reason: String,
    },
    HoldReleased {
        professional_id: String,
        slot_id: String,
        held_by: String,
    },
}

impl BookingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            BookingEvent::AppointmentHeld { .. } => "AppointmentHeld",
            BookingEvent::AppointmentConfirmed { .. } => "AppointmentConfirmed",
            BookingEvent::PaymentFailed { .. } => "PaymentFailed",
            BookingEvent::AppointmentCancelled { .. } => "AppointmentCancelled",
            BookingEvent::HoldReleased { .. } => "HoldReleased",
        }
    }

    /// Appointment the event belongs to; released holds are keyed by a
    /// name-based id of their slot so every event for one slot lands together.
    pub fn aggregate_id(&self) -> Uuid {
        match self {
            BookingEvent::AppointmentHeld { appointment_id, .. }
            | BookingEvent::AppointmentConfirmed { appointment_id, .. }
            | BookingEvent::PaymentFailed { appointment_id, .. }
            | BookingEvent::AppointmentCancelled { appointment_id, .. } => *appointment_id,
            BookingEvent::HoldReleased {
                professional_id,
                slot_id,
                ..
            } => slot_aggregate_id(professional_id, slot_id),
        }
    }
}

pub fn slot_aggregate_id(professional_id: &str, slot_id: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}/{}", professional_id, slot_id).as_bytes(),
    )
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub event_data: serde_json::Value,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxEvent {
    pub fn new(event: &BookingEvent, now: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: Uuid::new_v4(),
            aggregate_id: event.aggregate_id(),
            event_type: event.event_type().to_string(),
            event_data: serde_json::to_value(event)?,
            processed: false,
            created_at: now,
        })
    }
}
