#![allow(dead_code)]

use booking_service::booking::BookingTransactor;
use booking_service::clock::{Clock, FixedClock};
use booking_service::payments::PaymentConfirmationHandler;
use booking_service::store::{BookingStore, InMemoryBookingStore};
use booking_service::sweeper::{ReclamationSweeper, SweepConfig};
use chrono::{DateTime, TimeZone, Utc};
use shared::{Appointment, AppointmentStatus, ProfessionalRate, Slot};
use std::sync::Arc;

pub const PRO: &str = "pro-1";
pub const OTHER_PRO: &str = "pro-2";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

pub fn rate(professional_id: &str) -> ProfessionalRate {
    ProfessionalRate {
        professional_id: professional_id.to_string(),
        amount_cents: 6000,
        currency: "EUR".to_string(),
    }
}

/// A slot held by `user_id` since `held_at` whose appointment has already
/// been paid, as left behind when confirmation lags the payment.
pub fn paid_hold(slot_id: &str, user_id: &str, held_at: DateTime<Utc>) -> (Slot, Appointment) {
    let mut slot = Slot::new_free(
        PRO,
        slot_id,
        held_at + chrono::Duration::days(2),
        50,
        "UTC",
        held_at,
    );
    slot.hold(user_id, held_at).unwrap();
    let mut appointment = Appointment::pending_payment(user_id, &slot, &rate(PRO), held_at);
    appointment.paid = true;
    appointment.status = AppointmentStatus::PendingConfirmation;
    (slot, appointment)
}

pub struct Harness {
    pub store: Arc<InMemoryBookingStore>,
    pub clock: Arc<FixedClock>,
    pub transactor: Arc<BookingTransactor>,
    pub sweeper: Arc<ReclamationSweeper>,
    pub payments: Arc<PaymentConfirmationHandler>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(SweepConfig::default()).await
    }

    /// `pro-1` with a rate and free slots `slot-1`..`slot-3`; `pro-2` with
    /// `slot-9` but no rate.
    pub async fn with_config(config: SweepConfig) -> Self {
        let store = Arc::new(InMemoryBookingStore::new());
        let clock = Arc::new(FixedClock::new(start()));

        store.set_rate(rate(PRO)).await;
        for n in 1..=3 {
            store
                .insert_slot(Slot::new_free(
                    PRO,
                    format!("slot-{}", n),
                    start() + chrono::Duration::days(1) + chrono::Duration::hours(n),
                    50,
                    "Europe/Lisbon",
                    start(),
                ))
                .await;
        }
        store
            .insert_slot(Slot::new_free(OTHER_PRO, "slot-9", start(), 50, "UTC", start()))
            .await;

        let dyn_store: Arc<dyn BookingStore> = store.clone();
        let dyn_clock: Arc<dyn Clock> = clock.clone();

        Self {
            transactor: Arc::new(BookingTransactor::new(dyn_store.clone(), dyn_clock.clone())),
            sweeper: Arc::new(ReclamationSweeper::new(dyn_store.clone(), dyn_clock.clone(), config)),
            payments: Arc::new(PaymentConfirmationHandler::new(
                dyn_store,
                dyn_clock,
                "https://care.example.com/",
            )),
            store,
            clock,
        }
    }

    pub fn advance_minutes(&self, minutes: i64) {
        self.clock.advance(chrono::Duration::minutes(minutes));
    }

    pub async fn seed_paid_hold(&self, slot_id: &str, user_id: &str, held_at: DateTime<Utc>) {
        let (slot, appointment) = paid_hold(slot_id, user_id, held_at);
        self.store.insert_slot(slot).await;
        self.store.insert_appointment(appointment).await;
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}
