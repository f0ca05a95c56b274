mod common;

use booking_service::caller::Caller;
use booking_service::error::BookingError;
use booking_service::payments::SETTLEMENT_FAILED;
use common::*;
use shared::{AppointmentStatus, PaymentStatus};
use uuid::Uuid;

fn provider() -> Caller {
    Caller::payment_provider("psp-webhook")
}

#[tokio::test]
async fn confirmed_payment_books_the_slot() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
    h.advance_minutes(3);

    let confirmation = h
        .payments
        .confirm_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap();
    assert_eq!(confirmation.appointment_id, receipt.appointment_id);
    assert_eq!(
        confirmation.booking_confirmation_url,
        format!(
            "https://care.example.com/appointments/{}/confirmation",
            receipt.appointment_id
        )
    );

    let appointment = h.store.appointment(receipt.appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::Confirmed);
    assert!(appointment.paid);
    assert_eq!(appointment.payment.status, PaymentStatus::Paid);

    let slot = h.store.slot(PRO, "slot-1").await.unwrap();
    assert_eq!(slot.state.booked_by(), Some("u1"));
    assert_eq!(slot.updated_at, h.clock_now());

    let outbox = h.store.outbox().await;
    assert_eq!(outbox.last().unwrap().event_type, "AppointmentConfirmed");
}

#[tokio::test]
async fn booked_slot_is_not_offered_again() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
    h.payments
        .confirm_payment(Some(&Caller::admin("ops")), receipt.appointment_id)
        .await
        .unwrap();

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u2")), PRO, "slot-1")
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::failed_precondition("Slot is no longer available"));
}

#[tokio::test]
async fn failed_payment_hands_the_slot_back() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();

    let id = h
        .payments
        .fail_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap();
    assert_eq!(id, receipt.appointment_id);

    let appointment = h.store.appointment(receipt.appointment_id).await.unwrap();
    assert_eq!(appointment.status, AppointmentStatus::PaymentFailed);
    assert_eq!(appointment.payment.status, PaymentStatus::Failed);
    assert!(!appointment.paid);
    assert!(h.store.slot(PRO, "slot-1").await.unwrap().is_free());

    h.transactor
        .book_slot(Some(&Caller::user("u2")), PRO, "slot-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn only_trusted_callers_settle_payments() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();

    let err = h
        .payments
        .confirm_payment(Some(&Caller::user("u1")), receipt.appointment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::PermissionDenied(_)));

    let err = h
        .payments
        .fail_payment(None, receipt.appointment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Unauthenticated(_)));

    assert_eq!(
        h.store.appointment(receipt.appointment_id).await.unwrap().status,
        AppointmentStatus::PendingPayment
    );
}

#[tokio::test]
async fn unknown_appointment_is_not_found() {
    let h = Harness::new().await;

    let err = h
        .payments
        .confirm_payment(Some(&provider()), Uuid::new_v4())
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::not_found("Appointment not found"));
}

#[tokio::test]
async fn settled_appointment_cannot_be_settled_twice() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
    h.payments
        .confirm_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap();

    let err = h
        .payments
        .confirm_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::failed_precondition("Appointment status 'confirmed' cannot be confirmed")
    );

    let err = h
        .payments
        .fail_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::FailedPrecondition(_)));
    assert_eq!(
        h.store.slot(PRO, "slot-1").await.unwrap().state.booked_by(),
        Some("u1")
    );
}

#[tokio::test]
async fn late_confirmation_after_reclaim_is_rejected() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();

    h.advance_minutes(16);
    h.sweeper.reclaim_expired_holds(None).await.unwrap();
    h.transactor
        .book_slot(Some(&Caller::user("u2")), PRO, "slot-1")
        .await
        .unwrap();

    let err = h
        .payments
        .confirm_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::FailedPrecondition(_)));
    assert_eq!(
        h.store.slot(PRO, "slot-1").await.unwrap().state.held_by(),
        Some("u2")
    );
}

#[tokio::test]
async fn storage_failure_during_settlement_is_masked() {
    let h = Harness::new().await;
    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
    h.store.fail_next_commit().await;

    let err = h
        .payments
        .confirm_payment(Some(&provider()), receipt.appointment_id)
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::internal(SETTLEMENT_FAILED));
    assert!(h.store.slot(PRO, "slot-1").await.unwrap().state.is_held_by("u1"));
}
