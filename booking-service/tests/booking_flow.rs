mod common;

use booking_service::booking::BOOKING_FAILED;
use booking_service::caller::Caller;
use booking_service::error::BookingError;
use common::*;
use shared::{AppointmentStatus, Slot, SlotState};

#[tokio::test]
async fn booking_holds_slot_and_creates_pending_appointment() {
    let h = Harness::new().await;

    let receipt = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
    assert!(!receipt.replayed);

    let slot = h.store.slot(PRO, "slot-1").await.unwrap();
    assert_eq!(slot.state, SlotState::Held { held_by: "u1".into() });
    assert_eq!(slot.updated_at, start());

    let appointment = h.store.appointment(receipt.appointment_id).await.unwrap();
    assert_eq!(appointment.user_id, "u1");
    assert_eq!(appointment.professional_id, slot.professional_id);
    assert_eq!(appointment.slot_id, slot.slot_id);
    assert_eq!(appointment.status, AppointmentStatus::PendingPayment);
    assert!(!appointment.paid);
    assert_eq!(appointment.payment.amount_cents, 6000);
    assert_eq!(appointment.payment.currency, "EUR");
    assert_eq!(appointment.start, slot.start);
    assert_eq!(appointment.end, slot.end);

    let outbox = h.store.outbox().await;
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0].event_type, "AppointmentHeld");
}

#[tokio::test]
async fn second_user_is_turned_away_from_held_slot() {
    let h = Harness::new().await;

    h.transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u2")), PRO, "slot-1")
        .await
        .unwrap_err();

    assert_eq!(err, BookingError::failed_precondition("Slot is no longer available"));
    assert_eq!(h.store.appointments_for_slot(PRO, "slot-1").await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_have_exactly_one_winner() {
    let h = Harness::new().await;

    let attempts: Vec<_> = (0..32)
        .map(|n| {
            let transactor = h.transactor.clone();
            tokio::spawn(async move {
                transactor
                    .book_slot(Some(&Caller::user(format!("user-{}", n))), PRO, "slot-2")
                    .await
            })
        })
        .collect();

    let results: Vec<_> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(e) = result {
            assert_eq!(e, &BookingError::failed_precondition("Slot is no longer available"));
        }
    }

    let appointments = h.store.appointments_for_slot(PRO, "slot-2").await;
    let open: Vec<_> = appointments.iter().filter(|a| !a.status.is_terminal()).collect();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, winners[0].appointment_id);

    let slot = h.store.slot(PRO, "slot-2").await.unwrap();
    assert_eq!(slot.state.held_by(), Some(open[0].user_id.as_str()));
}

#[tokio::test]
async fn retrying_a_booking_returns_the_same_appointment() {
    let h = Harness::new().await;
    let caller = Caller::user("u1");

    let first = h.transactor.book_slot(Some(&caller), PRO, "slot-1").await.unwrap();
    h.advance_minutes(1);
    let second = h.transactor.book_slot(Some(&caller), PRO, "slot-1").await.unwrap();

    assert_eq!(first.appointment_id, second.appointment_id);
    assert!(second.replayed);
    assert_eq!(h.store.appointments_for_slot(PRO, "slot-1").await.len(), 1);

    // The replay must not refresh the hold.
    let slot = h.store.slot(PRO, "slot-1").await.unwrap();
    assert_eq!(slot.updated_at, start());
    assert_eq!(h.store.outbox().await.len(), 1);
}

#[tokio::test]
async fn unknown_slot_is_not_found() {
    let h = Harness::new().await;

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-404")
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::not_found("Slot not found"));
}

#[tokio::test]
async fn slot_under_another_professional_is_not_bookable_through_this_one() {
    let h = Harness::new().await;

    // slot-9 exists only under pro-2, so it is not found under pro-1.
    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-9")
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::not_found("Slot not found"));
}

#[tokio::test]
async fn slot_record_of_another_professional_is_rejected() {
    let h = Harness::new().await;
    let foreign = Slot::new_free(OTHER_PRO, "slot-x", start(), 50, "UTC", start());
    h.store.insert_slot_under(PRO, foreign).await;

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-x")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::failed_precondition("Slot does not belong to the specified professional")
    );
    assert!(h.store.appointments_for_slot(PRO, "slot-x").await.is_empty());
}

#[tokio::test]
async fn professional_without_rate_cannot_be_booked() {
    let h = Harness::new().await;

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), OTHER_PRO, "slot-9")
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::failed_precondition("Professional rate not configured"));
    assert!(h.store.slot(OTHER_PRO, "slot-9").await.unwrap().is_free());
    assert!(h.store.appointments_for_slot(OTHER_PRO, "slot-9").await.is_empty());
}

#[tokio::test]
async fn anonymous_and_malformed_requests_are_rejected_up_front() {
    let h = Harness::new().await;

    let err = h.transactor.book_slot(None, PRO, "slot-1").await.unwrap_err();
    assert!(matches!(err, BookingError::Unauthenticated(_)));

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("  ")), PRO, "slot-1")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::Unauthenticated(_)));

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), "", "slot-1")
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BookingError::invalid_argument("professionalId and slotId are required")
    );

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "   ")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::InvalidArgument(_)));

    assert!(h.store.slot(PRO, "slot-1").await.unwrap().is_free());
}

#[tokio::test]
async fn storage_failure_is_reported_as_internal_without_detail() {
    let h = Harness::new().await;
    h.store.fail_next_commit().await;

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap_err();
    assert_eq!(err, BookingError::internal(BOOKING_FAILED));

    // Nothing was written, and a retry goes through.
    assert!(h.store.slot(PRO, "slot-1").await.unwrap().is_free());
    assert!(h.store.appointments_for_slot(PRO, "slot-1").await.is_empty());
    h.transactor
        .book_slot(Some(&Caller::user("u1")), PRO, "slot-1")
        .await
        .unwrap();
}

#[tokio::test]
async fn user_can_hold_several_different_slots() {
    let h = Harness::new().await;
    let caller = Caller::user("u1");

    let a = h.transactor.book_slot(Some(&caller), PRO, "slot-1").await.unwrap();
    let b = h.transactor.book_slot(Some(&caller), PRO, "slot-2").await.unwrap();
    assert_ne!(a.appointment_id, b.appointment_id);
}

#[tokio::test]
async fn abandoned_hold_is_reclaimed_and_slot_rebooked() {
    let h = Harness::new().await;

    let a1 = h
        .transactor
        .book_slot(Some(&Caller::user("U1")), PRO, "slot-1")
        .await
        .unwrap();
    let slot = h.store.slot(PRO, "slot-1").await.unwrap();
    assert_eq!(slot.state.held_by(), Some("U1"));

    let err = h
        .transactor
        .book_slot(Some(&Caller::user("U2")), PRO, "slot-1")
        .await
        .unwrap_err();
    assert!(matches!(err, BookingError::FailedPrecondition(_)));

    h.advance_minutes(16);
    let report = h.sweeper.reclaim_expired_holds(None).await.unwrap();
    assert_eq!(report.released_count, 1);

    let slot = h.store.slot(PRO, "slot-1").await.unwrap();
    assert!(slot.is_free());
    assert_eq!(slot.state.held_by(), None);
    assert_eq!(
        h.store.appointment(a1.appointment_id).await.unwrap().status,
        AppointmentStatus::Cancelled
    );

    let a2 = h
        .transactor
        .book_slot(Some(&Caller::user("U2")), PRO, "slot-1")
        .await
        .unwrap();
    assert_ne!(a2.appointment_id, a1.appointment_id);
    assert_eq!(
        h.store.slot(PRO, "slot-1").await.unwrap().state.held_by(),
        Some("U2")
    );
}

#[tokio::test]
async fn user_whose_hold_expired_gets_a_fresh_appointment() {
    let h = Harness::new().await;
    let caller = Caller::user("u1");

    let first = h.transactor.book_slot(Some(&caller), PRO, "slot-1").await.unwrap();
    h.advance_minutes(20);
    h.sweeper.reclaim_expired_holds(None).await.unwrap();

    let second = h.transactor.book_slot(Some(&caller), PRO, "slot-1").await.unwrap();
    assert_ne!(first.appointment_id, second.appointment_id);
    assert!(!second.replayed);

    let appointments = h.store.appointments_for_slot(PRO, "slot-1").await;
    assert_eq!(appointments.len(), 2);
    assert_eq!(appointments.iter().filter(|a| !a.status.is_terminal()).count(), 1);
}
