use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::exists;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use shared::*;
use tracing::warn;
use uuid::Uuid;

use super::*;
use crate::error::{BookingError, BookingResult};
use crate::models::*;
use crate::schema::*;

type DbPool = Pool<AsyncPgConnection>;

pub struct PgBookingStore {
    pool: DbPool,
}

impl PgBookingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> BookingResult<PooledConnection<'_, AsyncPgConnection>> {
        self.pool
            .get()
            .await
            .map_err(|e| BookingError::internal(format!("failed to check out connection: {}", e)))
    }
}

async fn lock_slot(
    conn: &mut AsyncPgConnection,
    professional_id: &str,
    slot_id: &str,
) -> BookingResult<Option<Slot>> {
    let row = slots::table
        .filter(slots::professional_id.eq(professional_id))
        .filter(slots::slot_id.eq(slot_id))
        .for_update()
        .get_result::<DbSlot>(conn)
        .await
        .optional()?;

    Ok(row.map(Slot::try_from).transpose()?)
}

async fn write_slot_state(conn: &mut AsyncPgConnection, slot: &Slot) -> BookingResult<()> {
    diesel::update(
        slots::table
            .filter(slots::professional_id.eq(&slot.professional_id))
            .filter(slots::slot_id.eq(&slot.slot_id)),
    )
    .set((
        slots::status.eq(slot.state.as_str()),
        slots::held_by.eq(slot.state.held_by()),
        slots::booked_by.eq(slot.state.booked_by()),
        slots::updated_at.eq(slot.updated_at),
    ))
    .execute(conn)
    .await?;

    Ok(())
}

async fn insert_events(conn: &mut AsyncPgConnection, events: &[OutboxEvent]) -> BookingResult<()> {
    if events.is_empty() {
        return Ok(());
    }

    let rows: Vec<DbOutboxEvent> = events.iter().cloned().map(DbOutboxEvent::from).collect();
    diesel::insert_into(outbox_events::table)
        .values(&rows)
        .execute(conn)
        .await?;

    Ok(())
}

#[async_trait]
impl BookingStore for PgBookingStore {
    async fn run_booking_transaction(
        &self,
        request: &BookingRequest,
        decide: BookingDecision<'_>,
    ) -> BookingResult<BookingPlan> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                let slot = lock_slot(conn, &request.professional_id, &request.slot_id).await?;

                let open_appointment = appointments::table
                    .filter(appointments::user_id.eq(&request.user_id))
                    .filter(appointments::professional_id.eq(&request.professional_id))
                    .filter(appointments::slot_id.eq(&request.slot_id))
                    .filter(appointments::status.ne_all(
                        AppointmentStatus::terminal().map(|status| status.as_str()).to_vec(),
                    ))
                    .order(appointments::created_at.desc())
                    .first::<DbAppointment>(conn)
                    .await
                    .optional()?
                    .map(Appointment::try_from)
                    .transpose()?;

                let rate = professionals::table
                    .filter(professionals::professional_id.eq(&request.professional_id))
                    .first::<DbProfessional>(conn)
                    .await
                    .optional()?
                    .and_then(|professional| professional.rate());

                let plan = decide(BookingSnapshot {
                    slot,
                    open_appointment,
                    rate,
                })?;

                if let BookingPlan::Hold {
                    slot,
                    appointment,
                    events,
                } = &plan
                {
                    write_slot_state(conn, slot).await?;

                    diesel::insert_into(appointments::table)
                        .values(&DbAppointment::from(appointment))
                        .execute(conn)
                        .await?;

                    insert_events(conn, events).await?;
                }

                Ok(plan)
            })
        })
        .await
    }

    async fn run_settlement_transaction(
        &self,
        appointment_id: Uuid,
        decide: SettlementDecision<'_>,
    ) -> BookingResult<SettlementPlan> {
        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                // Slot before appointment, the same lock order as booking and sweeping.
                let slot_key = appointments::table
                    .filter(appointments::id.eq(appointment_id))
                    .select((appointments::professional_id, appointments::slot_id))
                    .first::<(String, String)>(conn)
                    .await
                    .optional()?;

                let slot = match &slot_key {
                    Some((professional_id, slot_id)) => lock_slot(conn, professional_id, slot_id).await?,
                    None => None,
                };

                let appointment = appointments::table
                    .filter(appointments::id.eq(appointment_id))
                    .for_update()
                    .get_result::<DbAppointment>(conn)
                    .await
                    .optional()?
                    .map(Appointment::try_from)
                    .transpose()?;

                let plan = decide(SettlementSnapshot { appointment, slot })?;

                diesel::update(appointments::table.filter(appointments::id.eq(plan.appointment.id)))
                    .set((
                        appointments::status.eq(plan.appointment.status.as_str()),
                        appointments::paid.eq(plan.appointment.paid),
                        appointments::payment_status.eq(plan.appointment.payment.status.as_str()),
                        appointments::updated_at.eq(plan.appointment.updated_at),
                    ))
                    .execute(conn)
                    .await?;

                if let Some(slot) = &plan.slot {
                    write_slot_state(conn, slot).await?;
                }

                insert_events(conn, &plan.events).await?;

                Ok(plan)
            })
        })
        .await
    }

    async fn find_expired_holds(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<&HoldCursor>,
        limit: i64,
    ) -> BookingResult<Vec<Slot>> {
        let mut conn = self.conn().await?;

        let mut query: slots::BoxedQuery<'_, Pg> = slots::table
            .filter(slots::status.eq("held"))
            .filter(slots::updated_at.lt(cutoff))
            .into_boxed();
        if let Some(cursor) = after {
            query = query.filter(
                slots::updated_at.gt(cursor.updated_at).or(slots::updated_at
                    .eq(cursor.updated_at)
                    .and(
                        slots::professional_id.gt(&cursor.professional_id).or(slots::professional_id
                            .eq(&cursor.professional_id)
                            .and(slots::slot_id.gt(&cursor.slot_id))),
                    )),
            );
        }

        let rows = query
            .order((
                slots::updated_at.asc(),
                slots::professional_id.asc(),
                slots::slot_id.asc(),
            ))
            .limit(limit)
            .load::<DbSlot>(&mut *conn)
            .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let key = format!("{}/{}", row.professional_id, row.slot_id);
                Slot::try_from(row)
                    .map_err(|e| warn!("Skipping unreadable slot {}: {}", key, e))
                    .ok()
            })
            .collect())
    }

    async fn has_paid_appointment(&self, professional_id: &str, slot_id: &str) -> BookingResult<bool> {
        let mut conn = self.conn().await?;

        let paid = diesel::select(exists(
            appointments::table
                .filter(appointments::professional_id.eq(professional_id))
                .filter(appointments::slot_id.eq(slot_id))
                .filter(appointments::paid.eq(true)),
        ))
        .get_result::<bool>(&mut *conn)
        .await?;

        Ok(paid)
    }

    async fn apply_releases(
        &self,
        releases: &[SlotRelease],
        now: DateTime<Utc>,
    ) -> BookingResult<ReleaseSummary> {
        if releases.is_empty() {
            return Ok(ReleaseSummary::default());
        }

        let mut pooled = self.conn().await?;
        let conn: &mut AsyncPgConnection = &mut pooled;

        conn.transaction::<_, BookingError, _>(|conn| {
            Box::pin(async move {
                let mut summary = ReleaseSummary::default();

                for release in releases {
                    let freed = diesel::update(
                        slots::table
                            .filter(slots::professional_id.eq(&release.professional_id))
                            .filter(slots::slot_id.eq(&release.slot_id))
                            .filter(slots::status.eq("held"))
                            .filter(slots::held_by.eq(&release.held_by))
                            .filter(slots::updated_at.eq(release.held_since)),
                    )
                    .set((
                        slots::status.eq("free"),
                        slots::held_by.eq(None::<String>),
                        slots::updated_at.eq(now),
                    ))
                    .execute(conn)
                    .await?;

                    if freed == 0 {
                        continue;
                    }
                    summary.released += 1;

                    let cancelled = diesel::update(
                        appointments::table
                            .filter(appointments::professional_id.eq(&release.professional_id))
                            .filter(appointments::slot_id.eq(&release.slot_id))
                            .filter(appointments::status.eq(AppointmentStatus::PendingPayment.as_str())),
                    )
                    .set((
                        appointments::status.eq(AppointmentStatus::Cancelled.as_str()),
                        appointments::updated_at.eq(now),
                    ))
                    .returning((appointments::id, appointments::user_id))
                    .get_results::<(Uuid, String)>(conn)
                    .await?;
                    summary.cancelled_appointments += cancelled.len();

                    let mut events = vec![OutboxEvent::new(
                        &BookingEvent::HoldReleased {
                            professional_id: release.professional_id.clone(),
                            slot_id: release.slot_id.clone(),
                            held_by: release.held_by.clone(),
                        },
                        now,
                    )?];
                    for (appointment_id, user_id) in cancelled {
                        events.push(OutboxEvent::new(
                            &BookingEvent::AppointmentCancelled {
                                appointment_id,
                                user_id,
                                slot_id: release.slot_id.clone(),
                                reason: "hold_expired".to_string(),
                            },
                            now,
                        )?);
                    }
                    insert_events(conn, &events).await?;
                }

                Ok(summary)
            })
        })
        .await
    }

    async fn pending_events(&self, limit: i64) -> BookingResult<Vec<OutboxEvent>> {
        let mut conn = self.conn().await?;

        let rows = outbox_events::table
            .filter(outbox_events::processed.eq(false))
            .order(outbox_events::created_at.asc())
            .limit(limit)
            .load::<DbOutboxEvent>(&mut *conn)
            .await?;

        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn mark_event_published(&self, event_id: Uuid) -> BookingResult<()> {
        let mut conn = self.conn().await?;

        diesel::update(outbox_events::table.filter(outbox_events::id.eq(event_id)))
            .set(outbox_events::processed.eq(true))
            .execute(&mut *conn)
            .await?;

        Ok(())
    }
}
