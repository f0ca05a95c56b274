diesel::table! {
    appointments (id) {
        id -> Uuid,
        user_id -> Varchar,
        professional_id -> Varchar,
        slot_id -> Varchar,
        status -> Varchar,
        paid -> Bool,
        payment_provider -> Varchar,
        payment_amount_cents -> Int8,
        payment_currency -> Varchar,
        payment_status -> Varchar,
        start_at -> Timestamptz,
        end_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    outbox_events (id) {
        id -> Uuid,
        aggregate_id -> Uuid,
        event_type -> Varchar,
        event_data -> Jsonb,
        processed -> Bool,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    professionals (professional_id) {
        professional_id -> Varchar,
        rate_amount_cents -> Nullable<Int8>,
        rate_currency -> Nullable<Varchar>,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    slots (professional_id, slot_id) {
        professional_id -> Varchar,
        slot_id -> Varchar,
        start_at -> Timestamptz,
        end_at -> Timestamptz,
        duration_minutes -> Int4,
        timezone -> Varchar,
        status -> Varchar,
        held_by -> Nullable<Varchar>,
        booked_by -> Nullable<Varchar>,
        updated_at -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    appointments,
    outbox_events,
    professionals,
    slots,
);
