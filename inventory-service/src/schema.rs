diesel::table! {
    inventory (id) {
        id -> Uuid,
        product_id -> Varchar,
        available_quantity -> Int4,
        reserved_quantity -> Int4,
        low_stock_threshold -> Int4,
        last_restock_date -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    processed_commands (idempotency_key) {
        idempotency_key -> Varchar,
        command_id -> Uuid,
        result -> Nullable<Jsonb>,
        processed_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    reservations (id) {
        id -> Uuid,
        order_id -> Varchar,
        status -> Varchar,
        expires_at -> Timestamptz,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    reservation_items (reservation_id, position) {
        reservation_id -> Uuid,
        position -> Int4,
        product_id -> Varchar,
        quantity -> Int4,
    }
}

diesel::joinable!(reservation_items -> reservations (reservation_id));

diesel::allow_tables_to_appear_in_same_query!(
    inventory,
    processed_commands,
    reservations,
    reservation_items,
);
