use rusqlite::Connection;

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Orders. payment_status is canonical and written only by the
        -- reconciliation engine; abandoned_at is stamped once by the sweeper.
        CREATE TABLE IF NOT EXISTS orders (
            order_number TEXT PRIMARY KEY,
            customer_name TEXT NOT NULL,
            customer_email TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL DEFAULT 'cop',
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'confirmed', 'in_production', 'ready', 'delivered', 'cancelled')),
            payment_status TEXT NOT NULL DEFAULT 'pending'
                CHECK (payment_status IN ('pending', 'paid', 'failed', 'refunded')),
            payment_id TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            abandoned_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_orders_pending
            ON orders(created_at) WHERE payment_status = 'pending' AND abandoned_at IS NULL;

        -- Payments as last seen at the gateway. id is gateway-assigned;
        -- rows are upserted by id, never duplicated.
        CREATE TABLE IF NOT EXISTS payments (
            id TEXT PRIMARY KEY,
            order_number TEXT NOT NULL REFERENCES orders(order_number),
            status TEXT NOT NULL
                CHECK (status IN ('pending', 'approved', 'rejected', 'cancelled')),
            status_detail TEXT,
            method TEXT,
            source_verified TEXT NOT NULL
                CHECK (source_verified IN ('webhook', 'polled', 'swept')),
            date_created INTEGER NOT NULL,
            date_approved INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_payments_order ON payments(order_number);
        CREATE INDEX IF NOT EXISTS idx_payments_pending
            ON payments(date_created) WHERE status = 'pending';

        -- Notification dedup ledger. The primary key enforces at most one
        -- record per (order, outcome); rows with delivery_result='in_flight'
        -- are claims that have not yet been confirmed.
        CREATE TABLE IF NOT EXISTS notifications (
            order_number TEXT NOT NULL,
            outcome TEXT NOT NULL
                CHECK (outcome IN ('pending', 'approved', 'rejected', 'cancelled', 'refunded')),
            sent_at INTEGER,
            delivery_result TEXT NOT NULL,
            claimed_at INTEGER NOT NULL,
            PRIMARY KEY (order_number, outcome)
        );
        "#,
    )
}
