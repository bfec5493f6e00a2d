//! Fixed schema for the durable send queue. SQLite via `sqlx` is treated
//! as an external storage engine; this module specifies only the schema
//! and the queries run against it. The schema is created idempotently on
//! first open — there is no migration history to track.

pub const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queued_packets (
    packet_id          INTEGER PRIMARY KEY AUTOINCREMENT,
    attributes_blob    BLOB NOT NULL,
    content_blob       BLOB NOT NULL,
    estimated_size     INTEGER NOT NULL,
    created_at_millis  INTEGER NOT NULL,
    expires_at_millis  INTEGER NOT NULL,
    priority           INTEGER NOT NULL,
    transaction_id     TEXT
)
"#;

pub const CREATE_INDEX_PRIORITY: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queued_packets_priority
    ON queued_packets (priority, created_at_millis, packet_id)
"#;

pub const CREATE_INDEX_TRANSACTION: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queued_packets_transaction
    ON queued_packets (transaction_id)
"#;

pub const CREATE_INDEX_EXPIRES: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queued_packets_expires
    ON queued_packets (expires_at_millis)
"#;

/// Resets every reservation left over from a prior process: after a clean
/// restart, no row may reference a transaction that isn't live, so all
/// `transaction_id`s are cleared and the rows become selectable again
/// (at-least-once semantics).
pub const RESET_RESERVATIONS_ON_STARTUP: &str = r#"
UPDATE queued_packets SET transaction_id = NULL WHERE transaction_id IS NOT NULL
"#;
