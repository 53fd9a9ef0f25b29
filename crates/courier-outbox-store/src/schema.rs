//! Outbox database schema.
//!
//! Mirrors `migrations/20260115000001_create_outbox_messages.sql` for
//! deployments that bootstrap the table without the migration runner.

/// SQL to create the outbox table and its pending-row index.
pub const CREATE_OUTBOX_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS outbox_messages (
    id           UUID PRIMARY KEY,
    event_type   VARCHAR(255) NOT NULL,
    payload      TEXT NOT NULL,
    created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    processed_at TIMESTAMPTZ,
    failed_at    TIMESTAMPTZ,
    last_error   TEXT
);

CREATE INDEX IF NOT EXISTS idx_outbox_messages_pending
    ON outbox_messages (created_at, id)
    WHERE processed_at IS NULL AND failed_at IS NULL;
";

/// Claims the oldest pending rows, skipping rows another transaction holds.
pub(crate) const CLAIM_PENDING_ROWS: &str = r"
SELECT id, event_type, payload, created_at, processed_at, failed_at, last_error
FROM outbox_messages
WHERE processed_at IS NULL AND failed_at IS NULL
ORDER BY created_at, id
LIMIT $1
FOR UPDATE SKIP LOCKED
";

pub(crate) const INSERT_OUTBOX_ROW: &str = r"
INSERT INTO outbox_messages (id, event_type, payload, created_at)
VALUES ($1, $2, $3, $4)
";

pub(crate) const MARK_PROCESSED: &str = r"
UPDATE outbox_messages
SET processed_at = $2
WHERE id = $1 AND processed_at IS NULL
";

pub(crate) const MARK_FAILED: &str = r"
UPDATE outbox_messages
SET failed_at = $2, last_error = $3
WHERE id = $1 AND processed_at IS NULL
";

pub(crate) const SELECT_FAILED_ROWS: &str = r"
SELECT id, event_type, payload, created_at, processed_at, failed_at, last_error
FROM outbox_messages
WHERE failed_at IS NOT NULL
ORDER BY failed_at, id
";

pub(crate) const COUNT_PENDING: &str = r"
SELECT COUNT(*) FROM outbox_messages WHERE processed_at IS NULL AND failed_at IS NULL
";
