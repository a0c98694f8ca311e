//! SQL schema for the recart SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS carts (
    cart_id             TEXT PRIMARY KEY,
    owner_key           TEXT NOT NULL,            -- 'user:<uuid>' | 'guest:<token>'
    items_json          TEXT NOT NULL DEFAULT '[]',
    item_count          INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    last_activity_at    TEXT NOT NULL,
    converted_order_ref TEXT,                     -- terminal once set
    converted_at        TEXT,
    reminder_count      INTEGER NOT NULL DEFAULT 0,
    last_reminder_at    TEXT,
    CHECK (reminder_count >= 0)
);

-- Only the SHA-256 digest of a token is stored.
CREATE TABLE IF NOT EXISTS recovery_tokens (
    token_hash  TEXT PRIMARY KEY,
    cart_id     TEXT NOT NULL REFERENCES carts(cart_id) ON DELETE CASCADE,
    issued_at   TEXT NOT NULL,
    expires_at  TEXT NOT NULL,
    consumed_at TEXT
);

-- One row per (cart, tier), ever. The primary key is the idempotency guard.
CREATE TABLE IF NOT EXISTS reminder_log (
    cart_id      TEXT NOT NULL REFERENCES carts(cart_id) ON DELETE CASCADE,
    tier_minutes INTEGER NOT NULL,
    template     TEXT NOT NULL,
    status       TEXT NOT NULL,                   -- 'pending' | 'sent' | 'blocked'
    consent      TEXT,
    claimed_at   TEXT NOT NULL,
    settled_at   TEXT,
    detail       TEXT,
    PRIMARY KEY (cart_id, tier_minutes),
    CHECK (status IN ('pending', 'sent', 'blocked'))
);

CREATE TABLE IF NOT EXISTS delivery_failures (
    failure_id   INTEGER PRIMARY KEY AUTOINCREMENT,
    cart_id      TEXT NOT NULL REFERENCES carts(cart_id) ON DELETE CASCADE,
    tier_minutes INTEGER NOT NULL,
    error        TEXT NOT NULL,
    failed_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS profiles (
    owner_key  TEXT PRIMARY KEY,
    email      TEXT,
    consent    TEXT NOT NULL DEFAULT 'unknown',
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS carts_owner_idx         ON carts(owner_key);
CREATE INDEX IF NOT EXISTS carts_activity_idx      ON carts(last_activity_at);
CREATE INDEX IF NOT EXISTS tokens_cart_idx         ON recovery_tokens(cart_id);
CREATE INDEX IF NOT EXISTS reminder_claimed_idx    ON reminder_log(claimed_at);
CREATE INDEX IF NOT EXISTS failures_failed_at_idx  ON delivery_failures(failed_at);

PRAGMA user_version = 1;
";
