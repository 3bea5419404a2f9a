//! SQL schema for the Bebop SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! layout so later migrations can be gated on it.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Events and their children are append-only.
-- No UPDATE or DELETE is ever issued against these tables.
CREATE TABLE IF NOT EXISTS events (
    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id    TEXT NOT NULL UNIQUE,
    event_name  TEXT NOT NULL,
    created_at  INTEGER NOT NULL     -- Unix milliseconds; server-assigned
);

-- Values are always text; numeric parameters hold canonical number text.
CREATE TABLE IF NOT EXISTS event_params (
    event_id     TEXT NOT NULL REFERENCES events(event_id),
    position     INTEGER NOT NULL,
    param_name   TEXT NOT NULL,
    param_value  TEXT NOT NULL,
    PRIMARY KEY (event_id, position),
    UNIQUE (event_id, param_name)
);

CREATE TABLE IF NOT EXISTS event_traces (
    event_id    TEXT NOT NULL REFERENCES events(event_id),
    position    INTEGER NOT NULL,
    trace_data  TEXT NOT NULL,       -- JSON payload, opaque to the store
    PRIMARY KEY (event_id, position)
);

CREATE TABLE IF NOT EXISTS event_claims (
    event_id     TEXT NOT NULL REFERENCES events(event_id),
    position     INTEGER NOT NULL,
    claim_name   TEXT NOT NULL,
    claim_value  TEXT NOT NULL,
    PRIMARY KEY (event_id, position)
);

CREATE INDEX IF NOT EXISTS events_created_idx ON events(created_at, seq);
CREATE INDEX IF NOT EXISTS events_name_idx    ON events(event_name);
CREATE INDEX IF NOT EXISTS params_name_idx    ON event_params(param_name, param_value);
CREATE INDEX IF NOT EXISTS claims_name_idx    ON event_claims(claim_name, claim_value);

PRAGMA user_version = 1;
";
