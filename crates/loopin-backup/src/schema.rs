//! SQL for the engine's bookkeeping tables and the application schema.
//!
//! The bookkeeping DDL runs at every engine start. The application schema is
//! only created on request (`loopin-backup init`, tests); in production the
//! application owns it. Its version lives in `PRAGMA user_version`.

/// Version of the application schema this engine restores into.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// Oldest artifact schema the payload migrations can lift to current.
pub const OLDEST_RESTORABLE_VERSION: u32 = 1;

/// Tables with this prefix are disposable restore staging areas.
pub const STAGE_PREFIX: &str = "_stage_";

/// Tables with this prefix belong to the engine and are never dumped.
pub const BOOKKEEPING_PREFIX: &str = "_loopin_";

/// Provenance of rows currently in the archive holding area.
pub const ARCHIVE_ORIGINS: &str = "_loopin_archive_origins";

/// Held by the restore session running against the database, from any
/// process.
pub const RESTORE_LOCK: &str = "_loopin_restore_lock";

/// Idempotent engine bookkeeping DDL.
pub const BOOKKEEPING: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- Where each archived row came from. Not part of any structural dump: an
-- artifact carries this information in its metadata record instead.
CREATE TABLE IF NOT EXISTS _loopin_archive_origins (
    item_id      TEXT PRIMARY KEY,
    origin_table TEXT NOT NULL,
    origin_key   TEXT NOT NULL,   -- JSON-encoded primary-key value
    archived_at  TEXT NOT NULL    -- RFC 3339 UTC
);

-- The restore session currently running against this database, from any
-- engine or process. At most one row; a row past `expires_at` is stale.
CREATE TABLE IF NOT EXISTS _loopin_restore_lock (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    session_id  TEXT NOT NULL,
    artifact_id TEXT NOT NULL,
    acquired_at TEXT NOT NULL,    -- RFC 3339 UTC
    expires_at  TEXT NOT NULL     -- RFC 3339 UTC
);

-- One row per completed restore, written inside the finalizing transaction.
CREATE TABLE IF NOT EXISTS _loopin_restores (
    session_id    TEXT PRIMARY KEY,
    artifact_id   TEXT NOT NULL,
    policy        TEXT NOT NULL,
    migrated_from INTEGER,
    finished_at   TEXT NOT NULL
);
";

/// The team-update application's tables.
pub const APP_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    username      TEXT NOT NULL UNIQUE,
    display_name  TEXT NOT NULL,
    email         TEXT UNIQUE,
    password_hash TEXT NOT NULL,
    role          TEXT NOT NULL DEFAULT 'user',
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS updates (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL,
    message    TEXT NOT NULL,
    process    TEXT NOT NULL DEFAULT 'general',
    timestamp  TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS read_logs (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    update_id  TEXT NOT NULL REFERENCES updates(id) ON DELETE CASCADE,
    user_id    INTEGER REFERENCES users(id),
    guest_name TEXT,
    timestamp  TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Archive holding area: archived rows of any table, as JSON objects.
CREATE TABLE IF NOT EXISTS archive (
    item_id     TEXT PRIMARY KEY,
    row_json    TEXT NOT NULL,
    archived_at TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS read_logs_update_idx ON read_logs(update_id);

PRAGMA user_version = 3;
";
