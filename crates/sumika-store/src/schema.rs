//! Schema bootstrap statements, applied idempotently at startup.

pub(crate) const CREATE_PROPERTIES: &str = r#"
CREATE TABLE IF NOT EXISTS properties (
    id                  CHAR(32) PRIMARY KEY,
    source_name         TEXT NOT NULL,
    source_property_id  TEXT NOT NULL,
    detail_url          TEXT NOT NULL,
    title               TEXT NOT NULL,
    thumbnail_url       TEXT,
    rent_yen            BIGINT,
    floor_plan          TEXT,
    floor_area_sqm      DOUBLE PRECISION,
    walk_minutes        INTEGER,
    nearest_station     TEXT,
    address             TEXT,
    building_age_years  INTEGER,
    floor               TEXT,
    status              TEXT NOT NULL DEFAULT 'active',
    removed_at          TIMESTAMPTZ,
    last_seen_at        TIMESTAMPTZ,
    fetched_at          TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL
)
"#;

pub(crate) const CREATE_QUEUE: &str = r#"
CREATE TABLE IF NOT EXISTS detail_scrape_queue (
    id                  BIGSERIAL PRIMARY KEY,
    source_name         TEXT NOT NULL,
    source_property_id  TEXT NOT NULL,
    detail_url          TEXT NOT NULL,
    status              TEXT NOT NULL DEFAULT 'pending',
    priority            INTEGER NOT NULL DEFAULT 0,
    attempts            INTEGER NOT NULL DEFAULT 0,
    last_error          TEXT,
    next_retry_at       TIMESTAMPTZ,
    created_at          TIMESTAMPTZ NOT NULL,
    updated_at          TIMESTAMPTZ NOT NULL,
    completed_at        TIMESTAMPTZ
)
"#;

pub(crate) const CREATE_SNAPSHOTS: &str = r#"
CREATE TABLE IF NOT EXISTS property_snapshots (
    id             BIGSERIAL PRIMARY KEY,
    property_id    CHAR(32) NOT NULL,
    snapshot_date  DATE NOT NULL,
    title          TEXT NOT NULL,
    rent_yen       BIGINT,
    status         TEXT NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL
)
"#;

pub(crate) const CREATE_CHANGES: &str = r#"
CREATE TABLE IF NOT EXISTS property_changes (
    id           BIGSERIAL PRIMARY KEY,
    property_id  CHAR(32) NOT NULL,
    change_kind  TEXT NOT NULL,
    changed_at   TIMESTAMPTZ NOT NULL
)
"#;

pub(crate) const INDEXES: &[&str] = &[
    // Producer-side dedup lookup.
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_properties_source
         ON properties (source_name, source_property_id)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_queue_source
         ON detail_scrape_queue (source_name, source_property_id)",
    // Worker-side leasing.
    "CREATE INDEX IF NOT EXISTS idx_queue_lease
         ON detail_scrape_queue (status, next_retry_at, priority DESC)",
    // Reporting.
    "CREATE INDEX IF NOT EXISTS idx_queue_status
         ON detail_scrape_queue (status)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_snapshots_day
         ON property_snapshots (property_id, snapshot_date)",
    "CREATE INDEX IF NOT EXISTS idx_changes_property
         ON property_changes (property_id)",
];
