//! Database schema definitions
//!
//! This module contains the SQL schema for the listing store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS crawl_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    site TEXT NOT NULL,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    locations INTEGER,
    pages_attempted INTEGER,
    pages_failed INTEGER,
    listings_persisted INTEGER
);

-- One identity row per listing
CREATE TABLE IF NOT EXISTS property (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    external_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    modified_at TEXT,
    UNIQUE(external_id, source)
);

CREATE INDEX IF NOT EXISTS idx_property_source ON property(source);

-- Active flag; cleared by downstream processes only
CREATE TABLE IF NOT EXISTS property_status (
    property_id INTEGER PRIMARY KEY REFERENCES property(id),
    active INTEGER NOT NULL
);

-- Last time a crawl saw the listing
CREATE TABLE IF NOT EXISTS property_seen (
    property_id INTEGER PRIMARY KEY REFERENCES property(id),
    last_seen_at TEXT NOT NULL
);

-- Site location ids by postal code
CREATE TABLE IF NOT EXISTS location_reference (
    location_id TEXT NOT NULL,
    postal_code TEXT NOT NULL,
    PRIMARY KEY (location_id, postal_code)
);

CREATE INDEX IF NOT EXISTS idx_location_reference_postal ON location_reference(postal_code);

-- Postal codes by state
CREATE TABLE IF NOT EXISTS postal_region (
    postal_code TEXT NOT NULL,
    state TEXT NOT NULL,
    PRIMARY KEY (postal_code, state)
);

CREATE INDEX IF NOT EXISTS idx_postal_region_state ON postal_region(state);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
