/// Schema for the offline store.
///
/// Flashcards, tests, test results and sync descriptors share the generic
/// `records` table, partitioned by `collection`. Cached assets and API
/// responses get their own tables so they can be purged by generation.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    collection TEXT NOT NULL,
    id INTEGER NOT NULL,
    index_key INTEGER,
    synced INTEGER,
    created_at TEXT,
    last_sync TEXT,
    data TEXT NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_records_index
    ON records(collection, index_key);

CREATE INDEX IF NOT EXISTS idx_records_last_sync
    ON records(collection, last_sync);

CREATE INDEX IF NOT EXISTS idx_records_unsynced
    ON records(collection, id) WHERE synced = 0;

CREATE TABLE IF NOT EXISTS static_assets (
    generation TEXT NOT NULL,
    url TEXT NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL,
    PRIMARY KEY (generation, url)
);

-- One row per request identity, latest write wins
CREATE TABLE IF NOT EXISTS api_responses (
    identity TEXT PRIMARY KEY,
    method TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    generation TEXT NOT NULL,
    cached_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_responses_generation
    ON api_responses(generation);

-- Activated version and key sequences; survives clear_all
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;
