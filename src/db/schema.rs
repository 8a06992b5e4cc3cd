//! Database schema definitions

pub const CREATE_PAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL,
    domain TEXT,
    created_at BIGINT NOT NULL,
    last_hit_at BIGINT NOT NULL,
    UNIQUE(path, domain)
)
"#;

pub const CREATE_VISITORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS visitors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL UNIQUE,
    user_agent TEXT NOT NULL,
    referrer TEXT,
    country TEXT,
    last_seen_at BIGINT NOT NULL
)
"#;

// The UNIQUE(page_id, visitor_id) constraint is what makes visit dedup
// race-free: recording is a single INSERT OR IGNORE, and "zero rows
// affected" is the already-visited signal.
pub const CREATE_VISITS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS visits (
    page_id INTEGER NOT NULL,
    visitor_id INTEGER NOT NULL,
    visited_at BIGINT NOT NULL,
    UNIQUE(page_id, visitor_id)
)
"#;

pub const CREATE_SESSIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    visitor_id INTEGER NOT NULL,
    start_time BIGINT NOT NULL,
    end_time BIGINT,
    page_views INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
)
"#;

// Soft-hide marker: presence excludes a page from active listings and
// aggregates without touching its visit history.
pub const CREATE_BLACKLIST_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS blacklist (
    page_id INTEGER PRIMARY KEY,
    blacklisted_at BIGINT NOT NULL
)
"#;

// === COVERING INDEXES (optimized for stats queries) ===

// For time-based filtering and per-page aggregation
pub const CREATE_INDEX_VISITS_TS: &str =
    "CREATE INDEX IF NOT EXISTS idx_visits_ts ON visits(visited_at, page_id)";

// For the recent-activity session check (visitor + window scan)
pub const CREATE_INDEX_VISITS_VISITOR_TS: &str =
    "CREATE INDEX IF NOT EXISTS idx_visits_visitor_ts ON visits(visitor_id, visited_at)";

// === UTILITY INDEXES ===

// For active-session lookup per visitor
pub const CREATE_INDEX_SESSIONS_VISITOR: &str =
    "CREATE INDEX IF NOT EXISTS idx_sessions_visitor ON sessions(visitor_id, is_active, start_time)";

// For domain-filtered page listings
pub const CREATE_INDEX_PAGES_DOMAIN: &str =
    "CREATE INDEX IF NOT EXISTS idx_pages_domain ON pages(domain)";
