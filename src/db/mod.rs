//! Database module

mod schema;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite, SqlitePool};

use crate::config::DatabaseConfig;

/// A tracked page, unique per (path, domain)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: i64,
    pub path: String,
    pub domain: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_hit_at: DateTime<Utc>,
}

/// A deduplicated anonymous visitor, keyed by fingerprint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub id: i64,
    pub fingerprint: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub last_seen_at: DateTime<Utc>,
}

/// A browsing session; at most one active per visitor at a time
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub visitor_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub page_views: i64,
    pub is_active: bool,
}

/// Page row joined with its total visit count, for admin listings
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageListing {
    pub id: i64,
    pub path: String,
    pub domain: Option<String>,
    pub visit_count: i64,
    pub created_at: DateTime<Utc>,
    pub last_hit_at: DateTime<Utc>,
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.url)).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        // Enable WAL mode for better concurrency
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        sqlx::query(schema::CREATE_PAGES_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_VISITORS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_VISITS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_SESSIONS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_BLACKLIST_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_VISITS_TS)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_VISITS_VISITOR_TS)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_SESSIONS_VISITOR)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_INDEX_PAGES_DOMAIN)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Pages ===

    pub async fn find_page(
        &self,
        path: &str,
        domain: Option<&str>,
    ) -> Result<Option<Page>, sqlx::Error> {
        let row: Option<(i64, String, Option<String>, i64, i64)> = sqlx::query_as(
            "SELECT id, path, domain, created_at, last_hit_at FROM pages WHERE path = ? AND domain IS ?",
        )
        .bind(path)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, path, domain, created_at, last_hit_at)| Page {
            id,
            path,
            domain,
            created_at: from_millis(created_at),
            last_hit_at: from_millis(last_hit_at),
        }))
    }

    pub async fn page_by_id(&self, page_id: i64) -> Result<Option<Page>, sqlx::Error> {
        let row: Option<(i64, String, Option<String>, i64, i64)> = sqlx::query_as(
            "SELECT id, path, domain, created_at, last_hit_at FROM pages WHERE id = ?",
        )
        .bind(page_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, path, domain, created_at, last_hit_at)| Page {
            id,
            path,
            domain,
            created_at: from_millis(created_at),
            last_hit_at: from_millis(last_hit_at),
        }))
    }

    /// Insert-if-absent on the (path, domain) natural key; safe to race.
    pub async fn insert_page(
        &self,
        path: &str,
        domain: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO pages (path, domain, created_at, last_hit_at) VALUES (?, ?, ?, ?)",
        )
        .bind(path)
        .bind(domain)
        .bind(millis(now))
        .bind(millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn touch_page_last_hit(
        &self,
        page_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE pages SET last_hit_at = ? WHERE id = ?")
            .bind(millis(now))
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Visitors ===

    pub async fn find_visitor_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<Visitor>, sqlx::Error> {
        let row: Option<(i64, String, String, Option<String>, Option<String>, i64)> = sqlx::query_as(
            "SELECT id, fingerprint, user_agent, referrer, country, last_seen_at FROM visitors WHERE fingerprint = ?",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, fingerprint, user_agent, referrer, country, last_seen_at)| Visitor {
                id,
                fingerprint,
                user_agent,
                referrer,
                country,
                last_seen_at: from_millis(last_seen_at),
            },
        ))
    }

    pub async fn insert_visitor(
        &self,
        fingerprint: &str,
        user_agent: &str,
        referrer: Option<&str>,
        country: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Visitor, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO visitors (fingerprint, user_agent, referrer, country, last_seen_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(fingerprint)
        .bind(user_agent)
        .bind(referrer)
        .bind(country)
        .bind(millis(now))
        .execute(&self.pool)
        .await?;

        Ok(Visitor {
            id: result.last_insert_rowid(),
            fingerprint: fingerprint.to_string(),
            user_agent: user_agent.to_string(),
            referrer: referrer.map(str::to_string),
            country: country.map(str::to_string),
            last_seen_at: now,
        })
    }

    pub async fn touch_visitor_last_seen(
        &self,
        visitor_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE visitors SET last_seen_at = ? WHERE id = ?")
            .bind(millis(now))
            .bind(visitor_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Visits ===

    /// Atomic conditional insert against UNIQUE(page_id, visitor_id).
    /// Returns false when the visitor already has a counted visit for the
    /// page; there is no separate pre-check to race against.
    pub async fn insert_visit_if_absent(
        &self,
        page_id: i64,
        visitor_id: i64,
        at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO visits (page_id, visitor_id, visited_at) VALUES (?, ?, ?)",
        )
        .bind(page_id)
        .bind(visitor_id)
        .bind(millis(at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn count_visits_for_page(&self, page_id: i64) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM visits WHERE page_id = ?")
            .bind(page_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Whether the visitor produced any visit on the given domain after `since`
    pub async fn has_recent_visit_on_domain(
        &self,
        visitor_id: i64,
        domain: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM visits v
                JOIN pages p ON p.id = v.page_id
                WHERE v.visitor_id = ? AND p.domain = ? AND v.visited_at > ?
            )
            "#,
        )
        .bind(visitor_id)
        .bind(domain)
        .bind(millis(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 != 0)
    }

    // === Sessions ===

    pub async fn find_active_session(
        &self,
        visitor_id: i64,
    ) -> Result<Option<Session>, sqlx::Error> {
        let row: Option<(String, i64, i64, Option<i64>, i64, i64)> = sqlx::query_as(
            r#"
            SELECT id, visitor_id, start_time, end_time, page_views, is_active
            FROM sessions
            WHERE visitor_id = ? AND is_active = 1
            ORDER BY start_time DESC
            LIMIT 1
            "#,
        )
        .bind(visitor_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(session_from_row))
    }

    pub async fn session_by_id(&self, session_id: &str) -> Result<Option<Session>, sqlx::Error> {
        let row: Option<(String, i64, i64, Option<i64>, i64, i64)> = sqlx::query_as(
            "SELECT id, visitor_id, start_time, end_time, page_views, is_active FROM sessions WHERE id = ?",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(session_from_row))
    }

    pub async fn insert_session(&self, session: &Session) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO sessions (id, visitor_id, start_time, end_time, page_views, is_active) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.id)
        .bind(session.visitor_id)
        .bind(millis(session.start_time))
        .bind(session.end_time.map(millis))
        .bind(session.page_views)
        .bind(session.is_active as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Close every active session for the visitor (window-timeout supersession)
    pub async fn close_active_sessions(
        &self,
        visitor_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sessions SET is_active = 0, end_time = COALESCE(end_time, ?) WHERE visitor_id = ? AND is_active = 1",
        )
        .bind(millis(now))
        .bind(visitor_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Returns false if no session has this id. end_time is never overwritten.
    pub async fn close_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sessions SET is_active = 0, end_time = COALESCE(end_time, ?) WHERE id = ?",
        )
        .bind(millis(now))
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_session_page_views(
        &self,
        session_id: &str,
    ) -> Result<(), sqlx::Error> {
        let result = sqlx::query("UPDATE sessions SET page_views = page_views + 1 WHERE id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(())
    }

    // === Blacklist ===

    pub async fn insert_blacklist_marker(
        &self,
        page_id: i64,
        now: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO blacklist (page_id, blacklisted_at) VALUES (?, ?)")
            .bind(page_id)
            .bind(millis(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn remove_blacklist_marker(&self, page_id: i64) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM blacklist WHERE page_id = ?")
            .bind(page_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // === Listings ===

    pub async fn list_pages_with_counts(
        &self,
        domain: Option<&str>,
        hidden: bool,
    ) -> Result<Vec<PageListing>, sqlx::Error> {
        let membership = if hidden {
            "p.id IN (SELECT page_id FROM blacklist)"
        } else {
            "p.id NOT IN (SELECT page_id FROM blacklist)"
        };
        let sql = format!(
            r#"
            SELECT p.id, p.path, p.domain, COUNT(v.page_id) AS visit_count, p.created_at, p.last_hit_at
            FROM pages p
            LEFT JOIN visits v ON v.page_id = p.id
            WHERE {membership} AND (? IS NULL OR p.domain = ?)
            GROUP BY p.id
            ORDER BY visit_count DESC, p.last_hit_at DESC
            "#
        );
        let rows: Vec<(i64, String, Option<String>, i64, i64, i64)> = sqlx::query_as(&sql)
            .bind(domain)
            .bind(domain)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(
                |(id, path, domain, visit_count, created_at, last_hit_at)| PageListing {
                    id,
                    path,
                    domain,
                    visit_count,
                    created_at: from_millis(created_at),
                    last_hit_at: from_millis(last_hit_at),
                },
            )
            .collect())
    }

    // === Aggregate queries (blacklisted pages excluded) ===

    pub async fn count_visits_since(&self, since: DateTime<Utc>) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM visits WHERE visited_at > ? AND page_id NOT IN (SELECT page_id FROM blacklist)",
        )
        .bind(millis(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    /// Visit counts grouped by SQLite day-of-week (0 = Sunday .. 6 = Saturday)
    pub async fn weekday_visit_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(i64, i64)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT CAST(strftime('%w', visited_at / 1000, 'unixepoch') AS INTEGER) AS dow, COUNT(*) AS count
            FROM visits
            WHERE visited_at > ? AND page_id NOT IN (SELECT page_id FROM blacklist)
            GROUP BY dow
            "#,
        )
        .bind(millis(since))
        .fetch_all(&self.pool)
        .await
    }

    pub async fn top_pages_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<(String, Option<String>, i64)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT p.path, p.domain, COUNT(*) AS count
            FROM visits v
            JOIN pages p ON p.id = v.page_id
            WHERE v.visited_at > ? AND v.page_id NOT IN (SELECT page_id FROM blacklist)
            GROUP BY v.page_id
            ORDER BY count DESC
            LIMIT ?
            "#,
        )
        .bind(millis(since))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn count_pages_with_visits_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(DISTINCT page_id) FROM visits WHERE visited_at > ? AND page_id NOT IN (SELECT page_id FROM blacklist)",
        )
        .bind(millis(since))
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0)
    }

    pub async fn domain_visit_counts_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(Option<String>, i64)>, sqlx::Error> {
        sqlx::query_as(
            r#"
            SELECT p.domain, COUNT(*) AS count
            FROM visits v
            JOIN pages p ON p.id = v.page_id
            WHERE v.visited_at > ? AND v.page_id NOT IN (SELECT page_id FROM blacklist)
            GROUP BY p.domain
            ORDER BY count DESC
            "#,
        )
        .bind(millis(since))
        .fetch_all(&self.pool)
        .await
    }
}

fn session_from_row(
    (id, visitor_id, start_time, end_time, page_views, is_active): (
        String,
        i64,
        i64,
        Option<i64>,
        i64,
        i64,
    ),
) -> Session {
    Session {
        id,
        visitor_id,
        start_time: from_millis(start_time),
        end_time: end_time.map(from_millis),
        page_views,
        is_active: is_active != 0,
    }
}

#[cfg(test)]
impl Database {
    /// In-memory database for tests. The pool is capped at one connection so
    /// every handle sees the same memory-backed store.
    pub(crate) async fn open_in_memory() -> Self {
        use sqlx::sqlite::SqlitePoolOptions;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");
        let db = Self { pool };
        db.run_migrations().await.expect("migrations");
        db
    }
}
