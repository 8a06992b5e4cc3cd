//! Session assignment
//!
//! A visitor's activity is grouped into sessions by a sliding window: the
//! caller checks for recent activity on the domain and passes the verdict
//! in. Recent activity continues the current active session; a lapsed window
//! supersedes whatever is still marked active with a fresh session.

use chrono::Utc;
use tracing::warn;
use uuid::Uuid;

use crate::db::{Database, Session};
use crate::error::{Result, TrackError};

#[derive(Clone)]
pub struct SessionAssigner {
    db: Database,
}

impl SessionAssigner {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Continue the visitor's active session or start a new one.
    ///
    /// With `has_recent_activity` the most recent active session is returned
    /// unchanged (or created if none exists). Without it, any lingering
    /// active sessions are closed first and a fresh one is started.
    pub async fn find_or_create(
        &self,
        visitor_id: i64,
        has_recent_activity: bool,
    ) -> Result<Session> {
        if has_recent_activity {
            if let Some(session) = self.db.find_active_session(visitor_id).await? {
                return Ok(session);
            }
            return self.start_session(visitor_id).await;
        }

        self.db.close_active_sessions(visitor_id, Utc::now()).await?;
        self.start_session(visitor_id).await
    }

    async fn start_session(&self, visitor_id: i64) -> Result<Session> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            visitor_id,
            start_time: Utc::now(),
            end_time: None,
            page_views: 0,
            is_active: true,
        };
        self.db.insert_session(&session).await?;
        Ok(session)
    }

    /// Best-effort page-view bump; a failure is logged and swallowed since
    /// the counter is a secondary metric.
    pub async fn increment_page_views(&self, session_id: &str) {
        if let Err(e) = self.db.increment_session_page_views(session_id).await {
            warn!("Failed to increment page views for session {}: {}", session_id, e);
        }
    }

    /// Explicitly close a session. Closing an already-closed session keeps
    /// its original end time.
    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        if !self.db.close_session(session_id, Utc::now()).await? {
            return Err(TrackError::NotFound("session"));
        }
        Ok(())
    }

    pub async fn get(&self, session_id: &str) -> Result<Session> {
        self.db
            .session_by_id(session_id)
            .await?
            .ok_or(TrackError::NotFound("session"))
    }
}
