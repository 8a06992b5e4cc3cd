//! Visit recording orchestration
//!
//! Validates an incoming hit, resolves its page and visitor, decides
//! new-vs-repeat via an atomic per-page dedup insert, wires up the session
//! and returns the page's updated visit count. The dedup is per page, not
//! global: a known visitor still counts the first time they view each
//! distinct page, while refreshes of an already-counted page do not inflate
//! its count.

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::error;

use crate::db::Database;
use crate::error::{Result, TrackError};
use crate::pages::PageRegistry;
use crate::sessions::SessionAssigner;
use crate::visitors::VisitorResolver;

const MAX_PATH_LEN: usize = 2048;
const MAX_DOMAIN_LEN: usize = 253;

/// A normalized incoming hit, as delivered by the transport layer
#[derive(Debug, Clone)]
pub struct Hit {
    pub remote_addr: String,
    pub user_agent: String,
    pub referrer: Option<String>,
    pub country: Option<String>,
    pub path: String,
    pub domain: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HitOutcome {
    pub visit_count: i64,
    pub is_new_visitor: bool,
    /// None when the hit was a repeat view that did not count
    pub session_id: Option<String>,
}

#[derive(Clone)]
pub struct VisitRecorder {
    db: Database,
    pages: PageRegistry,
    visitors: VisitorResolver,
    sessions: SessionAssigner,
    session_window: Duration,
}

impl VisitRecorder {
    pub fn new(db: Database, session_window: Duration) -> Self {
        Self {
            pages: PageRegistry::new(db.clone()),
            visitors: VisitorResolver::new(db.clone()),
            sessions: SessionAssigner::new(db.clone()),
            db,
            session_window,
        }
    }

    /// Record one hit end-to-end and return the page's current visit count
    pub async fn process_hit(&self, hit: Hit) -> Result<HitOutcome> {
        validate(&hit)?;

        let outcome = self.record(&hit).await;
        if let Err(e) = &outcome {
            error!("Hit processing failed for {}{}: {}", hit.domain, hit.path, e);
        }
        outcome
    }

    async fn record(&self, hit: &Hit) -> Result<HitOutcome> {
        let page = self.pages.get_or_create(&hit.path, Some(&hit.domain)).await?;
        let (visitor, is_new_visitor) = self
            .visitors
            .resolve(
                &hit.remote_addr,
                &hit.user_agent,
                hit.referrer.as_deref(),
                hit.country.as_deref(),
            )
            .await?;

        if is_new_visitor {
            // Definitionally a first visit; no dedup decision to make
            self.db
                .insert_visit_if_absent(page.id, visitor.id, Utc::now())
                .await?;
            let session = self.sessions.find_or_create(visitor.id, false).await?;
            self.sessions.increment_page_views(&session.id).await;
            let visit_count = self.db.count_visits_for_page(page.id).await?;
            return Ok(HitOutcome {
                visit_count,
                is_new_visitor: true,
                session_id: Some(session.id),
            });
        }

        // The activity window is judged on visits recorded before this one,
        // so the check precedes the insert.
        let since = Utc::now() - self.session_window;
        let has_recent_activity = self
            .db
            .has_recent_visit_on_domain(visitor.id, &hit.domain, since)
            .await?;

        let counted = self
            .db
            .insert_visit_if_absent(page.id, visitor.id, Utc::now())
            .await?;
        let visit_count = self.db.count_visits_for_page(page.id).await?;

        if !counted {
            // Repeat view of an already-counted page: no session work
            return Ok(HitOutcome {
                visit_count,
                is_new_visitor: false,
                session_id: None,
            });
        }

        let session = self
            .sessions
            .find_or_create(visitor.id, has_recent_activity)
            .await?;
        self.sessions.increment_page_views(&session.id).await;

        Ok(HitOutcome {
            visit_count,
            is_new_visitor: false,
            session_id: Some(session.id),
        })
    }
}

fn validate(hit: &Hit) -> Result<()> {
    let mut problems = Vec::new();

    if hit.path.trim().is_empty() {
        problems.push("path must not be blank".to_string());
    }
    if hit.path.chars().count() > MAX_PATH_LEN {
        problems.push(format!("path exceeds {MAX_PATH_LEN} characters"));
    }

    let domain = hit.domain.trim();
    if domain.is_empty() {
        problems.push("domain must not be blank".to_string());
    } else {
        if domain.chars().count() > MAX_DOMAIN_LEN {
            problems.push(format!("domain exceeds {MAX_DOMAIN_LEN} characters"));
        }
        if !is_valid_hostname(domain) {
            problems.push("domain is not a valid hostname".to_string());
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(TrackError::Validation(problems))
    }
}

/// Conservative hostname grammar: dot-separated labels of 1-63 alphanumeric
/// or hyphen characters, with no label starting or ending in a hyphen.
fn is_valid_hostname(domain: &str) -> bool {
    domain.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(db: &Database) -> VisitRecorder {
        VisitRecorder::new(db.clone(), Duration::minutes(30))
    }

    fn hit(remote_addr: &str, user_agent: &str, path: &str, domain: &str) -> Hit {
        Hit {
            remote_addr: remote_addr.to_string(),
            user_agent: user_agent.to_string(),
            referrer: None,
            country: None,
            path: path.to_string(),
            domain: domain.to_string(),
        }
    }

    #[tokio::test]
    async fn first_hit_counts_and_repeat_does_not() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        let first = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();
        assert_eq!(first.visit_count, 1);
        assert!(first.is_new_visitor);
        assert!(first.session_id.is_some());

        let repeat = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();
        assert_eq!(repeat.visit_count, 1);
        assert!(!repeat.is_new_visitor);
        assert!(repeat.session_id.is_none());
    }

    #[tokio::test]
    async fn known_visitor_still_counts_on_a_new_page() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        let first = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();

        let other_page = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/about", "site.com"))
            .await
            .unwrap();
        assert_eq!(other_page.visit_count, 1);
        assert!(!other_page.is_new_visitor);

        // Activity on the same domain within the window continues the session
        assert_eq!(other_page.session_id, first.session_id);
    }

    #[tokio::test]
    async fn distinct_visitors_count_independently() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();
        let second = recorder
            .process_hit(hit("5.6.7.8", "UA-B", "/home", "site.com"))
            .await
            .unwrap();
        assert_eq!(second.visit_count, 2);
        assert!(second.is_new_visitor);
    }

    #[tokio::test]
    async fn activity_on_another_domain_starts_a_new_session() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        let first = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();
        let elsewhere = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "elsewhere.com"))
            .await
            .unwrap();

        assert!(elsewhere.session_id.is_some());
        assert_ne!(elsewhere.session_id, first.session_id);

        // The earlier session was superseded
        let previous = db
            .session_by_id(first.session_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(!previous.is_active);
    }

    #[tokio::test]
    async fn session_page_views_follow_counted_visits() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        let first = recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();
        recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/home", "site.com"))
            .await
            .unwrap();
        recorder
            .process_hit(hit("1.2.3.4", "UA-A", "/about", "site.com"))
            .await
            .unwrap();

        let session = db
            .session_by_id(first.session_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        // Two counted visits; the uncounted refresh does not bump the counter
        assert_eq!(session.page_views, 2);
    }

    #[tokio::test]
    async fn validation_collects_every_violation() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        let result = recorder.process_hit(hit("1.2.3.4", "UA-A", " ", "")).await;
        match result {
            Err(TrackError::Validation(messages)) => {
                assert_eq!(messages.len(), 2);
                assert!(messages.iter().any(|m| m.contains("path")));
                assert!(messages.iter().any(|m| m.contains("domain")));
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_path_is_rejected() {
        let db = Database::open_in_memory().await;
        let recorder = recorder(&db);

        let long_path = format!("/{}", "a".repeat(MAX_PATH_LEN));
        let result = recorder
            .process_hit(hit("1.2.3.4", "UA-A", &long_path, "site.com"))
            .await;
        assert!(matches!(result, Err(TrackError::Validation(_))));
    }

    #[test]
    fn hostname_grammar() {
        assert!(is_valid_hostname("site.com"));
        assert!(is_valid_hostname("sub.site-name.co.uk"));
        assert!(is_valid_hostname("localhost"));
        assert!(is_valid_hostname("xn--bcher-kva.example"));

        assert!(!is_valid_hostname("-site.com"));
        assert!(!is_valid_hostname("site-.com"));
        assert!(!is_valid_hostname("site..com"));
        assert!(!is_valid_hostname("site.com."));
        assert!(!is_valid_hostname("si te.com"));
        assert!(!is_valid_hostname("site_.com"));
        assert!(!is_valid_hostname(&format!("{}.com", "a".repeat(64))));
    }
}
